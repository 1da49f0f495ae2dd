//! Message persistence
//!
//! This module owns everything stored: the message log, the delivery/read
//! state machine on individual messages, and the derived conversation
//! list projection.
//!
//! The module is organized into submodules:
//! - `message` - message structures and delivery/read transitions
//! - `store_db` - backend contract and the SQLite implementation
//! - `conversation` - derived conversation list (never persisted)

pub mod conversation;
pub mod message;
pub mod store_db;

// Re-export commonly used types
pub use conversation::{ConversationSummary, build_conversations};
pub use message::{DeliveryState, FileDescriptor, Message, MessageBody};
pub use store_db::{ChatStore, MessageDraft, SqliteStore, StoreEvent, StoreEventKind};
