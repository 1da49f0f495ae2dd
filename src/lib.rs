//! Reelchat - realtime direct-messaging core
//!
//! This library provides the messaging subsystem shared by the Reelchat
//! clients: message persistence, delivery/read acknowledgement, presence
//! (online/last-seen), typing indicators and a dual-transport sync
//! coordinator that behaves identically whether the backend supports push
//! subscriptions or only periodic polling.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod identity;
pub mod messaging;
pub mod presence;
pub mod storage;
pub mod sync;
pub mod transfer;
pub mod typing;

/// Result type alias for Reelchat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Reelchat operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Recipient display name could not be resolved to a durable id
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// Attempt to open a conversation with oneself
    #[error("Cannot send a message to yourself")]
    SelfMessage,

    /// Text message with empty content and no file attachment
    #[error("Empty message")]
    EmptyMessage,

    /// File exceeds the transfer ceiling
    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge {
        /// Actual file size in bytes
        size: u64,
        /// Maximum allowed size in bytes
        limit: u64,
    },

    /// Transient network or backend failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Push subscription channel failure
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Storage operation error
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize the Reelchat library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}

#[cfg(test)]
mod tests;
