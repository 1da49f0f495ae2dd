//! SQLite-backed message store
//!
//! The message store is the single writable source of truth for message
//! fields. It owns an append-only per-conversation log; delivery/read flags
//! are the only mutable fields and only ever move forward.
//!
//! The store doubles as the sync backend contract: it exposes a capability
//! probe plus an optional change feed, so the sync coordinator can run in
//! push mode against backends that stream changes and fall back to polling
//! against backends that only support reads.

use crate::{
    Error, Result,
    clock::{SharedClock, system_clock},
    storage::message::{Message, MessageBody},
};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Capacity of the store change feed
const STORE_CHANNEL_CAPACITY: usize = 256;

/// Kind of change a store event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    /// A new message was appended
    MessageAppended,
    /// Delivery/read flags advanced on existing messages
    FlagsUpdated,
}

/// A change notification from the store's push feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Conversation the change belongs to
    pub conversation_id: String,
    /// What changed
    pub kind: StoreEventKind,
}

/// Input for appending a message; id, timestamp and flags are stamped by
/// the store
#[derive(Debug, Clone)]
pub struct MessageDraft {
    /// Canonical conversation id
    pub conversation_id: String,
    /// Sender durable id
    pub sender_id: String,
    /// Sender display name, frozen into the message
    pub sender_name: String,
    /// Recipient durable id
    pub recipient_id: String,
    /// Recipient display name, frozen into the message
    pub recipient_name: String,
    /// Text or file content
    pub body: MessageBody,
    /// Presence hint: whether the counterpart is currently online
    ///
    /// This stamps the optimistic `delivered` flag. It is a coarse
    /// heuristic, not a device acknowledgement of this specific message.
    pub counterpart_online: bool,
}

/// Backend contract for message persistence and synchronization
///
/// Any document store offering per-conversation reads satisfies the poll
/// half; one that also streams changes satisfies the push half via
/// [`ChatStore::subscribe`].
pub trait ChatStore: Send + Sync {
    /// Validate and persist a message, stamping id, timestamp and flags
    fn append(&self, draft: MessageDraft) -> Result<Message>;

    /// All messages of one conversation, ascending by creation time
    ///
    /// The listing is a consistent snapshot; readers never observe a
    /// partially written message.
    fn list_conversation(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// All messages the identity sent or received, ascending by creation time
    fn list_for_identity(&self, identity_id: &str) -> Result<Vec<Message>>;

    /// Advance all undelivered messages addressed to `recipient_id` in the
    /// conversation to Delivered; returns how many rows changed
    fn mark_delivered(&self, conversation_id: &str, recipient_id: &str) -> Result<usize>;

    /// Advance all unread messages addressed to `recipient_id` in the
    /// conversation to Read (setting Delivered on the way when unset);
    /// returns how many rows changed
    fn mark_read(&self, conversation_id: &str, recipient_id: &str) -> Result<usize>;

    /// Advance all undelivered messages addressed to `recipient_id` in any
    /// conversation to Delivered (app-wide visibility hook); returns how
    /// many rows changed
    fn mark_all_delivered(&self, recipient_id: &str) -> Result<usize>;

    /// Unread messages addressed to the identity across all conversations
    fn unread_count(&self, recipient_id: &str) -> Result<usize>;

    /// Capability probe: whether this backend streams changes
    fn supports_push(&self) -> bool;

    /// Change feed for push mode; `None` when the backend is poll-only
    ///
    /// Events cover all conversations; subscribers filter by id.
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>>;
}

/// SQLite implementation of the store contract
pub struct SqliteStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<StoreEvent>,
    push: bool,
    clock: SharedClock,
}

impl SqliteStore {
    /// Open (or create) a store at the given database path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for tests)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let (events, _) = broadcast::channel(STORE_CHANNEL_CAPACITY);
        let store = Self {
            conn: Mutex::new(conn),
            events,
            push: true,
            clock: system_clock(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Disable the change feed, modeling a backend that only supports reads
    pub fn poll_only(mut self) -> Self {
        self.push = false;
        self
    }

    /// Replace the clock (for tests)
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock_conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                recipient_name TEXT NOT NULL,
                body TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                delivered INTEGER NOT NULL,
                delivered_at INTEGER,
                is_read INTEGER NOT NULL,
                read_at INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, timestamp)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient
             ON messages(recipient_id, is_read)",
            [],
        )?;

        Ok(())
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, conversation_id: &str, kind: StoreEventKind) {
        if !self.push {
            return;
        }
        // Nobody subscribed is fine; poll mode never listens.
        let _ = self.events.send(StoreEvent {
            conversation_id: conversation_id.to_string(),
            kind,
        });
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let body_json: String = row.get(6)?;
        let body: MessageBody = serde_json::from_str(&body_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            recipient_id: row.get(4)?,
            recipient_name: row.get(5)?,
            body,
            timestamp: row.get(7)?,
            delivered: row.get::<_, i64>(8)? != 0,
            delivered_at: row.get(9)?,
            read: row.get::<_, i64>(10)? != 0,
            read_at: row.get(11)?,
        })
    }

    const SELECT_COLUMNS: &'static str = "id, conversation_id, sender_id, sender_name, \
         recipient_id, recipient_name, body, timestamp, delivered, delivered_at, is_read, read_at";

    fn write_flags(conn: &Connection, message: &Message) -> Result<()> {
        conn.execute(
            "UPDATE messages SET delivered = ?2, delivered_at = ?3, is_read = ?4, read_at = ?5
             WHERE id = ?1",
            params![
                message.id,
                message.delivered as i64,
                message.delivered_at,
                message.read as i64,
                message.read_at,
            ],
        )?;
        Ok(())
    }
}

impl ChatStore for SqliteStore {
    fn append(&self, draft: MessageDraft) -> Result<Message> {
        if let MessageBody::Text { text } = &draft.body {
            if text.trim().is_empty() {
                return Err(Error::EmptyMessage);
            }
        }

        let now = self.clock.now_ms();
        let delivered = draft.counterpart_online;
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            sender_name: draft.sender_name,
            recipient_id: draft.recipient_id,
            recipient_name: draft.recipient_name,
            body: draft.body,
            timestamp: now,
            delivered,
            delivered_at: delivered.then_some(now),
            read: false,
            read_at: None,
        };

        let body_json = serde_json::to_string(&message.body)?;
        {
            let conn = self.lock_conn();
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, sender_name,
                     recipient_id, recipient_name, body, timestamp,
                     delivered, delivered_at, is_read, read_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.sender_name,
                    message.recipient_id,
                    message.recipient_name,
                    body_json,
                    message.timestamp,
                    message.delivered as i64,
                    message.delivered_at,
                    message.read as i64,
                    message.read_at,
                ],
            )?;
        }

        tracing::debug!(
            "Appended message {} to conversation {}",
            message.id,
            message.conversation_id
        );
        self.emit(&message.conversation_id, StoreEventKind::MessageAppended);
        Ok(message)
    }

    fn list_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC, id ASC",
            Self::SELECT_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![conversation_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn list_for_identity(&self, identity_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE sender_id = ?1 OR recipient_id = ?1
             ORDER BY timestamp ASC, id ASC",
            Self::SELECT_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![identity_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn mark_delivered(&self, conversation_id: &str, recipient_id: &str) -> Result<usize> {
        let now = self.clock.now_ms();
        let updated = {
            let mut conn = self.lock_conn();
            let tx = conn.transaction()?;
            let mut pending = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id = ?1 AND recipient_id = ?2
                       AND delivered = 0 AND is_read = 0",
                    Self::SELECT_COLUMNS
                ))?;
                stmt.query_map(params![conversation_id, recipient_id], Self::row_to_message)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let mut updated = 0;
            for message in &mut pending {
                if message.mark_delivered(now) {
                    Self::write_flags(&tx, message)?;
                    updated += 1;
                }
            }
            tx.commit()?;
            updated
        };

        if updated > 0 {
            tracing::debug!(
                "Marked {} messages delivered in {}",
                updated,
                conversation_id
            );
            self.emit(conversation_id, StoreEventKind::FlagsUpdated);
        }
        Ok(updated)
    }

    fn mark_read(&self, conversation_id: &str, recipient_id: &str) -> Result<usize> {
        let now = self.clock.now_ms();
        let updated = {
            let mut conn = self.lock_conn();
            let tx = conn.transaction()?;
            let mut pending = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id = ?1 AND recipient_id = ?2 AND is_read = 0",
                    Self::SELECT_COLUMNS
                ))?;
                stmt.query_map(params![conversation_id, recipient_id], Self::row_to_message)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let mut updated = 0;
            for message in &mut pending {
                if message.mark_read(now) {
                    Self::write_flags(&tx, message)?;
                    updated += 1;
                }
            }
            tx.commit()?;
            updated
        };

        if updated > 0 {
            tracing::debug!("Marked {} messages read in {}", updated, conversation_id);
            self.emit(conversation_id, StoreEventKind::FlagsUpdated);
        }
        Ok(updated)
    }

    fn mark_all_delivered(&self, recipient_id: &str) -> Result<usize> {
        let now = self.clock.now_ms();
        let (updated, touched) = {
            let mut conn = self.lock_conn();
            let tx = conn.transaction()?;
            let mut pending = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE recipient_id = ?1 AND delivered = 0 AND is_read = 0",
                    Self::SELECT_COLUMNS
                ))?;
                stmt.query_map(params![recipient_id], Self::row_to_message)?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let mut updated = 0;
            let mut touched: Vec<String> = Vec::new();
            for message in &mut pending {
                if message.mark_delivered(now) {
                    Self::write_flags(&tx, message)?;
                    updated += 1;
                    if !touched.contains(&message.conversation_id) {
                        touched.push(message.conversation_id.clone());
                    }
                }
            }
            tx.commit()?;
            (updated, touched)
        };

        for conversation_id in &touched {
            self.emit(conversation_id, StoreEventKind::FlagsUpdated);
        }
        if updated > 0 {
            tracing::debug!(
                "Marked {} messages delivered across {} conversations",
                updated,
                touched.len()
            );
        }
        Ok(updated)
    }

    fn unread_count(&self, recipient_id: &str) -> Result<usize> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND is_read = 0",
            params![recipient_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn supports_push(&self) -> bool {
        self.push
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.push.then(|| self.events.subscribe())
    }
}
