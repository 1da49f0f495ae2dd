//! Message structures and the delivery/read state machine

use serde::{Deserialize, Serialize};

/// Descriptor of a transferred file, as returned by the transfer collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Original file name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type
    pub mime: String,
    /// Download URL
    pub url: String,
}

/// Message content: exactly one of text or file, enforced by the type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageBody {
    /// Plain text message (non-empty)
    Text {
        /// The text content
        text: String,
    },
    /// File message carrying a transfer descriptor
    File {
        /// The transferred file
        file: FileDescriptor,
    },
}

impl MessageBody {
    /// Short preview line for conversation rows
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Text { text } => text.clone(),
            MessageBody::File { file } => format!("📎 {}", file.name),
        }
    }

    /// Whether this is a file message
    pub fn is_file(&self) -> bool {
        matches!(self, MessageBody::File { .. })
    }
}

/// Derived position in the Sent → Delivered → Read progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Persisted but not yet delivered to the recipient
    Sent,
    /// Delivered to the recipient's device
    Delivered,
    /// Read by the recipient
    Read,
}

/// A stored direct message
///
/// Immutable after append except the delivery/read fields, which only move
/// forward. Sender/recipient display names are frozen at send time; every
/// other surface re-resolves names at render time.
///
/// Timestamps are assigned client-side at send time, so cross-sender clock
/// skew can misorder messages from different devices; ordering is only
/// guaranteed per conversation per sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    pub id: String,
    /// Canonical conversation id
    pub conversation_id: String,
    /// Sender durable id
    pub sender_id: String,
    /// Sender display name at send time
    pub sender_name: String,
    /// Recipient durable id
    pub recipient_id: String,
    /// Recipient display name at send time
    pub recipient_name: String,
    /// Text or file content
    pub body: MessageBody,
    /// Creation timestamp (Unix ms, client-assigned)
    pub timestamp: i64,
    /// Whether the message reached the recipient's device
    pub delivered: bool,
    /// When delivery happened (Unix ms)
    #[serde(default)]
    pub delivered_at: Option<i64>,
    /// Whether the recipient read the message
    pub read: bool,
    /// When the read happened (Unix ms)
    #[serde(default)]
    pub read_at: Option<i64>,
}

impl Message {
    /// Derived delivery state
    pub fn delivery_state(&self) -> DeliveryState {
        if self.read {
            DeliveryState::Read
        } else if self.delivered {
            DeliveryState::Delivered
        } else {
            DeliveryState::Sent
        }
    }

    /// Advance to Delivered, if not already there
    ///
    /// Idempotent: a repeated call never changes `delivered_at`.
    pub fn mark_delivered(&mut self, now_ms: i64) -> bool {
        if self.delivered {
            return false;
        }
        self.delivered = true;
        self.delivered_at = Some(now_ms);
        true
    }

    /// Advance to Read, passing through Delivered when unset
    ///
    /// Read always implies delivered; the `read ⇒ delivered` invariant
    /// holds under any call sequence. Idempotent: a repeated call never
    /// changes `read_at` or `delivered_at`.
    pub fn mark_read(&mut self, now_ms: i64) -> bool {
        if self.read {
            return false;
        }
        if !self.delivered {
            self.delivered = true;
            self.delivered_at = Some(now_ms);
        }
        self.read = true;
        self.read_at = Some(now_ms);
        true
    }

    /// Human-readable delivery indicator
    pub fn status_indicator(&self) -> &str {
        match self.delivery_state() {
            DeliveryState::Sent => "✓",
            DeliveryState::Delivered => "✓✓",
            DeliveryState::Read => "✓✓•",
        }
    }
}
