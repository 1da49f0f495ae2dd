//! Conversation list projection
//!
//! A conversation row is never persisted; it is always recomputed by
//! folding the message log, which keeps it free of dual-write drift. One
//! row per conversation, newest first.

use crate::presence::{PresenceSnapshot, PresenceTracker};
use crate::storage::message::Message;
use std::collections::HashMap;

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Canonical conversation id
    pub conversation_id: String,
    /// Other-party durable id
    pub counterpart_id: String,
    /// Other-party display name as frozen in the newest message
    ///
    /// Render layers re-resolve the name through the directory; this is
    /// only the fallback for identities that vanished from it.
    pub counterpart_name: String,
    /// Preview of the newest message ("📎 name" for files)
    pub preview: String,
    /// Timestamp of the newest message (Unix ms)
    pub last_message_at: i64,
    /// Whether the newest message carries a file
    pub last_is_file: bool,
    /// Whether the newest message was sent by the current identity
    pub last_from_me: bool,
    /// Delivered flag of the newest message
    pub last_delivered: bool,
    /// Read flag of the newest message
    pub last_read: bool,
    /// Messages addressed to the current identity and not yet read
    pub unread_count: usize,
    /// Other-party presence at build time
    pub presence: PresenceSnapshot,
}

impl ConversationSummary {
    /// Whether the row should render as unread
    pub fn unread(&self) -> bool {
        self.unread_count > 0
    }
}

/// Fold a message log into one row per conversation, newest first
///
/// `messages` is everything the current identity sent or received, in any
/// order. Presence is snapshotted per counterpart at build time.
pub fn build_conversations(
    messages: &[Message],
    me_id: &str,
    presence: &PresenceTracker,
) -> Vec<ConversationSummary> {
    let mut rows: HashMap<String, ConversationSummary> = HashMap::new();

    for msg in messages {
        let from_me = msg.sender_id == me_id;
        let (counterpart_id, counterpart_name) = if from_me {
            (msg.recipient_id.clone(), msg.recipient_name.clone())
        } else {
            (msg.sender_id.clone(), msg.sender_name.clone())
        };
        let unread_here = msg.recipient_id == me_id && !msg.read;

        match rows.get_mut(&msg.conversation_id) {
            None => {
                let snapshot = presence.get_presence(&counterpart_id);
                rows.insert(
                    msg.conversation_id.clone(),
                    ConversationSummary {
                        conversation_id: msg.conversation_id.clone(),
                        counterpart_id,
                        counterpart_name,
                        preview: msg.body.preview(),
                        last_message_at: msg.timestamp,
                        last_is_file: msg.body.is_file(),
                        last_from_me: from_me,
                        last_delivered: msg.delivered,
                        last_read: msg.read,
                        unread_count: usize::from(unread_here),
                        presence: snapshot,
                    },
                );
            }
            Some(row) => {
                // >= so a same-millisecond message later in the log wins,
                // agreeing with the store's (timestamp, id) ordering
                if msg.timestamp >= row.last_message_at {
                    row.preview = msg.body.preview();
                    row.last_message_at = msg.timestamp;
                    row.last_is_file = msg.body.is_file();
                    row.last_from_me = from_me;
                    row.last_delivered = msg.delivered;
                    row.last_read = msg.read;
                }
                if unread_here {
                    row.unread_count += 1;
                }
            }
        }
    }

    let mut list: Vec<ConversationSummary> = rows.into_values().collect();
    list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    list
}
