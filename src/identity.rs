//! Chat identity resolution
//!
//! Derives a canonical, order-independent conversation id from two
//! participant identities, and resolves a typed display name to a durable
//! id on first contact via the external user directory.
//!
//! Display names are unique at any instant but mutable over time, so chat
//! code re-resolves them at render time. The one exception is persisted
//! messages, which freeze sender/recipient names at send time.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Separator between the two sorted participant ids
const CONVERSATION_ID_SEPARATOR: &str = "_";

/// A participant identity as known to the user directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Stable, durable id
    pub id: String,
    /// Display name (mutable over time, unique at any instant)
    pub display_name: String,
    /// Avatar URL, if the user set one
    pub avatar_url: Option<String>,
    /// Online flag at directory-snapshot time
    pub online: bool,
    /// Last-seen timestamp (Unix ms), if ever seen offline
    pub last_seen: Option<i64>,
}

impl Identity {
    /// Avatar URL with a generated fallback for identities without one
    pub fn avatar_or_default(&self) -> String {
        match &self.avatar_url {
            Some(url) => url.clone(),
            None => format!(
                "https://ui-avatars.com/api/?name={}&background=random&size=64",
                urlencode(&self.display_name)
            ),
        }
    }
}

/// Minimal percent-encoding for avatar fallback URLs
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// External user directory collaborator
///
/// The directory owns identity storage and display-name uniqueness; chat
/// code only reads from it.
pub trait UserDirectory: Send + Sync {
    /// Look up an identity by display name
    fn resolve_by_name(&self, name: &str) -> Option<Identity>;
    /// Look up an identity by durable id
    fn resolve_by_id(&self, id: &str) -> Option<Identity>;
    /// The locally authenticated identity, if any
    fn current_identity(&self) -> Option<Identity>;
}

/// How a message addresses its counterpart: durable id, typed name, or both
#[derive(Debug, Clone, Default)]
pub struct CounterpartRef {
    /// Durable id, authoritative when present
    pub id: Option<String>,
    /// Typed display name, used for directory lookup when no id is given
    pub name: Option<String>,
}

impl CounterpartRef {
    /// Address by durable id
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    /// Address by typed display name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }
}

/// Result of resolving a counterpart into a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConversation {
    /// Canonical conversation id for the participant pair
    pub conversation_id: String,
    /// Counterpart durable id
    pub counterpart_id: String,
    /// Counterpart display name at resolution time
    pub counterpart_name: String,
}

/// Derive the canonical conversation id for an unordered pair of ids
///
/// Deterministic and commutative: `conversation_id(a, b) ==
/// conversation_id(b, a)`. No separate "create conversation" step exists;
/// the id is the conversation.
pub fn conversation_id(id_a: &str, id_b: &str) -> String {
    let mut pair = [id_a, id_b];
    pair.sort_unstable();
    pair.join(CONVERSATION_ID_SEPARATOR)
}

/// Resolve a counterpart reference into a conversation
///
/// An id, if given, is authoritative. A name-only counterpart triggers a
/// directory lookup; an unresolvable name is rejected with
/// [`Error::RecipientNotFound`] since id derivation needs two stable ids.
/// Addressing oneself is rejected with [`Error::SelfMessage`].
pub fn resolve_conversation(
    directory: &dyn UserDirectory,
    local: &Identity,
    counterpart: &CounterpartRef,
) -> Result<ResolvedConversation> {
    let (counterpart_id, counterpart_name) = match (&counterpart.id, &counterpart.name) {
        (Some(id), name) => {
            // Id is authoritative; refresh the name from the directory when
            // possible, falling back to whatever the caller typed.
            let resolved = directory.resolve_by_id(id);
            let name = resolved
                .map(|identity| identity.display_name)
                .or_else(|| name.clone())
                .unwrap_or_else(|| id.clone());
            (id.clone(), name)
        }
        (None, Some(name)) => {
            let identity = directory
                .resolve_by_name(name.trim())
                .ok_or_else(|| Error::RecipientNotFound(name.trim().to_string()))?;
            (identity.id, identity.display_name)
        }
        (None, None) => return Err(Error::RecipientNotFound(String::new())),
    };

    if counterpart_id == local.id {
        return Err(Error::SelfMessage);
    }

    Ok(ResolvedConversation {
        conversation_id: conversation_id(&local.id, &counterpart_id),
        counterpart_id,
        counterpart_name,
    })
}

/// Extract the counterpart id from a conversation id, given the local id
///
/// Participant ids may themselves contain the separator, so the id is
/// matched as a prefix or suffix rather than split. Returns `None` when
/// the local id is not a participant.
pub fn counterpart_of(conversation_id: &str, local_id: &str) -> Option<String> {
    if local_id.is_empty() {
        return None;
    }
    conversation_id
        .strip_prefix(&format!("{local_id}{CONVERSATION_ID_SEPARATOR}"))
        .or_else(|| {
            conversation_id.strip_suffix(&format!("{CONVERSATION_ID_SEPARATOR}{local_id}"))
        })
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
}
