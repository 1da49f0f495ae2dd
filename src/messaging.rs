//! High-level send path
//!
//! User-facing send functions that combine identity resolution, presence
//! hints and the message store. Collaborators are passed in explicitly;
//! there is no global service singleton.
//!
//! Validation errors (`RecipientNotFound`, `SelfMessage`, `EmptyMessage`,
//! `FileTooLarge`) surface before any store write or transfer call. Send
//! failures surface to the caller and are never auto-queued; the user
//! resubmits.

use crate::{
    Error, Result,
    identity::{CounterpartRef, Identity, ResolvedConversation, UserDirectory, resolve_conversation},
    presence::PresenceTracker,
    storage::{ChatStore, Message, MessageBody, MessageDraft},
    transfer::{FileTransfer, FileUpload, ensure_transferable},
    typing::TypingTracker,
};

/// Send a text message
///
/// Resolves the counterpart (directory lookup on first contact), forces the
/// sender's typing signal to `false`, stamps the optimistic delivered hint
/// from the counterpart's presence and appends to the store. Sender and
/// recipient display names are frozen into the message at send time.
pub async fn send_text<S: ChatStore>(
    directory: &dyn UserDirectory,
    store: &S,
    presence: &PresenceTracker,
    typing: &TypingTracker,
    local: &Identity,
    to: &CounterpartRef,
    text: &str,
) -> Result<Message> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::EmptyMessage);
    }

    let resolved = resolve_conversation(directory, local, to)?;
    typing.set_typing(&resolved.conversation_id, &local.id, false);

    let message = store.append(draft_for(
        local,
        &resolved,
        MessageBody::Text {
            text: text.to_string(),
        },
        presence,
    ))?;

    tracing::info!(
        "Message {} sent to {} (delivered hint: {})",
        message.id,
        resolved.counterpart_id,
        message.delivered
    );
    Ok(message)
}

/// Send a file message
///
/// The size ceiling is checked before the transfer collaborator is
/// invoked; an oversized file never reaches the network.
pub async fn send_file<S: ChatStore, T: FileTransfer>(
    directory: &dyn UserDirectory,
    store: &S,
    presence: &PresenceTracker,
    typing: &TypingTracker,
    transfer: &T,
    local: &Identity,
    to: &CounterpartRef,
    upload: FileUpload,
) -> Result<Message> {
    ensure_transferable(upload.size)?;

    let resolved = resolve_conversation(directory, local, to)?;
    typing.set_typing(&resolved.conversation_id, &local.id, false);

    let file = transfer.upload(&resolved.conversation_id, upload).await?;
    let message = store.append(draft_for(
        local,
        &resolved,
        MessageBody::File { file },
        presence,
    ))?;

    tracing::info!(
        "File message {} sent to {}",
        message.id,
        resolved.counterpart_id
    );
    Ok(message)
}

fn draft_for(
    local: &Identity,
    resolved: &ResolvedConversation,
    body: MessageBody,
    presence: &PresenceTracker,
) -> MessageDraft {
    MessageDraft {
        conversation_id: resolved.conversation_id.clone(),
        sender_id: local.id.clone(),
        sender_name: local.display_name.clone(),
        recipient_id: resolved.counterpart_id.clone(),
        recipient_name: resolved.counterpart_name.clone(),
        body,
        counterpart_online: presence.get_presence(&resolved.counterpart_id).online,
    }
}

/// Total unread messages addressed to an identity, across conversations
///
/// Drives the app-wide badge on the messages tab.
pub fn unread_total<S: ChatStore>(store: &S, me_id: &str) -> Result<usize> {
    store.unread_count(me_id)
}
