use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;
use parley_types::models::{Attachment, MessageView, SenderInfo};

use crate::error::GatewayError;
use crate::presence::Session;
use crate::rooms::Room;
use crate::state::GatewayState;

/// Create a message in a chat and fan it out to the chat room.
///
/// 1. membership check, by `(chat_id, member = caller)`; failure aborts with nothing written
/// 2. persist the message (sender seeded into read-by); failure aborts
/// 3. advance the chat summary; failure is logged, the message still goes out
/// 4. broadcast to every subscriber of the chat room, sender's connections included
/// 5. hand members with no live connection to the offline notifier
///
/// Calls for one connection run one at a time, so a sender's messages are
/// broadcast in the order they were posted.
pub async fn post_message(
    state: &GatewayState,
    session: &Session,
    chat_id: Uuid,
    content: Option<String>,
    attachments: Vec<Attachment>,
) -> Result<MessageView, GatewayError> {
    let content = content.filter(|c| !c.trim().is_empty());
    if content.is_none() && attachments.is_empty() {
        return Err(GatewayError::EmptyMessage);
    }

    let sender_id = session.user_id();
    let chat = state
        .store
        .find_chat_for_member(chat_id, sender_id)
        .await?
        .ok_or(GatewayError::AccessDenied)?;

    let message = MessageView {
        id: Uuid::new_v4(),
        chat_id: chat.id,
        sender: SenderInfo {
            id: sender_id,
            username: session.user.username.clone(),
            display_name: session.user.display_name.clone(),
            avatar_url: session.user.avatar_url.clone(),
        },
        content,
        attachments,
        read_by: vec![sender_id],
        created_at: Utc::now(),
    };

    if let Err(e) = state.store.insert_message(&message).await {
        error!(
            "Failed to persist message from {} in chat {}: {:#}",
            sender_id, chat.id, e
        );
        return Err(GatewayError::Store(e));
    }

    if let Err(e) = state
        .store
        .update_chat_last_message(chat.id, message.id, message.created_at)
        .await
    {
        // The message store is authoritative; reconciliation repairs the summary.
        warn!("Failed to update summary of chat {}: {:#}", chat.id, e);
    }

    let delivered = state
        .dispatcher
        .emit_to_room(Room::Chat(chat.id), ServerEvent::MessageReceived(message.clone()))
        .await;
    debug!(
        "Message {} in chat {} delivered to {} connection(s)",
        message.id, chat.id, delivered
    );

    notify_offline_members(state, &message).await;

    Ok(message)
}

async fn notify_offline_members(state: &GatewayState, message: &MessageView) {
    let members = match state.store.chat_member_ids(message.chat_id).await {
        Ok(members) => members,
        Err(e) => {
            warn!("Could not load members of chat {}: {:#}", message.chat_id, e);
            return;
        }
    };

    for member in members {
        if member == message.sender.id {
            continue;
        }
        if !state.dispatcher.is_online(member).await {
            state.notifier.notify(member, message);
        }
    }
}
