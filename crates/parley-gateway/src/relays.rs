//! Room join/leave and the stateless signal relays: typing, read receipts,
//! friend-request notices. Nothing here is replayed to late subscribers.

use tracing::{debug, info};
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::error::GatewayError;
use crate::presence::Session;
use crate::rooms::Room;
use crate::state::GatewayState;

/// Subscribe the connection to a chat room. Membership is re-checked here:
/// joining a room grants visibility into everything posted to it.
pub async fn join_chat(state: &GatewayState, session: &Session, chat_id: Uuid) -> Result<bool, GatewayError> {
    state
        .store
        .find_chat_for_member(chat_id, session.user_id())
        .await?
        .ok_or(GatewayError::AccessDenied)?;

    let joined = state.dispatcher.join(session.conn_id, Room::Chat(chat_id)).await;
    if joined {
        info!("{} ({}) joined chat {}", session.user.username, session.user_id(), chat_id);
    }
    Ok(joined)
}

/// Unsubscribe. Only ever removes visibility, so no membership check.
pub async fn leave_chat(state: &GatewayState, session: &Session, chat_id: Uuid) -> bool {
    let left = state.dispatcher.leave(session.conn_id, Room::Chat(chat_id)).await;
    if left {
        info!("{} ({}) left chat {}", session.user.username, session.user_id(), chat_id);
    }
    left
}

/// Relay a typing indicator to the rest of the chat room. Dropped unless the
/// connection is itself subscribed to the room.
pub async fn typing(state: &GatewayState, session: &Session, chat_id: Uuid, is_typing: bool) -> usize {
    let room = Room::Chat(chat_id);
    if !state.dispatcher.is_subscribed(session.conn_id, room).await {
        debug!(
            "Dropping typing signal from {} for unsubscribed chat {}",
            session.user_id(),
            chat_id
        );
        return 0;
    }

    state
        .dispatcher
        .emit_to_room_except(
            room,
            session.conn_id,
            ServerEvent::UserTyping {
                user_id: session.user_id(),
                chat_id,
                is_typing,
            },
        )
        .await
}

/// Mark every message in the chat written by someone else as read by the
/// caller, then tell the rest of the room. Repeating it changes nothing.
pub async fn mark_read(state: &GatewayState, session: &Session, chat_id: Uuid) -> Result<usize, GatewayError> {
    let user_id = session.user_id();
    state
        .store
        .find_chat_for_member(chat_id, user_id)
        .await?
        .ok_or(GatewayError::AccessDenied)?;

    let marked = state.store.mark_chat_read(chat_id, user_id).await?;
    debug!("{} marked {} message(s) read in chat {}", user_id, marked, chat_id);

    state
        .dispatcher
        .emit_to_room_except(
            Room::Chat(chat_id),
            session.conn_id,
            ServerEvent::MessagesRead { user_id, chat_id },
        )
        .await;
    Ok(marked)
}

/// Tell `recipient_id` they have a new friend request. The request record
/// itself is owned by the REST layer.
pub async fn friend_request_sent(state: &GatewayState, session: &Session, recipient_id: Uuid) -> usize {
    if recipient_id == session.user_id() {
        debug!("Ignoring friend request signal addressed to self ({})", recipient_id);
        return 0;
    }
    state
        .dispatcher
        .send_to_user(
            recipient_id,
            ServerEvent::FriendRequestReceived {
                sender_id: session.user_id(),
            },
        )
        .await
}

/// Tell the original requester that the caller accepted.
pub async fn friend_request_accepted(state: &GatewayState, session: &Session, sender_id: Uuid) -> usize {
    if sender_id == session.user_id() {
        debug!("Ignoring friend acceptance signal addressed to self ({})", sender_id);
        return 0;
    }
    state
        .dispatcher
        .send_to_user(
            sender_id,
            ServerEvent::FriendRequestAccepted {
                accepter_id: session.user_id(),
            },
        )
        .await
}
