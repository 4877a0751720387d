use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, MessageView};

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// Snapshot of every user with an active connection, sent once on connect
    OnlineUsers { user_ids: Vec<Uuid> },

    /// A friend came online or went offline
    UserOnline { user_id: Uuid, is_online: bool },

    /// A new message was posted to a chat this connection is subscribed to
    MessageReceived(MessageView),

    /// A chat member started or stopped typing
    UserTyping {
        user_id: Uuid,
        chat_id: Uuid,
        is_typing: bool,
    },

    /// A chat member read every message in the chat
    MessagesRead { user_id: Uuid, chat_id: Uuid },

    FriendRequestReceived { sender_id: Uuid },

    FriendRequestAccepted { accepter_id: Uuid },

    /// Failure of an operation, delivered only to the originating connection
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Subscribe this connection to a chat room
    JoinChat { chat_id: Uuid },

    /// Unsubscribe this connection from a chat room
    LeaveChat { chat_id: Uuid },

    NewMessage {
        chat_id: Uuid,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },

    TypingStart { chat_id: Uuid },

    TypingStop { chat_id: Uuid },

    MarkMessagesRead { chat_id: Uuid },

    FriendRequestSent { recipient_id: Uuid },

    FriendRequestAccepted { sender_id: Uuid },
}
