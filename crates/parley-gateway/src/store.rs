//! Async facade over the SQLite store.
//!
//! Every call runs on the blocking pool and is therefore a suspension point:
//! other handlers may run between the call and its result.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{ChatRow, MessageRow, NewMessage, UserRow};
use parley_types::models::{Attachment, Chat, MessageView, SenderInfo, User};

#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }

    // -- Users --

    pub async fn user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = self
            .run(move |db| db.get_user_by_id(&user_id.to_string()))
            .await?;
        row.map(user_from_row).transpose()
    }

    /// Write the durable online flag and last-seen time.
    pub async fn set_presence(&self, user_id: Uuid, online: bool, at: DateTime<Utc>) -> Result<bool> {
        let at = parley_db::format_timestamp(at);
        self.run(move |db| db.set_presence(&user_id.to_string(), online, &at))
            .await
    }

    pub async fn friend_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = self
            .run(move |db| db.get_friend_ids(&user_id.to_string()))
            .await?;
        Ok(parse_ids(ids, "friend_id"))
    }

    // -- Chats --

    pub async fn chat_ids_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = self
            .run(move |db| db.get_chat_ids_for_user(&user_id.to_string()))
            .await?;
        Ok(parse_ids(ids, "chat_id"))
    }

    /// `None` when the chat does not exist or `user_id` is not a member.
    pub async fn find_chat_for_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<Option<Chat>> {
        let row = self
            .run(move |db| db.find_chat_for_member(&chat_id.to_string(), &user_id.to_string()))
            .await?;
        row.map(chat_from_row).transpose()
    }

    pub async fn chat_member_ids(&self, chat_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = self
            .run(move |db| db.get_chat_member_ids(&chat_id.to_string()))
            .await?;
        Ok(parse_ids(ids, "user_id"))
    }

    pub async fn update_chat_last_message(
        &self,
        chat_id: Uuid,
        message_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let at = parley_db::format_timestamp(at);
        self.run(move |db| {
            db.update_chat_last_message(&chat_id.to_string(), &message_id.to_string(), &at)
        })
        .await
    }

    // -- Messages --

    /// Persist a message; the sender is recorded as its first reader.
    pub async fn insert_message(&self, message: &MessageView) -> Result<()> {
        let id = message.id.to_string();
        let chat_id = message.chat_id.to_string();
        let sender_id = message.sender.id.to_string();
        let content = message.content.clone();
        let attachments = serde_json::to_string(&message.attachments)?;
        let created_at = parley_db::format_timestamp(message.created_at);

        self.run(move |db| {
            db.insert_message(&NewMessage {
                id: &id,
                chat_id: &chat_id,
                sender_id: &sender_id,
                content: content.as_deref(),
                attachments: &attachments,
                created_at: &created_at,
            })
        })
        .await
    }

    pub async fn message(&self, message_id: Uuid) -> Result<Option<MessageView>> {
        let row = self
            .run(move |db| db.get_message(&message_id.to_string()))
            .await?;
        row.map(message_from_row).transpose()
    }

    pub async fn read_by(&self, message_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = self
            .run(move |db| db.get_read_by(&message_id.to_string()))
            .await?;
        Ok(parse_ids(ids, "read_by"))
    }

    /// Bulk read receipt for every message in the chat not written by `reader_id`.
    pub async fn mark_chat_read(&self, chat_id: Uuid, reader_id: Uuid) -> Result<usize> {
        let at = parley_db::now_timestamp();
        self.run(move |db| db.mark_chat_read(&chat_id.to_string(), &reader_id.to_string(), &at))
            .await
    }
}

fn parse_ids(raw: Vec<String>, what: &str) -> Vec<Uuid> {
    raw.into_iter()
        .filter_map(|id| match id.parse::<Uuid>() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Corrupt {} '{}': {}", what, id, e);
                None
            }
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))?
        .with_timezone(&Utc))
}

fn user_from_row(row: UserRow) -> Result<User> {
    Ok(User {
        id: row.id.parse()?,
        username: row.username,
        display_name: row.display_name,
        avatar_url: row.avatar_url,
        is_online: row.is_online,
        last_seen: row.last_seen.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn chat_from_row(row: ChatRow) -> Result<Chat> {
    Ok(Chat {
        id: row.id.parse()?,
        name: row.name,
        is_group: row.is_group,
        last_message_id: row
            .last_message_id
            .as_deref()
            .map(str::parse::<Uuid>)
            .transpose()?,
        last_activity: row
            .last_activity
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
    })
}

fn message_from_row(row: MessageRow) -> Result<MessageView> {
    let attachments: Vec<Attachment> = serde_json::from_str(&row.attachments).unwrap_or_else(|e| {
        warn!("Corrupt attachments on message '{}': {}", row.id, e);
        Vec::new()
    });

    Ok(MessageView {
        id: row.id.parse()?,
        chat_id: row.chat_id.parse()?,
        sender: SenderInfo {
            id: row.sender_id.parse()?,
            username: row.sender_username,
            display_name: row.sender_display_name,
            avatar_url: row.sender_avatar_url,
        },
        content: row.content,
        attachments,
        read_by: parse_ids(row.read_by, "read_by"),
        created_at: parse_timestamp(&row.created_at)?,
    })
}
