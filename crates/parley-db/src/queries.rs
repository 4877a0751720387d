use std::collections::BTreeSet;

use anyhow::{Result, bail};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{ChatRow, MessageRow, NewMessage, UserRow};
use crate::{Database, now_timestamp};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, display_name, avatar_url) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, display_name, avatar_url],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Write the durable presence flag. Returns false if the user no longer exists.
    pub fn set_presence(&self, id: &str, online: bool, last_seen: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                params![id, online, last_seen],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Friends --

    /// Record a friendship in both directions. Re-adding is a no-op.
    pub fn add_friendship(&self, user_id: &str, friend_id: &str) -> Result<()> {
        if user_id == friend_id {
            bail!("A user cannot befriend themselves");
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
                params![user_id, friend_id],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
                params![friend_id, user_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_friend_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT friend_id FROM friendships WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Chats --

    /// Create a chat with its full membership. Duplicate member ids collapse;
    /// fewer than two distinct members is an error.
    pub fn create_chat(
        &self,
        id: &str,
        name: Option<&str>,
        is_group: bool,
        member_ids: &[&str],
    ) -> Result<()> {
        let members: BTreeSet<&str> = member_ids.iter().copied().collect();
        if members.len() < 2 {
            bail!("A chat needs at least 2 members, got {}", members.len());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chats (id, name, is_group, last_activity) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, is_group, now_timestamp()],
            )?;
            for member in &members {
                tx.execute(
                    "INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                    params![id, member],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_chat_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT chat_id FROM chat_members WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Look a chat up by `(id, member contains user)`. A missing chat and a
    /// chat the user is not in are indistinguishable to the caller.
    pub fn find_chat_for_member(&self, chat_id: &str, user_id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT c.id, c.name, c.is_group, c.last_message_id, c.last_activity
                     FROM chats c
                     JOIN chat_members cm ON cm.chat_id = c.id
                     WHERE c.id = ?1 AND cm.user_id = ?2",
                    params![chat_id, user_id],
                    chat_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, is_group, last_message_id, last_activity FROM chats WHERE id = ?1",
                    [chat_id],
                    chat_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_chat_member_ids(&self, chat_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1")?;
            let ids = stmt
                .query_map([chat_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Point the chat summary at a message. Never moves the summary backwards,
    /// so concurrent posts from different senders settle on the newest one.
    pub fn update_chat_last_message(&self, chat_id: &str, message_id: &str, at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE chats SET last_message_id = ?2, last_activity = ?3
                 WHERE id = ?1 AND (last_activity IS NULL OR last_activity <= ?3)",
                params![chat_id, message_id, at],
            )?;
            Ok(())
        })
    }

    /// Repair chat summaries that lag behind the message store. Returns the
    /// number of chats fixed.
    pub fn reconcile_chat_summaries(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let fixed = conn.execute(
                "UPDATE chats
                 SET last_message_id = (
                         SELECT m.id FROM messages m WHERE m.chat_id = chats.id
                         ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1),
                     last_activity = (
                         SELECT MAX(m.created_at) FROM messages m WHERE m.chat_id = chats.id)
                 WHERE EXISTS (
                     SELECT 1 FROM messages m
                     WHERE m.chat_id = chats.id
                       AND (chats.last_activity IS NULL
                            OR chats.last_message_id IS NULL
                            OR m.created_at > chats.last_activity))",
                [],
            )?;
            Ok(fixed)
        })
    }

    // -- Messages --

    /// Persist a message. The sender is seeded into its read-by set in the
    /// same transaction.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, chat_id, sender_id, content, attachments, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.id,
                    msg.chat_id,
                    msg.sender_id,
                    msg.content,
                    msg.attachments,
                    msg.created_at
                ],
            )?;
            tx.execute(
                "INSERT INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                params![msg.id, msg.sender_id, msg.created_at],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(&format!("{} WHERE m.id = ?1", MESSAGE_SELECT), [id], message_from_row)
                .optional()?;

            match row {
                Some(mut row) => {
                    row.read_by = query_read_by(conn, &row.id)?;
                    Ok(Some(row))
                }
                None => Ok(None),
            }
        })
    }

    /// Newest messages of a chat, newest first.
    pub fn get_messages(&self, chat_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE m.chat_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2",
                MESSAGE_SELECT
            ))?;
            let mut rows = stmt
                .query_map(params![chat_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for row in &mut rows {
                row.read_by = query_read_by(conn, &row.id)?;
            }
            Ok(rows)
        })
    }

    pub fn get_read_by(&self, message_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| query_read_by(conn, message_id))
    }

    /// Add `reader_id` to the read-by set of every message in the chat written
    /// by someone else. One statement, no per-message round trips. Returns the
    /// number of messages newly marked; repeating the call returns 0.
    pub fn mark_chat_read(&self, chat_id: &str, reader_id: &str, read_at: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let marked = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 SELECT m.id, ?2, ?3 FROM messages m
                 WHERE m.chat_id = ?1 AND m.sender_id != ?2",
                params![chat_id, reader_id, read_at],
            )?;
            Ok(marked)
        })
    }
}

const MESSAGE_SELECT: &str = "SELECT m.id, m.chat_id, m.sender_id, u.username, u.display_name, u.avatar_url,
            m.content, m.attachments, m.created_at
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, display_name, avatar_url, is_online, last_seen FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                avatar_url: row.get(3)?,
                is_online: row.get(4)?,
                last_seen: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_read_by(conn: &Connection, message_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY read_at, user_id",
    )?;
    let ids = stmt
        .query_map([message_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn chat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        name: row.get(1)?,
        is_group: row.get(2)?,
        last_message_id: row.get(3)?,
        last_activity: row.get(4)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let username: Option<String> = row.get(3)?;
    let display_name: Option<String> = row.get(4)?;
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: username.clone().unwrap_or_else(|| "unknown".to_string()),
        sender_display_name: display_name.or(username).unwrap_or_else(|| "unknown".to_string()),
        sender_avatar_url: row.get(5)?,
        content: row.get(6)?,
        attachments: row.get(7)?,
        read_by: Vec::new(),
        created_at: row.get(8)?,
    })
}
