//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

pub struct ChatRow {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub last_message_id: Option<String>,
    pub last_activity: Option<String>,
}

/// Input for `Database::insert_message`.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub chat_id: &'a str,
    pub sender_id: &'a str,
    pub content: Option<&'a str>,
    /// JSON array, stored verbatim.
    pub attachments: &'a str,
    pub created_at: &'a str,
}

/// A message joined with its author's display attributes and read-by set.
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_display_name: String,
    pub sender_avatar_url: Option<String>,
    pub content: Option<String>,
    pub attachments: String,
    pub read_by: Vec<String>,
    pub created_at: String,
}
