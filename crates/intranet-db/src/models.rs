/// Database row types. These map directly to SQLite rows.
/// Roles and timestamps stay as stored text; the API layer parses them.

pub struct UserRow {
    pub role: String,
    pub user_id: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub profile_picture: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub created_at: String,
}

/// A membership joined with the member's current display name.
pub struct MemberRow {
    pub conversation_id: i64,
    pub user_id: String,
    pub role: String,
    pub full_name: String,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: String,
    pub sender_role: String,
    pub sender_name: String,
    pub sender_picture: Option<String>,
    pub body: String,
    pub created_at: String,
}

pub struct AnnouncementRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub author_role: String,
    pub created_at: String,
}

/// Outcome of a profile update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileUpdate {
    Updated,
    /// No row matched, or there was nothing to set.
    Unchanged,
    /// Another account of the same role already uses the email.
    EmailTaken,
}
