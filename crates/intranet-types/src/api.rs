use serde::{Deserialize, Serialize};

use crate::models::{Announcement, ConversationSummary, Role, UserProfile};

// -- JWT Claims --

/// JWT claims issued on login and checked by the auth middleware.
/// `sub` is the role-scoped user id, so it is only meaningful together with `role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub full_name: String,
    pub exp: usize,
}

// -- Status envelope --

/// Value of the `status` field carried by every JSON object response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Exists,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: Status,
    pub message: String,
}

impl StatusMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { status: Status::Ok, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: Status::Error, message: message.into() }
    }
}

// -- Auth --

// Roles arrive as plain strings so an unknown role gets a proper
// validation message instead of a deserialization failure.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub role: String,
    pub id_number: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub role: String,
    #[serde(alias = "id_number", alias = "teacher_id")]
    pub id: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub status: Status,
    pub token: String,
    pub user_id: String,
    pub role: Role,
    pub full_name: String,
    pub email: String,
    pub profile_picture: Option<String>,
    pub redirect: String,
}

// -- Messaging --

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub action: Option<String>,
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub conversation_id: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartChatRequest {
    pub new_chat_user: String,
    #[serde(default)]
    pub new_chat_user_role: Option<String>,
}

/// Body of `POST /messages`: either a new message or a new 1-on-1 chat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessagesCommand {
    Send(SendMessageRequest),
    StartChat(StartChatRequest),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartConversationRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageSent {
    pub status: Status,
    pub message_id: i64,
}

/// `status` is `exists` when the 1-on-1 conversation was already there.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationStarted {
    pub status: Status,
    pub conversation_id: i64,
}

// -- Profile --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[serde(default, alias = "fullname")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileUpdated {
    pub status: Status,
    pub message: String,
    pub profile: UserProfile,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvatarUpdated {
    pub status: Status,
    pub profile_picture: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

// -- Dashboard --

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub status: Status,
    pub profile: UserProfile,
    pub announcements: Vec<Announcement>,
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnnouncementCreated {
    pub status: Status,
    pub announcement_id: i64,
}
