use std::collections::HashMap;

use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};

use intranet_db::models::{ConversationRow, MemberRow, MessageRow};
use intranet_types::api::{
    Claims, ConversationStarted, MessageSent, MessagesCommand, MessagesQuery, PostMessageRequest,
    StartConversationRequest, Status,
};
use intranet_types::models::{ChatCandidate, ConversationSummary, MessageView, Role};

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::middleware::ensure_member;
use crate::state::{AppState, run_blocking};

/// Name shown for a 1-on-1 chat whose other participant has no display name.
pub const PRIVATE_CHAT: &str = "Private Chat";
const INVALID_REQUEST: &str = "Invalid request or action not specified.";

// -- Action-dispatch endpoint: /messages --

/// GET /messages?action=get_conversations|get_messages|get_users_for_chat
pub async fn messages_get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiQuery(query): ApiQuery<MessagesQuery>,
) -> ApiResult<Response> {
    match query.action.as_deref() {
        Some("get_conversations") => {
            let conversations = conversation_summaries(&state, &claims, None).await?;
            Ok(Json(conversations).into_response())
        }
        Some("get_messages") => {
            let conversation_id = query
                .conversation_id
                .ok_or_else(|| ApiError::bad_request(INVALID_REQUEST))?;
            ensure_member(&state, conversation_id, &claims).await?;
            let messages = load_messages(&state, conversation_id).await?;
            Ok(Json(messages).into_response())
        }
        Some("get_users_for_chat") => {
            let users = load_chat_candidates(&state, &claims).await?;
            Ok(Json(users).into_response())
        }
        _ => Err(ApiError::bad_request(INVALID_REQUEST)),
    }
}

/// POST /messages with `{conversation_id, message}` or `{new_chat_user, new_chat_user_role?}`.
pub async fn messages_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Result<Json<MessagesCommand>, JsonRejection>,
) -> ApiResult<Response> {
    let Ok(Json(command)) = body else {
        return Err(ApiError::bad_request(INVALID_REQUEST));
    };

    match command {
        MessagesCommand::Send(req) => {
            ensure_member(&state, req.conversation_id, &claims).await?;
            let sent = send_message(&state, &claims, req.conversation_id, &req.message).await?;
            Ok(Json(sent).into_response())
        }
        MessagesCommand::StartChat(req) => {
            let started =
                start_chat(&state, &claims, &req.new_chat_user, req.new_chat_user_role.as_deref())
                    .await?;
            Ok(Json(started).into_response())
        }
    }
}

// -- REST endpoints --

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(conversation_summaries(&state, &claims, None).await?))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<StartConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let started = start_chat(&state, &claims, &req.user_id, req.role.as_deref()).await?;
    let code = match started.status {
        Status::Exists => StatusCode::OK,
        _ => StatusCode::CREATED,
    };
    Ok((code, Json(started)))
}

/// Membership is checked by the `require_membership` route layer.
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<i64>,
) -> ApiResult<Json<Vec<MessageView>>> {
    Ok(Json(load_messages(&state, conversation_id).await?))
}

/// Membership is checked by the `require_membership` route layer.
pub async fn post_conversation_message(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<i64>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<PostMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let sent = send_message(&state, &claims, conversation_id, &req.message).await?;
    Ok((StatusCode::CREATED, Json(sent)))
}

pub async fn chat_candidates(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ChatCandidate>>> {
    Ok(Json(load_chat_candidates(&state, &claims).await?))
}

// -- Shared operations --

/// Caller must already have passed the membership check.
async fn send_message(
    state: &AppState,
    claims: &Claims,
    conversation_id: i64,
    message: &str,
) -> ApiResult<MessageSent> {
    let body = message.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty."));
    }

    let sender_id = claims.sub.clone();
    let role = claims.role;
    let message_id = run_blocking(state, move |db| {
        db.insert_message(conversation_id, &sender_id, role.as_str(), &body)
    })
    .await?;

    Ok(MessageSent {
        status: Status::Ok,
        message_id,
    })
}

/// Find or create the 1-on-1 conversation between the caller and another user.
/// The other user's role defaults to student.
async fn start_chat(
    state: &AppState,
    claims: &Claims,
    other_id: &str,
    other_role: Option<&str>,
) -> ApiResult<ConversationStarted> {
    let other_id = other_id.trim().to_string();
    if other_id.is_empty() {
        return Err(ApiError::bad_request("Please select a user to start a chat."));
    }

    let other_role = match other_role.map(str::trim).filter(|r| !r.is_empty()) {
        Some(role) => role
            .parse::<Role>()
            .map_err(|_| ApiError::bad_request("Invalid role."))?,
        None => Role::Student,
    };

    if other_id == claims.sub && other_role == claims.role {
        return Err(ApiError::bad_request("Cannot start chat with yourself."));
    }

    let my_id = claims.sub.clone();
    let my_role = claims.role;
    let oid = other_id.clone();
    let outcome = run_blocking(state, move |db| {
        if db.get_user(other_role.as_str(), &oid)?.is_none() {
            return Ok(None);
        }
        db.start_direct_conversation((my_role.as_str(), &my_id), (other_role.as_str(), &oid))
            .map(Some)
    })
    .await?;

    let (conversation_id, created) =
        outcome.ok_or_else(|| ApiError::NotFound("User not found.".into()))?;

    if created {
        info!(
            "Conversation {} started by {} {} with {} {}",
            conversation_id, claims.role, claims.sub, other_role, other_id
        );
    }

    Ok(ConversationStarted {
        status: if created { Status::Ok } else { Status::Exists },
        conversation_id,
    })
}

/// The caller's conversations, newest first, with display names resolved
/// and the latest message attached.
pub(crate) async fn conversation_summaries(
    state: &AppState,
    claims: &Claims,
    limit: Option<u32>,
) -> ApiResult<Vec<ConversationSummary>> {
    let user_id = claims.sub.clone();
    let role = claims.role;

    let (rows, members, latest) = run_blocking(state, move |db| {
        let rows = db.list_conversations_for(role.as_str(), &user_id, limit)?;
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let members = db.get_members(&ids)?;
        let latest = db.get_latest_messages(&ids)?;
        Ok((rows, members, latest))
    })
    .await?;

    let mut members_by_conversation: HashMap<i64, Vec<MemberRow>> = HashMap::new();
    for member in members {
        members_by_conversation
            .entry(member.conversation_id)
            .or_default()
            .push(member);
    }

    let mut latest_by_conversation: HashMap<i64, MessageRow> = latest
        .into_iter()
        .map(|m| (m.conversation_id, m))
        .collect();

    let summaries = rows
        .into_iter()
        .map(|row| {
            let members = members_by_conversation
                .get(&row.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let last = latest_by_conversation.remove(&row.id);

            ConversationSummary {
                id: row.id,
                name: display_name(&row, members, &claims.sub, claims.role),
                is_group: row.is_group,
                members_names: members_names(members),
                last_sender_name: last
                    .as_ref()
                    .map(|m| name_or_id(&m.sender_name, &m.sender_id)),
                last_message: last.map(|m| m.body),
            }
        })
        .collect();

    Ok(summaries)
}

async fn load_messages(state: &AppState, conversation_id: i64) -> ApiResult<Vec<MessageView>> {
    let rows = run_blocking(state, move |db| db.get_messages(conversation_id)).await?;

    rows.into_iter()
        .map(|row| -> ApiResult<MessageView> {
            let sender_role = row
                .sender_role
                .parse::<Role>()
                .map_err(|e| anyhow!("message {}: {}", row.id, e))?;

            Ok(MessageView {
                id: row.id,
                created_at: parse_timestamp(&row.created_at),
                full_name: name_or_id(&row.sender_name, &row.sender_id),
                message: row.body,
                sender_id: row.sender_id,
                sender_role,
                profile_picture: row.sender_picture,
            })
        })
        .collect()
}

async fn load_chat_candidates(state: &AppState, claims: &Claims) -> ApiResult<Vec<ChatCandidate>> {
    let user_id = claims.sub.clone();
    let role = claims.role;
    let rows = run_blocking(state, move |db| db.list_chat_candidates(role.as_str(), &user_id)).await?;

    rows.into_iter()
        .map(|row| -> ApiResult<ChatCandidate> {
            let role = row
                .role
                .parse::<Role>()
                .map_err(|e| anyhow!("user {}: {}", row.user_id, e))?;
            Ok(ChatCandidate {
                full_name: name_or_id(&row.full_name, &row.user_id),
                id: row.user_id,
                role,
            })
        })
        .collect()
}

/// Explicit name wins. Groups without one list their members; a 1-on-1 chat
/// is named after the participant who is not the viewer.
pub fn display_name(
    row: &ConversationRow,
    members: &[MemberRow],
    viewer_id: &str,
    viewer_role: Role,
) -> String {
    if let Some(name) = row.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    if row.is_group {
        return members_names(members);
    }

    members
        .iter()
        .find(|m| !(m.user_id == viewer_id && m.role == viewer_role.as_str()))
        .map(|m| m.full_name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| PRIVATE_CHAT.to_string())
}

/// Distinct member names, sorted, joined with ", ".
pub fn members_names(members: &[MemberRow]) -> String {
    let mut names: Vec<&str> = members
        .iter()
        .map(|m| m.full_name.trim())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort_unstable();
    names.dedup();
    names.join(", ")
}

fn name_or_id(name: &str, id: &str) -> String {
    let name = name.trim();
    if name.is_empty() { id.to_string() } else { name.to_string() }
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
