use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use intranet_types::api::{
    AnnouncementCreated, Claims, CreateAnnouncementRequest, DashboardResponse, Status,
};
use intranet_types::models::{Announcement, Role, UserProfile};

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath};
use crate::messages::{conversation_summaries, parse_timestamp};
use crate::middleware::require_role;
use crate::profile::{load_profile, to_profile};
use crate::state::{AppState, run_blocking};

const DASHBOARD_ANNOUNCEMENTS: u32 = 5;
const DASHBOARD_CONVERSATIONS: u32 = 5;
/// Shown on dashboard conversation cards that have no messages.
pub const NO_MESSAGES_YET: &str = "No messages yet";

/// GET /dashboard/{role}: only the caller's own role's dashboard. Any other
/// path role, known or not, is forbidden.
pub async fn get_dashboard(
    State(state): State<AppState>,
    ApiPath(role): ApiPath<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<DashboardResponse>> {
    if role != claims.role.as_str() {
        return Err(ApiError::forbidden("Forbidden"));
    }

    let profile = load_profile(&state, &claims).await?;

    let rows = run_blocking(&state, |db| db.recent_announcements(DASHBOARD_ANNOUNCEMENTS)).await?;
    let announcements = rows
        .into_iter()
        .map(|row| -> ApiResult<Announcement> {
            let author_role = row
                .author_role
                .parse::<Role>()
                .map_err(|e| anyhow!("announcement {}: {}", row.id, e))?;
            Ok(Announcement {
                id: row.id,
                created_at: parse_timestamp(&row.created_at),
                title: row.title,
                content: row.content,
                author_id: row.author_id,
                author_role,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let mut conversations =
        conversation_summaries(&state, &claims, Some(DASHBOARD_CONVERSATIONS)).await?;
    for conversation in &mut conversations {
        conversation
            .last_message
            .get_or_insert_with(|| NO_MESSAGES_YET.to_string());
    }

    Ok(Json(DashboardResponse {
        status: Status::Ok,
        profile,
        announcements,
        conversations,
    }))
}

/// POST /announcements: teachers and admins only.
pub async fn create_announcement(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateAnnouncementRequest>,
) -> ApiResult<impl IntoResponse> {
    require_role(&claims, &[Role::Teacher, Role::Admin])?;

    let title = req.title.trim().to_string();
    let content = req.content.trim().to_string();
    if title.is_empty() || content.is_empty() {
        return Err(ApiError::bad_request("Title and content are required."));
    }

    let author_id = claims.sub.clone();
    let author_role = claims.role;
    let announcement_id = run_blocking(&state, move |db| {
        db.create_announcement(&title, &content, &author_id, author_role.as_str())
    })
    .await?;

    info!("{} {} posted announcement {}", claims.role, claims.sub, announcement_id);

    Ok((
        StatusCode::CREATED,
        Json(AnnouncementCreated {
            status: Status::Ok,
            announcement_id,
        }),
    ))
}

/// GET /admin/users: every account, for the admin user-management view.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<UserProfile>>> {
    require_role(&claims, &[Role::Admin])?;

    let rows = run_blocking(&state, |db| db.list_users()).await?;
    let users = rows.into_iter().map(to_profile).collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(users))
}
