use std::ffi::OsStr;
use std::path::Path;

use anyhow::anyhow;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode, header},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use intranet_db::models::{ProfileUpdate, UserRow};
use intranet_types::api::{
    AvatarUpdated, ChangePasswordRequest, Claims, ProfileUpdated, Status, StatusMessage,
    UpdateProfileRequest,
};
use intranet_types::models::{Role, UserProfile};

use crate::auth::{MIN_PASSWORD_LEN, PasswordCheck, check_password, hash_password, is_valid_email};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::{AppState, run_blocking};

/// 2 MB upload limit for avatars
pub const MAX_AVATAR_SIZE: usize = 2 * 1024 * 1024;

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(load_profile(&state, &claims).await?))
}

/// POST /profile: name and/or email; blank fields are left unchanged.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<ProfileUpdated>> {
    let full_name = non_blank(req.full_name);
    let email = non_blank(req.email);

    if full_name.as_ref().is_some_and(|n| n.chars().count() < 2) {
        return Err(ApiError::bad_request("Name must have at least 2 characters."));
    }
    if email.as_deref().is_some_and(|e| !is_valid_email(e)) {
        return Err(ApiError::bad_request("Invalid email format."));
    }
    if full_name.is_none() && email.is_none() {
        return Err(ApiError::bad_request("Nothing to update."));
    }

    let user_id = claims.sub.clone();
    let role = claims.role;
    let outcome = run_blocking(&state, move |db| {
        db.update_profile(role.as_str(), &user_id, full_name.as_deref(), email.as_deref())
    })
    .await?;

    match outcome {
        ProfileUpdate::Updated => {}
        ProfileUpdate::EmailTaken => {
            return Err(ApiError::Conflict("Email is already in use.".into()));
        }
        ProfileUpdate::Unchanged => return Err(ApiError::NotFound("User not found.".into())),
    }

    let profile = load_profile(&state, &claims).await?;
    info!("{} {} updated their profile", claims.role, claims.sub);

    Ok(Json(ProfileUpdated {
        status: Status::Ok,
        message: "Profile updated successfully.".into(),
        profile,
    }))
}

/// POST /profile/avatar: raw image bytes; type comes from `Content-Type`.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<AvatarUpdated>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let ext = image_extension(content_type).ok_or_else(|| {
        ApiError::UnsupportedMediaType("Invalid file type. Allowed: jpg, jpeg, png, gif.".into())
    })?;

    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            ApiError::bad_request(rejection.body_text())
        }
    })?;

    if bytes.is_empty() {
        return Err(ApiError::bad_request("No file uploaded."));
    }
    if bytes.len() > MAX_AVATAR_SIZE {
        return Err(too_large());
    }

    let file_name = format!("profile_{}.{}", Uuid::new_v4(), ext);

    tokio::fs::create_dir_all(&state.upload_dir).await.map_err(|e| {
        error!("Failed to create upload directory {}: {}", state.upload_dir.display(), e);
        ApiError::Internal(anyhow!("Failed to upload profile picture."))
    })?;

    let path = state.upload_dir.join(&file_name);
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        error!("Failed to write avatar {}: {}", path.display(), e);
        ApiError::Internal(anyhow!("Failed to upload profile picture."))
    })?;

    let user_id = claims.sub.clone();
    let role = claims.role;
    let stored = file_name.clone();
    let previous = match run_blocking(&state, move |db| {
        db.set_profile_picture(role.as_str(), &user_id, &stored)
    })
    .await
    {
        Ok(previous) => previous,
        Err(e) => {
            remove_upload(&state, &file_name).await;
            return Err(e);
        }
    };

    if let Some(previous) = previous.filter(|p| *p != file_name) {
        remove_upload(&state, &previous).await;
    }

    info!("{} {} uploaded avatar {} ({} bytes)", claims.role, claims.sub, file_name, bytes.len());

    Ok(Json(AvatarUpdated {
        status: Status::Ok,
        profile_picture: file_name,
    }))
}

/// POST /profile/password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<StatusMessage>> {
    let current = req.current_password.trim().to_string();
    let new = req.new_password.trim();
    let confirm = req.confirm_password.trim();

    if current.is_empty() || new.is_empty() || confirm.is_empty() {
        return Err(ApiError::bad_request("All fields are required."));
    }
    if new != confirm {
        return Err(ApiError::bad_request("New password and confirmation do not match."));
    }
    if new.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 6 characters."));
    }

    let user = load_user(&state, &claims).await?;
    if check_password(&current, &user.password) == PasswordCheck::Mismatch {
        return Err(ApiError::bad_request("Current password is incorrect."));
    }

    let new_hash = hash_password(new)?;
    let user_id = claims.sub.clone();
    let role = claims.role;
    run_blocking(&state, move |db| db.update_password(role.as_str(), &user_id, &new_hash)).await?;

    info!("{} {} changed their password", claims.role, claims.sub);

    Ok(Json(StatusMessage::ok("Password updated successfully!")))
}

pub(crate) async fn load_profile(state: &AppState, claims: &Claims) -> ApiResult<UserProfile> {
    to_profile(load_user(state, claims).await?)
}

async fn load_user(state: &AppState, claims: &Claims) -> ApiResult<UserRow> {
    let user_id = claims.sub.clone();
    let role = claims.role;
    run_blocking(state, move |db| db.get_user(role.as_str(), &user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found.".into()))
}

pub(crate) fn to_profile(row: UserRow) -> ApiResult<UserProfile> {
    let role = row
        .role
        .parse::<Role>()
        .map_err(|e| anyhow!("user {}: {}", row.user_id, e))?;

    Ok(UserProfile {
        id: row.user_id,
        role,
        full_name: row.full_name,
        email: row.email,
        profile_picture: row.profile_picture,
    })
}

/// Best-effort delete of a stored avatar. Only bare file names inside the
/// upload dir are touched.
async fn remove_upload(state: &AppState, file_name: &str) {
    if Path::new(file_name).file_name() != Some(OsStr::new(file_name)) {
        warn!("Refusing to remove upload with path components: {}", file_name);
        return;
    }

    let path = state.upload_dir.join(file_name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove avatar {}: {}", path.display(), e),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn too_large() -> ApiError {
    ApiError::PayloadTooLarge("File too large. Max 2MB allowed.".into())
}

/// Maps an image MIME type (parameters ignored) to the stored file extension.
fn image_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime.to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_image_types() {
        assert_eq!(image_extension("image/png"), Some("png"));
        assert_eq!(image_extension("IMAGE/JPEG; charset=binary"), Some("jpg"));
        assert_eq!(image_extension("image/gif"), Some("gif"));
        assert_eq!(image_extension("image/webp"), None);
        assert_eq!(image_extension(""), None);
    }

    #[test]
    fn blank_fields_count_as_absent() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" Ana ".into())), Some("Ana".into()));
        assert_eq!(non_blank(None), None);
    }
}
