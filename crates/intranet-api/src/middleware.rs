use axum::{
    Extension, RequestExt,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::warn;

use intranet_types::api::Claims;
use intranet_types::models::Role;

use crate::auth::decode_token;
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiPath;
use crate::state::{AppState, run_blocking};

pub const NOT_A_MEMBER: &str = "Forbidden: Not a member of this conversation";

/// Extract and validate the bearer JWT, then expose its claims to handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = req
        .extract_parts::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| ApiError::Unauthorized("Unauthorized".into()))?;

    let claims = decode_token(&state.jwt_secret, bearer.token())
        .map_err(|_| ApiError::Unauthorized("Unauthorized".into()))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Guard for `/conversations/{conversation_id}/...` routes. Must sit inside
/// `require_auth` so the claims are present.
pub async fn require_membership(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<i64>,
    Extension(claims): Extension<Claims>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    ensure_member(&state, conversation_id, &claims).await?;
    Ok(next.run(req).await)
}

/// Fails with 403 unless a membership row exists for (conversation, caller id, caller role).
pub async fn ensure_member(state: &AppState, conversation_id: i64, claims: &Claims) -> ApiResult<()> {
    let user_id = claims.sub.clone();
    let role = claims.role;
    let is_member =
        run_blocking(state, move |db| db.is_member(conversation_id, &user_id, role.as_str())).await?;

    if !is_member {
        warn!(
            "{} {} denied access to conversation {}",
            claims.role, claims.sub, conversation_id
        );
        return Err(ApiError::forbidden(NOT_A_MEMBER));
    }
    Ok(())
}

pub fn require_role(claims: &Claims, allowed: &[Role]) -> ApiResult<()> {
    if allowed.contains(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Forbidden"))
    }
}
