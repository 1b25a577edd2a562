use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use intranet_types::api::StatusMessage;

use crate::middleware::{require_auth, require_membership};
use crate::profile::MAX_AVATAR_SIZE;
use crate::state::AppState;
use crate::{auth, dashboard, messages, profile};

/// Every route of the intranet API. Cross-cutting layers (CORS, tracing)
/// are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/health", get(health));

    // Conversation id comes from the path, so membership is a route layer here.
    let member_routes = Router::new()
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_conversation_messages).post(messages::post_conversation_message),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_membership));

    let protected_routes = Router::new()
        .route("/messages", get(messages::messages_get).post(messages::messages_post))
        .route(
            "/conversations",
            get(messages::list_conversations).post(messages::create_conversation),
        )
        .route("/users/chat", get(messages::chat_candidates))
        .route("/dashboard/{role}", get(dashboard::get_dashboard))
        .route("/announcements", post(dashboard::create_announcement))
        .route("/admin/users", get(dashboard::list_users))
        .route("/profile", get(profile::get_profile).post(profile::update_profile))
        .route(
            "/profile/avatar",
            post(profile::upload_avatar).layer(DefaultBodyLimit::max(MAX_AVATAR_SIZE)),
        )
        .route("/profile/password", post(profile::change_password))
        .merge(member_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let uploads = ServeDir::new(&state.upload_dir);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", uploads)
        .with_state(state)
}

async fn health() -> Json<StatusMessage> {
    Json(StatusMessage::ok("healthy"))
}
