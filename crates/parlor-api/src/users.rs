use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::error;
use uuid::Uuid;

use parlor_session::presence::PresenceError;
use parlor_types::models::{AuthContext, PresenceEntry};

use crate::AppState;

/// GET /users — everyone, most recently seen first, online/offline
/// classified at this instant.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(_ctx): Extension<AuthContext>,
) -> Result<Json<Vec<PresenceEntry>>, StatusCode> {
    let users = state.presence.list().await.map_err(|e| {
        error!("presence listing failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(users))
}

/// DELETE /users/{id} — admin-only account removal.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, StatusCode> {
    match state.presence.remove(&ctx, id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(PresenceError::NotAuthorized) => Err(StatusCode::FORBIDDEN),
        Err(PresenceError::SelfRemoval) => Err(StatusCode::BAD_REQUEST),
        Err(PresenceError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(PresenceError::Store(e)) => {
            error!("user removal failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
