use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use parlor_types::events::{FeedEvent, Table};
use parlor_types::models::{AuthContext, Sticker};

use crate::AppState;

/// GET /stickers — the shared library, newest first.
pub async fn list_stickers(
    State(state): State<AppState>,
    Extension(_ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Sticker>>, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_stickers())
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let stickers = rows
        .into_iter()
        .map(|r| r.into_sticker())
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| {
            error!("corrupt sticker row: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(stickers))
}

/// DELETE /stickers/{id} — admin-only. Removes the record first, then the
/// blob; a blob the delete misses is a tolerated orphan, the reverse is not.
pub async fn delete_sticker(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, StatusCode> {
    if !ctx.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    let sticker_id = id.to_string();
    let row = tokio::task::spawn_blocking(move || db.get_sticker(&sticker_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let db = state.db.clone();
    let sticker_id = id.to_string();
    tokio::task::spawn_blocking(move || db.delete_sticker(&sticker_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Err(e) = state.store.remove(&row.storage_key).await {
        warn!("sticker blob {} not removed: {}", row.storage_key, e);
    }

    state
        .feed
        .publish(FeedEvent::delete(Table::Stickers, id.to_string()));

    info!("{} deleted sticker {}", ctx.display_name, row.name);
    Ok(StatusCode::NO_CONTENT)
}
