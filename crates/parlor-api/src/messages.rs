use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::error;

use parlor_types::api::{MessageQuery, SendMessageRequest};
use parlor_types::events::{FeedEvent, Table};
use parlor_types::models::{AuthContext, Message, MessageKind};

use crate::AppState;

/// GET /messages — the most recent window, ascending, author fields joined.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Extension(_ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let limit = query.limit.min(200);

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.get_messages(limit))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages = rows
        .into_iter()
        .map(|r| r.into_message())
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| {
            error!("corrupt message row: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}

/// POST /messages — insert, then let the feed observe the commit.
///
/// A failed insert surfaces as 500 with no automatic retry; the sender
/// resubmits.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // exactly one of content / media_url, determined by kind
    let (content, media_url) = match req.kind {
        MessageKind::Text => {
            let content = req.content.as_deref().map(str::trim).unwrap_or_default();
            if content.is_empty() || req.media_url.is_some() {
                return Err(StatusCode::BAD_REQUEST);
            }
            (Some(content.to_string()), None)
        }
        MessageKind::Sticker | MessageKind::Gif => {
            let media_url = req.media_url.unwrap_or_default();
            if media_url.is_empty() || req.content.is_some() {
                return Err(StatusCode::BAD_REQUEST);
            }
            (None, Some(media_url))
        }
    };

    let db = state.db.clone();
    let author_id = ctx.user_id.to_string();
    let kind = req.kind;
    let created_at = Utc::now().timestamp_millis();
    let id = tokio::task::spawn_blocking(move || {
        db.insert_message(
            &author_id,
            kind.as_str(),
            content.as_deref(),
            media_url.as_deref(),
            created_at,
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("message insert failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    state
        .feed
        .publish(FeedEvent::insert(Table::Messages, id.to_string()));

    // echo the stored row back with author fields joined
    let db = state.db.clone();
    let row = tokio::task::spawn_blocking(move || db.get_message(id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let message = row
        .into_message()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(message)))
}
