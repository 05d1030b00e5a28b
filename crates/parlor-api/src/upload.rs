use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use parlor_db::Database;
use parlor_db::models::StickerRow;
use parlor_feed::Feed;
use parlor_store::AssetStore;
use parlor_types::api::{ErrorBody, UploadResponse};
use parlor_types::events::{FeedEvent, Table};
use parlor_types::models::{AuthContext, Sticker};

use crate::AppState;

/// 5 MiB.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Media subtypes the sticker library accepts.
pub const ALLOWED_TYPES: &[&str] = &["gif", "png", "jpg", "jpeg", "webp"];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unsupported media type")]
    UnsupportedType,

    #[error("payload exceeds {MAX_UPLOAD_BYTES} bytes")]
    PayloadTooLarge,

    #[error("blob store write failed: {0}")]
    StorageWriteFailed(#[source] anyhow::Error),

    #[error("metadata write failed: {0}")]
    MetadataWriteFailed(#[source] anyhow::Error),
}

/// validate → store blob → record metadata, compensating when the metadata
/// write fails. There is no cross-store transaction: a blob without a record
/// may transiently exist (tolerated orphan), a record without a blob must
/// never.
#[derive(Clone)]
pub struct AssetUploadPipeline {
    db: Arc<Database>,
    store: Arc<AssetStore>,
    feed: Feed,
}

impl AssetUploadPipeline {
    pub fn new(db: Arc<Database>, store: Arc<AssetStore>, feed: Feed) -> Self {
        Self { db, store, feed }
    }

    pub async fn upload(
        &self,
        ctx: &AuthContext,
        file_name: &str,
        subtype: &str,
        data: Bytes,
    ) -> Result<Sticker, UploadError> {
        // Validation first; no side effects precede a rejection.
        let subtype = subtype.to_ascii_lowercase();
        if !ALLOWED_TYPES.contains(&subtype.as_str()) {
            return Err(UploadError::UnsupportedType);
        }
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(UploadError::PayloadTooLarge);
        }

        let created_at = Utc::now();
        let key = storage_key(ctx.user_id, created_at.timestamp_millis(), file_name);

        // Step 1: blob write. Nothing to undo on failure.
        self.store
            .put(&key, &data)
            .await
            .map_err(UploadError::StorageWriteFailed)?;

        let sticker = Sticker {
            id: Uuid::new_v4(),
            name: file_name.to_string(),
            url: self.store.public_url(&key),
            storage_key: key.clone(),
            file_type: subtype,
            uploaded_by: ctx.user_id,
            created_at,
        };

        // Step 2: metadata record. On failure the just-written blob is
        // deleted so no record-less blob survives the saga; the delete is
        // best-effort and a leftover orphan is logged, not retried.
        let db = self.db.clone();
        let row = StickerRow {
            id: sticker.id.to_string(),
            name: sticker.name.clone(),
            url: sticker.url.clone(),
            storage_key: sticker.storage_key.clone(),
            file_type: sticker.file_type.clone(),
            uploaded_by: sticker.uploaded_by.to_string(),
            created_at: created_at.timestamp_millis(),
        };
        let inserted = tokio::task::spawn_blocking(move || db.insert_sticker(&row))
            .await
            .map_err(|e| anyhow!(e))
            .and_then(|r| r);

        if let Err(e) = inserted {
            if let Err(del) = self.store.remove(&key).await {
                warn!("orphan blob {} left behind: {}", key, del);
            }
            return Err(UploadError::MetadataWriteFailed(e));
        }

        info!(
            "{} uploaded sticker {} ({} bytes)",
            ctx.display_name,
            sticker.name,
            data.len()
        );
        self.feed
            .publish(FeedEvent::insert(Table::Stickers, sticker.id.to_string()));

        Ok(sticker)
    }
}

/// `<owner>/<unix_millis>-<sanitized_name>`: unique per user per upload
/// without a coordinating counter.
pub fn storage_key(owner: Uuid, unix_millis: i64, original_name: &str) -> String {
    format!(
        "{}/{}-{}",
        owner,
        unix_millis,
        sanitize_file_name(original_name)
    )
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── HTTP handler ────────────────────────────────────────────────────────

/// POST /upload — single-file multipart submission under field name `file`.
pub async fn upload_sticker(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Response {
    let mut file: Option<(String, String, Bytes)> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let file_name = field.file_name().unwrap_or("sticker").to_string();
                let subtype = match field.content_type() {
                    // "image/png" → "png"; anything without the image/
                    // prefix is left whole for the pipeline to reject
                    Some(ct) => ct.strip_prefix("image/").unwrap_or(ct).to_string(),
                    None => return error_response(StatusCode::BAD_REQUEST, "Invalid file type"),
                };
                match field.bytes().await {
                    Ok(data) => {
                        file = Some((file_name, subtype, data));
                        break;
                    }
                    // the body limit tripping mid-read surfaces here
                    Err(_) => return error_response(StatusCode::BAD_REQUEST, "File too large"),
                }
            }
            Ok(None) => break,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "No file provided"),
        }
    }

    let Some((file_name, subtype, data)) = file else {
        return error_response(StatusCode::BAD_REQUEST, "No file provided");
    };

    match state.uploads.upload(&ctx, &file_name, &subtype, data).await {
        Ok(sticker) => (
            StatusCode::OK,
            Json(UploadResponse {
                success: true,
                url: sticker.url.clone(),
                sticker,
            }),
        )
            .into_response(),
        Err(UploadError::UnsupportedType) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid file type")
        }
        Err(UploadError::PayloadTooLarge) => {
            error_response(StatusCode::BAD_REQUEST, "File too large")
        }
        Err(UploadError::StorageWriteFailed(e)) => {
            error!("Upload error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed")
        }
        Err(UploadError::MetadataWriteFailed(e)) => {
            error!("Database error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_types::events::EventKind;
    use parlor_types::models::Role;

    fn ctx() -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            display_name: "alice".into(),
            role: Role::User,
        }
    }

    async fn pipeline() -> (tempfile::TempDir, Arc<Database>, Feed, AssetUploadPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(
            AssetStore::new(dir.path().to_path_buf(), "http://localhost:3000/assets")
                .await
                .unwrap(),
        );
        let feed = Feed::new();
        let uploads = AssetUploadPipeline::new(db.clone(), store, feed.clone());
        (dir, db, feed, uploads)
    }

    fn owner_blobs(dir: &tempfile::TempDir, owner: Uuid) -> usize {
        match std::fs::read_dir(dir.path().join(owner.to_string())) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[test]
    fn sanitize_replaces_everything_outside_the_safe_set() {
        assert_eq!(sanitize_file_name("party cat!.gif"), "party_cat_.gif");
        assert_eq!(sanitize_file_name("ok-name.2x.png"), "ok-name.2x.png");
        assert_eq!(sanitize_file_name("päck/et.webp"), "p_ck_et.webp");
    }

    #[test]
    fn storage_key_is_owner_scoped_and_timestamped() {
        let owner = Uuid::nil();
        assert_eq!(
            storage_key(owner, 1_700_000_000_000, "a b.gif"),
            format!("{owner}/1700000000000-a_b.gif")
        );
    }

    #[tokio::test]
    async fn upload_stores_blob_and_record() {
        let (_dir, db, feed, uploads) = pipeline().await;
        let mut sub = feed
            .subscribe(Table::Stickers, &[EventKind::Insert])
            .unwrap();

        let ctx = ctx();
        let sticker = uploads
            .upload(&ctx, "cat.png", "png", Bytes::from_static(b"pngbytes"))
            .await
            .unwrap();

        assert!(sticker.url.ends_with("-cat.png"));
        assert_eq!(sticker.file_type, "png");
        assert_eq!(sticker.uploaded_by, ctx.user_id);

        // the resolved URL dereferences the submitted bytes
        let stored = uploads.store.read(&sticker.storage_key).await.unwrap();
        assert_eq!(stored, b"pngbytes");

        // the record landed and the library feed observed it
        assert_eq!(db.list_stickers().unwrap().len(), 1);
        assert_eq!(sub.recv().await.unwrap().row_id, sticker.id.to_string());
    }

    #[tokio::test]
    async fn mime_case_is_normalized() {
        let (_dir, _db, _feed, uploads) = pipeline().await;
        let sticker = uploads
            .upload(&ctx(), "CAT.GIF", "GIF", Bytes::from_static(b"gif"))
            .await
            .unwrap();
        assert_eq!(sticker.file_type, "gif");
    }

    #[tokio::test]
    async fn oversized_payload_leaves_no_trace() {
        let (dir, db, _feed, uploads) = pipeline().await;
        let ctx = ctx();

        let big = Bytes::from(vec![0u8; MAX_UPLOAD_BYTES + 1]);
        let err = uploads.upload(&ctx, "big.png", "png", big).await.unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge));

        assert_eq!(owner_blobs(&dir, ctx.user_id), 0);
        assert!(db.list_stickers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn boundary_payload_is_accepted() {
        let (_dir, _db, _feed, uploads) = pipeline().await;
        let exact = Bytes::from(vec![0u8; MAX_UPLOAD_BYTES]);
        uploads.upload(&ctx(), "max.png", "png", exact).await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_subtype_is_rejected_before_any_write() {
        let (dir, db, _feed, uploads) = pipeline().await;
        let ctx = ctx();

        let err = uploads
            .upload(&ctx, "movie.mp4", "mp4", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedType));

        assert_eq!(owner_blobs(&dir, ctx.user_id), 0);
        assert!(db.list_stickers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_metadata_write_compensates_the_blob() {
        let (dir, db, _feed, uploads) = pipeline().await;
        let ctx = ctx();

        // make the metadata insert fail after the blob write succeeds
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE stickers")?;
            Ok(())
        })
        .unwrap();

        let err = uploads
            .upload(&ctx, "cat.png", "png", Bytes::from_static(b"pngbytes"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MetadataWriteFailed(_)));

        // the compensating delete removed the blob
        assert_eq!(owner_blobs(&dir, ctx.user_id), 0);
    }
}
