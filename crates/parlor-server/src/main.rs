mod gateway;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Extension, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use parlor_api::middleware::require_auth;
use parlor_api::{AppState, AppStateInner, messages, stickers, upload, users};
use parlor_db::Database;
use parlor_feed::Feed;
use parlor_session::presence::PresenceTracker;
use parlor_store::AssetStore;
use parlor_types::models::AuthContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("PARLOR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLOR_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let db_path = std::env::var("PARLOR_DB_PATH").unwrap_or_else(|_| "parlor.db".into());
    let sticker_dir: PathBuf = std::env::var("PARLOR_STICKER_DIR")
        .unwrap_or_else(|_| "./sticker-storage".into())
        .into();
    let public_base = std::env::var("PARLOR_PUBLIC_BASE_URL")
        .unwrap_or_else(|_| format!("http://localhost:{port}/assets"));

    // Shared state
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let store = Arc::new(AssetStore::new(sticker_dir.clone(), public_base).await?);
    let feed = Feed::new();
    let presence = PresenceTracker::new(db.clone(), feed.clone());
    let uploads = upload::AssetUploadPipeline::new(db.clone(), store.clone(), feed.clone());

    let state: AppState = Arc::new(AppStateInner {
        db,
        store,
        feed,
        presence,
        uploads,
    });

    // Routes
    let protected_routes = Router::new()
        .route("/messages", get(messages::get_messages))
        .route("/messages", post(messages::send_message))
        .route("/stickers", get(stickers::list_stickers))
        .route("/stickers/{id}", delete(stickers::delete_sticker))
        .route("/users", get(users::list_users))
        .route("/users/{id}", delete(users::delete_user))
        .route(
            "/upload",
            post(upload::upload_sticker)
                // a bit above the 5 MiB contract so oversized payloads get
                // the JSON error instead of a bare 413
                .layer(DefaultBodyLimit::max(6 * 1024 * 1024)),
        )
        .route("/gateway", get(ws_upgrade))
        .layer(middleware::from_fn(require_auth))
        .with_state(state);

    let app = Router::new()
        .route("/health", get(health))
        .nest_service("/assets", ServeDir::new(sticker_dir))
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parlor server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| gateway::handle_session(socket, state, ctx))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
