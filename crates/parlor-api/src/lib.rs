pub mod messages;
pub mod middleware;
pub mod stickers;
pub mod upload;
pub mod users;

use std::sync::Arc;

use parlor_db::Database;
use parlor_feed::Feed;
use parlor_session::presence::PresenceTracker;
use parlor_store::AssetStore;

use crate::upload::AssetUploadPipeline;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub store: Arc<AssetStore>,
    pub feed: Feed,
    pub presence: PresenceTracker,
    pub uploads: AssetUploadPipeline,
}
