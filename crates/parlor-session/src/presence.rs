use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use parlor_db::Database;
use parlor_feed::Feed;
use parlor_types::events::{FeedEvent, Table};
use parlor_types::models::{AuthContext, PresenceEntry};

/// Heartbeat cadence. Strictly below the staleness threshold so a
/// continuously-connected user is never misclassified offline between beats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);

/// A user is online while `now - last_seen` stays under this.
pub const ONLINE_THRESHOLD_MS: i64 = 60_000;

/// Staleness classification, evaluated against wall-clock time at the
/// moment of display. Two callers at different instants may disagree about
/// a borderline user; presence is eventual, not strict.
pub fn is_online(last_seen_ms: i64, now_ms: i64) -> bool {
    now_ms - last_seen_ms < ONLINE_THRESHOLD_MS
}

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("admin role required")]
    NotAuthorized,

    #[error("cannot remove your own account")]
    SelfRemoval,

    #[error("user not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct PresenceTracker {
    db: Arc<Database>,
    feed: Feed,
}

impl PresenceTracker {
    pub fn new(db: Arc<Database>, feed: Feed) -> Self {
        Self { db, feed }
    }

    /// Unconditionally overwrite the user's last-seen timestamp with now.
    pub async fn heartbeat(&self, user_id: Uuid) -> anyhow::Result<()> {
        let db = self.db.clone();
        let now = Utc::now().timestamp_millis();
        tokio::task::spawn_blocking(move || db.touch_last_seen(&user_id.to_string(), now))
            .await?
    }

    /// All users ordered by last-seen descending, classified online/offline
    /// against a single wall-clock read.
    pub async fn list(&self) -> anyhow::Result<Vec<PresenceEntry>> {
        let db = self.db.clone();
        let rows = tokio::task::spawn_blocking(move || db.list_users()).await??;

        let now_ms = Utc::now().timestamp_millis();
        rows.into_iter()
            .map(|row| {
                let online = is_online(row.last_seen, now_ms);
                row.into_presence(online)
            })
            .collect()
    }

    /// Admin-only account removal. Refuses the caller's own id so an admin
    /// cannot lock themselves out through this path.
    pub async fn remove(&self, ctx: &AuthContext, user_id: Uuid) -> Result<(), PresenceError> {
        if !ctx.is_admin() {
            return Err(PresenceError::NotAuthorized);
        }
        if ctx.user_id == user_id {
            return Err(PresenceError::SelfRemoval);
        }

        let db = self.db.clone();
        let id = user_id.to_string();
        let removed = tokio::task::spawn_blocking(move || db.delete_user(&id))
            .await
            .map_err(anyhow::Error::from)??;
        if !removed {
            return Err(PresenceError::NotFound);
        }

        self.feed
            .publish(FeedEvent::delete(Table::Users, user_id.to_string()));
        Ok(())
    }
}

/// The per-session heartbeat writer, with an explicit lifecycle: started
/// when the session opens, stopped (or dropped) when it ends so no timer
/// outlives its session.
pub struct HeartbeatTask {
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    pub fn start(tracker: PresenceTracker, user_id: Uuid) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                // first tick fires immediately, writing once at session start
                interval.tick().await;
                if let Err(e) = tracker.heartbeat(user_id).await {
                    warn!("heartbeat for {} failed: {}", user_id, e);
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_types::events::EventKind;
    use parlor_types::models::Role;

    fn setup(role: &str, last_seen: i64) -> (Arc<Database>, Feed, PresenceTracker, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let feed = Feed::new();
        let user = Uuid::new_v4();
        db.create_user(&user.to_string(), "alice", None, role, last_seen)
            .unwrap();
        let tracker = PresenceTracker::new(db.clone(), feed.clone());
        (db, feed, tracker, user)
    }

    #[test]
    fn online_classification_boundaries() {
        let now = 1_700_000_000_000;
        assert!(is_online(now - 59_999, now));
        assert!(!is_online(now - 60_000, now));
        assert!(!is_online(now - 60_001, now));
    }

    #[tokio::test]
    async fn heartbeat_overwrites_last_seen_with_now() {
        let (db, _feed, tracker, user) = setup("user", 0);

        tracker.heartbeat(user).await.unwrap();

        let row = db.get_user(&user.to_string()).unwrap().unwrap();
        let now = Utc::now().timestamp_millis();
        assert!(row.last_seen > 0);
        assert!(now - row.last_seen < 5_000);
    }

    #[tokio::test]
    async fn list_classifies_against_one_clock_read() {
        let (db, _feed, tracker, user) = setup("user", Utc::now().timestamp_millis());
        let stale = Uuid::new_v4();
        db.create_user(&stale.to_string(), "bob", None, "user", 1)
            .unwrap();

        let entries = tracker.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        // ordered by last_seen descending: fresh first
        assert_eq!(entries[0].user_id, user);
        assert!(entries[0].online);
        assert!(!entries[1].online);
        assert_eq!(entries[1].role, Role::User);
    }

    #[tokio::test]
    async fn remove_requires_admin() {
        let (_db, _feed, tracker, user) = setup("user", 0);
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            display_name: "mallory".into(),
            role: Role::User,
        };
        assert!(matches!(
            tracker.remove(&ctx, user).await,
            Err(PresenceError::NotAuthorized)
        ));
    }

    #[tokio::test]
    async fn remove_rejects_self_lockout() {
        let (_db, _feed, tracker, admin) = setup("admin", 0);
        let ctx = AuthContext {
            user_id: admin,
            display_name: "alice".into(),
            role: Role::Admin,
        };
        assert!(matches!(
            tracker.remove(&ctx, admin).await,
            Err(PresenceError::SelfRemoval)
        ));
    }

    #[tokio::test]
    async fn remove_deletes_and_publishes() {
        let (db, feed, tracker, admin) = setup("admin", 0);
        let victim = Uuid::new_v4();
        db.create_user(&victim.to_string(), "bob", None, "user", 0)
            .unwrap();

        let mut sub = feed.subscribe(Table::Users, &[EventKind::Delete]).unwrap();

        let ctx = AuthContext {
            user_id: admin,
            display_name: "alice".into(),
            role: Role::Admin,
        };
        tracker.remove(&ctx, victim).await.unwrap();

        assert!(db.get_user(&victim.to_string()).unwrap().is_none());
        assert_eq!(sub.recv().await.unwrap().row_id, victim.to_string());

        // a second removal of the same id reports NotFound
        assert!(matches!(
            tracker.remove(&ctx, victim).await,
            Err(PresenceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn heartbeat_task_writes_and_stops() {
        let (db, _feed, tracker, user) = setup("user", 0);

        let task = HeartbeatTask::start(tracker, user);

        // first beat lands almost immediately
        let mut written = false;
        for _ in 0..200 {
            if db.get_user(&user.to_string()).unwrap().unwrap().last_seen > 0 {
                written = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(written, "heartbeat task never wrote last_seen");

        task.stop();
    }
}
