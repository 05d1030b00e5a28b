use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use parlor_db::Database;
use parlor_feed::{Feed, FeedError, Subscription};
use parlor_types::events::{EventKind, SessionEvent, Table};
use parlor_types::models::Message;

use crate::log::MessageLog;
use crate::notify::NotificationDispatcher;

/// Maintains one session's ordered message log by combining an initial bulk
/// load with incremental feed events.
///
/// The feed is treated as a wake-up signal, not as the source of truth:
/// every insert event triggers a single-row re-fetch (for denormalized
/// author fields) and every detected gap triggers a windowed re-fetch with
/// merge, so missed or re-delivered events never corrupt the log.
pub struct MessageSynchronizer {
    db: Arc<Database>,
    log: MessageLog,
    limit: u32,
}

impl MessageSynchronizer {
    pub fn new(db: Arc<Database>, limit: u32) -> Self {
        Self {
            db,
            log: MessageLog::new(),
            limit,
        }
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Fetch the most recent window and make it the baseline. Safe to call
    /// again at any time; the baseline is simply replaced.
    pub async fn initial_load(&self) -> anyhow::Result<()> {
        let messages = self.fetch_window().await?;
        self.log.replace(messages);
        Ok(())
    }

    /// Reconcile one insert event. Returns the message if it was new to the
    /// log, `None` on duplicate delivery or an unknown row.
    pub async fn apply_insert(&self, row_id: i64) -> anyhow::Result<Option<Message>> {
        if self.log.contains(row_id) {
            return Ok(None);
        }

        let db = self.db.clone();
        let row = tokio::task::spawn_blocking(move || db.get_message(row_id)).await??;
        let Some(row) = row else {
            warn!("feed reported message {} but the store has no such row", row_id);
            return Ok(None);
        };

        let message = row.into_message()?;
        if self.log.append_if_absent(message.clone()) {
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    /// Close a gap: re-fetch the recent window and merge it into the log.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let messages = self.fetch_window().await?;
        self.log.merge(messages);
        Ok(())
    }

    async fn fetch_window(&self) -> anyhow::Result<Vec<Message>> {
        let db = self.db.clone();
        let limit = self.limit;
        let rows = tokio::task::spawn_blocking(move || db.get_messages(limit)).await??;
        rows.into_iter().map(|r| r.into_message()).collect()
    }

    /// The session's reconcile loop. Applies insert events, forwards fresh
    /// appends to the session sink, and raises notifications. On a gap it
    /// re-fetches and pushes a corrected history; on a closed feed it
    /// resubscribes under the feed's bounded budget, and tells the client
    /// live updates are gone when that budget runs out.
    pub async fn run(
        &self,
        feed: Feed,
        mut sub: Subscription,
        events: mpsc::UnboundedSender<SessionEvent>,
        notifier: Arc<NotificationDispatcher>,
    ) {
        loop {
            match sub.recv().await {
                Ok(event) if event.kind == EventKind::Insert => {
                    let id = match event.row_id.parse::<i64>() {
                        Ok(id) => id,
                        Err(_) => {
                            warn!("bad message row id on feed: {}", event.row_id);
                            continue;
                        }
                    };
                    match self.apply_insert(id).await {
                        Ok(Some(message)) => {
                            notifier.notify(&message);
                            if events
                                .send(SessionEvent::MessageAppend { message })
                                .is_err()
                            {
                                break; // session sink gone, stop reconciling
                            }
                        }
                        Ok(None) => {} // at-least-once redelivery, already reconciled
                        Err(e) => warn!("failed to reconcile message {}: {}", id, e),
                    }
                }
                Ok(_) => {} // messages are never deleted in normal operation
                Err(FeedError::Lagged(n)) => {
                    warn!("message feed lagged by {}, refreshing", n);
                    if let Err(e) = self.refresh().await {
                        warn!("refresh after gap failed: {}", e);
                        continue;
                    }
                    let _ = events.send(SessionEvent::MessageHistory {
                        messages: self.log.snapshot(),
                    });
                }
                Err(FeedError::Cancelled) => break,
                Err(FeedError::Closed) => {
                    match feed.resubscribe(Table::Messages, &[EventKind::Insert]).await {
                        Ok(new_sub) => {
                            sub = new_sub;
                            if let Err(e) = self.refresh().await {
                                warn!("refresh after resubscribe failed: {}", e);
                            }
                            let _ = events.send(SessionEvent::MessageHistory {
                                messages: self.log.snapshot(),
                            });
                            let _ = events.send(SessionEvent::FeedStatus { live: true });
                        }
                        Err(_) => {
                            let _ = events.send(SessionEvent::FeedStatus { live: false });
                            break;
                        }
                    }
                }
            }
        }
    }
}
