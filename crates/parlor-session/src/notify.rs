use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use uuid::Uuid;

use parlor_types::models::Message;

/// How long a raised alert stays on screen before auto-dismissing.
pub const ALERT_TTL_MS: u64 = 5_000;

/// A transient, auto-dismissing user-facing alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub ttl_ms: u64,
}

/// Turns reconciled message events into alerts for one viewer.
///
/// Self-originated and already-alerted messages are suppressed. Dispatch is
/// fire-and-forget: a closed sink or a disabled permission flag is a silent
/// no-op with no retry.
pub struct NotificationDispatcher {
    viewer_id: Uuid,
    enabled: AtomicBool,
    alerted: Mutex<HashSet<i64>>,
    sink: mpsc::UnboundedSender<Alert>,
}

impl NotificationDispatcher {
    /// Starts disabled; the consumer flips [`set_enabled`](Self::set_enabled)
    /// once it has obtained notification permission out of band.
    pub fn new(viewer_id: Uuid, sink: mpsc::UnboundedSender<Alert>) -> Self {
        Self {
            viewer_id,
            enabled: AtomicBool::new(false),
            alerted: Mutex::new(HashSet::new()),
            sink,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn notify(&self, message: &Message) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        if message.author_id == self.viewer_id {
            return;
        }
        {
            let mut alerted = self.alerted.lock().expect("alert set lock poisoned");
            if !alerted.insert(message.id) {
                return;
            }
        }

        let body = message
            .content
            .clone()
            .unwrap_or_else(|| "Sent media".to_string());

        let _ = self.sink.send(Alert {
            title: format!("New message from {}", message.author_display_name),
            body,
            ttl_ms: ALERT_TTL_MS,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parlor_types::models::MessageKind;

    fn message(id: i64, author: Uuid, content: Option<&str>) -> Message {
        let kind = if content.is_some() {
            MessageKind::Text
        } else {
            MessageKind::Sticker
        };
        Message {
            id,
            author_id: author,
            author_display_name: "alice".into(),
            author_avatar_url: None,
            kind,
            content: content.map(String::from),
            media_url: content.is_none().then(|| "http://x/s.png".into()),
            created_at: Utc::now(),
        }
    }

    fn dispatcher(viewer: Uuid) -> (NotificationDispatcher, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let d = NotificationDispatcher::new(viewer, tx);
        d.set_enabled(true);
        (d, rx)
    }

    #[test]
    fn alerts_carry_author_and_content() {
        let viewer = Uuid::new_v4();
        let (d, mut rx) = dispatcher(viewer);

        d.notify(&message(1, Uuid::new_v4(), Some("hi")));

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.title, "New message from alice");
        assert_eq!(alert.body, "hi");
        assert_eq!(alert.ttl_ms, ALERT_TTL_MS);
    }

    #[test]
    fn media_messages_get_the_generic_label() {
        let (d, mut rx) = dispatcher(Uuid::new_v4());
        d.notify(&message(1, Uuid::new_v4(), None));
        assert_eq!(rx.try_recv().unwrap().body, "Sent media");
    }

    #[test]
    fn own_messages_are_suppressed() {
        let viewer = Uuid::new_v4();
        let (d, mut rx) = dispatcher(viewer);
        d.notify(&message(1, viewer, Some("hi")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_events_raise_one_alert() {
        let (d, mut rx) = dispatcher(Uuid::new_v4());
        let m = message(1, Uuid::new_v4(), Some("hi"));
        d.notify(&m);
        d.notify(&m);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_dispatcher_is_a_no_op() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let d = NotificationDispatcher::new(Uuid::new_v4(), tx);
        d.notify(&message(1, Uuid::new_v4(), Some("hi")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_sink_is_a_silent_no_op() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let d = NotificationDispatcher::new(Uuid::new_v4(), tx);
        d.set_enabled(true);
        // must not panic
        d.notify(&message(1, Uuid::new_v4(), Some("hi")));
    }
}
