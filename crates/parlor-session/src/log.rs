use std::sync::{Arc, Mutex};

use parlor_types::models::Message;

/// The client-visible message log, ordered by `(created_at, id)` ascending.
///
/// Shared between the session's reconcile task and whatever reads snapshots;
/// all mutation goes through the single inner mutex so a racing initial load
/// and feed event cannot lose updates.
#[derive(Clone)]
pub struct MessageLog {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replace the whole log with a fresh baseline. Idempotent.
    pub fn replace(&self, mut messages: Vec<Message>) {
        normalize(&mut messages);
        *self.inner.lock().expect("message log lock poisoned") = messages;
    }

    /// Append a message unless its id is already present. Returns true if
    /// the message was appended.
    ///
    /// The feed delivers in commit order and the baseline is ascending, so a
    /// plain push keeps the ordering invariant. The one exception is an
    /// event racing a concurrent reload, which can land behind the tail; in
    /// that case the log is re-sorted before anyone sees it.
    pub fn append_if_absent(&self, message: Message) -> bool {
        let mut log = self.inner.lock().expect("message log lock poisoned");
        if log.iter().any(|m| m.id == message.id) {
            return false;
        }
        let out_of_order = log
            .last()
            .is_some_and(|tail| tail.order_key() > message.order_key());
        log.push(message);
        if out_of_order {
            normalize(&mut log);
        }
        true
    }

    /// Union the incoming window into the log, then re-dedup and re-sort.
    /// Used after a feed gap, when events may have been missed entirely.
    pub fn merge(&self, incoming: Vec<Message>) {
        let mut log = self.inner.lock().expect("message log lock poisoned");
        log.extend(incoming);
        normalize(&mut log);
    }

    pub fn contains(&self, id: i64) -> bool {
        self.inner
            .lock()
            .expect("message log lock poisoned")
            .iter()
            .any(|m| m.id == id)
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner
            .lock()
            .expect("message log lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("message log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(log: &mut Vec<Message>) {
    log.sort_by_key(|m| m.order_key());
    // Equal ids sort adjacent (same record, same key), so dedup works.
    log.dedup_by_key(|m| m.id);
}
