//! Change feed and dashboard notifications.
//!
//! Writes publish a [`StoreEvent`] onto a process-local broadcast
//! channel; the [`NotificationCenter`] folds client-originated inserts
//! (messages, documents, questions) into the bell-icon notification list
//! the dashboard shows. Thin event forwarding only: no replay, no
//! ordering guarantee, no dedup.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const FEED_CAPACITY: usize = 256;
/// Question previews are clipped like the original bell dropdown.
const PREVIEW_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTable {
    Cases,
    Documents,
    Questions,
    Messages,
    Faq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOp {
    Insert,
    Update,
    Delete,
}

/// One observed store mutation.
#[derive(Debug, Clone, Serialize)]
pub struct StoreEvent {
    pub table: StoreTable,
    pub op: StoreOp,
    pub row_id: i64,
    pub case_id: Option<i64>,
    /// Human line for notification rendering, composed at publish time
    /// while the writer still has the context (e.g. the client's name).
    pub summary: String,
}

/// Broadcast fan-out of store events to SSE subscribers and the
/// notification center.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody listens.
    pub fn publish(&self, event: StoreEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::debug!(receivers, "store event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Message,
    Document,
    Question,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// In-memory notification list with unread tracking.
///
/// Session-scoped like the original dashboard's: notifications exist only
/// for the lifetime of the process, newest first.
#[derive(Default)]
pub struct NotificationCenter {
    notifications: Mutex<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one store event into the list. Only client-originated
    /// inserts produce notifications.
    pub fn observe(&self, event: &StoreEvent) {
        let (kind, title) = match (event.table, event.op) {
            (StoreTable::Messages, StoreOp::Insert) => (NotificationKind::Message, "New Message"),
            (StoreTable::Documents, StoreOp::Insert) => {
                (NotificationKind::Document, "New Document")
            }
            (StoreTable::Questions, StoreOp::Insert) => {
                (NotificationKind::Question, "New Question")
            }
            _ => return,
        };

        let notification = Notification {
            id: Uuid::new_v4(),
            kind,
            title: title.to_string(),
            description: event.summary.clone(),
            timestamp: Utc::now(),
            read: false,
        };
        self.lock().insert(0, notification);
    }

    pub fn list(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().iter().filter(|n| !n.read).count()
    }

    pub fn mark_as_read(&self, id: Uuid) -> bool {
        let mut notifications = self.lock();
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) {
        for notification in self.lock().iter_mut() {
            notification.read = true;
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Consume the feed until it closes. Spawned once at startup.
    pub async fn run(&self, mut rx: broadcast::Receiver<StoreEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.observe(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "notification feed lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clip a question to a one-line preview, like the bell dropdown.
pub fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_LEN {
        return trimmed.to_string();
    }
    let clipped: String = trimmed.chars().take(PREVIEW_LEN).collect();
    format!("{clipped}...")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{
        ChangeFeed, NotificationCenter, NotificationKind, StoreEvent, StoreOp, StoreTable,
        preview,
    };

    fn event(table: StoreTable, op: StoreOp, summary: &str) -> StoreEvent {
        StoreEvent {
            table,
            op,
            row_id: 1,
            case_id: None,
            summary: summary.to_string(),
        }
    }

    #[test]
    fn inserts_become_notifications_updates_do_not() {
        let center = NotificationCenter::new();
        center.observe(&event(StoreTable::Questions, StoreOp::Insert, "Anna asked: hi"));
        center.observe(&event(StoreTable::Cases, StoreOp::Update, "case edited"));
        center.observe(&event(StoreTable::Documents, StoreOp::Insert, "passport.pdf uploaded"));

        let list = center.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind, NotificationKind::Document, "newest first");
        assert_eq!(center.unread_count(), 2);
    }

    #[test]
    fn read_tracking_works_per_item_and_in_bulk() {
        let center = NotificationCenter::new();
        center.observe(&event(StoreTable::Messages, StoreOp::Insert, "New message"));
        center.observe(&event(StoreTable::Messages, StoreOp::Insert, "Another"));

        let first = center.list()[0].id;
        assert!(center.mark_as_read(first));
        assert_eq!(center.unread_count(), 1);

        center.mark_all_read();
        assert_eq!(center.unread_count(), 0);

        center.clear();
        assert!(center.list().is_empty());
    }

    #[test]
    fn feed_delivers_to_subscribers() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();
        feed.publish(event(StoreTable::Questions, StoreOp::Insert, "hello"));
        let received = rx.try_recv().expect("event should be buffered");
        assert_eq!(received.summary, "hello");
    }

    #[test]
    fn preview_clips_long_questions() {
        assert_eq!(preview("short question"), "short question");
        let long = "x".repeat(80);
        let clipped = preview(&long);
        assert_eq!(clipped.chars().count(), 53);
        assert!(clipped.ends_with("..."));
    }
}
