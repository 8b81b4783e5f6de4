use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// A row-level change, published after the write commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub table: &'static str,
    pub action: ChangeAction,
    pub id: String,
    pub organization_id: Option<String>,
}

impl ChangeEvent {
    pub fn new(
        table: &'static str,
        action: ChangeAction,
        id: impl Into<String>,
        organization_id: Option<&str>,
    ) -> Self {
        Self {
            table,
            action,
            id: id.into(),
            organization_id: organization_id.map(str::to_string),
        }
    }

    /// Events without an organization are delivered to every subscriber.
    pub fn visible_to(&self, organization_id: Option<&str>) -> bool {
        match (organization_id, self.organization_id.as_deref()) {
            (None, _) | (_, None) => true,
            (Some(wanted), Some(own)) => wanted == own,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let receivers = self.tx.send(event).unwrap_or(0);
        trace!(receivers, "change event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(ChangeEvent::new("calls", ChangeAction::Insert, "c1", Some("org")));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.table, "calls");
        assert_eq!(got.id, "c1");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::default().publish(ChangeEvent::new("users", ChangeAction::Update, "u", None));
    }

    #[test]
    fn org_filter() {
        let ev = ChangeEvent::new("calls", ChangeAction::Insert, "c1", Some("a"));
        assert!(ev.visible_to(Some("a")));
        assert!(!ev.visible_to(Some("b")));
        assert!(ev.visible_to(None));
        let global = ChangeEvent::new("users", ChangeAction::Update, "u", None);
        assert!(global.visible_to(Some("b")));
    }
}
