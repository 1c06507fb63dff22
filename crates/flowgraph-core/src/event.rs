use crate::types::GraphEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
#[derive(Debug)]
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<GraphEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: GraphEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GraphEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
