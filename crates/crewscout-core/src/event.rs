use crate::types::AgentEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: AgentEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
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
    use crate::types::RunId;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(AgentEvent::RunStarted {
            run_id: RunId("r1".into()),
            total_tasks: 4,
        });
        match rx.recv().await.unwrap() {
            AgentEvent::RunStarted { run_id, total_tasks } => {
                assert_eq!(run_id.0, "r1");
                assert_eq!(total_tasks, 4);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::RunError {
            run_id: RunId::new(),
            error: "nobody listening".into(),
        });
    }
}
