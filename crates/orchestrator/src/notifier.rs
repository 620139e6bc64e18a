//! Terminal-transition notifications.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::CorrelationId;
use domain::{Saga, SagaStatus};
use serde::{Deserialize, Serialize};

/// Payload emitted to the messaging collaborator when a saga reaches a
/// terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaNotification {
    /// The human-readable business ID.
    pub saga_id: String,
    /// The external lookup ID.
    pub correlation_id: CorrelationId,
    /// The terminal status the saga reached.
    pub status: SagaStatus,
    /// The saga-level error, if the saga did not complete cleanly.
    pub error_message: Option<String>,
}

impl SagaNotification {
    /// Builds a notification from the saga's current state.
    pub fn from_saga(saga: &Saga) -> Self {
        Self {
            saga_id: saga.saga_id().to_string(),
            correlation_id: saga.correlation_id(),
            status: saga.status(),
            error_message: saga.error_message().map(str::to_string),
        }
    }
}

/// Receives a notification on each terminal transition.
///
/// Transport and format are the collaborator's concern; the engine only
/// hands over the payload.
#[async_trait]
pub trait SagaNotifier: Send + Sync {
    /// Delivers a terminal-transition notification.
    async fn notify(&self, notification: SagaNotification);
}

/// Discards all notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl SagaNotifier for NoopNotifier {
    async fn notify(&self, _notification: SagaNotification) {}
}

/// Records notifications in memory for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<SagaNotification>>>,
}

impl InMemoryNotifier {
    /// Creates a new recording notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all notifications received so far.
    pub fn sent(&self) -> Vec<SagaNotification> {
        self.sent.read().unwrap().clone()
    }

    /// Returns the number of notifications received.
    pub fn count(&self) -> usize {
        self.sent.read().unwrap().len()
    }
}

#[async_trait]
impl SagaNotifier for InMemoryNotifier {
    async fn notify(&self, notification: SagaNotification) {
        self.sent.write().unwrap().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{SagaDefinition, StateMap, StepDefinition};
    use std::time::Duration;

    fn make_saga() -> Saga {
        let definition = SagaDefinition::new(
            "ORDER",
            "Order workflow",
            vec![StepDefinition::new("reserve", "inventory.reserve")],
            Duration::from_secs(30),
            3,
        )
        .unwrap();
        Saga::from_definition(&definition, StateMap::new(), None)
    }

    #[test]
    fn test_notification_from_saga() {
        let saga = make_saga();
        let notification = SagaNotification::from_saga(&saga);

        assert_eq!(notification.saga_id, saga.saga_id());
        assert_eq!(notification.correlation_id, saga.correlation_id());
        assert_eq!(notification.status, SagaStatus::Created);
        assert!(notification.error_message.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_notifier_records() {
        let notifier = InMemoryNotifier::new();
        let saga = make_saga();

        notifier.notify(SagaNotification::from_saga(&saga)).await;
        notifier.notify(SagaNotification::from_saga(&saga)).await;

        assert_eq!(notifier.count(), 2);
        assert_eq!(notifier.sent()[0].saga_id, saga.saga_id());
    }

    #[tokio::test]
    async fn test_noop_notifier_discards() {
        let notifier = NoopNotifier;
        let saga = make_saga();
        notifier.notify(SagaNotification::from_saga(&saga)).await;
    }
}
