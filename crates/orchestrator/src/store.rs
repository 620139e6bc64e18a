//! Saga instance store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CorrelationId, InstanceId};
use domain::{Saga, SagaStatus};
use tokio::sync::{Mutex, RwLock};

/// Exclusive write handle to a single saga instance.
///
/// Every read-then-write sequence (`execute_step`, `complete_step`,
/// `fail_step`, `cancel`) runs under this lock, and the lock is held across
/// the invoker call so cancellation never races an in-flight step.
pub type SagaHandle = Arc<Mutex<Saga>>;

/// Holds live saga instances keyed by instance ID and indexed by
/// correlation ID and status.
///
/// Reads return point-in-time clones; mutation goes through the per-instance
/// handle. Cross-instance operations take only the map-level read lock and
/// never block progress of unrelated sagas.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a freshly created instance.
    async fn insert(&self, saga: Saga);

    /// Returns a point-in-time snapshot of an instance.
    async fn get(&self, id: InstanceId) -> Option<Saga>;

    /// Looks up an instance snapshot by correlation ID.
    async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Option<Saga>;

    /// Returns snapshots of all instances currently in the given status.
    async fn list_by_status(&self, status: SagaStatus) -> Vec<Saga>;

    /// Returns the exclusive write handle for an instance.
    async fn handle(&self, id: InstanceId) -> Option<SagaHandle>;
}

#[derive(Default)]
struct StoreIndex {
    sagas: HashMap<InstanceId, SagaHandle>,
    by_correlation: HashMap<CorrelationId, InstanceId>,
}

/// In-memory store: per-instance mutexes under a map-level read/write lock.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    inner: Arc<RwLock<StoreIndex>>,
}

impl InMemorySagaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored instances.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sagas.len()
    }

    /// Returns true if the store holds no instances.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sagas.is_empty()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, saga: Saga) {
        let mut inner = self.inner.write().await;
        inner.by_correlation.insert(saga.correlation_id(), saga.id());
        inner.sagas.insert(saga.id(), Arc::new(Mutex::new(saga)));
    }

    async fn get(&self, id: InstanceId) -> Option<Saga> {
        let handle = self.inner.read().await.sagas.get(&id).cloned()?;
        let saga = handle.lock().await;
        Some(saga.clone())
    }

    async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Option<Saga> {
        let id = {
            let inner = self.inner.read().await;
            inner.by_correlation.get(&correlation_id).copied()
        }?;
        self.get(id).await
    }

    async fn list_by_status(&self, status: SagaStatus) -> Vec<Saga> {
        let handles: Vec<SagaHandle> = {
            let inner = self.inner.read().await;
            inner.sagas.values().cloned().collect()
        };

        let mut matching = Vec::new();
        for handle in handles {
            let saga = handle.lock().await;
            if saga.status() == status {
                matching.push(saga.clone());
            }
        }
        matching
    }

    async fn handle(&self, id: InstanceId) -> Option<SagaHandle> {
        self.inner.read().await.sagas.get(&id).cloned()
    }
}
