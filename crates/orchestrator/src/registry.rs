//! Definition registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{DefinitionError, SagaDefinition};
use tokio::sync::RwLock;

/// Holds named saga definitions.
///
/// `register` upserts by saga type, which supports hot redeployment of
/// workflow definitions. Running instances hold their own step snapshot and
/// are never affected by a redeploy.
#[async_trait]
pub trait DefinitionRegistry: Send + Sync {
    /// Registers (or replaces) a definition, returning the stored copy.
    async fn register(
        &self,
        definition: SagaDefinition,
    ) -> Result<SagaDefinition, DefinitionError>;

    /// Looks up a definition by saga type.
    async fn get(&self, saga_type: &str) -> Option<SagaDefinition>;

    /// Returns all registered definitions.
    async fn list(&self) -> Vec<SagaDefinition>;
}

/// In-memory registry backed by a read/write-locked map.
#[derive(Clone, Default)]
pub struct InMemoryDefinitionRegistry {
    definitions: Arc<RwLock<HashMap<String, SagaDefinition>>>,
}

impl InMemoryDefinitionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered definitions.
    pub async fn len(&self) -> usize {
        self.definitions.read().await.len()
    }

    /// Returns true if no definitions are registered.
    pub async fn is_empty(&self) -> bool {
        self.definitions.read().await.is_empty()
    }
}

#[async_trait]
impl DefinitionRegistry for InMemoryDefinitionRegistry {
    async fn register(
        &self,
        definition: SagaDefinition,
    ) -> Result<SagaDefinition, DefinitionError> {
        definition.validate()?;
        self.definitions
            .write()
            .await
            .insert(definition.saga_type().to_string(), definition.clone());
        Ok(definition)
    }

    async fn get(&self, saga_type: &str) -> Option<SagaDefinition> {
        self.definitions.read().await.get(saga_type).cloned()
    }

    async fn list(&self) -> Vec<SagaDefinition> {
        self.definitions.read().await.values().cloned().collect()
    }
}
