//! Saga orchestrator: the core state machine driving instances step by step.

use chrono::Utc;
use common::{CorrelationId, InstanceId};
use domain::{Saga, SagaDefinition, SagaStatus, StateMap, StepStatus};

use crate::compensation;
use crate::error::OrchestratorError;
use crate::invoker::StepActionInvoker;
use crate::notifier::{SagaNotification, SagaNotifier};
use crate::policy::{RetryDecision, RetryPolicy};
use crate::registry::DefinitionRegistry;
use crate::store::SagaStore;

/// Orchestrates saga instances from creation through completion, retry,
/// compensation, and cancellation.
///
/// Instances execute concurrently and independently; within one instance,
/// steps run strictly sequentially under the store's per-instance lock. The
/// invoker call is the only suspension point, and it runs under that lock so
/// a concurrent `cancel` waits for the in-flight step to settle before
/// compensating.
pub struct SagaOrchestrator<R, S, I, N>
where
    R: DefinitionRegistry,
    S: SagaStore,
    I: StepActionInvoker,
    N: SagaNotifier,
{
    registry: R,
    store: S,
    invoker: I,
    notifier: N,
}

impl<R, S, I, N> SagaOrchestrator<R, S, I, N>
where
    R: DefinitionRegistry,
    S: SagaStore,
    I: StepActionInvoker,
    N: SagaNotifier,
{
    /// Creates a new orchestrator over the given collaborators.
    pub fn new(registry: R, store: S, invoker: I, notifier: N) -> Self {
        Self {
            registry,
            store,
            invoker,
            notifier,
        }
    }

    /// Registers a definition after checking every action type against the
    /// invoker, so misconfigured workflows fail at registration rather than
    /// at execution time.
    pub async fn register_definition(
        &self,
        definition: SagaDefinition,
    ) -> Result<SagaDefinition, OrchestratorError> {
        for step in definition.steps() {
            if !self.invoker.supports(step.action_type()) {
                return Err(OrchestratorError::UnknownActionType {
                    saga_type: definition.saga_type().to_string(),
                    step_name: step.step_name().to_string(),
                    action_type: step.action_type().to_string(),
                });
            }
            if let Some(compensation) = step.compensation_action_type()
                && !self.invoker.supports_compensation(compensation)
            {
                return Err(OrchestratorError::UnknownActionType {
                    saga_type: definition.saga_type().to_string(),
                    step_name: step.step_name().to_string(),
                    action_type: compensation.to_string(),
                });
            }
        }
        Ok(self.registry.register(definition).await?)
    }

    /// Looks up a registered definition.
    pub async fn definition(&self, saga_type: &str) -> Option<SagaDefinition> {
        self.registry.get(saga_type).await
    }

    /// Creates a new instance of a registered saga type.
    #[tracing::instrument(skip(self, initial_state, initiator_id))]
    pub async fn create(
        &self,
        saga_type: &str,
        initial_state: StateMap,
        initiator_id: Option<String>,
    ) -> Result<Saga, OrchestratorError> {
        let definition = self
            .registry
            .get(saga_type)
            .await
            .ok_or_else(|| OrchestratorError::UnknownSagaType(saga_type.to_string()))?;

        let saga = Saga::from_definition(&definition, initial_state, initiator_id);
        metrics::counter!("saga_instances_created").increment(1);
        tracing::info!(saga_id = %saga.saga_id(), "saga instance created");

        self.store.insert(saga.clone()).await;
        Ok(saga)
    }

    /// Returns a snapshot of an instance.
    pub async fn get(&self, id: InstanceId) -> Option<Saga> {
        self.store.get(id).await
    }

    /// Returns a snapshot of an instance by correlation ID.
    pub async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Option<Saga> {
        self.store.get_by_correlation_id(correlation_id).await
    }

    /// Returns snapshots of all instances in the given status.
    pub async fn list_by_status(&self, status: SagaStatus) -> Vec<Saga> {
        self.store.list_by_status(status).await
    }

    /// Starts a created saga. Returns false if the saga is unknown or not
    /// in `Created`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, id: InstanceId) -> bool {
        let Some(handle) = self.store.handle(id).await else {
            return false;
        };
        let mut saga = handle.lock().await;
        if !saga.begin() {
            return false;
        }
        tracing::info!(saga_id = %saga.saga_id(), "saga started");
        true
    }

    /// Executes the current step of a running saga through the invoker.
    ///
    /// Returns false if the saga is unknown or not `Running`. A saga whose
    /// cursor has already passed the last step is completed idempotently.
    #[tracing::instrument(skip(self))]
    pub async fn execute_step(&self, id: InstanceId) -> bool {
        let Some(handle) = self.store.handle(id).await else {
            return false;
        };
        let mut saga = handle.lock().await;
        if saga.status() != SagaStatus::Running {
            return false;
        }

        if saga.current_step_index() >= saga.steps().len() {
            saga.mark_completed();
            metrics::counter!("saga_completed").increment(1);
            Self::record_duration(&saga);
            let notification = SagaNotification::from_saga(&saga);
            drop(saga);
            self.notifier.notify(notification).await;
            return true;
        }

        let index = saga.current_step_index();
        if !saga.mark_step_running(index) {
            return false;
        }
        let action = saga.steps()[index].action_type().to_string();
        let step_name = saga.steps()[index].step_name().to_string();
        tracing::info!(saga_id = %saga.saga_id(), step = %step_name, "saga step started");

        // The sole suspension point: a potentially slow remote call, bounded
        // by the saga's per-step timeout and run under the instance lock.
        let outcome = tokio::time::timeout(
            saga.timeout(),
            self.invoker.invoke(&action, saga.state()),
        )
        .await;

        let notification = match outcome {
            Ok(Ok(output)) => {
                saga.record_step_completion(index, output);
                metrics::counter!("saga_steps_completed_total").increment(1);
                self.completion_aftermath(&saga)
            }
            Ok(Err(error)) => self.apply_failure(&mut saga, index, &error.to_string()).await,
            Err(_) => {
                metrics::counter!("saga_step_timeouts_total").increment(1);
                let reason = format!("step '{step_name}' timed out");
                self.apply_failure(&mut saga, index, &reason).await
            }
        };

        drop(saga);
        if let Some(notification) = notification {
            self.notifier.notify(notification).await;
        }
        true
    }

    /// Records a step completion reported by an external caller and advances
    /// the cursor. Returns false if the saga is unknown or not `Running`, or
    /// if `step_index` is out of range or not the current step.
    pub async fn complete_step(
        &self,
        id: InstanceId,
        step_index: usize,
        output: Option<String>,
    ) -> bool {
        let Some(handle) = self.store.handle(id).await else {
            return false;
        };
        let mut saga = handle.lock().await;
        if !saga.record_step_completion(step_index, output) {
            return false;
        }
        metrics::counter!("saga_steps_completed_total").increment(1);
        let notification = self.completion_aftermath(&saga);
        drop(saga);
        if let Some(notification) = notification {
            self.notifier.notify(notification).await;
        }
        true
    }

    /// Records a step failure reported by an external caller. The retry
    /// budget decides whether the step is reset to `Pending` or the saga is
    /// failed and compensated.
    pub async fn fail_step(&self, id: InstanceId, step_index: usize, error: &str) -> bool {
        let Some(handle) = self.store.handle(id).await else {
            return false;
        };
        let mut saga = handle.lock().await;
        if saga.status() != SagaStatus::Running
            || step_index >= saga.steps().len()
            || step_index != saga.current_step_index()
        {
            return false;
        }
        let notification = self.apply_failure(&mut saga, step_index, error).await;
        drop(saga);
        if let Some(notification) = notification {
            self.notifier.notify(notification).await;
        }
        true
    }

    /// Forces compensation of a running saga without waiting for a step
    /// failure, e.g. from an operator action.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, id: InstanceId) -> bool {
        let Some(handle) = self.store.handle(id).await else {
            return false;
        };
        let mut saga = handle.lock().await;
        if saga.status() != SagaStatus::Running {
            return false;
        }
        compensation::unwind(&mut saga, &self.invoker).await;
        Self::record_duration(&saga);
        let notification = SagaNotification::from_saga(&saga);
        drop(saga);
        self.notifier.notify(notification).await;
        true
    }

    /// Cancels a saga. A running saga with completed, compensable steps is
    /// compensated first; the status then becomes `Cancelled`. Returns false
    /// for unknown instances and sagas that are already terminal.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: InstanceId) -> bool {
        let Some(handle) = self.store.handle(id).await else {
            return false;
        };
        let mut saga = handle.lock().await;
        match saga.status() {
            SagaStatus::Created => {}
            SagaStatus::Running => {
                let has_compensable = saga
                    .steps()
                    .iter()
                    .any(|s| s.status() == StepStatus::Completed && s.has_compensation());
                if has_compensable {
                    compensation::unwind(&mut saga, &self.invoker).await;
                }
            }
            _ => return false,
        }
        saga.mark_cancelled();
        metrics::counter!("saga_cancelled").increment(1);
        Self::record_duration(&saga);
        tracing::info!(saga_id = %saga.saga_id(), "saga cancelled");
        let notification = SagaNotification::from_saga(&saga);
        drop(saga);
        self.notifier.notify(notification).await;
        true
    }

    /// Starts the saga and drives it until a terminal status is reached.
    ///
    /// Returns false if the saga is unknown or not in `Created`; otherwise
    /// returns true once the saga is terminal, whatever the outcome.
    pub async fn run(&self, id: InstanceId) -> bool {
        if !self.start(id).await {
            return false;
        }
        loop {
            if !self.execute_step(id).await {
                return false;
            }
            match self.get(id).await {
                Some(saga) if saga.status() == SagaStatus::Running => continue,
                Some(_) => return true,
                None => return false,
            }
        }
    }

    /// Fails and compensates every running saga whose deadline has passed.
    ///
    /// The cadence belongs to an external scheduler; the engine only exposes
    /// the sweep. Returns the number of sagas expired.
    #[tracing::instrument(skip(self))]
    pub async fn expire_overdue(&self) -> usize {
        let now = Utc::now();
        let running = self.store.list_by_status(SagaStatus::Running).await;

        let mut expired = 0;
        for snapshot in running {
            let Some(handle) = self.store.handle(snapshot.id()).await else {
                continue;
            };
            let mut saga = handle.lock().await;
            // Re-check under the lock: the saga may have finished since the
            // listing was taken.
            if !saga.is_overdue(now) {
                continue;
            }

            let reason = format!("saga timed out after {:?}", saga.timeout());
            tracing::warn!(saga_id = %saga.saga_id(), %reason, "saga expired");
            metrics::counter!("saga_timeouts_total").increment(1);

            let index = saga.current_step_index();
            if index < saga.steps().len() {
                saga.record_step_failure(index, &reason);
            }
            saga.mark_failed(&reason);
            metrics::counter!("saga_failed").increment(1);
            compensation::unwind(&mut saga, &self.invoker).await;
            Self::record_duration(&saga);

            let notification = SagaNotification::from_saga(&saga);
            drop(saga);
            self.notifier.notify(notification).await;
            expired += 1;
        }
        expired
    }

    /// Emits completion logs and metrics when the saga just finished, and
    /// returns the terminal notification to send after the lock is released.
    fn completion_aftermath(&self, saga: &Saga) -> Option<SagaNotification> {
        if saga.status() != SagaStatus::Completed {
            return None;
        }
        tracing::info!(saga_id = %saga.saga_id(), "saga completed");
        metrics::counter!("saga_completed").increment(1);
        Self::record_duration(saga);
        Some(SagaNotification::from_saga(saga))
    }

    /// Applies a step failure: optional steps are skipped, otherwise the
    /// retry budget decides between a reset and escalation to compensation.
    /// Returns the terminal notification to send after the lock is released.
    async fn apply_failure(
        &self,
        saga: &mut Saga,
        index: usize,
        reason: &str,
    ) -> Option<SagaNotification> {
        let step_name = saga.steps()[index].step_name().to_string();

        if saga.steps()[index].is_optional() {
            tracing::warn!(
                saga_id = %saga.saga_id(),
                step = %step_name,
                %reason,
                "optional step failed, skipping"
            );
            metrics::counter!("saga_steps_skipped_total").increment(1);
            saga.skip_step(index, reason);
            return self.completion_aftermath(saga);
        }

        saga.record_step_failure(index, reason);
        tracing::warn!(saga_id = %saga.saga_id(), step = %step_name, %reason, "saga step failed");

        let policy = RetryPolicy::new(saga.max_retries());
        match policy.assess(saga.steps()[index].retry_count()) {
            RetryDecision::Retry => {
                saga.reset_step_for_retry(index);
                metrics::counter!("saga_step_retries_total").increment(1);
                tracing::info!(
                    saga_id = %saga.saga_id(),
                    step = %step_name,
                    retry = saga.steps()[index].retry_count(),
                    "step reset for retry"
                );
                None
            }
            RetryDecision::Escalate => {
                saga.mark_failed(reason);
                metrics::counter!("saga_failed").increment(1);
                tracing::warn!(saga_id = %saga.saga_id(), "retry budget exhausted, compensating");
                compensation::unwind(saga, &self.invoker).await;
                Self::record_duration(saga);
                Some(SagaNotification::from_saga(saga))
            }
        }
    }

    fn record_duration(saga: &Saga) {
        if let (Some(started), Some(completed)) = (saga.started_at(), saga.completed_at())
            && let Ok(elapsed) = (completed - started).to_std()
        {
            metrics::histogram!("saga_duration_seconds").record(elapsed.as_secs_f64());
        }
    }
}
