//! Saga instance aggregate.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{CorrelationId, InstanceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::{SagaDefinition, StepDefinition};
use crate::status::{SagaStatus, StepStatus};

/// Key/value payload carried across saga steps.
pub type StateMap = HashMap<String, Value>;

/// A per-instance snapshot of a step template, tracking execution progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    step_index: usize,
    step_name: String,
    action_type: String,
    has_compensation: bool,
    compensation_action_type: Option<String>,
    optional: bool,
    status: StepStatus,
    retry_count: u32,
    output: Option<String>,
    error_message: Option<String>,
    was_compensated: bool,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl SagaStep {
    fn from_template(step_index: usize, template: &StepDefinition) -> Self {
        Self {
            step_index,
            step_name: template.step_name().to_string(),
            action_type: template.action_type().to_string(),
            has_compensation: template.has_compensation(),
            compensation_action_type: template
                .compensation_action_type()
                .map(str::to_string),
            optional: template.is_optional(),
            status: StepStatus::Pending,
            retry_count: 0,
            output: None,
            error_message: None,
            was_compensated: false,
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns the step's position within the saga.
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Returns the step name.
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Returns the action type invoked for this step.
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Returns true if the step has a compensating action.
    pub fn has_compensation(&self) -> bool {
        self.has_compensation
    }

    /// Returns the compensation action type, if one is defined.
    pub fn compensation_action_type(&self) -> Option<&str> {
        self.compensation_action_type.as_deref()
    }

    /// Returns true if the step is optional.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Returns the step status.
    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Returns how many times the step has been retried.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the output recorded on completion, if any.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Returns the last error recorded on this step, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns true if the step's compensating action ran successfully.
    pub fn was_compensated(&self) -> bool {
        self.was_compensated
    }

    /// Returns when the step last started executing.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the step finished (completed, failed, or skipped).
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

/// A live saga instance.
///
/// Built once from a `SagaDefinition` (steps are copied, not referenced) and
/// mutated only by the orchestrator and the compensation engine through the
/// transition methods below. `current_step_index` is both the progress cursor
/// and the compensation boundary: it only increases during forward execution
/// and is never advanced during compensation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    id: InstanceId,
    saga_id: String,
    saga_type: String,
    correlation_id: CorrelationId,
    status: SagaStatus,
    current_step_index: usize,
    retry_count: u32,
    max_retries: u32,
    state: StateMap,
    steps: Vec<SagaStep>,
    timeout: Duration,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    initiator_id: Option<String>,
}

impl Saga {
    /// Creates a fresh instance from a definition snapshot.
    ///
    /// Every step template is cloned into a `Pending` step; the timeout and
    /// retry budget are copied so a later redeploy of the definition cannot
    /// affect this instance.
    pub fn from_definition(
        definition: &SagaDefinition,
        initial_state: StateMap,
        initiator_id: Option<String>,
    ) -> Self {
        let id = InstanceId::new();
        let steps = definition
            .steps()
            .iter()
            .enumerate()
            .map(|(index, template)| SagaStep::from_template(index, template))
            .collect();

        Self {
            id,
            saga_id: format!("{}-{}", definition.saga_type(), id.short()),
            saga_type: definition.saga_type().to_string(),
            correlation_id: CorrelationId::new(),
            status: SagaStatus::Created,
            current_step_index: 0,
            retry_count: 0,
            max_retries: definition.max_retries(),
            state: initial_state,
            steps,
            timeout: definition.default_timeout(),
            started_at: None,
            completed_at: None,
            error_message: None,
            initiator_id,
        }
    }
}

// Query methods
impl Saga {
    /// Returns the opaque instance ID.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the human-readable business ID.
    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    /// Returns the saga type this instance was created from.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Returns the correlation ID used for external lookup.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the saga status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns the progress cursor into `steps`.
    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    /// Returns the total number of retries spent across all steps.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the per-step retry budget copied from the definition.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the key/value payload carried across steps.
    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Returns the instance's step snapshots.
    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// Returns the step at `index`, if in range.
    pub fn step(&self, index: usize) -> Option<&SagaStep> {
        self.steps.get(index)
    }

    /// Returns the per-step timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns when the saga started running.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the saga reached a terminal status.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the last saga-level error, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the caller that created this instance, if recorded.
    pub fn initiator_id(&self) -> Option<&str> {
        self.initiator_id.as_deref()
    }

    /// Returns true if the saga is running and its deadline has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if self.status != SagaStatus::Running {
            return false;
        }
        match self.started_at {
            Some(started) => (now - started)
                .to_std()
                .map(|elapsed| elapsed >= self.timeout)
                .unwrap_or(false),
            None => false,
        }
    }
}

// Transition methods, driven by the orchestrator and the compensation engine.
impl Saga {
    /// Moves the saga from `Created` to `Running` and stamps `started_at`.
    pub fn begin(&mut self) -> bool {
        if !self.status.can_start() {
            return false;
        }
        self.status = SagaStatus::Running;
        self.current_step_index = 0;
        self.started_at = Some(Utc::now());
        true
    }

    /// Marks the pending step at `index` as running.
    pub fn mark_step_running(&mut self, index: usize) -> bool {
        if !self.status.can_execute() {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if !step.status.can_run() {
            return false;
        }
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        true
    }

    /// Records completion of the current step and advances the cursor.
    ///
    /// The output is stored on the step and merged into the shared state
    /// under the step's name. Completing the final step completes the saga.
    /// Only the step at the cursor may be completed; anything else would
    /// break cursor monotonicity.
    pub fn record_step_completion(&mut self, index: usize, output: Option<String>) -> bool {
        if !self.status.can_execute() || index != self.current_step_index {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if !step.status.can_finish() {
            return false;
        }
        step.status = StepStatus::Completed;
        step.completed_at = Some(Utc::now());
        step.output = output.clone();
        if let Some(out) = output {
            self.state.insert(step.step_name.clone(), Value::String(out));
        }
        self.current_step_index = index + 1;
        if self.current_step_index >= self.steps.len() {
            self.status = SagaStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Records a failure on the step and on the saga.
    pub fn record_step_failure(&mut self, index: usize, error: &str) -> bool {
        if !self.status.can_execute() {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if !step.status.can_finish() {
            return false;
        }
        step.status = StepStatus::Failed;
        step.error_message = Some(error.to_string());
        self.error_message = Some(error.to_string());
        true
    }

    /// Resets a failed step to `Pending`, spending one retry.
    ///
    /// The cursor is not decremented; the step simply becomes runnable again.
    pub fn reset_step_for_retry(&mut self, index: usize) -> bool {
        if !self.status.can_execute() {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if step.status != StepStatus::Failed {
            return false;
        }
        step.status = StepStatus::Pending;
        step.retry_count += 1;
        self.retry_count += 1;
        true
    }

    /// Marks a failed optional step as skipped and advances past it.
    pub fn skip_step(&mut self, index: usize, reason: &str) -> bool {
        if !self.status.can_execute() || index != self.current_step_index {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if !step.optional {
            return false;
        }
        step.status = StepStatus::Skipped;
        step.error_message = Some(reason.to_string());
        step.completed_at = Some(Utc::now());
        self.current_step_index = index + 1;
        if self.current_step_index >= self.steps.len() {
            self.status = SagaStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Marks the saga failed after retry exhaustion or a timeout.
    pub fn mark_failed(&mut self, error: &str) -> bool {
        if self.status != SagaStatus::Running {
            return false;
        }
        self.status = SagaStatus::Failed;
        self.error_message = Some(error.to_string());
        true
    }

    /// Marks the saga completed; used by the idempotent terminal check when
    /// the cursor has already passed the final step.
    pub fn mark_completed(&mut self) -> bool {
        if self.status != SagaStatus::Running {
            return false;
        }
        self.status = SagaStatus::Completed;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Marks the saga cancelled.
    ///
    /// Called after compensation when cancelling a running saga, so this
    /// intentionally overwrites `Compensated`.
    pub fn mark_cancelled(&mut self) {
        self.status = SagaStatus::Cancelled;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Enters compensation from `Running` or `Failed`.
    pub fn begin_compensation(&mut self) -> bool {
        if !self.status.can_compensate() {
            return false;
        }
        self.status = SagaStatus::Compensating;
        true
    }

    /// Leaves compensation in the `Compensated` terminal status.
    pub fn finish_compensation(&mut self) -> bool {
        if self.status != SagaStatus::Compensating {
            return false;
        }
        self.status = SagaStatus::Compensated;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Marks a completed, compensable step as compensating.
    pub fn begin_step_compensation(&mut self, index: usize) -> bool {
        if self.status != SagaStatus::Compensating {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if !step.status.can_compensate() || !step.has_compensation {
            return false;
        }
        step.status = StepStatus::Compensating;
        true
    }

    /// Records a successful compensating action on the step.
    pub fn finish_step_compensation(&mut self, index: usize) -> bool {
        if self.status != SagaStatus::Compensating {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if step.status != StepStatus::Compensating {
            return false;
        }
        step.status = StepStatus::Compensated;
        step.was_compensated = true;
        true
    }

    /// Records a failed compensating action; the rollback continues past
    /// this step.
    pub fn fail_step_compensation(&mut self, index: usize, error: &str) -> bool {
        if self.status != SagaStatus::Compensating {
            return false;
        }
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        if step.status != StepStatus::Compensating {
            return false;
        }
        step.status = StepStatus::CompensationFailed;
        step.error_message = Some(error.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StepDefinition;

    fn three_step_definition() -> SagaDefinition {
        SagaDefinition::new(
            "ORDER",
            "Order workflow",
            vec![
                StepDefinition::new("reserve", "inventory.reserve")
                    .with_compensation("inventory.release"),
                StepDefinition::new("charge", "payments.charge")
                    .with_compensation("payments.refund"),
                StepDefinition::new("notify", "notifications.send").optional(),
            ],
            std::time::Duration::from_secs(30),
            2,
        )
        .unwrap()
    }

    fn running_saga() -> Saga {
        let mut saga = Saga::from_definition(&three_step_definition(), StateMap::new(), None);
        assert!(saga.begin());
        saga
    }

    #[test]
    fn test_from_definition_snapshots_steps() {
        let definition = three_step_definition();
        let saga = Saga::from_definition(&definition, StateMap::new(), Some("op-1".to_string()));

        assert_eq!(saga.status(), SagaStatus::Created);
        assert_eq!(saga.steps().len(), definition.step_count());
        for (index, step) in saga.steps().iter().enumerate() {
            assert_eq!(step.step_index(), index);
            assert_eq!(step.status(), StepStatus::Pending);
            assert_eq!(step.retry_count(), 0);
            assert!(!step.was_compensated());
        }
        assert_eq!(saga.max_retries(), 2);
        assert_eq!(saga.timeout(), std::time::Duration::from_secs(30));
        assert_eq!(saga.initiator_id(), Some("op-1"));
        assert!(saga.saga_id().starts_with("ORDER-"));
        assert!(saga.started_at().is_none());
    }

    #[test]
    fn test_begin_only_from_created() {
        let mut saga = Saga::from_definition(&three_step_definition(), StateMap::new(), None);
        assert!(saga.begin());
        assert_eq!(saga.status(), SagaStatus::Running);
        assert!(saga.started_at().is_some());
        assert!(!saga.begin());
    }

    #[test]
    fn test_step_completion_advances_cursor() {
        let mut saga = running_saga();

        assert!(saga.mark_step_running(0));
        assert!(saga.record_step_completion(0, Some("RES-1".to_string())));
        assert_eq!(saga.current_step_index(), 1);
        assert_eq!(saga.step(0).unwrap().status(), StepStatus::Completed);
        assert_eq!(saga.step(0).unwrap().output(), Some("RES-1"));
        assert_eq!(
            saga.state().get("reserve"),
            Some(&Value::String("RES-1".to_string()))
        );
    }

    #[test]
    fn test_completing_final_step_completes_saga() {
        let mut saga = running_saga();

        for index in 0..3 {
            assert!(saga.mark_step_running(index));
            assert!(saga.record_step_completion(index, None));
        }

        assert_eq!(saga.status(), SagaStatus::Completed);
        assert_eq!(saga.current_step_index(), 3);
        assert!(saga.completed_at().is_some());
    }

    #[test]
    fn test_out_of_order_completion_rejected() {
        let mut saga = running_saga();

        assert!(!saga.record_step_completion(1, None));
        assert!(!saga.record_step_completion(9, None));
        assert_eq!(saga.current_step_index(), 0);
    }

    #[test]
    fn test_failure_and_retry_reset() {
        let mut saga = running_saga();

        assert!(saga.mark_step_running(0));
        assert!(saga.record_step_failure(0, "service unavailable"));
        assert_eq!(saga.step(0).unwrap().status(), StepStatus::Failed);
        assert_eq!(saga.error_message(), Some("service unavailable"));

        assert!(saga.reset_step_for_retry(0));
        assert_eq!(saga.step(0).unwrap().status(), StepStatus::Pending);
        assert_eq!(saga.step(0).unwrap().retry_count(), 1);
        assert_eq!(saga.retry_count(), 1);
        // The cursor never moves backwards for a retry.
        assert_eq!(saga.current_step_index(), 0);
    }

    #[test]
    fn test_skip_optional_step() {
        let mut saga = running_saga();

        for index in 0..2 {
            assert!(saga.mark_step_running(index));
            assert!(saga.record_step_completion(index, None));
        }
        assert!(saga.mark_step_running(2));
        assert!(saga.skip_step(2, "notification service down"));

        assert_eq!(saga.step(2).unwrap().status(), StepStatus::Skipped);
        assert_eq!(saga.status(), SagaStatus::Completed);
    }

    #[test]
    fn test_skip_rejected_for_required_step() {
        let mut saga = running_saga();
        assert!(saga.mark_step_running(0));
        assert!(!saga.skip_step(0, "nope"));
    }

    #[test]
    fn test_compensation_lifecycle() {
        let mut saga = running_saga();

        assert!(saga.mark_step_running(0));
        assert!(saga.record_step_completion(0, None));
        assert!(saga.mark_step_running(1));
        assert!(saga.record_step_failure(1, "card declined"));
        assert!(saga.mark_failed("card declined"));

        assert!(saga.begin_compensation());
        assert_eq!(saga.status(), SagaStatus::Compensating);

        assert!(saga.begin_step_compensation(0));
        assert_eq!(saga.step(0).unwrap().status(), StepStatus::Compensating);
        assert!(saga.finish_step_compensation(0));
        assert_eq!(saga.step(0).unwrap().status(), StepStatus::Compensated);
        assert!(saga.step(0).unwrap().was_compensated());

        assert!(saga.finish_compensation());
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert!(saga.completed_at().is_some());
    }

    #[test]
    fn test_compensation_requires_completed_step() {
        let mut saga = running_saga();
        assert!(saga.mark_step_running(0));
        assert!(saga.record_step_failure(0, "boom"));
        assert!(saga.mark_failed("boom"));
        assert!(saga.begin_compensation());

        // The failed step never completed, so it cannot be compensated.
        assert!(!saga.begin_step_compensation(0));
        assert_eq!(saga.step(0).unwrap().status(), StepStatus::Failed);
    }

    #[test]
    fn test_failed_compensation_recorded() {
        let mut saga = running_saga();
        assert!(saga.mark_step_running(0));
        assert!(saga.record_step_completion(0, None));
        assert!(saga.mark_step_running(1));
        assert!(saga.record_step_failure(1, "boom"));
        assert!(saga.mark_failed("boom"));
        assert!(saga.begin_compensation());

        assert!(saga.begin_step_compensation(0));
        assert!(saga.fail_step_compensation(0, "release timed out"));
        assert_eq!(
            saga.step(0).unwrap().status(),
            StepStatus::CompensationFailed
        );
        assert!(!saga.step(0).unwrap().was_compensated());
        assert_eq!(
            saga.step(0).unwrap().error_message(),
            Some("release timed out")
        );
    }

    #[test]
    fn test_mark_cancelled_overwrites_compensated() {
        let mut saga = running_saga();
        assert!(saga.begin_compensation());
        assert!(saga.finish_compensation());
        saga.mark_cancelled();
        assert_eq!(saga.status(), SagaStatus::Cancelled);
    }

    #[test]
    fn test_is_overdue() {
        let mut saga = running_saga();
        let started = saga.started_at().unwrap();

        assert!(!saga.is_overdue(started + chrono::Duration::seconds(10)));
        assert!(saga.is_overdue(started + chrono::Duration::seconds(31)));

        saga.mark_cancelled();
        assert!(!saga.is_overdue(started + chrono::Duration::seconds(31)));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut saga = running_saga();
        assert!(saga.mark_step_running(0));
        assert!(saga.record_step_completion(0, Some("RES-1".to_string())));

        let json = serde_json::to_string(&saga).unwrap();
        let deserialized: Saga = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id(), saga.id());
        assert_eq!(deserialized.correlation_id(), saga.correlation_id());
        assert_eq!(deserialized.status(), SagaStatus::Running);
        assert_eq!(deserialized.current_step_index(), 1);
        assert_eq!(deserialized.step(0).unwrap().output(), Some("RES-1"));
    }
}
