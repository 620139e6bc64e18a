//! Saga and step status state machines.

use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► Running ──┬──► Completed
///    │                  ├──► Failed ──► Compensating ──► Compensated
///    │                  └──► Cancelled
///    └──► Cancelled
/// ```
/// A saga that exhausts its retry budget passes through `Failed` and is
/// compensated immediately, ending in `Compensated`. Cancelling a running
/// saga compensates first and then overwrites the status with `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Instance has been created but not started.
    #[default]
    Created,

    /// Steps are being executed.
    Running,

    /// Completed steps are being unwound in reverse order.
    Compensating,

    /// Compensation finished after a failure (terminal state).
    Compensated,

    /// All steps completed successfully (terminal state).
    Completed,

    /// Retry budget exhausted; compensation is about to begin.
    Failed,

    /// Saga was cancelled by the caller (terminal state).
    Cancelled,
}

impl SagaStatus {
    /// Returns true if the saga can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, SagaStatus::Created)
    }

    /// Returns true if steps can be executed.
    pub fn can_execute(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if the saga can be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, SagaStatus::Created | SagaStatus::Running)
    }

    /// Returns true if compensation can begin.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Running | SagaStatus::Failed)
    }

    /// Returns true if no forward progress is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed
                | SagaStatus::Compensated
                | SagaStatus::Failed
                | SagaStatus::Cancelled
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Created => "Created",
            SagaStatus::Running => "Running",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of a single step within a saga instance.
///
/// A step may only reach `Compensated` if it previously reached `Completed`
/// and a compensation action is defined for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StepStatus {
    /// Step has not run yet, or was reset for a retry.
    #[default]
    Pending,

    /// Step action is in flight.
    Running,

    /// Step action succeeded.
    Completed,

    /// Step action failed and will not be retried.
    Failed,

    /// Optional step failed and was skipped.
    Skipped,

    /// Compensating action is in flight.
    Compensating,

    /// Compensating action succeeded.
    Compensated,

    /// Compensating action failed; the rollback continued past this step.
    CompensationFailed,
}

impl StepStatus {
    /// Returns true if the step can be executed.
    pub fn can_run(&self) -> bool {
        matches!(self, StepStatus::Pending)
    }

    /// Returns true if the step can record a result.
    pub fn can_finish(&self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Returns true if the step is eligible for compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Running => "Running",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::Skipped => "Skipped",
            StepStatus::Compensating => "Compensating",
            StepStatus::Compensated => "Compensated",
            StepStatus::CompensationFailed => "CompensationFailed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
