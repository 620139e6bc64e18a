//! Orchestrator error types.

use domain::DefinitionError;
use thiserror::Error;

/// Errors that fail fast at the orchestration boundary.
///
/// Not-found and invalid-transition outcomes are reported as boolean results
/// instead, so orchestration loops can treat "no such saga" as a stable,
/// non-throwing outcome.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// `create` was called with an unregistered saga type.
    #[error("unknown saga type '{0}'")]
    UnknownSagaType(String),

    /// A definition references an action the invoker has no handler for.
    #[error(
        "definition '{saga_type}' step '{step_name}' references unknown action type '{action_type}'"
    )]
    UnknownActionType {
        saga_type: String,
        step_name: String,
        action_type: String,
    },

    /// The definition failed validation.
    #[error("invalid definition: {0}")]
    Definition(#[from] DefinitionError),
}
