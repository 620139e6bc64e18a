//! Domain error types.

use thiserror::Error;

/// Errors raised while validating a saga definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    /// A definition must contain at least one step.
    #[error("definition '{saga_type}' has no steps")]
    EmptySteps { saga_type: String },

    /// Step names must be unique within one definition.
    #[error("definition '{saga_type}' has duplicate step name '{step_name}'")]
    DuplicateStepName {
        saga_type: String,
        step_name: String,
    },
}
