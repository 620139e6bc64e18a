//! Saga definition templates.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

/// A single step template within a saga definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    step_name: String,
    action_type: String,
    compensation_action_type: Option<String>,
    optional: bool,
}

impl StepDefinition {
    /// Creates a step template with no compensation action.
    pub fn new(step_name: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            action_type: action_type.into(),
            compensation_action_type: None,
            optional: false,
        }
    }

    /// Attaches a compensating action to this step.
    pub fn with_compensation(mut self, compensation_action_type: impl Into<String>) -> Self {
        self.compensation_action_type = Some(compensation_action_type.into());
        self
    }

    /// Marks this step as optional: its failure skips the step instead of
    /// failing the saga.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Returns the step name.
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Returns the action type invoked for this step.
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// Returns the compensation action type, if one is defined.
    pub fn compensation_action_type(&self) -> Option<&str> {
        self.compensation_action_type.as_deref()
    }

    /// Returns true if the step has a compensating action.
    pub fn has_compensation(&self) -> bool {
        self.compensation_action_type.is_some()
    }

    /// Returns true if the step is optional.
    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

/// An immutable, named template describing the ordered steps of a workflow.
///
/// Definitions are registered once under their `saga_type` key and cloned
/// into each saga instance at creation time. Step order is significant and
/// fixed at registration; redeploying a definition never affects running
/// instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaDefinition {
    saga_type: String,
    name: String,
    steps: Vec<StepDefinition>,
    default_timeout: Duration,
    max_retries: u32,
}

impl SagaDefinition {
    /// Creates a validated definition.
    ///
    /// Rejects empty step lists and duplicate step names.
    pub fn new(
        saga_type: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<StepDefinition>,
        default_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, DefinitionError> {
        let definition = Self {
            saga_type: saga_type.into(),
            name: name.into(),
            steps,
            default_timeout,
            max_retries,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Checks the definition invariants.
    ///
    /// Also called by registries on register, since a definition obtained
    /// through deserialization bypasses the constructor.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::EmptySteps {
                saga_type: self.saga_type.clone(),
            });
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_name()) {
                return Err(DefinitionError::DuplicateStepName {
                    saga_type: self.saga_type.clone(),
                    step_name: step.step_name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the unique saga type key.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Returns the human-readable definition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the ordered step templates.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Returns the number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Returns the per-step timeout applied to instances of this definition.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Returns the per-step retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
