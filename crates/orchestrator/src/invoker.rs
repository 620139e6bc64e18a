//! Step action invoker boundary and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::StateMap;
use thiserror::Error;

/// Errors surfaced by a step action invoker.
#[derive(Debug, Error)]
pub enum InvokerError {
    /// The action ran and reported a failure.
    #[error("action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    /// No handler is registered for the action type.
    #[error("unknown action type '{0}'")]
    UnknownAction(String),
}

/// The external collaborator that performs the business effect of a step
/// or its compensation.
///
/// Both calls are opaque, potentially long-running remote calls; the
/// orchestrator applies the saga's per-step timeout around them.
#[async_trait]
pub trait StepActionInvoker: Send + Sync {
    /// Performs the step's action against the saga state and returns its
    /// optional output.
    async fn invoke(
        &self,
        action_type: &str,
        state: &StateMap,
    ) -> Result<Option<String>, InvokerError>;

    /// Performs a compensating action against the saga state.
    async fn compensate(
        &self,
        compensation_action_type: &str,
        state: &StateMap,
    ) -> Result<(), InvokerError>;

    /// Returns true if the invoker has a handler for the action type.
    ///
    /// Consulted at definition-registration time so unknown action types
    /// fail fast instead of at execution time.
    fn supports(&self, action_type: &str) -> bool;

    /// Returns true if the invoker has a handler for the compensation
    /// action type.
    fn supports_compensation(&self, compensation_action_type: &str) -> bool;
}

type ActionHandler = Box<dyn Fn(&StateMap) -> Result<Option<String>, String> + Send + Sync>;
type CompensationHandler = Box<dyn Fn(&StateMap) -> Result<(), String> + Send + Sync>;

struct FailureScript {
    reason: String,
    /// `None` fails every invocation; `Some(n)` fails the next n.
    remaining: Option<u32>,
}

#[derive(Default)]
struct InMemoryInvokerState {
    actions: HashMap<String, ActionHandler>,
    compensations: HashMap<String, CompensationHandler>,
    fail_actions: HashMap<String, FailureScript>,
    fail_compensations: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    invoked: Vec<String>,
    compensated: Vec<String>,
}

/// In-memory invoker with registered handlers keyed by action-type string.
///
/// Used for local wiring and deterministic tests: failures can be scripted
/// per action, and every invocation is recorded in call order.
#[derive(Clone, Default)]
pub struct InMemoryStepInvoker {
    state: Arc<RwLock<InMemoryInvokerState>>,
}

impl InMemoryStepInvoker {
    /// Creates a new invoker with no registered handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action handler.
    pub fn register_action<F>(&self, action_type: impl Into<String>, handler: F)
    where
        F: Fn(&StateMap) -> Result<Option<String>, String> + Send + Sync + 'static,
    {
        self.state
            .write()
            .unwrap()
            .actions
            .insert(action_type.into(), Box::new(handler));
    }

    /// Registers an action that always succeeds with the given output.
    pub fn register_ok(&self, action_type: impl Into<String>, output: Option<&str>) {
        let output = output.map(str::to_string);
        self.register_action(action_type, move |_| Ok(output.clone()));
    }

    /// Registers a compensation handler.
    pub fn register_compensation<F>(&self, compensation_action_type: impl Into<String>, handler: F)
    where
        F: Fn(&StateMap) -> Result<(), String> + Send + Sync + 'static,
    {
        self.state
            .write()
            .unwrap()
            .compensations
            .insert(compensation_action_type.into(), Box::new(handler));
    }

    /// Registers a compensation that always succeeds.
    pub fn register_compensation_ok(&self, compensation_action_type: impl Into<String>) {
        self.register_compensation(compensation_action_type, |_| Ok(()));
    }

    /// Scripts the action to fail every invocation until cleared.
    pub fn fail_action(&self, action_type: impl Into<String>, reason: impl Into<String>) {
        self.state.write().unwrap().fail_actions.insert(
            action_type.into(),
            FailureScript {
                reason: reason.into(),
                remaining: None,
            },
        );
    }

    /// Scripts the action to fail the next `times` invocations, then succeed.
    pub fn fail_action_times(
        &self,
        action_type: impl Into<String>,
        reason: impl Into<String>,
        times: u32,
    ) {
        self.state.write().unwrap().fail_actions.insert(
            action_type.into(),
            FailureScript {
                reason: reason.into(),
                remaining: Some(times),
            },
        );
    }

    /// Clears a scripted action failure.
    pub fn clear_fail_action(&self, action_type: &str) {
        self.state.write().unwrap().fail_actions.remove(action_type);
    }

    /// Scripts the compensation to fail every invocation.
    pub fn fail_compensation(
        &self,
        compensation_action_type: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.state
            .write()
            .unwrap()
            .fail_compensations
            .insert(compensation_action_type.into(), reason.into());
    }

    /// Delays the action by `delay` before it runs; used to exercise
    /// per-step timeouts.
    pub fn set_action_delay(&self, action_type: impl Into<String>, delay: Duration) {
        self.state
            .write()
            .unwrap()
            .delays
            .insert(action_type.into(), delay);
    }

    /// Returns the invoked action types in call order.
    pub fn invoked(&self) -> Vec<String> {
        self.state.read().unwrap().invoked.clone()
    }

    /// Returns the invoked compensation action types in call order.
    pub fn compensated(&self) -> Vec<String> {
        self.state.read().unwrap().compensated.clone()
    }

    /// Returns how many times the action has been invoked.
    pub fn invocation_count(&self, action_type: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .invoked
            .iter()
            .filter(|a| a.as_str() == action_type)
            .count()
    }
}

#[async_trait]
impl StepActionInvoker for InMemoryStepInvoker {
    async fn invoke(
        &self,
        action_type: &str,
        state: &StateMap,
    ) -> Result<Option<String>, InvokerError> {
        let delay = {
            let mut inner = self.state.write().unwrap();
            inner.invoked.push(action_type.to_string());
            inner.delays.get(action_type).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = &mut *self.state.write().unwrap();
        if let Some(script) = inner.fail_actions.get_mut(action_type) {
            let fire = match script.remaining.as_mut() {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            };
            if fire {
                return Err(InvokerError::ActionFailed {
                    action: action_type.to_string(),
                    reason: script.reason.clone(),
                });
            }
        }

        let handler = inner
            .actions
            .get(action_type)
            .ok_or_else(|| InvokerError::UnknownAction(action_type.to_string()))?;
        handler(state).map_err(|reason| InvokerError::ActionFailed {
            action: action_type.to_string(),
            reason,
        })
    }

    async fn compensate(
        &self,
        compensation_action_type: &str,
        state: &StateMap,
    ) -> Result<(), InvokerError> {
        let inner = &mut *self.state.write().unwrap();
        inner.compensated.push(compensation_action_type.to_string());

        if let Some(reason) = inner.fail_compensations.get(compensation_action_type) {
            return Err(InvokerError::ActionFailed {
                action: compensation_action_type.to_string(),
                reason: reason.clone(),
            });
        }

        let handler = inner
            .compensations
            .get(compensation_action_type)
            .ok_or_else(|| InvokerError::UnknownAction(compensation_action_type.to_string()))?;
        handler(state).map_err(|reason| InvokerError::ActionFailed {
            action: compensation_action_type.to_string(),
            reason,
        })
    }

    fn supports(&self, action_type: &str) -> bool {
        self.state.read().unwrap().actions.contains_key(action_type)
    }

    fn supports_compensation(&self, compensation_action_type: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .compensations
            .contains_key(compensation_action_type)
    }
}
