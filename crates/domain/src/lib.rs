//! Data model for the saga orchestration engine.
//!
//! This crate provides the core domain types:
//! - `SagaDefinition` / `StepDefinition` workflow templates with validation
//! - `Saga` / `SagaStep` live instances built from a definition snapshot
//! - `SagaStatus` / `StepStatus` state machines

pub mod definition;
pub mod error;
pub mod instance;
pub mod status;

pub use definition::{SagaDefinition, StepDefinition};
pub use error::DefinitionError;
pub use instance::{Saga, SagaStep, StateMap};
pub use status::{SagaStatus, StepStatus};
