//! Shared identifier types for the saga orchestration system.

mod types;

pub use types::{CorrelationId, InstanceId};
