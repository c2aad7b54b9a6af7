//! Validation engine module.
//!
//! Provides the check registry, flow orchestration and result aggregation.

pub mod orchestrator;
pub mod registry;
pub mod result;
