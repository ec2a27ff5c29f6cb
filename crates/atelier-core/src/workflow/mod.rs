//! Workflow engine core: templates, dependency resolution, and execution.
//!
//! - `template` -- YAML parsing, structural validation, directory discovery
//! - `registry` -- Immutable store of validated templates with precomputed plans
//! - `dag` -- Kahn layering into parallel execution waves, cycle detection
//! - `context` -- Request body construction from context and step outputs
//! - `retry` -- Attempt budget and exponential backoff
//! - `executor` -- Wave-based engine with circuit breaking and cancellation
//! - `aggregate` -- Deterministic merge of step results into one response
//! - `status_store` -- Live instance snapshots with TTL and capacity eviction

pub mod aggregate;
pub mod context;
pub mod dag;
pub mod executor;
pub mod registry;
pub mod retry;
pub mod status_store;
pub mod template;
