//! Shared domain types for Atelier.
//!
//! This crate contains the types exchanged between the orchestrator layers:
//! workflow templates and instances, service descriptions, and the global
//! configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod service;
pub mod workflow;
