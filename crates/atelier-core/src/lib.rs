//! Orchestration core for Atelier.
//!
//! This crate defines the service invocation port (`ServiceInvoker`) that the
//! infrastructure layer implements, plus everything that does not touch the
//! network itself: template validation, dependency resolution, the execution
//! engine, circuit breaking, result aggregation, and the status store. It
//! depends only on `atelier-types` -- never on `atelier-infra` or any HTTP crate.

pub mod service;
pub mod workflow;
