//! Infrastructure layer for Atelier.
//!
//! Contains the implementations of the ports defined in `atelier-core`:
//! the reqwest-backed `ServiceInvoker`, the TOML configuration loader, and
//! the built-in workflow templates plus on-disk template discovery.

pub mod config;
pub mod http_invoker;
pub mod templates;
