//! Observability setup for Atelier: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
