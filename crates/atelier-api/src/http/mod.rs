//! HTTP/REST API layer for Atelier.
//!
//! Axum-based REST API with envelope response format and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
