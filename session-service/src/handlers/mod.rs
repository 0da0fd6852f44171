//! HTTP handlers for session-service.

pub mod auth;

pub use auth::*;
