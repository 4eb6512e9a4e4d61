//! HTTP route handlers.

pub mod analytics;
pub mod ops;
pub mod orders;
