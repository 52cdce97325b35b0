//! HTTP API for the relay

pub mod handler;

// Re-export the router for convenience
pub use handler::{AppState, build_router};
