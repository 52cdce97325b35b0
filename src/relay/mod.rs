//! Streaming relay engine
//!
//! Upstream lines flow through the classifier into [`state::RelayState`]; accepted
//! fragments go to the [`streaming::OutputChunker`], which writes envelopes to an
//! [`sink::EnvelopeSink`]. [`handler::start_relay`] wires one request end to end.

pub mod engine;
pub mod handler;
pub mod sink;
pub mod state;
pub mod streaming;

// Re-export the entry point for convenience
pub use handler::{RelayReport, start_relay};
pub use state::Termination;
