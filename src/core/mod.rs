//! Configuration and wire models shared by the relay and the HTTP layer

pub mod config;
pub mod models;
