//! Connectors for the remote speech engine.

pub mod ws;
