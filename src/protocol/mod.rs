//! Typed wire model for the remote speech engine.
//!
//! Client events are what the adapter sends; server events are what the engine
//! streams back. Unknown server events are kept as raw JSON so a newer engine
//! never breaks an existing session.

pub mod client_events;
pub mod models;
pub mod server_events;
