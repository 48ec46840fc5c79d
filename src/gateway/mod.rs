//! Client-facing transport: the voice WebSocket and its message shapes.

pub mod connection;
pub mod messages;
mod server;

pub use connection::{ClientConnection, ClientReceiver, ClientSender};
pub use messages::{ClientMessage, ServerMessage};
pub use server::{EngineFactory, Gateway, RealtimeEngineFactory};
