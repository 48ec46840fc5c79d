//! Speech engine adapter.
//!
//! The adapter pulls audio from an [`InputSource`], streams it to the remote
//! engine, and pushes everything the engine says back through an
//! [`OutputSink`]. Capability calls requested by the engine are served from a
//! [`ToolRegistry`] while input keeps flowing.

mod builder;
mod events;
pub mod pcm;
mod realtime;
mod tools;
mod transport;

pub use builder::{
    DEFAULT_INSTRUCTIONS, DEFAULT_TRANSCRIPTION_MODEL, DEFAULT_VOICE, EngineBuilder, EngineConfig,
};
pub use events::{AudioEncoding, AudioInputEvent, OutputEvent, TranscriptRole};
pub use realtime::RealtimeEngine;
pub use tools::{Capability, QueryArgs, ToolCall, ToolDefinition, ToolFuture, ToolRegistry, ToolResult};
pub use transport::{BoxFuture, EngineTransport, WsTransport};

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait InputSource: Send {
    /// Next audio frame, or `None` once the session has no more input.
    async fn next_input(&mut self) -> Option<AudioInputEvent>;
}

#[async_trait]
pub trait OutputSink: Send {
    /// Deliver one event to the client, in order.
    ///
    /// # Errors
    /// Returns an error if the client transport can no longer be written.
    async fn emit_output(&mut self, event: OutputEvent) -> Result<()>;
}

#[async_trait]
pub trait SpeechEngine: Send {
    /// Drive one conversation until input is exhausted and the engine is idle.
    ///
    /// # Errors
    /// Returns an error if the engine reports a fatal error, the engine
    /// connection fails, or the output sink fails.
    async fn run(&mut self, input: &mut dyn InputSource, output: &mut dyn OutputSink) -> Result<()>;
}
