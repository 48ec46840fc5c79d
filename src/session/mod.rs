//! Per-connection session orchestration.

mod orchestrator;
mod queue;

pub use orchestrator::{ClientOutput, VoiceSession};
pub use queue::{InputQueue, QueueReceiver, input_queue};

use crate::engine::pcm::CLIENT_PCM_RATE;

/// Layout of the PCM the client streams in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub input_sample_rate: u32,
    pub input_channels: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            input_sample_rate: CLIENT_PCM_RATE,
            input_channels: 1,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client sent `stop` and the engine drained.
    ClientStopped,
    /// The client went away mid-session.
    Disconnected,
    /// The engine finished on its own.
    Completed,
    EngineFailed(String),
    TransportFailed(String),
    /// Process-wide shutdown.
    Shutdown,
}
