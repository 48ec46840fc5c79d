#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod health;
pub mod protocol;
pub mod retrieval;
pub mod session;
pub mod transport;

pub use config::Settings;
pub use engine::{
    AudioInputEvent, Capability, EngineBuilder, EngineConfig, InputSource, OutputEvent, OutputSink,
    RealtimeEngine, SpeechEngine, ToolRegistry, TranscriptRole,
};
pub use error::{Error, Result};
pub use gateway::{ClientMessage, EngineFactory, Gateway, RealtimeEngineFactory, ServerMessage};
pub use protocol::client_events::ClientEvent;
pub use protocol::server_events::ServerEvent;
pub use retrieval::{HttpKnowledgeIndex, KnowledgeIndex, Passage, RetrievalClient, SearchOptions};
pub use session::{SessionOutcome, SessionSettings, VoiceSession};

use futures::{SinkExt, StreamExt};
use serde_json::from_str;
use tokio_tungstenite::tungstenite::protocol::Message;
use transport::ws::WsStream;
use crate::protocol::models;

const TRACE_LOG_MAX_BYTES: usize = 1024;
const MAX_INPUT_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// Connection to the remote speech engine.
///
/// Thread safety: `RealtimeClient` is `Send` but not `Sync` because the underlying
/// WebSocket stream is not `Sync`.
#[must_use]
pub struct RealtimeClient {
    stream: WsStream,
}

impl RealtimeClient {
    /// Connect to the engine endpoint.
    ///
    /// # Errors
    /// Returns an error if the connection fails or if the URL is invalid.
    pub async fn connect(endpoint: &str, api_key: &str, model: &str) -> Result<Self> {
        let stream = transport::ws::connect(endpoint, api_key, model).await?;
        Ok(Self { stream })
    }

    /// Send a client event to the engine.
    ///
    /// # Errors
    /// Returns an error if validation or serialization fails or if the WebSocket send fails.
    pub async fn send(&mut self, event: ClientEvent) -> Result<()> {
        validate_client_event(&event)?;
        let json = serde_json::to_string(&event)?;
        tracing::trace!(event = event.kind(), "Sending event: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        self.stream.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Receive the next engine event. `Ok(None)` means the engine closed the connection.
    ///
    /// # Errors
    /// Returns an error if deserialization fails or if the WebSocket fails.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => {
                    tracing::trace!("Received event: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                    return Ok(Some(from_str::<ServerEvent>(&text)?));
                }
                Message::Close(frame) => {
                    tracing::info!(?frame, "Engine WebSocket closed by server");
                    return Ok(None);
                }
                Message::Ping(payload) => {
                    tracing::debug!("Received Ping, sending Pong");
                    self.stream.send(Message::Pong(payload)).await?;
                }
                _ => (),
            }
        }
        Ok(None)
    }
}

fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

/// Check an outbound event against the limits the engine enforces.
///
/// # Errors
/// Returns `InvalidClientEvent` describing the violation.
#[allow(clippy::result_large_err)]
pub fn validate_client_event(event: &ClientEvent) -> Result<()> {
    match event {
        ClientEvent::InputAudioBufferAppend { audio, .. } => {
            let size = estimate_base64_decoded_len(audio)?;
            if size > MAX_INPUT_AUDIO_CHUNK_BYTES {
                return Err(Error::InvalidClientEvent(format!(
                    "input_audio_buffer.append exceeds 15MB ({size} bytes)",
                )));
            }
        }
        ClientEvent::SessionUpdate { session, .. } => {
            validate_session_update(session.as_ref())?;
        }
        ClientEvent::ConversationItemCreate { item, .. } => {
            if let models::Item::FunctionCallOutput { call_id, .. } = item.as_ref() {
                if call_id.is_empty() {
                    return Err(Error::InvalidClientEvent(
                        "function_call_output requires a call_id".to_string(),
                    ));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn validate_session_update(session: &models::SessionUpdate) -> Result<()> {
    let config = &session.config;
    if let Some(audio) = &config.audio {
        validate_audio_config(audio)?;
    }
    if let Some(tools) = &config.tools {
        validate_tools(tools)?;
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn validate_audio_config(audio: &models::AudioConfig) -> Result<()> {
    if let Some(format) = audio.input.as_ref().and_then(|input| input.format.as_ref()) {
        format.validate()?;
    }
    if let Some(format) = audio.output.as_ref().and_then(|output| output.format.as_ref()) {
        format.validate()?;
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn validate_tools(tools: &[models::Tool]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for tool in tools {
        let name = tool.name();
        if name.is_empty() {
            return Err(Error::InvalidClientEvent("tool name must not be empty".to_string()));
        }
        if !seen.insert(name) {
            return Err(Error::InvalidClientEvent(format!("duplicate tool name: {name}")));
        }
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn estimate_base64_decoded_len(s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidClientEvent(
            "input_audio_buffer.append invalid base64 length".to_string(),
        ));
    }

    let mut padding = 0;
    let mut seen_padding = false;
    for &b in bytes {
        if b == b'=' {
            seen_padding = true;
            padding += 1;
            continue;
        }
        if seen_padding {
            return Err(Error::InvalidClientEvent(
                "input_audio_buffer.append invalid base64 padding".to_string(),
            ));
        }
        let is_valid = matches!(b,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/'
        );
        if !is_valid {
            return Err(Error::InvalidClientEvent(
                "input_audio_buffer.append invalid base64 character".to_string(),
            ));
        }
    }

    if padding > 2 {
        return Err(Error::InvalidClientEvent(
            "input_audio_buffer.append invalid base64 padding length".to_string(),
        ));
    }

    Ok(bytes.len() / 4 * 3 - padding)
}
