use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose;

use crate::protocol::client_events::ClientEvent;
use serde_json::Value;

use crate::error::{ApiErrorType, ServerError};
use crate::protocol::models::{Item, PCM_24KHZ_RATE, ResponseStatus, SessionUpdate};
use crate::protocol::server_events::ServerEvent;
use crate::{Error, RealtimeClient, Result};

use super::builder::{EngineBuilder, EngineConfig};
use super::events::{AudioInputEvent, OutputEvent, TranscriptRole};
use super::pcm;
use super::tools::{ToolCall, ToolFuture, ToolRegistry, ToolResult};
use super::transport::{EngineTransport, WsTransport};
use super::{InputSource, OutputSink, SpeechEngine};

/// Speech engine adapter speaking the realtime event protocol.
///
/// One instance drives one conversation. The connection is opened lazily by
/// [`SpeechEngine::run`] unless a transport was injected through the builder.
pub struct RealtimeEngine {
    config: EngineConfig,
    update: SessionUpdate,
    tools: ToolRegistry,
    transport: Option<Box<dyn EngineTransport>>,
}

impl RealtimeEngine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn new(
        config: EngineConfig,
        update: SessionUpdate,
        tools: ToolRegistry,
        transport: Option<Box<dyn EngineTransport>>,
    ) -> Self {
        Self {
            config,
            update,
            tools,
            transport,
        }
    }

    async fn open(&mut self) -> Result<Box<dyn EngineTransport>> {
        if let Some(transport) = self.transport.take() {
            return Ok(transport);
        }
        let client =
            RealtimeClient::connect(&self.config.url, &self.config.api_key, &self.config.model).await?;
        Ok(Box::new(WsTransport::new(client)))
    }

    /// Frames arrive in the client's layout and are sent as 24 kHz mono.
    fn append_event(frame: &AudioInputEvent) -> Option<ClientEvent> {
        if frame.sample_rate == 0 || frame.channels == 0 {
            tracing::warn!(
                sample_rate = frame.sample_rate,
                channels = frame.channels,
                "Dropping audio frame without a usable layout"
            );
            return None;
        }
        let audio = pcm::convert(&frame.audio, frame.sample_rate, frame.channels, PCM_24KHZ_RATE);
        if audio.is_empty() {
            return None;
        }
        Some(ClientEvent::InputAudioBufferAppend {
            event_id: None,
            audio: general_purpose::STANDARD.encode(&audio),
        })
    }
}

/// Where the current turn stands, from the engine's point of view.
#[derive(Debug, Default)]
struct TurnState {
    active_response: Option<String>,
    interrupted: Option<String>,
    awaiting_response: bool,
    follow_up: bool,
    uncommitted_audio: bool,
}

impl TurnState {
    /// Output is still expected from the engine.
    const fn is_busy(&self) -> bool {
        self.active_response.is_some() || self.awaiting_response || self.follow_up
    }

    /// Output is forwarded only for the response currently being spoken.
    fn accepts(&self, response_id: &str) -> bool {
        self.interrupted.as_deref() != Some(response_id)
            && self.active_response.as_deref() == Some(response_id)
    }
}

async fn await_tool(pending: &mut Option<ToolFuture>) -> ToolResult {
    match pending.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl SpeechEngine for RealtimeEngine {
    async fn run(&mut self, input: &mut dyn InputSource, output: &mut dyn OutputSink) -> Result<()> {
        let mut transport = self.open().await?;
        transport
            .send(ClientEvent::SessionUpdate {
                event_id: None,
                session: Box::new(self.update.clone()),
            })
            .await?;

        let mut turn = TurnState::default();
        let mut input_open = true;
        let mut pending_tool: Option<ToolFuture> = None;

        loop {
            if !input_open && pending_tool.is_none() && !turn.is_busy() {
                tracing::debug!("Input exhausted and engine idle");
                return Ok(());
            }

            tokio::select! {
                frame = input.next_input(), if input_open => {
                    if let Some(frame) = frame {
                        if let Some(event) = Self::append_event(&frame) {
                            transport.send(event).await?;
                            turn.uncommitted_audio = true;
                        }
                    } else {
                        input_open = false;
                        flush_pending_audio(&mut turn, transport.as_mut()).await?;
                    }
                }
                result = await_tool(&mut pending_tool), if pending_tool.is_some() => {
                    pending_tool = None;
                    submit_tool_result(result, &mut turn, transport.as_mut()).await?;
                }
                event = transport.next_event(), if pending_tool.is_none() => {
                    let Some(event) = event? else {
                        tracing::warn!("Speech engine closed the connection");
                        return Err(Error::ConnectionClosed);
                    };
                    let client_rate = self.config.sample_rate;
                    if let Some(call) = handle_event(event, client_rate, &mut turn, transport.as_mut(), output).await? {
                        tracing::info!(tool = %call.name, call_id = %call.call_id, "Engine requested capability");
                        pending_tool = Some(self.tools.dispatch(call));
                    }
                }
            }
        }
    }
}

/// Ask for an answer to audio the engine has not yet committed on its own.
async fn flush_pending_audio(turn: &mut TurnState, transport: &mut dyn EngineTransport) -> Result<()> {
    if !turn.uncommitted_audio || turn.is_busy() {
        return Ok(());
    }
    tracing::debug!("Committing trailing audio before shutdown");
    transport
        .send(ClientEvent::InputAudioBufferCommit { event_id: None })
        .await?;
    transport.send(ClientEvent::ResponseCreate { event_id: None }).await?;
    turn.uncommitted_audio = false;
    turn.awaiting_response = true;
    Ok(())
}

async fn submit_tool_result(
    result: ToolResult,
    turn: &mut TurnState,
    transport: &mut dyn EngineTransport,
) -> Result<()> {
    let item = Item::function_call_output(result.call_id.clone(), result.output_text());
    transport
        .send(ClientEvent::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item: Box::new(item),
        })
        .await?;
    if turn.active_response.is_some() {
        // The engine rejects a new response while the calling one is still open.
        turn.follow_up = true;
    } else {
        transport.send(ClientEvent::ResponseCreate { event_id: None }).await?;
        turn.awaiting_response = true;
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
async fn handle_event(
    event: ServerEvent,
    client_rate: u32,
    turn: &mut TurnState,
    transport: &mut dyn EngineTransport,
    output: &mut dyn OutputSink,
) -> Result<Option<ToolCall>> {
    tracing::debug!(event = event.kind(), "Engine event");
    match event {
        ServerEvent::Error { error, .. } => {
            if error.is_cancel_not_active() || error.is_commit_empty() {
                tracing::debug!(code = ?error.code, "Ignoring benign engine error");
                return Ok(None);
            }
            tracing::error!(code = ?error.code, message = %error.message, "Speech engine error");
            return Err(Error::Api(error));
        }
        ServerEvent::SessionCreated { session, .. } | ServerEvent::SessionUpdated { session, .. } => {
            tracing::debug!(session_id = ?session.id, model = ?session.model, "Engine session configured");
        }
        ServerEvent::InputAudioBufferCommitted { .. } => {
            turn.uncommitted_audio = false;
            turn.awaiting_response = true;
        }
        ServerEvent::InputAudioBufferSpeechStarted { audio_start_ms, .. } => {
            if let Some(active) = turn.active_response.clone() {
                if turn.interrupted.as_deref() != Some(active.as_str()) {
                    tracing::info!(response_id = %active, audio_start_ms, "User barged in");
                    turn.interrupted = Some(active.clone());
                    turn.follow_up = false;
                    output.emit_output(OutputEvent::Interruption).await?;
                    transport
                        .send(ClientEvent::ResponseCancel {
                            event_id: None,
                            response_id: Some(active),
                        })
                        .await?;
                }
            }
        }
        ServerEvent::InputAudioTranscriptionDelta { delta, .. } => {
            output
                .emit_output(OutputEvent::transcript(TranscriptRole::User, delta, false))
                .await?;
        }
        ServerEvent::InputAudioTranscriptionCompleted { transcript, .. } => {
            output
                .emit_output(OutputEvent::transcript(TranscriptRole::User, transcript, true))
                .await?;
        }
        ServerEvent::ResponseCreated { response, .. } => {
            turn.active_response = Some(response.id);
            turn.awaiting_response = false;
        }
        ServerEvent::ResponseOutputAudioDelta { response_id, delta, .. } => {
            if turn.accepts(&response_id) {
                match general_purpose::STANDARD.decode(delta.as_bytes()) {
                    Ok(audio) => {
                        let pcm = pcm::convert(&audio, PCM_24KHZ_RATE, 1, client_rate);
                        if !pcm.is_empty() {
                            output.emit_output(OutputEvent::AudioChunk { pcm }).await?;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "Dropping undecodable audio delta"),
                }
            }
        }
        ServerEvent::ResponseOutputAudioTranscriptDelta { response_id, delta, .. } => {
            if turn.accepts(&response_id) {
                output
                    .emit_output(OutputEvent::transcript(TranscriptRole::Assistant, delta, false))
                    .await?;
            }
        }
        ServerEvent::ResponseOutputAudioTranscriptDone { response_id, transcript, .. } => {
            if turn.accepts(&response_id) {
                output
                    .emit_output(OutputEvent::transcript(TranscriptRole::Assistant, transcript, true))
                    .await?;
            }
        }
        ServerEvent::ResponseFunctionCallArgumentsDone { response_id, call_id, name, arguments, .. } => {
            if turn.interrupted.as_deref() == Some(response_id.as_str()) {
                tracing::debug!(call_id = %call_id, "Skipping capability call from cancelled response");
                return Ok(None);
            }
            return Ok(Some(ToolCall::from_raw(name, call_id, &arguments)));
        }
        ServerEvent::ResponseDone { response, .. } => {
            let finished = FinishedResponse {
                spoke: !response.is_tool_only(),
                failure: response.status_details.and_then(|details| details.error),
                id: response.id,
                status: response.status,
            };
            finish_response(finished, turn, transport, output).await?;
        }
        ServerEvent::Unknown(value) => {
            if let Some(finished) = FinishedResponse::from_unreadable(&value) {
                tracing::warn!(response_id = %finished.id, status = ?finished.status, "Could not read response.done");
                finish_response(finished, turn, transport, output).await?;
            }
        }
        ServerEvent::InputAudioBufferSpeechStopped { .. } | ServerEvent::ResponseOutputAudioDone { .. } => {}
    }
    Ok(None)
}

/// The end of one engine response.
#[derive(Debug)]
struct FinishedResponse {
    id: String,
    status: ResponseStatus,
    spoke: bool,
    failure: Option<ServerError>,
}

impl FinishedResponse {
    /// Best-effort reading of a `response.done` whose body did not parse, so
    /// the turn still ends. A missing or unknown status counts as failed.
    fn from_unreadable(value: &Value) -> Option<Self> {
        if value.get("type").and_then(Value::as_str) != Some("response.done") {
            return None;
        }
        let response = value.get("response")?;
        let id = response.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let status = response
            .get("status")
            .cloned()
            .and_then(|status| serde_json::from_value(status).ok())
            .unwrap_or(ResponseStatus::Failed);
        Some(Self {
            id,
            status,
            spoke: true,
            failure: None,
        })
    }

    fn into_error(self) -> ServerError {
        let mut error = self.failure.unwrap_or(ServerError {
            error_type: ApiErrorType::ServerError,
            code: None,
            message: String::new(),
            param: None,
            event_id: None,
        });
        if error.message.is_empty() {
            error.message = match &error.code {
                Some(code) => format!("response {} failed ({code})", self.id),
                None => format!("response {} failed", self.id),
            };
        }
        error
    }
}

async fn finish_response(
    finished: FinishedResponse,
    turn: &mut TurnState,
    transport: &mut dyn EngineTransport,
    output: &mut dyn OutputSink,
) -> Result<()> {
    let was_interrupted = turn.interrupted.as_deref() == Some(finished.id.as_str());
    if finished.id.is_empty() || turn.active_response.as_deref() == Some(finished.id.as_str()) {
        turn.active_response = None;
    }
    if was_interrupted {
        turn.interrupted = None;
    }
    if finished.status == ResponseStatus::Failed && !was_interrupted {
        turn.follow_up = false;
        let error = finished.into_error();
        tracing::error!(code = ?error.code, message = %error.message, "Engine response failed");
        return Err(Error::Api(error));
    }
    let cancelled = was_interrupted || finished.status == ResponseStatus::Cancelled;
    if !cancelled && finished.spoke {
        output.emit_output(OutputEvent::ResponseComplete).await?;
    }
    if turn.follow_up && turn.active_response.is_none() {
        turn.follow_up = false;
        transport.send(ClientEvent::ResponseCreate { event_id: None }).await?;
        turn.awaiting_response = true;
    }
    Ok(())
}
