use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::queue::{InputQueue, input_queue};
use super::{SessionOutcome, SessionSettings};
use crate::engine::{AudioInputEvent, OutputEvent, OutputSink, SpeechEngine};
use crate::gateway::connection::{ClientConnection, ClientReceiver, ClientSender};
use crate::gateway::messages::{ClientMessage, ServerMessage, decode_pcm};
use crate::{Error, Result};

/// How the receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReceiveEnd {
    Stopped,
    Disconnected,
    Failed(String),
    Cancelled,
}

/// One duplex conversation bound to one client connection.
pub struct VoiceSession<E> {
    id: Uuid,
    engine: E,
    settings: SessionSettings,
    shutdown: CancellationToken,
    cancel: CancellationToken,
}

impl<E: SpeechEngine> VoiceSession<E> {
    /// The session token is a child of `shutdown`, so process shutdown reaches
    /// every live session.
    #[must_use]
    pub fn new(engine: E, settings: SessionSettings, shutdown: &CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            settings,
            shutdown: shutdown.clone(),
            cancel: shutdown.child_token(),
        }
    }

    /// Run the session to completion. Never fails; the result describes how it ended.
    pub async fn start<C: ClientConnection>(self, connection: C) -> SessionOutcome {
        let span = tracing::info_span!("voice_session", session_id = %self.id);
        self.run(connection).instrument(span).await
    }

    async fn run<C: ClientConnection>(mut self, connection: C) -> SessionOutcome {
        tracing::info!("Session started");
        let (sender, receiver) = connection.into_split();
        let (queue, mut input) = input_queue();

        let receive = tokio::spawn(
            receive_loop(receiver, queue.clone(), self.settings, self.cancel.clone())
                .instrument(tracing::Span::current()),
        );

        let mut output = ClientOutput::new(sender);
        let engine_result = tokio::select! {
            result = self.engine.run(&mut input, &mut output) => Some(result),
            () = self.cancel.cancelled() => None,
        };

        self.cancel.cancel();
        queue.close();
        let receive_end = receive.await.unwrap_or_else(|err| ReceiveEnd::Failed(err.to_string()));

        let outcome = match engine_result {
            None if self.shutdown.is_cancelled() => SessionOutcome::Shutdown,
            None => match receive_end {
                ReceiveEnd::Failed(message) => SessionOutcome::TransportFailed(message),
                _ => SessionOutcome::Disconnected,
            },
            Some(Ok(())) => match receive_end {
                ReceiveEnd::Stopped => SessionOutcome::ClientStopped,
                ReceiveEnd::Disconnected => SessionOutcome::Disconnected,
                ReceiveEnd::Failed(message) => SessionOutcome::TransportFailed(message),
                ReceiveEnd::Cancelled if self.shutdown.is_cancelled() => SessionOutcome::Shutdown,
                ReceiveEnd::Cancelled => SessionOutcome::Completed,
            },
            Some(Err(err)) if err.is_transport() => {
                tracing::warn!(error = %err, "Client transport failed");
                SessionOutcome::TransportFailed(err.to_string())
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "Speech engine failed");
                let message = err.to_string();
                if let Err(send_err) = output.emit_output(OutputEvent::Error { message: message.clone() }).await {
                    tracing::debug!(error = %send_err, "Could not report engine failure to client");
                }
                SessionOutcome::EngineFailed(message)
            }
        };

        output.close().await;
        tracing::info!(outcome = ?outcome, "Session ended");
        outcome
    }
}

async fn receive_loop<R: ClientReceiver>(
    mut receiver: R,
    queue: InputQueue,
    settings: SessionSettings,
    cancel: CancellationToken,
) -> ReceiveEnd {
    let mut stopped = false;
    let end = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                break if stopped { ReceiveEnd::Stopped } else { ReceiveEnd::Cancelled };
            }
            next = receiver.recv() => next,
        };
        match next {
            None => {
                tracing::info!("Client disconnected");
                break ReceiveEnd::Disconnected;
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "Client receive failed");
                break ReceiveEnd::Failed(err.to_string());
            }
            Some(Ok(text)) => match ClientMessage::parse(&text) {
                Ok(ClientMessage::Audio { data }) => match decode_pcm(&data) {
                    Ok(pcm) if pcm.is_empty() => {}
                    Ok(pcm) => {
                        let frame = AudioInputEvent::pcm(pcm, settings.input_sample_rate, settings.input_channels);
                        if !queue.push(frame) {
                            tracing::debug!("Dropping audio received after stop");
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "Dropping malformed audio"),
                },
                Ok(ClientMessage::Stop) => {
                    tracing::info!("Client requested stop");
                    stopped = true;
                    queue.close();
                }
                Err(err) => tracing::warn!(error = %err, "Dropping malformed client message"),
            },
        }
    };

    queue.close();
    if matches!(end, ReceiveEnd::Disconnected | ReceiveEnd::Failed(_)) {
        cancel.cancel();
    }
    end
}

/// Output sink writing engine events to the client in order.
pub struct ClientOutput<S> {
    sender: S,
}

impl<S: ClientSender> ClientOutput<S> {
    pub const fn new(sender: S) -> Self {
        Self { sender }
    }

    pub async fn close(&mut self) {
        self.sender.close().await;
    }
}

#[async_trait]
impl<S: ClientSender> OutputSink for ClientOutput<S> {
    async fn emit_output(&mut self, event: OutputEvent) -> Result<()> {
        let kind = event.kind();
        tracing::trace!(event = kind, "Forwarding to client");
        self.sender.send(ServerMessage::from(event)).await.map_err(|err| {
            tracing::warn!(event = kind, error = %err, "Client write failed");
            match err {
                Error::Transport(_) => err,
                other => Error::Transport(other.to_string()),
            }
        })
    }
}
