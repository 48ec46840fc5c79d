use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose;
use duplex_voice_rs::engine::{BoxFuture, EngineTransport};
use duplex_voice_rs::error::{ApiErrorType, ServerError};
use duplex_voice_rs::gateway::{ClientConnection, ClientReceiver, ClientSender};
use duplex_voice_rs::protocol::models::{Response, ResponseStatus};
use duplex_voice_rs::{
    AudioInputEvent, ClientEvent, Error, InputSource, OutputSink, RealtimeEngine, Result, ServerEvent,
    ServerMessage, SessionOutcome, SessionSettings, SpeechEngine, VoiceSession,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct MockSender {
    tx: mpsc::UnboundedSender<ServerMessage>,
    fail: bool,
}

#[async_trait]
impl ClientSender for MockSender {
    async fn send(&mut self, message: ServerMessage) -> Result<()> {
        if self.fail {
            return Err(Error::Transport("broken pipe".to_string()));
        }
        self.tx
            .send(message)
            .map_err(|_| Error::Transport("client gone".to_string()))
    }

    async fn close(&mut self) {}
}

struct MockReceiver(mpsc::UnboundedReceiver<String>);

#[async_trait]
impl ClientReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.0.recv().await.map(Ok)
    }
}

struct MockConnection {
    sender: MockSender,
    receiver: MockReceiver,
}

impl ClientConnection for MockConnection {
    type Sender = MockSender;
    type Receiver = MockReceiver;

    fn into_split(self) -> (MockSender, MockReceiver) {
        (self.sender, self.receiver)
    }
}

struct Client {
    inbound: mpsc::UnboundedSender<String>,
    outbound: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Client {
    fn audio(&self, pcm: &[u8]) {
        let data = general_purpose::STANDARD.encode(pcm);
        self.raw(&format!(r#"{{"type":"audio","data":"{data}"}}"#));
    }

    fn stop(&self) {
        self.raw(r#"{"type":"stop"}"#);
    }

    fn raw(&self, text: &str) {
        self.inbound.send(text.to_string()).unwrap();
    }

    async fn next(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
            .await
            .expect("timed out waiting for server message")
            .expect("server closed")
    }
}

fn connection(fail_writes: bool) -> (MockConnection, Client) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let conn = MockConnection {
        sender: MockSender { tx: out_tx, fail: fail_writes },
        receiver: MockReceiver(in_rx),
    };
    (conn, Client { inbound: in_tx, outbound: out_rx })
}

/// Collects every frame until input ends.
#[derive(Clone, Default)]
struct RecordingEngine {
    frames: Arc<Mutex<Vec<AudioInputEvent>>>,
}

#[async_trait]
impl SpeechEngine for RecordingEngine {
    async fn run(&mut self, input: &mut dyn InputSource, _output: &mut dyn OutputSink) -> Result<()> {
        while let Some(frame) = input.next_input().await {
            self.frames.lock().unwrap().push(frame);
        }
        assert!(input.next_input().await.is_none(), "input resumed after its end marker");
        Ok(())
    }
}

struct MockEngineTransport {
    incoming: mpsc::Receiver<ServerEvent>,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
}

impl EngineTransport for MockEngineTransport {
    fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<()>> {
        let outgoing = self.outgoing.clone();
        Box::pin(async move {
            outgoing.send(event).map_err(|_| Error::ConnectionClosed)?;
            Ok(())
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>> {
        Box::pin(async move { Ok(self.incoming.recv().await) })
    }
}

fn realtime_engine() -> (RealtimeEngine, mpsc::Sender<ServerEvent>, mpsc::UnboundedReceiver<ClientEvent>) {
    let (event_tx, event_rx) = mpsc::channel(32);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let engine = RealtimeEngine::builder()
        .transport(Box::new(MockEngineTransport { incoming: event_rx, outgoing: out_tx }))
        .build()
        .unwrap();
    (engine, event_tx, out_rx)
}

fn created(id: &str) -> ServerEvent {
    ServerEvent::ResponseCreated { event_id: String::new(), response: Response::new(id, ResponseStatus::InProgress) }
}

fn done(id: &str, status: ResponseStatus) -> ServerEvent {
    ServerEvent::ResponseDone { event_id: String::new(), response: Response::new(id, status) }
}

fn pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn audio_delta(id: &str, pcm: &[u8]) -> ServerEvent {
    ServerEvent::ResponseOutputAudioDelta {
        event_id: String::new(),
        response_id: id.to_string(),
        item_id: "item_1".to_string(),
        delta: general_purpose::STANDARD.encode(pcm),
    }
}

async fn next_sent(sent: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(1), sent.recv())
        .await
        .expect("timed out waiting for engine event")
        .expect("engine transport closed")
}

#[tokio::test]
async fn frames_reach_engine_in_order_and_stop_after_sentinel() {
    let engine = RecordingEngine::default();
    let frames = Arc::clone(&engine.frames);
    let (conn, client) = connection(false);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());

    client.audio(&[1, 2]);
    client.audio(&[3, 4]);
    client.stop();
    client.audio(&[5, 6]);

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.start(conn)).await.unwrap();
    assert_eq!(outcome, SessionOutcome::ClientStopped);

    let frames = frames.lock().unwrap();
    let payloads: Vec<_> = frames.iter().map(|f| f.audio.clone()).collect();
    assert_eq!(payloads, vec![vec![1, 2], vec![3, 4]]);
    assert!(frames.iter().all(|f| f.sample_rate == 16_000 && f.channels == 1));
}

#[tokio::test]
async fn double_stop_terminates_once() {
    let (conn, client) = connection(false);
    let session = VoiceSession::new(RecordingEngine::default(), SessionSettings::default(), &CancellationToken::new());

    client.stop();
    client.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.start(conn)).await.unwrap();
    assert_eq!(outcome, SessionOutcome::ClientStopped);
}

#[tokio::test]
async fn malformed_messages_are_dropped_without_ending_session() {
    let engine = RecordingEngine::default();
    let frames = Arc::clone(&engine.frames);
    let (conn, client) = connection(false);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());

    client.raw("not json");
    client.raw(r#"{"type":"shout"}"#);
    client.raw(r#"{"type":"audio","data":"AQ=="}"#);
    client.raw(r#"{"type":"audio","data":"%%%%"}"#);
    client.audio(&[7, 8]);
    client.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.start(conn)).await.unwrap();
    assert_eq!(outcome, SessionOutcome::ClientStopped);
    assert_eq!(frames.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn disconnect_ends_session() {
    let (conn, client) = connection(false);
    let session = VoiceSession::new(RecordingEngine::default(), SessionSettings::default(), &CancellationToken::new());

    client.audio(&[1, 1]);
    drop(client);

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.start(conn)).await.unwrap();
    assert_eq!(outcome, SessionOutcome::Disconnected);
}

#[tokio::test]
async fn process_shutdown_reaches_session() {
    let shutdown = CancellationToken::new();
    let (conn, _client) = connection(false);
    let session = VoiceSession::new(RecordingEngine::default(), SessionSettings::default(), &shutdown);

    let handle = tokio::spawn(session.start(conn));
    tokio::task::yield_now().await;
    shutdown.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert_eq!(outcome, SessionOutcome::Shutdown);
}

#[tokio::test]
async fn one_frame_then_stop_ends_soon_after_completion() {
    let (engine, events, mut sent) = realtime_engine();
    let (conn, mut client) = connection(false);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());

    client.audio(&[0; 320]);
    client.stop();
    let handle = tokio::spawn(session.start(conn));

    assert!(matches!(next_sent(&mut sent).await, ClientEvent::SessionUpdate { .. }));
    assert!(matches!(next_sent(&mut sent).await, ClientEvent::InputAudioBufferAppend { .. }));
    assert!(matches!(next_sent(&mut sent).await, ClientEvent::InputAudioBufferCommit { .. }));
    assert!(matches!(next_sent(&mut sent).await, ClientEvent::ResponseCreate { .. }));

    events.send(created("resp_1")).await.unwrap();
    events.send(audio_delta("resp_1", &pcm16(&[0, 30, 60]))).await.unwrap();
    events
        .send(ServerEvent::ResponseOutputAudioTranscriptDone {
            event_id: String::new(),
            response_id: "resp_1".to_string(),
            item_id: "item_1".to_string(),
            transcript: "Hello there.".to_string(),
        })
        .await
        .unwrap();
    events.send(done("resp_1", ResponseStatus::Completed)).await.unwrap();
    let completed_at = Instant::now();

    let outcome = tokio::time::timeout(Duration::from_millis(500), handle).await.unwrap().unwrap();
    assert!(completed_at.elapsed() < Duration::from_millis(500));
    assert_eq!(outcome, SessionOutcome::ClientStopped);

    let spoken = general_purpose::STANDARD.encode(pcm16(&[0, 45]));
    assert_eq!(client.next().await, ServerMessage::Audio { data: spoken });
    assert!(matches!(client.next().await, ServerMessage::Transcript { ref text, is_final: true, .. } if text == "Hello there."));
    assert_eq!(client.next().await, ServerMessage::ResponseEnd);
}

#[tokio::test]
async fn barge_in_forwards_one_interruption_without_response_end() {
    let (engine, events, mut sent) = realtime_engine();
    let (conn, mut client) = connection(false);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());
    let handle = tokio::spawn(session.start(conn));

    assert!(matches!(next_sent(&mut sent).await, ClientEvent::SessionUpdate { .. }));

    events.send(created("resp_1")).await.unwrap();
    events.send(audio_delta("resp_1", &pcm16(&[1, 1, 1]))).await.unwrap();
    assert!(matches!(client.next().await, ServerMessage::Audio { .. }));

    events
        .send(ServerEvent::InputAudioBufferSpeechStarted {
            event_id: String::new(),
            audio_start_ms: 900,
            item_id: "item_2".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(client.next().await, ServerMessage::Interruption);
    assert!(matches!(next_sent(&mut sent).await, ClientEvent::ResponseCancel { .. }));

    events.send(audio_delta("resp_1", &pcm16(&[2, 2, 2]))).await.unwrap();
    events.send(done("resp_1", ResponseStatus::Cancelled)).await.unwrap();
    events.send(created("resp_2")).await.unwrap();
    events.send(audio_delta("resp_2", &pcm16(&[3, 3, 3]))).await.unwrap();
    events.send(done("resp_2", ResponseStatus::Completed)).await.unwrap();

    assert_eq!(client.next().await, ServerMessage::Audio { data: general_purpose::STANDARD.encode(pcm16(&[3, 3])) });
    assert_eq!(client.next().await, ServerMessage::ResponseEnd);

    client.stop();
    let outcome = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert_eq!(outcome, SessionOutcome::ClientStopped);
    assert!(client.outbound.try_recv().is_err());
}

#[tokio::test]
async fn engine_error_is_reported_once_and_ends_session() {
    let (engine, events, _sent) = realtime_engine();
    let (conn, mut client) = connection(false);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());
    let handle = tokio::spawn(session.start(conn));

    events
        .send(ServerEvent::Error {
            event_id: String::new(),
            error: ServerError {
                error_type: ApiErrorType::ServerError,
                code: Some("server_error".to_string()),
                message: "model overloaded".to_string(),
                param: None,
                event_id: None,
            },
        })
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert!(matches!(outcome, SessionOutcome::EngineFailed(ref message) if message.contains("model overloaded")));
    assert!(matches!(client.next().await, ServerMessage::Error { ref message } if message.contains("model overloaded")));
    assert!(client.outbound.try_recv().is_err());
}

#[tokio::test]
async fn client_write_failure_is_fatal() {
    let (engine, events, _sent) = realtime_engine();
    let (conn, _client) = connection(true);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());
    let handle = tokio::spawn(session.start(conn));

    events.send(created("resp_1")).await.unwrap();
    events.send(audio_delta("resp_1", &pcm16(&[4, 4, 4]))).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert!(matches!(outcome, SessionOutcome::TransportFailed(_)));
}

#[tokio::test]
async fn disconnect_while_draining_after_stop_aborts_the_answer() {
    let (engine, events, mut sent) = realtime_engine();
    let (conn, client) = connection(false);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());

    client.audio(&[0; 320]);
    client.stop();
    let handle = tokio::spawn(session.start(conn));

    assert!(matches!(next_sent(&mut sent).await, ClientEvent::SessionUpdate { .. }));
    assert!(matches!(next_sent(&mut sent).await, ClientEvent::InputAudioBufferAppend { .. }));
    assert!(matches!(next_sent(&mut sent).await, ClientEvent::InputAudioBufferCommit { .. }));
    assert!(matches!(next_sent(&mut sent).await, ClientEvent::ResponseCreate { .. }));
    events.send(created("resp_1")).await.unwrap();

    let Client { inbound, mut outbound } = client;
    drop(inbound);

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    assert_eq!(outcome, SessionOutcome::Disconnected);
    while let Ok(message) = outbound.try_recv() {
        assert_ne!(message, ServerMessage::ResponseEnd);
    }
}

#[tokio::test]
async fn stop_racing_disconnect_ends_input_once() {
    let engine = RecordingEngine::default();
    let frames = Arc::clone(&engine.frames);
    let (conn, client) = connection(false);
    let session = VoiceSession::new(engine, SessionSettings::default(), &CancellationToken::new());

    client.audio(&[1, 2]);
    client.stop();
    drop(client);

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.start(conn)).await.unwrap();
    assert!(
        matches!(outcome, SessionOutcome::ClientStopped | SessionOutcome::Disconnected),
        "unexpected outcome: {outcome:?}"
    );
    let frames = frames.lock().unwrap();
    assert!(frames.len() <= 1);
    assert!(frames.iter().all(|f| f.audio == [1, 2]));
}
