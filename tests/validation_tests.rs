use duplex_voice_rs::engine::{EngineConfig, ToolRegistry};
use duplex_voice_rs::protocol::models::{
    AudioConfig, AudioFormat, InputAudioConfig, OutputModalities, SessionUpdate, SessionUpdateConfig, Tool,
};
use duplex_voice_rs::{ClientEvent, Error, validate_client_event};

fn session_update(config: SessionUpdateConfig) -> ClientEvent {
    ClientEvent::SessionUpdate { event_id: None, session: Box::new(SessionUpdate { config }) }
}

fn base_session() -> SessionUpdateConfig {
    SessionUpdateConfig::new(OutputModalities::Audio)
}

#[test]
fn test_append_accepts_valid_base64() {
    let event = ClientEvent::InputAudioBufferAppend { event_id: None, audio: "AAECAw==".to_string() };
    assert!(validate_client_event(&event).is_ok());
}

#[test]
fn test_append_rejects_invalid_base64() {
    for audio in ["abc", "ab=c", "a*bc", "a==="] {
        let event = ClientEvent::InputAudioBufferAppend { event_id: None, audio: audio.to_string() };
        assert!(
            matches!(validate_client_event(&event), Err(Error::InvalidClientEvent(_))),
            "{audio} should be rejected"
        );
    }
}

#[test]
fn test_append_rejects_oversized_chunk() {
    let audio = "A".repeat(16 * 1024 * 1024 / 3 * 4);
    let event = ClientEvent::InputAudioBufferAppend { event_id: None, audio };
    let err = validate_client_event(&event).unwrap_err();
    assert!(err.to_string().contains("exceeds 15MB"));
}

#[test]
fn test_session_update_requires_24khz_pcm() {
    let mut config = base_session();
    config.audio = Some(AudioConfig {
        input: Some(InputAudioConfig {
            format: Some(AudioFormat::Pcm { rate: 16_000 }),
            ..InputAudioConfig::default()
        }),
        output: None,
    });
    let err = validate_client_event(&session_update(config)).unwrap_err();
    assert!(err.to_string().contains("24000"));
}

#[test]
fn test_session_update_rejects_duplicate_tools() {
    let tool = Tool::Function {
        name: "search_knowledge_base".to_string(),
        description: None,
        parameters: serde_json::json!({ "type": "object" }),
    };
    let mut config = base_session();
    config.tools = Some(vec![tool.clone(), tool]);
    let err = validate_client_event(&session_update(config)).unwrap_err();
    assert!(err.to_string().contains("duplicate tool name"));
}

#[test]
fn test_default_engine_session_update_is_valid() {
    let update = EngineConfig::default().session_update(&ToolRegistry::new()).unwrap();
    let event = ClientEvent::SessionUpdate { event_id: None, session: Box::new(update) };
    assert!(validate_client_event(&event).is_ok());
}
