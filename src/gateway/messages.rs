use base64::Engine;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};

use crate::engine::{OutputEvent, TranscriptRole};
use crate::{Error, Result};

/// Messages the end-user client sends over the voice socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Audio { data: String },
    Stop,
}

impl ClientMessage {
    /// # Errors
    /// Returns `InvalidMessage` for anything that is not a known message shape.
    #[allow(clippy::result_large_err)]
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidMessage(e.to_string()))
    }
}

/// Decode a base64 payload of 16-bit PCM.
///
/// # Errors
/// Returns `InvalidMessage` when the payload is not base64 or splits a sample.
#[allow(clippy::result_large_err)]
pub fn decode_pcm(data: &str) -> Result<Vec<u8>> {
    let pcm = general_purpose::STANDARD
        .decode(data.as_bytes())
        .map_err(|e| Error::InvalidMessage(format!("audio payload is not base64: {e}")))?;
    if pcm.len() % 2 != 0 {
        return Err(Error::InvalidMessage(format!(
            "audio payload has odd length {}",
            pcm.len()
        )));
    }
    Ok(pcm)
}

/// Messages the server sends to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Audio {
        data: String,
    },
    Transcript {
        role: TranscriptRole,
        text: String,
        is_final: bool,
    },
    Interruption,
    ResponseEnd,
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// # Errors
    /// Returns a serialization error if the message cannot be encoded.
    #[allow(clippy::result_large_err)]
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<OutputEvent> for ServerMessage {
    fn from(event: OutputEvent) -> Self {
        match event {
            OutputEvent::AudioChunk { pcm } => Self::Audio {
                data: general_purpose::STANDARD.encode(pcm),
            },
            OutputEvent::Transcript { role, text, is_final } => Self::Transcript { role, text, is_final },
            OutputEvent::Interruption => Self::Interruption,
            OutputEvent::ResponseComplete => Self::ResponseEnd,
            OutputEvent::Error { message } => Self::Error { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_audio_and_stop() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"audio","data":"AAA="}"#).unwrap(),
            ClientMessage::Audio { data: "AAA=".to_string() }
        );
        assert_eq!(ClientMessage::parse(r#"{"type":"stop"}"#).unwrap(), ClientMessage::Stop);
    }

    #[test]
    fn parse_rejects_unknown_type() {
        let err = ClientMessage::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn decode_pcm_rejects_odd_length_and_garbage() {
        assert_eq!(decode_pcm("AQI=").unwrap(), vec![1, 2]);
        assert!(decode_pcm("AQ==").is_err());
        assert!(decode_pcm("not base64!").is_err());
    }

    #[test]
    fn response_complete_becomes_response_end() {
        let json = ServerMessage::from(OutputEvent::ResponseComplete).to_json().unwrap();
        assert_eq!(json, r#"{"type":"response_end"}"#);
    }
}
