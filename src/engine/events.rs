use serde::{Deserialize, Serialize};

/// Sample encoding of inbound audio. Only raw little-endian PCM is carried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    #[default]
    Pcm,
}

/// One frame of microphone audio headed for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInputEvent {
    pub audio: Vec<u8>,
    pub format: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioInputEvent {
    #[must_use]
    pub const fn pcm(audio: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            audio,
            format: AudioEncoding::Pcm,
            sample_rate,
            channels,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    User,
    Assistant,
}

/// Everything the engine can say back to the client, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    AudioChunk {
        pcm: Vec<u8>,
    },
    Transcript {
        role: TranscriptRole,
        text: String,
        is_final: bool,
    },
    Interruption,
    ResponseComplete,
    Error {
        message: String,
    },
}

impl OutputEvent {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AudioChunk { .. } => "audio_chunk",
            Self::Transcript { .. } => "transcript",
            Self::Interruption => "interruption",
            Self::ResponseComplete => "response_complete",
            Self::Error { .. } => "error",
        }
    }

    #[must_use]
    pub fn transcript(role: TranscriptRole, text: impl Into<String>, is_final: bool) -> Self {
        Self::Transcript {
            role,
            text: text.into(),
            is_final,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_frame_carries_its_layout() {
        let frame = AudioInputEvent::pcm(vec![0; 3200], 16_000, 1);
        assert_eq!(frame.format, AudioEncoding::Pcm);
        assert_eq!((frame.sample_rate, frame.channels), (16_000, 1));
    }

    #[test]
    fn transcript_kind() {
        let event = OutputEvent::transcript(TranscriptRole::Assistant, "hi", true);
        assert_eq!(event.kind(), "transcript");
        assert_eq!(OutputEvent::ResponseComplete.kind(), "response_complete");
    }
}
