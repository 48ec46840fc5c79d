use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    /// Failed responses report only `type` and `code`.
    #[serde(default)]
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

impl ServerError {
    /// Cancelling a response the engine already finished is a harmless race with barge-in.
    #[must_use]
    pub fn is_cancel_not_active(&self) -> bool {
        self.code.as_deref() == Some("response_cancel_not_active")
    }

    /// Committing right after the engine's own endpointing committed the same audio.
    #[must_use]
    pub fn is_commit_empty(&self) -> bool {
        self.code.as_deref() == Some("input_audio_buffer_commit_empty")
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Speech engine error: {}", .0.message)]
    Api(ServerError),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Invalid client event: {0}")]
    InvalidClientEvent(String),

    #[error("Invalid tool arguments: {0}")]
    ToolArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid client message: {0}")]
    InvalidMessage(String),

    #[error("Client transport failed: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True when the failure happened on the end-user transport rather than the engine.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
