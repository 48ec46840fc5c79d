use serde::{Deserialize, Serialize};

use super::{AudioConfig, OutputModalities, Temperature, Tool};

/// Session type. Only realtime conversations are driven by this crate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Realtime,
}

/// Partial session configuration pushed with `session.update`.
///
/// The engine fixes `model` at connect time and rejects attempts to change it
/// here, so there is no field for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdateConfig {
    #[serde(rename = "type")]
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modalities: Option<OutputModalities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Temperature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl SessionUpdateConfig {
    #[must_use]
    pub const fn new(output_modalities: OutputModalities) -> Self {
        Self {
            kind: SessionKind::Realtime,
            output_modalities: Some(output_modalities),
            instructions: None,
            audio: None,
            tools: None,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

/// Session object echoed back by `session.created` / `session.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// Flattened to match the engine's session.update JSON shape.
    #[serde(flatten)]
    pub config: SessionUpdateConfig,
}
