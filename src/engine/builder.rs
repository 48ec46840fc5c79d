use crate::protocol::models::{
    AudioConfig, AudioFormat, Eagerness, InputAudioConfig, InputAudioTranscription,
    OutputAudioConfig, OutputModalities, SessionUpdate, SessionUpdateConfig, Temperature, TopP,
    TurnDetection, Voice, DEFAULT_MODEL,
};
use crate::transport::ws::DEFAULT_ENGINE_URL;
use crate::{Error, Result};

use super::pcm::{CLIENT_PCM_RATE, SUPPORTED_CLIENT_RATES};
use super::realtime::RealtimeEngine;
use super::tools::ToolRegistry;
use super::transport::EngineTransport;

pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly voice assistant. \
Always respond in English. \
For questions about the organisation you represent, call the search_knowledge_base tool first \
and answer only from what it returns. \
If the search finds nothing, say you do not have that information. \
Answer only what was asked, complete your sentences, and keep replies to two or three sentences.";

/// Model parameters for one engine connection.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub url: String,
    pub api_key: String,
    /// Sent in the connect URL; the engine does not accept it in `session.update`.
    pub model: String,
    pub voice: String,
    /// PCM rate of synthesized audio sent to the client. The engine itself
    /// always speaks 24 kHz.
    pub sample_rate: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Range-checked but not sent: the realtime protocol has no nucleus
    /// sampling control.
    pub top_p: Option<f32>,
    pub endpointing: Eagerness,
    pub instructions: String,
    pub transcription_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENGINE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            sample_rate: CLIENT_PCM_RATE,
            temperature: 0.7,
            max_tokens: 8192,
            top_p: Some(0.9),
            endpointing: Eagerness::Medium,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
        }
    }
}

impl EngineConfig {
    /// The `session.update` payload sent right after connecting.
    ///
    /// # Errors
    /// Returns `InvalidConfig` when a sampling parameter is out of range or the
    /// client sample rate is unsupported, and a serialization error if a tool
    /// schema cannot be encoded.
    #[allow(clippy::result_large_err)]
    pub fn session_update(&self, tools: &ToolRegistry) -> Result<SessionUpdate> {
        if !SUPPORTED_CLIENT_RATES.contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample_rate must be within {SUPPORTED_CLIENT_RATES:?}, got {}",
                self.sample_rate
            )));
        }
        let temperature =
            Temperature::new(self.temperature).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(top_p) = self.top_p {
            TopP::new(top_p).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidConfig("max_tokens must be positive".to_string()));
        }

        let format = AudioFormat::pcm_24khz();
        let mut session = SessionUpdateConfig::new(OutputModalities::Audio);
        session.instructions = Some(self.instructions.clone());
        session.audio = Some(AudioConfig {
            input: Some(InputAudioConfig {
                format: Some(format.clone()),
                turn_detection: Some(TurnDetection::semantic(self.endpointing)),
                transcription: self.transcription_model.as_ref().map(|model| InputAudioTranscription {
                    model: Some(model.clone()),
                    language: None,
                }),
            }),
            output: Some(OutputAudioConfig {
                format: Some(format),
                voice: Some(Voice::from(self.voice.clone())),
            }),
        });
        if !tools.is_empty() {
            session.tools = Some(tools.try_as_tools()?);
        }
        session.temperature = Some(temperature);
        session.max_output_tokens = Some(self.max_tokens);

        Ok(SessionUpdate { config: session })
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    tools: ToolRegistry,
    transport: Option<Box<dyn EngineTransport>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            tools: ToolRegistry::new(),
            transport: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Use an already-connected transport instead of dialing `url`.
    #[must_use]
    pub fn transport(mut self, transport: Box<dyn EngineTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// # Errors
    /// Returns an error if the configuration cannot produce a valid session update.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<RealtimeEngine> {
        let update = self.config.session_update(&self.tools)?;
        Ok(RealtimeEngine::new(self.config, update, self.tools, self.transport))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
