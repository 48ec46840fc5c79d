//! Layered settings: built-in defaults, then an optional TOML file, then
//! `DUPLEX_VOICE__SECTION__KEY` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::engine::pcm::SUPPORTED_CLIENT_RATES;
use crate::protocol::models::Eagerness;
use crate::retrieval::SearchOptions;
use crate::session::SessionSettings;
use crate::{Error, Result};

pub const ENV_PREFIX: &str = "DUPLEX_VOICE";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub engine: EngineSettings,
    pub retrieval: RetrievalSettings,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub voice_path: String,
    pub health_path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            voice_path: "/voice".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub sample_rate: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub endpointing: Eagerness,
    pub instructions: String,
    pub transcription_model: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            url: engine.url,
            api_key: engine.api_key,
            model: engine.model,
            voice: engine.voice,
            sample_rate: engine.sample_rate,
            temperature: engine.temperature,
            max_tokens: engine.max_tokens,
            top_p: engine.top_p,
            endpointing: engine.endpointing,
            instructions: engine.instructions,
            transcription_model: engine.transcription_model,
        }
    }
}

impl EngineSettings {
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            voice: self.voice.clone(),
            sample_rate: self.sample_rate,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            endpointing: self.endpointing,
            instructions: self.instructions.clone(),
            transcription_model: self.transcription_model.clone().filter(|m| !m.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub top_k: usize,
    pub min_score: f32,
    pub max_chars_per_passage: usize,
    pub timeout_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        let options = SearchOptions::default();
        Self {
            url: "http://127.0.0.1:8081/search".to_string(),
            api_key: None,
            top_k: options.top_k,
            min_score: options.min_score,
            max_chars_per_passage: options.max_chars_per_passage,
            timeout_ms: 10_000,
        }
    }
}

impl RetrievalSettings {
    #[must_use]
    pub const fn search_options(&self) -> SearchOptions {
        SearchOptions {
            top_k: self.top_k,
            min_score: self.min_score,
            max_chars_per_passage: self.max_chars_per_passage,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSection {
    pub input_sample_rate: u32,
    pub input_channels: u16,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionSettings::default();
        Self {
            input_sample_rate: defaults.input_sample_rate,
            input_channels: defaults.input_channels,
        }
    }
}

impl SessionSection {
    #[must_use]
    pub const fn settings(&self) -> SessionSettings {
        SessionSettings {
            input_sample_rate: self.input_sample_rate,
            input_channels: self.input_channels,
        }
    }
}

impl Settings {
    /// Load from an optional TOML file and the process environment.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, a value has the wrong
    /// type, or the result fails validation.
    #[allow(clippy::result_large_err)]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, environment())
    }

    #[allow(clippy::result_large_err)]
    fn load_with_env(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let settings: Self = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// # Errors
    /// Returns `InvalidConfig` describing the first problem found.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("server.voice_path", &self.server.voice_path),
            ("server.health_path", &self.server.health_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::InvalidConfig(format!("{name} must start with '/', got {path:?}")));
            }
        }
        if self.server.voice_path == self.server.health_path {
            return Err(Error::InvalidConfig(
                "server.voice_path and server.health_path must differ".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(Error::InvalidConfig(format!(
                "retrieval.min_score must be within [0, 1], got {}",
                self.retrieval.min_score
            )));
        }
        if !(1..=2).contains(&self.session.input_channels) {
            return Err(Error::InvalidConfig(format!(
                "session.input_channels must be 1 or 2, got {}",
                self.session.input_channels
            )));
        }
        for (name, rate) in [
            ("session.input_sample_rate", self.session.input_sample_rate),
            ("engine.sample_rate", self.engine.sample_rate),
        ] {
            if !SUPPORTED_CLIENT_RATES.contains(&rate) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be within {}..={} Hz, got {rate}",
                    SUPPORTED_CLIENT_RATES.start(),
                    SUPPORTED_CLIENT_RATES.end()
                )));
            }
        }
        // The client speaks one PCM rate in both directions.
        if self.session.input_sample_rate != self.engine.sample_rate {
            return Err(Error::InvalidConfig(format!(
                "session.input_sample_rate ({}) must equal engine.sample_rate ({})",
                self.session.input_sample_rate, self.engine.sample_rate
            )));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        environment().source(Some(map))
    }

    fn temp_toml(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("duplex-voice-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::load_with_env(None, env(&[])).unwrap();
        assert_eq!(settings.server.voice_path, "/voice");
        assert_eq!(settings.server.health_path, "/health");
        assert_eq!(settings.engine.sample_rate, 16_000);
        assert_eq!(settings.engine.max_tokens, 8192);
        assert_eq!(settings.engine.endpointing, Eagerness::Medium);
        assert_eq!(settings.retrieval.top_k, 10);
        assert!((settings.retrieval.min_score - 0.3).abs() < f32::EPSILON);
        assert_eq!(settings.retrieval.max_chars_per_passage, 2000);
        assert_eq!(settings.session.settings(), SessionSettings::default());
    }

    #[test]
    fn environment_overrides_file() {
        let path = temp_toml(
            "[engine]\nmodel = \"from-file\"\nvoice = \"verse\"\n\n[retrieval]\ntop_k = 3\n",
        );
        let settings = Settings::load_with_env(
            Some(&path),
            env(&[
                ("DUPLEX_VOICE__ENGINE__MODEL", "from-env"),
                ("DUPLEX_VOICE__ENGINE__ENDPOINTING", "high"),
            ]),
        )
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.engine.model, "from-env");
        assert_eq!(settings.engine.voice, "verse");
        assert_eq!(settings.engine.endpointing, Eagerness::High);
        assert_eq!(settings.retrieval.top_k, 3);
    }

    #[test]
    fn colliding_paths_are_rejected() {
        let err = Settings::load_with_env(
            None,
            env(&[("DUPLEX_VOICE__SERVER__HEALTH_PATH", "/voice")]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn client_rate_must_match_in_both_directions() {
        let err = Settings::load_with_env(None, env(&[("DUPLEX_VOICE__ENGINE__SAMPLE_RATE", "24000")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref m) if m.contains("engine.sample_rate")));

        let settings = Settings::load_with_env(
            None,
            env(&[
                ("DUPLEX_VOICE__ENGINE__SAMPLE_RATE", "24000"),
                ("DUPLEX_VOICE__SESSION__INPUT_SAMPLE_RATE", "24000"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.session.settings().input_sample_rate, 24_000);
    }

    #[test]
    fn unconvertible_client_layouts_are_rejected() {
        for vars in [
            [("DUPLEX_VOICE__SESSION__INPUT_CHANNELS", "0")],
            [("DUPLEX_VOICE__SESSION__INPUT_CHANNELS", "6")],
            [("DUPLEX_VOICE__SESSION__INPUT_SAMPLE_RATE", "96000")],
        ] {
            let err = Settings::load_with_env(None, env(&vars)).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{vars:?} accepted");
        }
        let stereo = Settings::load_with_env(None, env(&[("DUPLEX_VOICE__SESSION__INPUT_CHANNELS", "2")])).unwrap();
        assert_eq!(stereo.session.input_channels, 2);
    }

    #[test]
    fn engine_config_drops_blank_transcription_model() {
        let settings = EngineSettings {
            transcription_model: Some(String::new()),
            ..EngineSettings::default()
        };
        assert!(settings.engine_config().transcription_model.is_none());
    }
}
