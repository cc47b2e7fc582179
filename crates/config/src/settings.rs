//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Model paths and biasing
    #[serde(default)]
    pub model: ModelSettings,

    /// Decoding configuration
    #[serde(default)]
    pub decode: DecodeSettings,

    /// Feature extraction configuration
    #[serde(default)]
    pub frontend: FrontendSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decode.beam_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "decode.beam_size".to_string(),
                message: "beam size must be positive".to_string(),
            });
        }
        if self.decode.first_beam_size < self.decode.beam_size {
            return Err(ConfigError::InvalidValue {
                field: "decode.first_beam_size".to_string(),
                message: "candidate pool must not be smaller than the beam".to_string(),
            });
        }
        if self.decode.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "decode.chunk_size".to_string(),
                message: "chunk size must be positive".to_string(),
            });
        }
        for (field, value) in [
            ("decode.ctc_weight", self.decode.ctc_weight),
            ("decode.reverse_weight", self.decode.reverse_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("{} is outside [0, 1]", value),
                });
            }
        }
        if self.model.model_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "model.model_path".to_string(),
                message: "model path is required".to_string(),
            });
        }
        if self.model.dict_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "model.dict_path".to_string(),
                message: "dictionary path is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Inference threads per model session
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    10086
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_sessions() -> usize {
    100
}
fn default_num_threads() -> usize {
    1
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_sessions: default_max_sessions(),
            num_threads: default_num_threads(),
        }
    }
}

/// Model paths and contextual biasing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model package directory
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Unit dictionary file
    #[serde(default = "default_dict_path")]
    pub dict_path: String,

    /// Context phrase list, one phrase per line
    #[serde(default)]
    pub context_path: Option<String>,

    /// Per-token biasing bonus
    #[serde(default = "default_context_score")]
    pub context_score: f32,
}

fn default_model_path() -> String {
    "models/asr".to_string()
}
fn default_dict_path() -> String {
    "models/asr/units.txt".to_string()
}
fn default_context_score() -> f32 {
    3.0
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            dict_path: default_dict_path(),
            context_path: None,
            context_score: default_context_score(),
        }
    }
}

/// Decoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeSettings {
    /// Encoder chunk size in subsampled frames
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// N-best size for final results
    #[serde(default = "default_nbest")]
    pub nbest: usize,

    /// Attach word-piece timing to final results
    #[serde(default)]
    pub timestamp: bool,

    /// Rearm after every endpoint instead of closing the utterance stream
    #[serde(default)]
    pub continuous_decoding: bool,

    /// Beam width after pruning
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,

    /// Candidate token pool per frame
    #[serde(default = "default_first_beam_size")]
    pub first_beam_size: usize,

    /// Skip frames whose blank probability exceeds this
    #[serde(default = "default_blank_skip_threshold")]
    pub blank_skip_threshold: f32,

    /// CTC weight in final score fusion
    #[serde(default = "default_ctc_weight")]
    pub ctc_weight: f32,

    /// Right-to-left decoder weight in attention rescoring
    #[serde(default)]
    pub reverse_weight: f32,

    /// Endpoint rule thresholds
    #[serde(default)]
    pub endpoint: EndpointSettings,
}

fn default_chunk_size() -> usize {
    16
}
fn default_nbest() -> usize {
    1
}
fn default_beam_size() -> usize {
    10
}
fn default_first_beam_size() -> usize {
    64
}
fn default_blank_skip_threshold() -> f32 {
    0.98
}
fn default_ctc_weight() -> f32 {
    0.5
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            nbest: default_nbest(),
            timestamp: false,
            continuous_decoding: false,
            beam_size: default_beam_size(),
            first_beam_size: default_first_beam_size(),
            blank_skip_threshold: default_blank_skip_threshold(),
            ctc_weight: default_ctc_weight(),
            reverse_weight: 0.0,
            endpoint: EndpointSettings::default(),
        }
    }
}

/// Endpoint rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Trailing blank frames after the last emission
    #[serde(default = "default_trailing_silence_frames")]
    pub trailing_silence_frames: usize,

    /// Maximum silence after speech in milliseconds
    #[serde(default = "default_max_silence_after_speech_ms")]
    pub max_silence_after_speech_ms: u64,
}

fn default_trailing_silence_frames() -> usize {
    25
}
fn default_max_silence_after_speech_ms() -> u64 {
    8000
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            trailing_silence_frames: default_trailing_silence_frames(),
            max_silence_after_speech_ms: default_max_silence_after_speech_ms(),
        }
    }
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendSettings {
    /// Input sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Mel bins per frame
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,

    /// Analysis window length in milliseconds
    #[serde(default = "default_frame_length_ms")]
    pub frame_length_ms: u32,

    /// Frame shift in milliseconds
    #[serde(default = "default_frame_shift_ms")]
    pub frame_shift_ms: u32,
}

fn default_sample_rate() -> u32 {
    16000
}
fn default_num_bins() -> usize {
    80
}
fn default_frame_length_ms() -> u32 {
    25
}
fn default_frame_shift_ms() -> u32 {
    10
}

impl Default for FrontendSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            num_bins: default_num_bins(),
            frame_length_ms: default_frame_length_ms(),
            frame_shift_ms: default_frame_shift_ms(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (`ASR_SERVER` prefix, `__` separator)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder
            .add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("ASR_SERVER")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 10086);
        assert_eq!(settings.decode.beam_size, 10);
        assert_eq!(settings.frontend.num_bins, 80);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_weights() {
        let mut settings = Settings::default();
        settings.decode.ctc_weight = 1.5;
        assert!(settings.validate().is_err());

        settings.decode.ctc_weight = 0.3;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_beam() {
        let mut settings = Settings::default();
        settings.decode.beam_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_missing_paths() {
        let mut settings = Settings::default();
        settings.model.model_path.clear();
        assert!(settings.validate().is_err());
    }
}
