//! Configuration for the ASR runtime
//!
//! Settings are layered: `config/default.yaml`, then environment variables
//! with the `ASR_SERVER` prefix, then CLI flags applied by the server
//! binary.

pub mod settings;

pub use settings::{
    load_settings, DecodeSettings, EndpointSettings, FrontendSettings, ModelSettings,
    ObservabilitySettings, ServerSettings, Settings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
