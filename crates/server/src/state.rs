//! Application state
//!
//! Shared read-only resources: configuration, the model executor, the unit
//! dictionary, the compiled context graph, and the session registry.

use std::sync::Arc;

use asr_config::Settings;
use asr_core::SymbolTable;
use asr_decoder::{ContextGraph, CtcSearchConfig, DecodeOptions, EndpointConfig};
use asr_frontend::FbankConfig;
use asr_model::AsrModel;

use crate::session::SessionManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub model: Arc<dyn AsrModel>,
    pub symbols: Arc<SymbolTable>,
    pub context: Option<Arc<ContextGraph>>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(
        config: Settings,
        model: Arc<dyn AsrModel>,
        symbols: Arc<SymbolTable>,
        context: Option<Arc<ContextGraph>>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(config.server.max_sessions));
        Self {
            config: Arc::new(config),
            model,
            symbols,
            context,
            sessions,
        }
    }

    /// Frontend configuration for a new session
    pub fn fbank_config(&self) -> FbankConfig {
        let f = &self.config.frontend;
        FbankConfig {
            sample_rate: f.sample_rate,
            num_bins: f.num_bins,
            frame_length_ms: f.frame_length_ms,
            frame_shift_ms: f.frame_shift_ms,
        }
    }

    /// Decode options for a new session; `nbest` comes from the start
    /// signal
    pub fn decode_options(&self, nbest: usize) -> DecodeOptions {
        let d = &self.config.decode;
        DecodeOptions {
            chunk_size: d.chunk_size,
            nbest,
            timestamp: d.timestamp,
            ctc_weight: d.ctc_weight,
            reverse_weight: d.reverse_weight,
            search: CtcSearchConfig {
                beam_size: d.beam_size,
                first_beam_size: d.first_beam_size,
                blank_id: 0,
                blank_skip_threshold: d.blank_skip_threshold,
            },
            endpoint: EndpointConfig {
                trailing_silence_frames: d.endpoint.trailing_silence_frames,
                max_silence_after_speech_ms: d.endpoint.max_silence_after_speech_ms,
            },
        }
    }
}
