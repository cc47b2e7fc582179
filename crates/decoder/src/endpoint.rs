//! Endpoint detection over the beam search state
//!
//! An endpoint is declared once the top prefix has emitted at least one
//! token and either enough consecutive trailing blank frames have passed,
//! or too much wall time has elapsed since the last emission. Evaluated
//! after every decoded chunk.

use serde::{Deserialize, Serialize};

use crate::search::CtcPrefixBeamSearch;

/// Endpoint rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Trailing blank frames (CTC frames) after the last emission
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

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            trailing_silence_frames: default_trailing_silence_frames(),
            max_silence_after_speech_ms: default_max_silence_after_speech_ms(),
        }
    }
}

impl EndpointConfig {
    /// Evaluate the endpoint rules; `frame_ms` is the duration of one CTC
    /// frame (frame shift × subsampling)
    pub fn detect(&self, search: &CtcPrefixBeamSearch, frame_ms: u64) -> bool {
        let Some(last_emission) = search.last_emission_frame() else {
            return false;
        };
        let trailing = search.time_step().saturating_sub(last_emission + 1);

        trailing >= self.trailing_silence_frames
            || trailing as u64 * frame_ms >= self.max_silence_after_speech_ms
    }
}
