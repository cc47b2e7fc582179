//! Decoding engine: CTC prefix beam search, contextual biasing, streaming
//! decode orchestration, attention rescoring, and batch recognition.

pub mod batch;
pub mod context;
pub mod endpoint;
pub mod rescoring;
pub mod search;
pub mod streaming;

pub use batch::BatchRecognizer;
pub use context::ContextGraph;
pub use endpoint::EndpointConfig;
pub use search::{CtcPrefixBeamSearch, CtcSearchConfig, SearchHyp};
pub use streaming::{ChunkOutcome, DecodeOptions, DecodeState, StreamingDecoder};

use thiserror::Error;

/// Decoding errors
#[derive(Error, Debug)]
pub enum DecoderError {
    #[error(transparent)]
    Model(#[from] asr_model::ModelError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
