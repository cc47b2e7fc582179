//! Model executor: the five inference entry points over a loaded
//! acoustic model
//!
//! Concrete backends implement [`AsrModel`]; the ONNX Runtime adapter is
//! behind the default `onnx` feature, and a deterministic mock for decoder
//! and server tests is behind the `mock` feature. A single executor is
//! shared read-only across sessions; per-session state (encoder caches)
//! is owned by the caller and passed in on each chunk call.

use ndarray::{Array1, Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3};
use serde::Deserialize;
use thiserror::Error;

#[cfg(feature = "mock")]
pub mod mock;
#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxAsrModel;

/// Model executor errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model load error: {0}")]
    Load(String),

    #[error("model metadata error: {0}")]
    Metadata(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable model metadata probed at load time
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    /// Encoder subsampling factor (input frames per output frame)
    pub subsampling_rate: usize,
    /// Future feature frames required before a frame can be encoded
    pub right_context: usize,
    /// Start-of-sentence id for the attention decoder
    pub sos_id: i64,
    /// End-of-sentence id for the attention decoder
    pub eos_id: i64,
    /// Whether a right-to-left decoder is available
    pub is_bidirectional_decoder: bool,
    /// Input feature dimension
    pub feature_dim: usize,
    /// Output vocabulary size (includes blank at id 0)
    pub vocab_size: usize,
}

/// Per-session encoder state, owned by the streaming decoder
///
/// The executor never retains these between calls; shapes are backend
/// specific and opaque to the caller.
#[derive(Debug, Clone)]
pub struct EncoderCache {
    pub att_cache: ArrayD<f32>,
    pub cnn_cache: ArrayD<f32>,
}

/// Output of the attention decoder forward pass
#[derive(Debug)]
pub struct AttentionDecoderOut {
    /// Left-to-right log probabilities, shape (N, L, V)
    pub l2r: Array3<f32>,
    /// Right-to-left log probabilities when the decoder is bidirectional
    pub r2l: Option<Array3<f32>>,
}

/// Output of the batched encoder forward pass
#[derive(Debug)]
pub struct BatchEncoderOut {
    /// Encoder output, shape (B, T', H), zero padded past each length
    pub encoder_out: Array3<f32>,
    /// Valid encoder frames per utterance
    pub encoder_lens: Array1<i64>,
    /// CTC log probabilities, shape (B, T', V)
    pub ctc_logp: Array3<f32>,
}

/// The five inference entry points of the acoustic model
///
/// All operations are pure with respect to their inputs; implementations
/// must be callable concurrently from many sessions.
pub trait AsrModel: Send + Sync {
    /// Model metadata probed at load time
    fn metadata(&self) -> &ModelMetadata;

    /// Whether attention rescoring is available
    fn has_attention_decoder(&self) -> bool {
        true
    }

    /// Fresh per-session encoder cache
    fn new_cache(&self) -> EncoderCache;

    /// Encode one feature chunk, consuming and updating the caller's cache
    ///
    /// `chunk_feats` is (T, D); `offset` counts encoder output frames
    /// already produced for this utterance. Returns (T', H).
    fn forward_encoder_chunk(
        &self,
        chunk_feats: ArrayView2<f32>,
        offset: usize,
        cache: &mut EncoderCache,
    ) -> Result<Array2<f32>, ModelError>;

    /// CTC log probabilities for encoder output, (T', H) -> (T', V)
    ///
    /// Output rows carry log-softmax semantics.
    fn ctc_activation(&self, encoder_out: ArrayView2<f32>) -> Result<Array2<f32>, ModelError>;

    /// Score padded hypotheses with the attention decoder
    ///
    /// `hyps_pad` is (N, L) with sos prepended; `encoder_out` is (N, T', H)
    /// with one row of encoder context per hypothesis.
    fn forward_attention_decoder(
        &self,
        hyps_pad: ArrayView2<i64>,
        hyps_lens: ArrayView1<i64>,
        encoder_out: ArrayView3<f32>,
        reverse_weight: f32,
    ) -> Result<AttentionDecoderOut, ModelError>;

    /// Batched whole-utterance encoder forward
    ///
    /// `feats` is (B, T, D) zero padded; `feats_lens` holds true frame
    /// counts.
    fn batch_forward_encoder(
        &self,
        feats: ArrayView3<f32>,
        feats_lens: ArrayView1<i64>,
    ) -> Result<BatchEncoderOut, ModelError>;
}
