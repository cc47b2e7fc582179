//! Streaming decoder: drives the feature pipeline, chunked encoder
//! forward, CTC beam search, endpoint detection, and final rescoring for
//! one session.
//!
//! The decode loop is an explicit state machine; cancellation is observed
//! at every chunk boundary and wait wake-up. The utterance's encoder
//! output is accumulated here and released once rescoring completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;

use asr_core::{Hypothesis, SymbolTable, WordPiece};
use asr_frontend::FeaturePipeline;
use asr_model::{AsrModel, EncoderCache};

use crate::context::ContextGraph;
use crate::endpoint::EndpointConfig;
use crate::rescoring;
use crate::search::{CtcPrefixBeamSearch, CtcSearchConfig, SearchHyp};
use crate::DecoderError;

/// Decode loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Waiting for enough feature frames
    WaitingFeatures,
    /// Chunk decoded, utterance still open
    Decoding,
    /// Endpoint detected or input drained; finalize the utterance
    EndpointReached,
    /// Cancelled; unwind without emitting
    Terminated,
}

/// Per-session decoding configuration
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Encoder chunk size in subsampled frames
    pub chunk_size: usize,
    /// N-best hypotheses to emit
    pub nbest: usize,
    /// Attach word-piece timing to final results
    pub timestamp: bool,
    /// CTC weight in the final score fusion
    pub ctc_weight: f32,
    /// Right-to-left decoder weight in attention rescoring
    pub reverse_weight: f32,
    pub search: CtcSearchConfig,
    pub endpoint: EndpointConfig,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            nbest: 1,
            timestamp: false,
            ctc_weight: 0.5,
            reverse_weight: 0.0,
            search: CtcSearchConfig::default(),
            endpoint: EndpointConfig::default(),
        }
    }
}

/// Result of one chunk advance
#[derive(Debug)]
pub struct ChunkOutcome {
    pub state: DecodeState,
    /// Partial sentence when it changed this chunk
    pub partial: Option<String>,
}

/// Streaming decoder for one session
pub struct StreamingDecoder {
    model: Arc<dyn AsrModel>,
    symbols: Arc<SymbolTable>,
    pipeline: Arc<FeaturePipeline>,
    search: CtcPrefixBeamSearch,
    opts: DecodeOptions,
    cache: EncoderCache,
    /// Encoder output frames already produced for this utterance
    offset: usize,
    /// Retained per-utterance encoder output, released after rescoring
    encoder_outs: Vec<Array2<f32>>,
    /// Trailing right-context frames carried into the next window
    cached_feats: Vec<Vec<f32>>,
    state: DecodeState,
    stop: Arc<AtomicBool>,
    last_partial: String,
    /// Duration of one CTC frame in milliseconds
    frame_ms: u64,
}

impl StreamingDecoder {
    pub fn new(
        model: Arc<dyn AsrModel>,
        symbols: Arc<SymbolTable>,
        pipeline: Arc<FeaturePipeline>,
        context: Option<Arc<ContextGraph>>,
        opts: DecodeOptions,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let meta = model.metadata();
        let frame_ms = pipeline.frame_shift_ms() as u64 * meta.subsampling_rate as u64;
        let cache = model.new_cache();
        let search = CtcPrefixBeamSearch::new(opts.search.clone(), context);

        Self {
            model,
            symbols,
            pipeline,
            search,
            opts,
            cache,
            offset: 0,
            encoder_outs: Vec::new(),
            cached_feats: Vec::new(),
            state: DecodeState::WaitingFeatures,
            stop,
            last_partial: String::new(),
            frame_ms,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Read one chunk of features, run the model and the beam search, and
    /// evaluate the endpoint rules
    ///
    /// Blocks in the feature pipeline until the chunk is available or
    /// input is finished.
    pub fn advance(&mut self) -> Result<ChunkOutcome, DecoderError> {
        if self.cancelled() {
            return Ok(self.outcome(None));
        }

        let meta = self.model.metadata();
        let subsampling = meta.subsampling_rate;
        let right_context = meta.right_context;

        let chunk_frames = self.opts.chunk_size * subsampling;
        let first_chunk = self.offset == 0 && self.cached_feats.is_empty();
        let needed = if first_chunk {
            chunk_frames + right_context
        } else {
            chunk_frames
        };

        let (new_frames, more_input) = self.pipeline.read(needed);
        if self.cancelled() {
            return Ok(self.outcome(None));
        }
        self.state = DecodeState::Decoding;

        let mut feats = std::mem::take(&mut self.cached_feats);
        feats.extend(new_frames);

        if !feats.is_empty() {
            self.forward_chunk(&feats)?;

            // Keep the lookahead region; it is context for the next window.
            if more_input && right_context > 0 && feats.len() > right_context {
                self.cached_feats = feats[feats.len() - right_context..].to_vec();
            }
        }

        if !more_input || self.opts.endpoint.detect(&self.search, self.frame_ms) {
            self.state = DecodeState::EndpointReached;
        }

        let partial = if self.state == DecodeState::Decoding {
            self.changed_partial()
        } else {
            None
        };
        Ok(self.outcome(partial))
    }

    fn forward_chunk(&mut self, feats: &[Vec<f32>]) -> Result<(), DecoderError> {
        let dim = self.pipeline.feature_dim();
        let mut chunk = Array2::zeros((feats.len(), dim));
        for (i, frame) in feats.iter().enumerate() {
            for (j, &v) in frame.iter().enumerate() {
                chunk[[i, j]] = v;
            }
        }

        let encoder_out = self
            .model
            .forward_encoder_chunk(chunk.view(), self.offset, &mut self.cache)?;
        if encoder_out.nrows() == 0 {
            return Ok(());
        }

        let logp = self.model.ctc_activation(encoder_out.view())?;
        self.search.search(logp.view());

        self.offset += encoder_out.nrows();
        self.encoder_outs.push(encoder_out);

        tracing::trace!(
            offset = self.offset,
            frames = self.search.time_step(),
            "decoded chunk"
        );
        Ok(())
    }

    fn changed_partial(&mut self) -> Option<String> {
        if self.search.top_is_empty() {
            return None;
        }
        let text = self.symbols.decode(self.search.top_tokens());
        if text.is_empty() || text == self.last_partial {
            return None;
        }
        self.last_partial = text.clone();
        Some(text)
    }

    fn cancelled(&mut self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            self.state = DecodeState::Terminated;
            true
        } else {
            false
        }
    }

    fn outcome(&self, partial: Option<String>) -> ChunkOutcome {
        ChunkOutcome {
            state: self.state,
            partial,
        }
    }

    /// Rescore the N-best and produce the final hypotheses, releasing the
    /// utterance's encoder output
    pub fn finalize_utterance(&mut self) -> Result<Vec<Hypothesis>, DecoderError> {
        let nbest = self.search.nbest(self.opts.nbest.max(1));

        let rescore = self.opts.ctc_weight < 1.0
            && self.model.has_attention_decoder()
            && !self.encoder_outs.is_empty()
            && nbest.iter().any(|h| !h.tokens.is_empty());

        let mut scored: Vec<(SearchHyp, f32)> = if rescore {
            let encoder_out = concat_rows(&self.encoder_outs);
            let tokens: Vec<Vec<i32>> = nbest.iter().map(|h| h.tokens.clone()).collect();
            let attention = rescoring::attention_rescore(
                self.model.as_ref(),
                &tokens,
                encoder_out.view(),
                self.opts.reverse_weight,
            )?;
            nbest
                .into_iter()
                .zip(attention)
                .map(|(hyp, att)| {
                    let fused = rescoring::fuse_scores(self.opts.ctc_weight, hyp.score, att);
                    (hyp, fused)
                })
                .collect()
        } else {
            nbest.into_iter().map(|hyp| {
                let score = hyp.score;
                (hyp, score)
            }).collect()
        };

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        self.encoder_outs.clear();

        Ok(scored
            .into_iter()
            .map(|(hyp, score)| self.build_hypothesis(hyp, score))
            .collect())
    }

    fn build_hypothesis(&self, hyp: SearchHyp, score: f32) -> Hypothesis {
        let sentence = self.symbols.decode(&hyp.tokens);
        let mut out = Hypothesis::new(hyp.tokens.clone(), score, sentence);
        if self.opts.timestamp {
            out = out.with_word_pieces(self.word_pieces(&hyp));
        }
        out
    }

    fn word_pieces(&self, hyp: &SearchHyp) -> Vec<WordPiece> {
        let mut pieces = Vec::with_capacity(hyp.tokens.len());
        for (i, &token) in hyp.tokens.iter().enumerate() {
            let Some(word) = self.symbols.token(token) else {
                continue;
            };
            let start = hyp.times[i] as u64 * self.frame_ms;
            let end = match hyp.times.get(i + 1) {
                Some(&next) => next as u64 * self.frame_ms,
                None => start + self.frame_ms,
            };
            pieces.push(WordPiece::new(word, start, end));
        }
        pieces
    }

    /// Rearm for the next utterance in continuous mode
    pub fn reset_utterance(&mut self) {
        self.search.reset();
        self.cache = self.model.new_cache();
        self.offset = 0;
        self.encoder_outs.clear();
        self.cached_feats.clear();
        self.last_partial.clear();
        self.pipeline.reset();
        self.state = DecodeState::WaitingFeatures;
    }
}

/// Stack per-chunk encoder outputs into one (T', H) matrix
fn concat_rows(chunks: &[Array2<f32>]) -> Array2<f32> {
    let total: usize = chunks.iter().map(|c| c.nrows()).sum();
    let cols = chunks.first().map(|c| c.ncols()).unwrap_or(0);
    let mut out = Array2::zeros((total, cols));
    let mut row = 0;
    for chunk in chunks {
        out.slice_mut(ndarray::s![row..row + chunk.nrows(), ..])
            .assign(chunk);
        row += chunk.nrows();
    }
    out
}
