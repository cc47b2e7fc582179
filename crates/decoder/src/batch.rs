//! Batched (non-streaming) recognition
//!
//! Pads a batch of utterances, runs one batched encoder forward, searches
//! each utterance's CTC slice independently, and rescores the whole
//! (batch × beam) hypothesis set with a single attention-decoder call.

use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Axis};

use asr_core::{Hypothesis, SymbolTable, WordPiece};
use asr_model::AsrModel;

use crate::context::ContextGraph;
use crate::rescoring;
use crate::search::{CtcPrefixBeamSearch, SearchHyp};
use crate::streaming::DecodeOptions;
use crate::DecoderError;

/// Multi-utterance recognizer sharing the session-wide model and context
pub struct BatchRecognizer {
    model: Arc<dyn AsrModel>,
    symbols: Arc<SymbolTable>,
    context: Option<Arc<ContextGraph>>,
    opts: DecodeOptions,
    /// Feature frame shift in milliseconds (for word timing)
    frame_shift_ms: u32,
}

impl BatchRecognizer {
    pub fn new(
        model: Arc<dyn AsrModel>,
        symbols: Arc<SymbolTable>,
        context: Option<Arc<ContextGraph>>,
        opts: DecodeOptions,
        frame_shift_ms: u32,
    ) -> Self {
        Self {
            model,
            symbols,
            context,
            opts,
            frame_shift_ms,
        }
    }

    /// Decode a batch of utterances given as (T, D) feature matrices
    ///
    /// Returns one N-best list per utterance, in input order.
    pub fn recognize(&self, utterances: &[Array2<f32>]) -> Result<Vec<Vec<Hypothesis>>, DecoderError> {
        if utterances.is_empty() {
            return Ok(Vec::new());
        }
        let dim = self.model.metadata().feature_dim;
        for (i, utt) in utterances.iter().enumerate() {
            if utt.ncols() != dim {
                return Err(DecoderError::InvalidInput(format!(
                    "utterance {} has feature dim {}, expected {}",
                    i,
                    utt.ncols(),
                    dim
                )));
            }
        }

        let batch_size = utterances.len();
        let t_max = utterances.iter().map(|u| u.nrows()).max().unwrap_or(0);

        let mut feats = Array3::zeros((batch_size, t_max, dim));
        let mut lens = Array1::zeros(batch_size);
        for (b, utt) in utterances.iter().enumerate() {
            feats
                .slice_mut(ndarray::s![b, ..utt.nrows(), ..])
                .assign(utt);
            lens[b] = utt.nrows() as i64;
        }

        let out = self.model.batch_forward_encoder(feats.view(), lens.view())?;

        // Per-utterance CTC search over its valid slice.
        let mut per_utt: Vec<Vec<SearchHyp>> = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let valid = out.encoder_lens[b] as usize;
            let logp = out.ctc_logp.slice(ndarray::s![b, ..valid, ..]);

            let mut search =
                CtcPrefixBeamSearch::new(self.opts.search.clone(), self.context.clone());
            search.search(logp);
            per_utt.push(search.nbest(self.opts.nbest.max(1)));
        }

        let fused = self.rescore_batch(&out.encoder_out, &out.encoder_lens, &per_utt)?;

        let frame_ms =
            self.frame_shift_ms as u64 * self.model.metadata().subsampling_rate as u64;
        Ok(per_utt
            .into_iter()
            .zip(fused)
            .map(|(hyps, scores)| {
                let mut scored: Vec<(SearchHyp, f32)> = hyps.into_iter().zip(scores).collect();
                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                scored
                    .into_iter()
                    .map(|(hyp, score)| self.build_hypothesis(hyp, score, frame_ms))
                    .collect()
            })
            .collect())
    }

    /// One attention-decoder call over the concatenated hypothesis set;
    /// returns fused scores grouped back per utterance
    fn rescore_batch(
        &self,
        encoder_out: &Array3<f32>,
        encoder_lens: &Array1<i64>,
        per_utt: &[Vec<SearchHyp>],
    ) -> Result<Vec<Vec<f32>>, DecoderError> {
        let rescore = self.opts.ctc_weight < 1.0
            && self.model.has_attention_decoder()
            && per_utt
                .iter()
                .flatten()
                .any(|h| !h.tokens.is_empty());
        if !rescore {
            return Ok(per_utt
                .iter()
                .map(|hyps| hyps.iter().map(|h| h.score).collect())
                .collect());
        }

        let meta = self.model.metadata();
        let all_tokens: Vec<Vec<i32>> = per_utt
            .iter()
            .flat_map(|hyps| hyps.iter().map(|h| h.tokens.clone()))
            .collect();

        let (hyps_pad, hyps_lens) =
            rescoring::pad_hypotheses(&all_tokens, meta.sos_id, meta.eos_id);

        // One block of encoder context per hypothesis, zero padded past
        // each utterance's valid length.
        let hidden = encoder_out.shape()[2];
        let t_max = encoder_out.shape()[1];
        let mut encoder_rep = Array3::zeros((all_tokens.len(), t_max, hidden));
        let mut row = 0;
        for (b, hyps) in per_utt.iter().enumerate() {
            let valid = encoder_lens[b] as usize;
            let block = encoder_out.index_axis(Axis(0), b);
            for _ in hyps {
                encoder_rep
                    .slice_mut(ndarray::s![row, ..valid, ..])
                    .assign(&block.slice(ndarray::s![..valid, ..]));
                row += 1;
            }
        }

        let decoder_out = self.model.forward_attention_decoder(
            hyps_pad.view(),
            hyps_lens.view(),
            encoder_rep.view(),
            self.opts.reverse_weight,
        )?;
        let attention = rescoring::scores_from_output(
            &decoder_out,
            &all_tokens,
            meta.eos_id,
            self.opts.reverse_weight,
        );

        // Regroup and fuse.
        let mut fused = Vec::with_capacity(per_utt.len());
        let mut idx = 0;
        for hyps in per_utt {
            let scores = hyps
                .iter()
                .map(|hyp| {
                    let score =
                        rescoring::fuse_scores(self.opts.ctc_weight, hyp.score, attention[idx]);
                    idx += 1;
                    score
                })
                .collect();
            fused.push(scores);
        }
        Ok(fused)
    }

    fn build_hypothesis(&self, hyp: SearchHyp, score: f32, frame_ms: u64) -> Hypothesis {
        let sentence = self.symbols.decode(&hyp.tokens);
        let mut out = Hypothesis::new(hyp.tokens.clone(), score, sentence);
        if self.opts.timestamp {
            let pieces = hyp
                .tokens
                .iter()
                .enumerate()
                .filter_map(|(i, &token)| {
                    let word = self.symbols.token(token)?;
                    let start = hyp.times[i] as u64 * frame_ms;
                    let end = match hyp.times.get(i + 1) {
                        Some(&next) => next as u64 * frame_ms,
                        None => start + frame_ms,
                    };
                    Some(WordPiece::new(word, start, end))
                })
                .collect();
            out = out.with_word_pieces(pieces);
        }
        out
    }
}
