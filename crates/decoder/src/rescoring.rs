//! Attention rescoring of CTC N-best hypotheses
//!
//! Hypotheses are sos-prepended, padded to a common length and scored by
//! the attention decoder left-to-right, and right-to-left when the model
//! is bidirectional. The two directions are fused by `reverse_weight`; the
//! caller fuses the result with the CTC composite score via `ctc_weight`.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};

use asr_model::{AsrModel, AttentionDecoderOut};

use crate::DecoderError;

/// Score N-best hypotheses against one utterance's encoder output (T', H)
///
/// Returns one combined attention score per hypothesis.
pub fn attention_rescore(
    model: &dyn AsrModel,
    hyps: &[Vec<i32>],
    encoder_out: ArrayView2<f32>,
    reverse_weight: f32,
) -> Result<Vec<f32>, DecoderError> {
    if hyps.is_empty() {
        return Ok(Vec::new());
    }
    let meta = model.metadata();

    let (hyps_pad, hyps_lens) = pad_hypotheses(hyps, meta.sos_id, meta.eos_id);

    // One row of encoder context per hypothesis.
    let (t, h) = encoder_out.dim();
    let encoder_rep = encoder_out
        .insert_axis(Axis(0))
        .broadcast((hyps.len(), t, h))
        .ok_or_else(|| DecoderError::InvalidInput("encoder output broadcast failed".to_string()))?
        .to_owned();

    let out = model.forward_attention_decoder(
        hyps_pad.view(),
        hyps_lens.view(),
        encoder_rep.view(),
        reverse_weight,
    )?;

    Ok(scores_from_output(&out, hyps, meta.eos_id, reverse_weight))
}

/// Build the (N, max_len) sos-prefixed hypothesis tensor and its lengths
pub(crate) fn pad_hypotheses(
    hyps: &[Vec<i32>],
    sos_id: i64,
    eos_id: i64,
) -> (Array2<i64>, Array1<i64>) {
    let max_len = hyps.iter().map(|h| h.len()).max().unwrap_or(0) + 1;
    let mut hyps_pad = Array2::from_elem((hyps.len(), max_len), eos_id);
    let mut hyps_lens = Array1::zeros(hyps.len());

    for (i, hyp) in hyps.iter().enumerate() {
        hyps_pad[[i, 0]] = sos_id;
        for (j, &token) in hyp.iter().enumerate() {
            hyps_pad[[i, j + 1]] = token as i64;
        }
        hyps_lens[i] = hyp.len() as i64 + 1;
    }

    (hyps_pad, hyps_lens)
}

/// Fold decoder log probabilities into per-hypothesis attention scores
pub(crate) fn scores_from_output(
    out: &AttentionDecoderOut,
    hyps: &[Vec<i32>],
    eos_id: i64,
    reverse_weight: f32,
) -> Vec<f32> {
    hyps.iter()
        .enumerate()
        .map(|(i, hyp)| {
            let score = directional_score(&out.l2r, i, hyp, eos_id);
            match (&out.r2l, reverse_weight > 0.0) {
                (Some(r2l), true) => {
                    let reversed: Vec<i32> = hyp.iter().rev().copied().collect();
                    let r_score = directional_score(r2l, i, &reversed, eos_id);
                    score * (1.0 - reverse_weight) + r_score * reverse_weight
                }
                _ => score,
            }
        })
        .collect()
}

/// Sum log probabilities of the hypothesis tokens followed by eos
fn directional_score(logp: &Array3<f32>, row: usize, hyp: &[i32], eos_id: i64) -> f32 {
    let mut score = 0.0;
    for (j, &token) in hyp.iter().enumerate() {
        score += logp[[row, j, token as usize]];
    }
    score + logp[[row, hyp.len(), eos_id as usize]]
}

/// Fuse a CTC composite score with a combined attention score
pub fn fuse_scores(ctc_weight: f32, ctc_score: f32, attention_score: f32) -> f32 {
    ctc_weight * ctc_score + (1.0 - ctc_weight) * attention_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use asr_model::mock::MockAsrModel;
    use ndarray::Array2;

    #[test]
    fn test_pad_hypotheses_shapes() {
        let hyps = vec![vec![3, 4], vec![5]];
        let (pad, lens) = pad_hypotheses(&hyps, 10, 11);
        assert_eq!(pad.dim(), (2, 3));
        assert_eq!(pad[[0, 0]], 10);
        assert_eq!(pad[[0, 1]], 3);
        assert_eq!(pad[[1, 1]], 5);
        assert_eq!(pad[[1, 2]], 11); // padded with eos
        assert_eq!(lens[0], 3);
        assert_eq!(lens[1], 2);
    }

    #[test]
    fn test_mock_scores_prefer_small_token_ids() {
        // Mock scores token v as -0.01 * v at every position, so the
        // hypothesis with smaller ids must win.
        let model = MockAsrModel::new(16);
        let encoder_out = Array2::zeros((4, 16));
        let hyps = vec![vec![1, 1], vec![9, 9]];

        let scores =
            attention_rescore(&model, &hyps, encoder_out.view(), 0.0).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);

        let eos = model.metadata().eos_id as f32;
        let expected = -0.01 * (1.0 + 1.0 + eos);
        assert!((scores[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_reverse_weight_zero_is_idempotent() {
        let model = MockAsrModel::new(8);
        let encoder_out = Array2::zeros((3, 8));
        let hyps = vec![vec![2, 3], vec![4]];

        let a = attention_rescore(&model, &hyps, encoder_out.view(), 0.0).unwrap();
        let b = attention_rescore(&model, &hyps, encoder_out.view(), 0.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reverse_fusion() {
        // Mock emits identical L2R/R2L tables, so fusion must not change
        // the score for a palindromic hypothesis.
        let model = MockAsrModel::new(8);
        let encoder_out = Array2::zeros((3, 8));
        let hyps = vec![vec![2, 3, 2]];

        let plain = attention_rescore(&model, &hyps, encoder_out.view(), 0.0).unwrap();
        let fused = attention_rescore(&model, &hyps, encoder_out.view(), 0.5).unwrap();
        assert!((plain[0] - fused[0]).abs() < 1e-6);
    }

    #[test]
    fn test_fuse_scores() {
        assert_eq!(fuse_scores(1.0, -2.0, -10.0), -2.0);
        assert_eq!(fuse_scores(0.0, -2.0, -10.0), -10.0);
        assert!((fuse_scores(0.5, -2.0, -10.0) + 6.0).abs() < 1e-6);
    }
}
