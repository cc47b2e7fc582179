//! Deterministic in-memory executor for decoder and server tests
//!
//! The mock treats input features as ready-made CTC log probabilities:
//! the encoder is the identity (subsampling 1, no right context) and the
//! CTC head passes rows through unchanged. The attention decoder scores
//! token `v` as `-0.01 * v` at every position, which makes rescoring
//! outcomes easy to compute by hand.

use ndarray::{Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3, IxDyn};

use crate::{
    AsrModel, AttentionDecoderOut, BatchEncoderOut, EncoderCache, ModelError, ModelMetadata,
};

pub struct MockAsrModel {
    metadata: ModelMetadata,
}

impl MockAsrModel {
    /// Mock over a vocabulary of `vocab_size` units (blank at id 0)
    pub fn new(vocab_size: usize) -> Self {
        Self {
            metadata: ModelMetadata {
                subsampling_rate: 1,
                right_context: 0,
                sos_id: vocab_size as i64 - 2,
                eos_id: vocab_size as i64 - 1,
                is_bidirectional_decoder: true,
                feature_dim: vocab_size,
                vocab_size,
            },
        }
    }

    fn attention_logp(&self, n: usize, l: usize) -> Array3<f32> {
        let v = self.metadata.vocab_size;
        Array3::from_shape_fn((n, l, v), |(_, _, token)| -0.01 * token as f32)
    }
}

impl AsrModel for MockAsrModel {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn new_cache(&self) -> EncoderCache {
        EncoderCache {
            att_cache: ArrayD::zeros(IxDyn(&[0])),
            cnn_cache: ArrayD::zeros(IxDyn(&[0])),
        }
    }

    fn forward_encoder_chunk(
        &self,
        chunk_feats: ArrayView2<f32>,
        _offset: usize,
        _cache: &mut EncoderCache,
    ) -> Result<Array2<f32>, ModelError> {
        Ok(chunk_feats.to_owned())
    }

    fn ctc_activation(&self, encoder_out: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        Ok(encoder_out.to_owned())
    }

    fn forward_attention_decoder(
        &self,
        hyps_pad: ArrayView2<i64>,
        hyps_lens: ArrayView1<i64>,
        _encoder_out: ArrayView3<f32>,
        reverse_weight: f32,
    ) -> Result<AttentionDecoderOut, ModelError> {
        let n = hyps_pad.nrows();
        let l = hyps_pad.ncols();
        if hyps_lens.len() != n {
            return Err(ModelError::Inference(format!(
                "hyps_lens length {} does not match batch {}",
                hyps_lens.len(),
                n
            )));
        }

        let l2r = self.attention_logp(n, l);
        let r2l = (reverse_weight > 0.0).then(|| self.attention_logp(n, l));
        Ok(AttentionDecoderOut { l2r, r2l })
    }

    fn batch_forward_encoder(
        &self,
        feats: ArrayView3<f32>,
        feats_lens: ArrayView1<i64>,
    ) -> Result<BatchEncoderOut, ModelError> {
        Ok(BatchEncoderOut {
            encoder_out: feats.to_owned(),
            encoder_lens: feats_lens.to_owned(),
            ctc_logp: feats.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_identity_encoder() {
        let model = MockAsrModel::new(4);
        let feats = arr2(&[[0.1f32, 0.2, 0.3, 0.4], [0.5, 0.6, 0.7, 0.8]]);
        let mut cache = model.new_cache();
        let out = model
            .forward_encoder_chunk(feats.view(), 0, &mut cache)
            .unwrap();
        assert_eq!(out, feats);
    }

    #[test]
    fn test_attention_scores_by_token_id() {
        let model = MockAsrModel::new(4);
        let hyps = arr2(&[[2i64, 1, 3]]);
        let lens = arr1(&[3i64]);
        let enc = Array3::zeros((1, 2, 4));
        let out = model
            .forward_attention_decoder(hyps.view(), lens.view(), enc.view(), 0.0)
            .unwrap();
        assert!(out.r2l.is_none());
        assert_eq!(out.l2r[[0, 0, 2]], -0.02);
        assert_eq!(out.l2r[[0, 2, 1]], -0.01);
    }
}
