//! ONNX Runtime adapter for the model executor
//!
//! Expected model package layout:
//! - `encoder.onnx`  — streaming chunk encoder with attention/conv caches
//! - `ctc.onnx`      — CTC activation head (log-softmax output)
//! - `decoder.onnx`  — attention decoder (optional; rescoring disabled
//!   when absent)
//! - `meta.json`     — model metadata and cache tensor shapes

use std::path::Path;

use ndarray::{Array1, Array2, Array3, ArrayD, ArrayView1, ArrayView2, ArrayView3, Axis, IxDyn};
use parking_lot::Mutex;
use serde::Deserialize;

use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};

use crate::{
    AsrModel, AttentionDecoderOut, BatchEncoderOut, EncoderCache, ModelError, ModelMetadata,
};

/// Metadata file contents
#[derive(Debug, Clone, Deserialize)]
struct PackageMeta {
    #[serde(flatten)]
    metadata: ModelMetadata,
    att_cache_shape: Vec<usize>,
    cnn_cache_shape: Vec<usize>,
}

/// ONNX Runtime backed model executor
///
/// Sessions are guarded by mutexes; the executor itself is shared
/// read-only across sessions.
pub struct OnnxAsrModel {
    metadata: ModelMetadata,
    att_cache_shape: Vec<usize>,
    cnn_cache_shape: Vec<usize>,
    encoder: Mutex<Session>,
    ctc: Mutex<Session>,
    decoder: Option<Mutex<Session>>,
}

impl OnnxAsrModel {
    /// Load a model package from a directory
    pub fn load(model_dir: impl AsRef<Path>, num_threads: usize) -> Result<Self, ModelError> {
        let model_dir = model_dir.as_ref();

        let meta_path = model_dir.join("meta.json");
        let meta_content = std::fs::read_to_string(&meta_path).map_err(|e| {
            ModelError::Load(format!("failed to read {}: {}", meta_path.display(), e))
        })?;
        let package: PackageMeta = serde_json::from_str(&meta_content)
            .map_err(|e| ModelError::Metadata(format!("invalid meta.json: {}", e)))?;

        let encoder = Self::load_session(&model_dir.join("encoder.onnx"), num_threads)?;
        let ctc = Self::load_session(&model_dir.join("ctc.onnx"), num_threads)?;

        let decoder_path = model_dir.join("decoder.onnx");
        let decoder = if decoder_path.exists() {
            Some(Mutex::new(Self::load_session(&decoder_path, num_threads)?))
        } else {
            tracing::warn!(
                model_dir = %model_dir.display(),
                "no decoder.onnx found, attention rescoring disabled"
            );
            None
        };

        tracing::info!(
            subsampling_rate = package.metadata.subsampling_rate,
            right_context = package.metadata.right_context,
            sos = package.metadata.sos_id,
            eos = package.metadata.eos_id,
            bidirectional = package.metadata.is_bidirectional_decoder,
            vocab_size = package.metadata.vocab_size,
            "loaded ONNX model package"
        );

        Ok(Self {
            metadata: package.metadata,
            att_cache_shape: package.att_cache_shape,
            cnn_cache_shape: package.cnn_cache_shape,
            encoder: Mutex::new(encoder),
            ctc: Mutex::new(ctc),
            decoder,
        })
    }

    fn load_session(path: &Path, num_threads: usize) -> Result<Session, ModelError> {
        Session::builder()
            .map_err(|e| ModelError::Load(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelError::Load(e.to_string()))?
            .with_intra_threads(num_threads)
            .map_err(|e| ModelError::Load(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| ModelError::Load(format!("failed to load {}: {}", path.display(), e)))
    }
}

/// Rebuild an owned array from an extracted (shape, data) pair
fn array_from_parts(dims: &[usize], data: &[f32]) -> Result<ArrayD<f32>, ModelError> {
    ArrayD::from_shape_vec(IxDyn(dims), data.to_vec())
        .map_err(|e| ModelError::Inference(format!("unexpected output shape {:?}: {}", dims, e)))
}

fn extract_f32(
    outputs: &ort::session::SessionOutputs<'_>,
    name: &str,
) -> Result<ArrayD<f32>, ModelError> {
    let (shape, data) = outputs
        .get(name)
        .ok_or_else(|| ModelError::Inference(format!("missing output {:?}", name)))?
        .try_extract_tensor::<f32>()
        .map_err(|e| ModelError::Inference(e.to_string()))?;
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    array_from_parts(&dims, data)
}

/// Drop a leading batch axis of size one
fn squeeze_batch(array: ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
    let shape = array.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(ModelError::Inference(format!(
            "expected (1, T, D) output, got {:?}",
            shape
        )));
    }
    let flat: Vec<f32> = array.into_iter().collect();
    Array2::from_shape_vec((shape[1], shape[2]), flat)
        .map_err(|e| ModelError::Inference(e.to_string()))
}

fn to_array3(array: ArrayD<f32>) -> Result<Array3<f32>, ModelError> {
    array
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|e| ModelError::Inference(e.to_string()))
}

impl AsrModel for OnnxAsrModel {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn has_attention_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    fn new_cache(&self) -> EncoderCache {
        EncoderCache {
            att_cache: ArrayD::zeros(IxDyn(&self.att_cache_shape)),
            cnn_cache: ArrayD::zeros(IxDyn(&self.cnn_cache_shape)),
        }
    }

    fn forward_encoder_chunk(
        &self,
        chunk_feats: ArrayView2<f32>,
        offset: usize,
        cache: &mut EncoderCache,
    ) -> Result<Array2<f32>, ModelError> {
        let chunk = chunk_feats.to_owned().insert_axis(Axis(0));
        let chunk = Tensor::from_array(chunk).map_err(|e| ModelError::Inference(e.to_string()))?;
        let offset = Tensor::from_array(Array1::from_vec(vec![offset as i64]))
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let att_cache = Tensor::from_array(cache.att_cache.clone())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let cnn_cache = Tensor::from_array(cache.cnn_cache.clone())
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let mut session = self.encoder.lock();
        let outputs = session
            .run(ort::inputs![
                "chunk" => chunk,
                "offset" => offset,
                "att_cache" => att_cache,
                "cnn_cache" => cnn_cache,
            ])
            .map_err(|e| ModelError::Inference(format!("encoder forward failed: {}", e)))?;

        let encoder_out = squeeze_batch(extract_f32(&outputs, "output")?)?;
        cache.att_cache = extract_f32(&outputs, "r_att_cache")?;
        cache.cnn_cache = extract_f32(&outputs, "r_cnn_cache")?;

        Ok(encoder_out)
    }

    fn ctc_activation(&self, encoder_out: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        let hidden = encoder_out.to_owned().insert_axis(Axis(0));
        let hidden = Tensor::from_array(hidden).map_err(|e| ModelError::Inference(e.to_string()))?;

        let mut session = self.ctc.lock();
        let outputs = session
            .run(ort::inputs!["hidden" => hidden])
            .map_err(|e| ModelError::Inference(format!("ctc activation failed: {}", e)))?;

        squeeze_batch(extract_f32(&outputs, "probs")?)
    }

    fn forward_attention_decoder(
        &self,
        hyps_pad: ArrayView2<i64>,
        hyps_lens: ArrayView1<i64>,
        encoder_out: ArrayView3<f32>,
        reverse_weight: f32,
    ) -> Result<AttentionDecoderOut, ModelError> {
        let Some(decoder) = &self.decoder else {
            return Err(ModelError::Inference(
                "model package has no attention decoder".to_string(),
            ));
        };

        let hyps = Tensor::from_array(hyps_pad.to_owned())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let lens = Tensor::from_array(hyps_lens.to_owned())
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let enc = Tensor::from_array(encoder_out.as_standard_layout().to_owned())
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let mut session = decoder.lock();
        let outputs = session
            .run(ort::inputs![
                "hyps" => hyps,
                "hyps_lens" => lens,
                "encoder_out" => enc,
            ])
            .map_err(|e| ModelError::Inference(format!("attention decoder failed: {}", e)))?;

        let l2r = to_array3(extract_f32(&outputs, "logp")?)?;
        let r2l = if self.metadata.is_bidirectional_decoder && reverse_weight > 0.0 {
            Some(to_array3(extract_f32(&outputs, "r_logp")?)?)
        } else {
            None
        };

        Ok(AttentionDecoderOut { l2r, r2l })
    }

    fn batch_forward_encoder(
        &self,
        feats: ArrayView3<f32>,
        feats_lens: ArrayView1<i64>,
    ) -> Result<BatchEncoderOut, ModelError> {
        // The package ships a streaming encoder graph only; run it per
        // utterance over the whole window with a fresh cache and stack the
        // padded outputs.
        let batch_size = feats.shape()[0];
        let mut encoder_outs = Vec::with_capacity(batch_size);
        let mut ctc_logps = Vec::with_capacity(batch_size);
        let mut encoder_lens = Vec::with_capacity(batch_size);

        for b in 0..batch_size {
            let len = feats_lens[b] as usize;
            let utt = feats.index_axis(Axis(0), b);
            let utt = utt.slice(ndarray::s![..len, ..]);

            let mut cache = self.new_cache();
            let enc = self.forward_encoder_chunk(utt, 0, &mut cache)?;
            let logp = self.ctc_activation(enc.view())?;

            encoder_lens.push(enc.nrows() as i64);
            encoder_outs.push(enc);
            ctc_logps.push(logp);
        }

        let t_max = encoder_outs.iter().map(|e| e.nrows()).max().unwrap_or(0);
        let hidden = encoder_outs.first().map(|e| e.ncols()).unwrap_or(0);
        let vocab = ctc_logps.first().map(|l| l.ncols()).unwrap_or(0);

        let mut encoder_out = Array3::zeros((batch_size, t_max, hidden));
        let mut ctc_logp = Array3::zeros((batch_size, t_max, vocab));
        for (b, (enc, logp)) in encoder_outs.iter().zip(ctc_logps.iter()).enumerate() {
            encoder_out
                .slice_mut(ndarray::s![b, ..enc.nrows(), ..])
                .assign(enc);
            ctc_logp
                .slice_mut(ndarray::s![b, ..logp.nrows(), ..])
                .assign(logp);
        }

        Ok(BatchEncoderOut {
            encoder_out,
            encoder_lens: Array1::from_vec(encoder_lens),
            ctc_logp,
        })
    }
}
