//! Feature pipeline: buffered producer/consumer of acoustic frames
//!
//! The transport thread appends PCM via [`FeaturePipeline::accept_waveform`];
//! the decoder thread blocks in [`FeaturePipeline::read`] until enough frames
//! are available or input is finished. A single reader is supported.

use parking_lot::{Condvar, Mutex};

use crate::fbank::{FbankConfig, FbankExtractor};

#[derive(Default)]
struct Inner {
    /// PCM remainder not yet covered by a full analysis window
    pcm: Vec<f32>,
    /// Extracted frames, append-only for the current utterance
    frames: Vec<Vec<f32>>,
    /// Frames handed to the reader so far
    num_consumed: usize,
    input_finished: bool,
}

/// Buffered frame producer/consumer with end-of-stream signalling
pub struct FeaturePipeline {
    extractor: FbankExtractor,
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl FeaturePipeline {
    pub fn new(config: FbankConfig) -> Self {
        Self {
            extractor: FbankExtractor::new(config),
            inner: Mutex::new(Inner::default()),
            ready: Condvar::new(),
        }
    }

    /// Feature dimension of produced frames
    pub fn feature_dim(&self) -> usize {
        self.extractor.feature_dim()
    }

    /// Frame shift in milliseconds
    pub fn frame_shift_ms(&self) -> u32 {
        self.extractor.frame_shift_ms()
    }

    /// Append 16-bit PCM samples, extracting as many frames as possible
    pub fn accept_waveform(&self, samples: &[i16]) {
        let mut inner = self.inner.lock();
        if inner.input_finished {
            tracing::warn!("waveform received after input finished, dropping");
            return;
        }
        inner
            .pcm
            .extend(samples.iter().map(|&s| s as f32 / 32768.0));

        let (frames, consumed) = self.extractor.extract(&inner.pcm);
        if consumed > 0 {
            inner.pcm.drain(..consumed);
            inner.frames.extend(frames);
            self.ready.notify_all();
        }
    }

    /// Append precomputed feature frames, bypassing extraction
    ///
    /// Entry point for callers that compute features elsewhere (offline
    /// tools, tests). Frames must match [`Self::feature_dim`].
    pub fn accept_frames(&self, frames: Vec<Vec<f32>>) {
        let mut inner = self.inner.lock();
        if inner.input_finished || frames.is_empty() {
            return;
        }
        inner.frames.extend(frames);
        self.ready.notify_all();
    }

    /// Signal end of input and wake all waiting readers
    pub fn set_input_finished(&self) {
        let mut inner = self.inner.lock();
        inner.input_finished = true;
        self.ready.notify_all();
    }

    /// Whether end of input has been signalled
    pub fn input_finished(&self) -> bool {
        self.inner.lock().input_finished
    }

    /// Total frames produced for the current utterance
    pub fn num_frames(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Frames already handed to the reader
    pub fn num_consumed(&self) -> usize {
        self.inner.lock().num_consumed
    }

    /// Blocking read of up to `n` frames past the consumption point
    ///
    /// Blocks until `n` frames are available or input is finished. Returns
    /// `ok = false` iff the buffer is drained and input is finished; in that
    /// case fewer than `n` frames (possibly zero) are returned.
    pub fn read(&self, n: usize) -> (Vec<Vec<f32>>, bool) {
        let mut inner = self.inner.lock();
        loop {
            let available = inner.frames.len() - inner.num_consumed;
            if available >= n {
                let start = inner.num_consumed;
                inner.num_consumed += n;
                let frames = inner.frames[start..start + n].to_vec();
                return (frames, true);
            }
            if inner.input_finished {
                let start = inner.num_consumed;
                inner.num_consumed += available;
                let frames = inner.frames[start..].to_vec();
                return (frames, false);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Discard buffered data and rearm for the next utterance
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.pcm.clear();
        inner.frames.clear();
        inner.num_consumed = 0;
        inner.input_finished = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pcm_chunk(len: usize) -> Vec<i16> {
        (0..len).map(|i| ((i % 100) as i16 - 50) * 300).collect()
    }

    #[test]
    fn test_read_blocks_until_finished() {
        let pipeline = Arc::new(FeaturePipeline::new(FbankConfig::default()));

        let reader = {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || pipeline.read(100))
        };

        // 480ms of audio -> 46 frames, fewer than requested
        pipeline.accept_waveform(&pcm_chunk(7680));
        pipeline.set_input_finished();

        let (frames, ok) = reader.join().unwrap();
        assert!(!ok);
        assert_eq!(frames.len(), 46);
        assert_eq!(pipeline.num_consumed(), pipeline.num_frames());
    }

    #[test]
    fn test_consumed_matches_produced() {
        let pipeline = Arc::new(FeaturePipeline::new(FbankConfig::default()));

        let writer = {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    pipeline.accept_waveform(&pcm_chunk(1600));
                }
                pipeline.set_input_finished();
            })
        };

        let mut total = 0;
        loop {
            let (frames, ok) = pipeline.read(16);
            total += frames.len();
            if !ok {
                break;
            }
        }
        writer.join().unwrap();

        assert_eq!(total, pipeline.num_frames());
        assert_eq!(pipeline.num_consumed(), pipeline.num_frames());
    }

    #[test]
    fn test_empty_finished_read() {
        let pipeline = FeaturePipeline::new(FbankConfig::default());
        pipeline.set_input_finished();
        let (frames, ok) = pipeline.read(8);
        assert!(frames.is_empty());
        assert!(!ok);
    }

    #[test]
    fn test_reset_rearms() {
        let pipeline = FeaturePipeline::new(FbankConfig::default());
        pipeline.accept_waveform(&pcm_chunk(3200));
        pipeline.set_input_finished();
        let (_, ok) = pipeline.read(4);
        assert!(ok);

        pipeline.reset();
        assert_eq!(pipeline.num_frames(), 0);
        assert_eq!(pipeline.num_consumed(), 0);
        assert!(!pipeline.input_finished());

        pipeline.accept_waveform(&pcm_chunk(3200));
        assert!(pipeline.num_frames() > 0);
    }

    #[test]
    fn test_accept_frames_bypasses_extraction() {
        let pipeline = FeaturePipeline::new(FbankConfig::default());
        pipeline.accept_frames(vec![vec![0.0; 80]; 5]);
        assert_eq!(pipeline.num_frames(), 5);
        let (frames, ok) = pipeline.read(5);
        assert!(ok);
        assert_eq!(frames.len(), 5);
    }
}
