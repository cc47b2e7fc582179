//! Log-mel filterbank feature extraction
//!
//! Sliding-window FFT over 16-bit PCM with a Hann window and triangular
//! mel filters. Uses realfft for real-signal FFT computation.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

/// Fbank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FbankConfig {
    /// Input sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of mel bins per frame
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,

    /// Analysis window length in milliseconds
    #[serde(default = "default_frame_length_ms")]
    pub frame_length_ms: u32,

    /// Frame shift in milliseconds
    #[serde(default = "default_frame_shift_ms")]
    pub frame_shift_ms: u32,
}

fn default_sample_rate() -> u32 {
    16000
}
fn default_num_bins() -> usize {
    80
}
fn default_frame_length_ms() -> u32 {
    25
}
fn default_frame_shift_ms() -> u32 {
    10
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            num_bins: default_num_bins(),
            frame_length_ms: default_frame_length_ms(),
            frame_shift_ms: default_frame_shift_ms(),
        }
    }
}

impl FbankConfig {
    /// Window length in samples
    pub fn frame_length(&self) -> usize {
        (self.sample_rate as usize * self.frame_length_ms as usize) / 1000
    }

    /// Frame shift in samples
    pub fn frame_shift(&self) -> usize {
        (self.sample_rate as usize * self.frame_shift_ms as usize) / 1000
    }
}

/// Log-mel fbank extractor
pub struct FbankExtractor {
    config: FbankConfig,
    frame_length: usize,
    frame_shift: usize,
    n_fft: usize,
    hann_window: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl FbankExtractor {
    pub fn new(config: FbankConfig) -> Self {
        let frame_length = config.frame_length();
        let frame_shift = config.frame_shift();
        // Next power of two above the window
        let n_fft = frame_length.next_power_of_two();

        let hann_window: Vec<f32> = (0..frame_length)
            .map(|i| {
                let x = std::f32::consts::PI * i as f32 / (frame_length - 1) as f32;
                0.5 * (1.0 - (2.0 * x).cos())
            })
            .collect();

        let mel_filters =
            Self::create_mel_filters(config.sample_rate as usize, n_fft, config.num_bins);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            config,
            frame_length,
            frame_shift,
            n_fft,
            hann_window,
            mel_filters,
            fft,
        }
    }

    /// Feature dimension (number of mel bins)
    pub fn feature_dim(&self) -> usize {
        self.config.num_bins
    }

    /// Frame shift in samples
    pub fn frame_shift(&self) -> usize {
        self.frame_shift
    }

    /// Frame shift in milliseconds
    pub fn frame_shift_ms(&self) -> u32 {
        self.config.frame_shift_ms
    }

    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }

    fn mel_to_hz(mel: f32) -> f32 {
        700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
    }

    fn create_mel_filters(sample_rate: usize, n_fft: usize, num_bins: usize) -> Vec<Vec<f32>> {
        let mel_min = Self::hz_to_mel(0.0);
        let mel_max = Self::hz_to_mel(sample_rate as f32 / 2.0);

        let mel_points: Vec<f32> = (0..num_bins + 2)
            .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (num_bins + 1) as f32)
            .collect();

        let bin_points: Vec<usize> = mel_points
            .iter()
            .map(|&m| {
                let hz = Self::mel_to_hz(m);
                ((n_fft + 1) as f32 * hz / sample_rate as f32).floor() as usize
            })
            .collect();

        let n_bins = n_fft / 2 + 1;
        let mut filters = vec![vec![0.0f32; n_bins]; num_bins];

        for i in 0..num_bins {
            let start = bin_points[i];
            let center = bin_points[i + 1];
            let end = bin_points[i + 2];

            for j in start..center {
                if center > start && j < n_bins {
                    filters[i][j] = (j - start) as f32 / (center - start) as f32;
                }
            }
            for j in center..end {
                if end > center && j < n_bins {
                    filters[i][j] = (end - j) as f32 / (end - center) as f32;
                }
            }
        }

        filters
    }

    fn compute_frame(&self, windowed: &mut [f32]) -> Vec<f32> {
        let n_bins = self.n_fft / 2 + 1;
        let mut spectrum = vec![Complex::new(0.0f32, 0.0f32); n_bins];

        let magnitudes: Vec<f32> = if self.fft.process(windowed, &mut spectrum).is_ok() {
            spectrum.iter().map(|c| c.norm()).collect()
        } else {
            vec![0.0f32; n_bins]
        };

        self.mel_filters
            .iter()
            .map(|filter| {
                let energy: f32 = magnitudes
                    .iter()
                    .zip(filter.iter())
                    .map(|(m, f)| m * f)
                    .sum();
                (energy + 1e-10).ln()
            })
            .collect()
    }

    /// Extract all complete frames from `samples`
    ///
    /// Returns the extracted frames and the number of samples consumed
    /// (`n_frames * frame_shift`); the caller keeps the remainder for the
    /// next call.
    pub fn extract(&self, samples: &[f32]) -> (Vec<Vec<f32>>, usize) {
        if samples.len() < self.frame_length {
            return (Vec::new(), 0);
        }
        let n_frames = (samples.len() - self.frame_length) / self.frame_shift + 1;
        let mut frames = Vec::with_capacity(n_frames);

        let mut windowed = vec![0.0f32; self.n_fft];
        for idx in 0..n_frames {
            let start = idx * self.frame_shift;
            windowed[self.frame_length..].fill(0.0);
            for (i, &s) in samples[start..start + self.frame_length].iter().enumerate() {
                windowed[i] = s * self.hann_window[i];
            }
            frames.push(self.compute_frame(&mut windowed));
        }

        (frames, n_frames * self.frame_shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_sample_counts() {
        let config = FbankConfig::default();
        assert_eq!(config.frame_length(), 400);
        assert_eq!(config.frame_shift(), 160);
    }

    #[test]
    fn test_extract_frame_shapes() {
        let extractor = FbankExtractor::new(FbankConfig::default());

        // 100ms of a sine at 16kHz
        let samples: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let (frames, consumed) = extractor.extract(&samples);

        // (1600 - 400) / 160 + 1 = 8 frames
        assert_eq!(frames.len(), 8);
        assert_eq!(consumed, 8 * 160);
        for frame in &frames {
            assert_eq!(frame.len(), 80);
            assert!(frame.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_extract_too_short() {
        let extractor = FbankExtractor::new(FbankConfig::default());
        let (frames, consumed) = extractor.extract(&[0.0; 100]);
        assert!(frames.is_empty());
        assert_eq!(consumed, 0);
    }
}
