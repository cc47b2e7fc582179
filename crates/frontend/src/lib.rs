//! Audio frontend: PCM to acoustic features
//!
//! Provides the fbank extractor and the producer/consumer feature pipeline
//! that feeds the streaming decoder.

pub mod fbank;
pub mod pipeline;

pub use fbank::{FbankConfig, FbankExtractor};
pub use pipeline::FeaturePipeline;
