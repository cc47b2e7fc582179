//! Session management
//!
//! A [`SpeechSession`] couples one client connection to one streaming
//! decoder running on a blocking worker; results flow back over a
//! single-writer channel. The [`SessionManager`] tracks live sessions and
//! enforces the concurrency limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use asr_core::SymbolTable;
use asr_decoder::{ContextGraph, DecodeOptions, DecodeState, StreamingDecoder};
use asr_frontend::{FbankConfig, FeaturePipeline};
use asr_model::AsrModel;

use crate::messages::ServerMessage;
use crate::metrics;
use crate::ServerError;

/// Registry entry for a live connection
pub struct SessionInfo {
    pub id: String,
    pub created_at: Instant,
}

/// Session registry with a concurrency limit
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionInfo>>>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new session; fails when the server is at capacity
    pub fn register(&self, id: &str) -> Result<Arc<SessionInfo>, ServerError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(ServerError::Session("max sessions reached".to_string()));
        }
        let info = Arc::new(SessionInfo {
            id: id.to_string(),
            created_at: Instant::now(),
        });
        sessions.insert(id.to_string(), info.clone());
        tracing::info!(session_id = %id, active = sessions.len(), "session registered");
        Ok(info)
    }

    pub fn remove(&self, id: &str) {
        let mut sessions = self.sessions.write();
        if sessions.remove(id).is_some() {
            tracing::info!(session_id = %id, active = sessions.len(), "session removed");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

/// Per-connection decoding machinery
///
/// Owns the feature pipeline and the stop flag; the decode worker runs on
/// the blocking pool until the utterance stream ends or is cancelled.
pub struct SpeechSession {
    pub id: String,
    pipeline: Arc<FeaturePipeline>,
    stop: Arc<AtomicBool>,
    worker: tokio::task::JoinHandle<()>,
}

impl SpeechSession {
    /// Spawn the decode worker for one connection
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: String,
        model: Arc<dyn AsrModel>,
        symbols: Arc<SymbolTable>,
        context: Option<Arc<ContextGraph>>,
        fbank: FbankConfig,
        opts: DecodeOptions,
        continuous: bool,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let pipeline = Arc::new(FeaturePipeline::new(fbank));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(64);

        let timestamp = opts.timestamp;
        let decoder = StreamingDecoder::new(
            model,
            symbols,
            pipeline.clone(),
            context,
            opts,
            stop.clone(),
        );

        let worker = {
            let pipeline = pipeline.clone();
            let stop = stop.clone();
            let session_id = id.clone();
            tokio::task::spawn_blocking(move || {
                decode_loop(decoder, pipeline, stop, continuous, timestamp, tx, &session_id)
            })
        };

        (
            Self {
                id,
                pipeline,
                stop,
                worker,
            },
            rx,
        )
    }

    /// Forward little-endian 16-bit PCM bytes into the feature pipeline
    pub fn accept_audio(&self, data: &[u8]) {
        let samples: Vec<i16> = data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if !samples.is_empty() {
            self.pipeline.accept_waveform(&samples);
        }
    }

    /// Flush the current utterance (end signal)
    pub fn finish_input(&self) {
        self.pipeline.set_input_finished();
    }

    /// Cancel decoding; the worker unwinds without emitting a final
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
        // Wake the decoder if it is blocked on the pipeline.
        self.pipeline.set_input_finished();
    }

    /// Wait for the decode worker to exit
    pub async fn join(self) {
        if let Err(e) = self.worker.await {
            tracing::error!(session_id = %self.id, "decode worker panicked: {}", e);
        }
    }
}

/// Decode worker: chunk loop with endpoint-triggered finals and
/// continuous-mode rearming
fn decode_loop(
    mut decoder: StreamingDecoder,
    pipeline: Arc<FeaturePipeline>,
    stop: Arc<AtomicBool>,
    continuous: bool,
    timestamp: bool,
    tx: mpsc::Sender<ServerMessage>,
    session_id: &str,
) {
    loop {
        match decoder.advance() {
            Ok(outcome) => {
                if let Some(sentence) = outcome.partial {
                    metrics::record_partial();
                    let _ = tx.blocking_send(ServerMessage::partial(sentence));
                }
                match outcome.state {
                    DecodeState::EndpointReached => {
                        let message = match decoder.finalize_utterance() {
                            Ok(hyps) => {
                                metrics::record_utterance();
                                ServerMessage::final_result(&hyps, timestamp)
                            }
                            Err(e) => {
                                tracing::error!(session_id = %session_id, "finalize failed: {}", e);
                                metrics::record_decode_error();
                                ServerMessage::failed(e.to_string())
                            }
                        };
                        let _ = tx.blocking_send(message);

                        if continuous && !pipeline.input_finished() && !stop.load(Ordering::Relaxed)
                        {
                            decoder.reset_utterance();
                            continue;
                        }
                        return;
                    }
                    DecodeState::Terminated => {
                        tracing::info!(session_id = %session_id, "decode cancelled");
                        return;
                    }
                    _ => {}
                }
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, "decode error: {}", e);
                metrics::record_decode_error();
                let _ = tx.blocking_send(ServerMessage::failed(e.to_string()));

                if continuous && !pipeline.input_finished() && !stop.load(Ordering::Relaxed) {
                    decoder.reset_utterance();
                    continue;
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_capacity() {
        let manager = SessionManager::new(2);
        manager.register("a").unwrap();
        manager.register("b").unwrap();
        assert!(manager.register("c").is_err());

        manager.remove("a");
        assert!(manager.register("c").is_ok());
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn test_registry_list() {
        let manager = SessionManager::new(10);
        manager.register("x").unwrap();
        assert_eq!(manager.list(), vec!["x".to_string()]);
    }
}
