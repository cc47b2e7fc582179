//! Wire protocol messages
//!
//! Text frames are UTF-8 JSON; binary frames carry little-endian 16-bit
//! PCM at the configured sample rate.

use serde::{Deserialize, Serialize};

use asr_core::{Hypothesis, WordPiece};

/// Inbound control messages
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ClientSignal {
    /// Opens an utterance stream; required first
    ///
    /// Absent fields fall back to the server-side decode defaults.
    Start {
        #[serde(default)]
        nbest: Option<usize>,
        #[serde(default)]
        continuous_decoding: Option<bool>,
    },
    /// Flushes the current utterance
    End,
}

/// One entry of an emitted N-best list
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NbestEntry {
    pub sentence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_pieces: Option<Vec<WordPiece>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    PartialResult,
    FinalResult,
}

/// Outbound messages
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ServerMessage {
    Result {
        status: Status,
        #[serde(rename = "type")]
        kind: ResultKind,
        nbest: Vec<NbestEntry>,
    },
    Failed {
        status: Status,
        message: String,
    },
}

impl ServerMessage {
    /// Partial result carrying the current top sentence
    pub fn partial(sentence: String) -> Self {
        Self::Result {
            status: Status::Ok,
            kind: ResultKind::PartialResult,
            nbest: vec![NbestEntry {
                sentence,
                word_pieces: None,
            }],
        }
    }

    /// Final result built from the rescored N-best
    pub fn final_result(hyps: &[Hypothesis], timestamp: bool) -> Self {
        Self::Result {
            status: Status::Ok,
            kind: ResultKind::FinalResult,
            nbest: hyps
                .iter()
                .map(|hyp| NbestEntry {
                    sentence: hyp.sentence.clone(),
                    word_pieces: timestamp.then(|| hyp.word_pieces.clone()),
                })
                .collect(),
        }
    }

    /// Per-utterance failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            status: Status::Failed,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Result {
                kind: ResultKind::FinalResult,
                ..
            } | Self::Failed { .. }
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("failed to serialize server message: {}", e);
            r#"{"status":"failed","message":"serialization error"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let msg: ClientSignal =
            serde_json::from_str(r#"{"signal":"start","nbest":5,"continuous_decoding":true}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientSignal::Start {
                nbest: Some(5),
                continuous_decoding: Some(true)
            }
        );
    }

    #[test]
    fn test_parse_start_defaults() {
        let msg: ClientSignal = serde_json::from_str(r#"{"signal":"start"}"#).unwrap();
        assert_eq!(
            msg,
            ClientSignal::Start {
                nbest: None,
                continuous_decoding: None
            }
        );
    }

    #[test]
    fn test_parse_end() {
        let msg: ClientSignal = serde_json::from_str(r#"{"signal":"end"}"#).unwrap();
        assert_eq!(msg, ClientSignal::End);
    }

    #[test]
    fn test_partial_result_shape() {
        let json = ServerMessage::partial("hello".to_string()).to_json();
        assert_eq!(
            json,
            r#"{"status":"ok","type":"partial_result","nbest":[{"sentence":"hello"}]}"#
        );
    }

    #[test]
    fn test_final_result_shape_with_timestamps() {
        let hyp = Hypothesis::new(vec![1], -0.5, "hi".to_string())
            .with_word_pieces(vec![WordPiece::new("hi", 0, 40)]);
        let json = ServerMessage::final_result(&[hyp], true).to_json();
        assert_eq!(
            json,
            r#"{"status":"ok","type":"final_result","nbest":[{"sentence":"hi","word_pieces":[{"word":"hi","start":0,"end":40}]}]}"#
        );
    }

    #[test]
    fn test_failed_shape() {
        let json = ServerMessage::failed("boom").to_json();
        assert_eq!(json, r#"{"status":"failed","message":"boom"}"#);
    }

    #[test]
    fn test_terminal_classification() {
        assert!(ServerMessage::failed("x").is_terminal());
        assert!(ServerMessage::final_result(&[], false).is_terminal());
        assert!(!ServerMessage::partial("x".to_string()).is_terminal());
    }
}
