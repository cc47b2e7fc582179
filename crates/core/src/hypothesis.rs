//! Recognition hypothesis types

use serde::{Deserialize, Serialize};

/// One N-best hypothesis for an utterance
#[derive(Debug, Clone, Default)]
pub struct Hypothesis {
    /// Decoded unit ids (blank and repeats already collapsed)
    pub tokens: Vec<i32>,

    /// Fused score (CTC composite, or CTC + attention after rescoring)
    pub score: f32,

    /// Decoded text
    pub sentence: String,

    /// Word-piece timing, present when timestamps are enabled
    pub word_pieces: Vec<WordPiece>,
}

impl Hypothesis {
    /// Create a hypothesis without timing information
    pub fn new(tokens: Vec<i32>, score: f32, sentence: String) -> Self {
        Self {
            tokens,
            score,
            sentence,
            word_pieces: Vec::new(),
        }
    }

    /// Attach word-piece timing
    pub fn with_word_pieces(mut self, word_pieces: Vec<WordPiece>) -> Self {
        self.word_pieces = word_pieces;
        self
    }

    /// Check if the hypothesis carries no tokens
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Timing of a single decoded unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordPiece {
    /// The unit text
    pub word: String,

    /// Start time in milliseconds from utterance start
    pub start: u64,

    /// End time in milliseconds from utterance start
    pub end: u64,
}

impl WordPiece {
    pub fn new(word: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypothesis_empty() {
        let hyp = Hypothesis::default();
        assert!(hyp.is_empty());
        assert!(hyp.sentence.is_empty());
    }

    #[test]
    fn test_word_piece_duration() {
        let piece = WordPiece::new("hello", 120, 360);
        assert_eq!(piece.duration_ms(), 240);
    }
}
