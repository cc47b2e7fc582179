//! Contextual biasing graph
//!
//! A prefix trie over unit ids, walked token by token during beam search.
//! Matching tokens earn an incremental bonus; completing a phrase earns a
//! completion bonus and returns to the root; a mismatch falls back to the
//! root and refunds every bonus accumulated for the current partial match.

use std::collections::HashMap;

use asr_core::SymbolTable;

#[derive(Debug, Default)]
struct ContextState {
    transitions: HashMap<i32, usize>,
    /// Bonus accumulated on the path from the root to this state
    accumulated: f32,
    is_end: bool,
}

/// Compiled biasing graph, shared read-only across sessions
#[derive(Debug)]
pub struct ContextGraph {
    states: Vec<ContextState>,
    context_score: f32,
}

impl ContextGraph {
    /// Compile a graph from tokenized phrases
    pub fn new(phrases: &[Vec<i32>], context_score: f32) -> Self {
        let mut states = vec![ContextState::default()];

        for phrase in phrases {
            if phrase.is_empty() {
                continue;
            }
            let mut cur = 0usize;
            for &token in phrase {
                cur = match states[cur].transitions.get(&token) {
                    Some(&next) => next,
                    None => {
                        let accumulated = states[cur].accumulated + context_score;
                        states.push(ContextState {
                            transitions: HashMap::new(),
                            accumulated,
                            is_end: false,
                        });
                        let next = states.len() - 1;
                        states[cur].transitions.insert(token, next);
                        next
                    }
                };
            }
            states[cur].is_end = true;
        }

        Self {
            states,
            context_score,
        }
    }

    /// Compile a graph from phrase strings, tokenized against `symbols`
    ///
    /// Phrases that cannot be covered by the unit inventory are skipped
    /// with a warning.
    pub fn from_phrases(phrases: &[String], context_score: f32, symbols: &SymbolTable) -> Self {
        let mut tokenized = Vec::with_capacity(phrases.len());
        for phrase in phrases {
            match symbols.tokenize(phrase) {
                Some(ids) => tokenized.push(ids),
                None => {
                    tracing::warn!(phrase = %phrase, "context phrase not coverable by unit inventory, skipped");
                }
            }
        }
        Self::new(&tokenized, context_score)
    }

    /// Number of states, root included
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Advance from `state` on `token`
    ///
    /// Returns the successor state and the score delta to apply. On a
    /// mismatch the delta refunds the bonuses accumulated so far and the
    /// walk restarts at the root. Completing a phrase banks its bonuses
    /// (plus the completion bonus) and returns to the root.
    pub fn query(&self, state: usize, token: i32) -> (usize, f32) {
        match self.states[state].transitions.get(&token) {
            Some(&next) => {
                let mut delta = self.states[next].accumulated - self.states[state].accumulated;
                if self.states[next].is_end {
                    delta += self.context_score;
                    if self.states[next].transitions.is_empty() {
                        return (0, delta);
                    }
                }
                (next, delta)
            }
            None => (0, -self.states[state].accumulated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_and_completion() {
        // Phrase [5, 7]: each matched token earns 2.0, completion 2.0 more.
        let graph = ContextGraph::new(&[vec![5, 7]], 2.0);
        assert_eq!(graph.num_states(), 3);

        let (s1, d1) = graph.query(0, 5);
        assert_eq!(d1, 2.0);
        assert_ne!(s1, 0);

        // Completion returns to root with token bonus + completion bonus.
        let (s2, d2) = graph.query(s1, 7);
        assert_eq!(s2, 0);
        assert_eq!(d2, 4.0);
    }

    #[test]
    fn test_mismatch_refunds() {
        let graph = ContextGraph::new(&[vec![5, 7, 9]], 3.0);
        let (s1, _) = graph.query(0, 5);
        let (s2, _) = graph.query(s1, 7);

        // Two matched tokens accumulated 6.0; mismatch refunds all of it.
        let (s3, d3) = graph.query(s2, 1);
        assert_eq!(s3, 0);
        assert_eq!(d3, -6.0);
    }

    #[test]
    fn test_no_match_from_root() {
        let graph = ContextGraph::new(&[vec![5]], 1.0);
        let (s, d) = graph.query(0, 42);
        assert_eq!(s, 0);
        assert_eq!(d, 0.0);
    }

    #[test]
    fn test_shared_prefix() {
        let graph = ContextGraph::new(&[vec![1, 2], vec![1, 3]], 1.0);
        // Root -> 1 shared, then branches on 2 / 3.
        assert_eq!(graph.num_states(), 4);
        let (s1, _) = graph.query(0, 1);
        let (_, d2) = graph.query(s1, 2);
        let (_, d3) = graph.query(s1, 3);
        assert_eq!(d2, 2.0);
        assert_eq!(d3, 2.0);
    }
}
