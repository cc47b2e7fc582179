//! CTC prefix beam search
//!
//! Maintains the top-K label prefixes over frame-level CTC log
//! probabilities, merging paths that collapse to the same prefix via the
//! blank/repeat rules, with per-token emission timestamps and optional
//! contextual biasing.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::ArrayView2;

use crate::context::ContextGraph;

const NEG_INF: f32 = f32::NEG_INFINITY;

/// log(exp(a) + exp(b)) without overflow
fn log_add(a: f32, b: f32) -> f32 {
    if a == NEG_INF {
        return b;
    }
    if b == NEG_INF {
        return a;
    }
    let (max, min) = if a > b { (a, b) } else { (b, a) };
    max + (min - max).exp().ln_1p()
}

/// Search configuration
#[derive(Debug, Clone)]
pub struct CtcSearchConfig {
    /// Beam width after pruning
    pub beam_size: usize,
    /// Candidate token pool per frame before pruning
    pub first_beam_size: usize,
    /// Blank label id
    pub blank_id: usize,
    /// Skip a frame entirely when blank probability exceeds this
    pub blank_skip_threshold: f32,
}

impl Default for CtcSearchConfig {
    fn default() -> Self {
        Self {
            beam_size: 10,
            first_beam_size: 64,
            blank_id: 0,
            blank_skip_threshold: 0.98,
        }
    }
}

/// Score pair of one prefix: probability mass ending in blank (`s`) and in
/// the last non-blank label (`ns`), with emission times and biasing state
#[derive(Debug, Clone)]
struct PrefixScore {
    s: f32,
    ns: f32,
    /// Frames on which the blank path extended this prefix
    times_s: Vec<usize>,
    /// Emission frame of each token, one entry per token
    times_ns: Vec<usize>,
    context_state: usize,
}

impl PrefixScore {
    fn root() -> Self {
        Self {
            s: 0.0,
            ns: NEG_INF,
            times_s: Vec::new(),
            times_ns: Vec::new(),
            context_state: 0,
        }
    }

    /// Composite score of the prefix
    fn score(&self) -> f32 {
        log_add(self.s, self.ns)
    }

    /// Empty successor keeping this prefix's history
    fn child(&self) -> Self {
        Self {
            s: NEG_INF,
            ns: NEG_INF,
            times_s: self.times_s.clone(),
            times_ns: self.times_ns.clone(),
            context_state: self.context_state,
        }
    }

    /// Empty successor extended by one token emitted at `frame`
    fn extended(&self, frame: usize, context_state: usize) -> Self {
        let mut times_ns = self.times_ns.clone();
        times_ns.push(frame);
        Self {
            s: NEG_INF,
            ns: NEG_INF,
            times_s: self.times_s.clone(),
            times_ns,
            context_state,
        }
    }
}

/// One finalized hypothesis from the beam
#[derive(Debug, Clone)]
pub struct SearchHyp {
    pub tokens: Vec<i32>,
    /// Composite CTC score (context bonuses included)
    pub score: f32,
    /// Emission frame of each token
    pub times: Vec<usize>,
}

/// Streaming CTC prefix beam searcher
pub struct CtcPrefixBeamSearch {
    config: CtcSearchConfig,
    context: Option<Arc<ContextGraph>>,
    /// Current beam, sorted by composite score, truncated to beam_size
    cur_hyps: Vec<(Vec<i32>, PrefixScore)>,
    /// Absolute frame index, skipped frames included
    time_step: usize,
}

impl CtcPrefixBeamSearch {
    pub fn new(config: CtcSearchConfig, context: Option<Arc<ContextGraph>>) -> Self {
        let mut search = Self {
            config,
            context,
            cur_hyps: Vec::new(),
            time_step: 0,
        };
        search.reset();
        search
    }

    /// Clear the beam to a single empty prefix and rewind time
    pub fn reset(&mut self) {
        self.cur_hyps = vec![(Vec::new(), PrefixScore::root())];
        self.time_step = 0;
    }

    /// Absolute frames seen so far
    pub fn time_step(&self) -> usize {
        self.time_step
    }

    /// Whether the top prefix has emitted any token
    pub fn top_is_empty(&self) -> bool {
        self.cur_hyps
            .first()
            .map(|(tokens, _)| tokens.is_empty())
            .unwrap_or(true)
    }

    /// Emission frame of the top prefix's last token
    pub fn last_emission_frame(&self) -> Option<usize> {
        self.cur_hyps
            .first()
            .and_then(|(_, score)| score.times_ns.last())
            .copied()
    }

    /// Top prefix token ids
    pub fn top_tokens(&self) -> &[i32] {
        self.cur_hyps
            .first()
            .map(|(tokens, _)| tokens.as_slice())
            .unwrap_or(&[])
    }

    fn context_step(&self, state: usize, token: i32) -> (usize, f32) {
        match &self.context {
            Some(graph) => graph.query(state, token),
            None => (0, 0.0),
        }
    }

    /// Advance the beam over a matrix of CTC log probabilities (T, V)
    pub fn search(&mut self, logp: ArrayView2<f32>) {
        let blank = self.config.blank_id;

        for row in logp.rows() {
            let t = self.time_step;

            // Frame-skip on confident blanks.
            let (best_id, best_lp) = row.iter().enumerate().fold(
                (0usize, NEG_INF),
                |acc, (id, &lp)| if lp > acc.1 { (id, lp) } else { acc },
            );
            if best_id == blank && best_lp.exp() > self.config.blank_skip_threshold {
                self.time_step += 1;
                continue;
            }

            // Candidate pool for this frame.
            let mut candidates: Vec<(usize, f32)> = row.iter().copied().enumerate().collect();
            candidates.sort_unstable_by(|a, b| {
                b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            });
            candidates.truncate(self.config.first_beam_size);

            let mut next: HashMap<Vec<i32>, PrefixScore> = HashMap::new();

            for (prefix, ps) in &self.cur_hyps {
                for &(id, lp) in &candidates {
                    if id == blank {
                        let entry = next
                            .entry(prefix.clone())
                            .or_insert_with(|| ps.child());
                        entry.s = log_add(entry.s, log_add(ps.s + lp, ps.ns + lp));
                        if entry.times_s.last() != Some(&t) {
                            entry.times_s.push(t);
                        }
                    } else if prefix.last() == Some(&(id as i32)) {
                        // Same label twice: the non-blank path collapses
                        // into the same prefix...
                        let entry = next
                            .entry(prefix.clone())
                            .or_insert_with(|| ps.child());
                        entry.ns = log_add(entry.ns, ps.ns + lp);

                        // ...while the blank-separated path starts a new
                        // prefix with a repeated label.
                        let mut extended = prefix.clone();
                        extended.push(id as i32);
                        let (ctx, delta) = self.context_step(ps.context_state, id as i32);
                        let entry = next
                            .entry(extended)
                            .or_insert_with(|| ps.extended(t, ctx));
                        entry.ns = log_add(entry.ns, ps.s + lp + delta);
                    } else {
                        let mut extended = prefix.clone();
                        extended.push(id as i32);
                        let (ctx, delta) = self.context_step(ps.context_state, id as i32);
                        let entry = next
                            .entry(extended)
                            .or_insert_with(|| ps.extended(t, ctx));
                        entry.ns =
                            log_add(entry.ns, log_add(ps.s + lp, ps.ns + lp) + delta);
                    }
                }
            }

            let mut hyps: Vec<(Vec<i32>, PrefixScore)> = next.into_iter().collect();
            hyps.sort_unstable_by(|a, b| {
                b.1.score()
                    .partial_cmp(&a.1.score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hyps.truncate(self.config.beam_size);
            self.cur_hyps = hyps;

            self.time_step += 1;
        }
    }

    /// Up to `n` best hypotheses by composite score; the beam is left
    /// untouched
    pub fn nbest(&self, n: usize) -> Vec<SearchHyp> {
        self.cur_hyps
            .iter()
            .take(n)
            .map(|(tokens, score)| SearchHyp {
                tokens: tokens.clone(),
                score: score.score(),
                times: score.times_ns.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Build a (T, V) log-prob matrix from per-frame probabilities
    fn logp(frames: &[Vec<f32>]) -> Array2<f32> {
        let t = frames.len();
        let v = frames[0].len();
        Array2::from_shape_fn((t, v), |(i, j)| frames[i][j].ln())
    }

    fn search_over(frames: &[Vec<f32>], config: CtcSearchConfig) -> CtcPrefixBeamSearch {
        let mut search = CtcPrefixBeamSearch::new(config, None);
        search.search(logp(frames).view());
        search
    }

    #[test]
    fn test_log_add() {
        assert_eq!(log_add(NEG_INF, -1.0), -1.0);
        assert_eq!(log_add(-1.0, NEG_INF), -1.0);
        let sum = log_add(0.5f32.ln(), 0.25f32.ln());
        assert!((sum - 0.75f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_repeated_label_collapses() {
        // Two consecutive frames dominated by label 1 with no blank gap
        // collapse into a single emission.
        let search = search_over(
            &[
                vec![0.05, 0.90, 0.05],
                vec![0.05, 0.90, 0.05],
            ],
            CtcSearchConfig::default(),
        );
        assert_eq!(search.top_tokens(), &[1]);
    }

    #[test]
    fn test_blank_separates_repeats() {
        let search = search_over(
            &[
                vec![0.05, 0.90, 0.05],
                vec![0.90, 0.05, 0.05],
                vec![0.05, 0.90, 0.05],
            ],
            CtcSearchConfig::default(),
        );
        assert_eq!(search.top_tokens(), &[1, 1]);

        let top = &search.nbest(1)[0];
        assert_eq!(top.times, vec![0, 2]);
    }

    #[test]
    fn test_blank_skip_advances_time() {
        let mut config = CtcSearchConfig::default();
        config.blank_skip_threshold = 0.95;
        let search = search_over(
            &[
                vec![0.02, 0.96, 0.02],
                vec![0.98, 0.01, 0.01], // skipped
                vec![0.02, 0.02, 0.96],
            ],
            config,
        );
        assert_eq!(search.time_step(), 3);
        let top = &search.nbest(1)[0];
        assert_eq!(top.tokens, vec![1, 2]);
        assert_eq!(top.times, vec![0, 2]);
    }

    #[test]
    fn test_beam_bounds_and_distinct_prefixes() {
        let frames: Vec<Vec<f32>> = (0..6)
            .map(|i| {
                let mut row = vec![0.15; 5];
                row[(i % 4) + 1] = 0.4;
                row
            })
            .collect();
        let mut config = CtcSearchConfig::default();
        config.beam_size = 4;
        let search = search_over(&frames, config);

        let hyps = search.nbest(100);
        assert!(hyps.len() <= 4);
        for i in 0..hyps.len() {
            for j in i + 1..hyps.len() {
                assert_ne!(hyps[i].tokens, hyps[j].tokens);
            }
        }
    }

    #[test]
    fn test_timestamps_match_token_count() {
        let frames: Vec<Vec<f32>> = vec![
            vec![0.1, 0.8, 0.05, 0.05],
            vec![0.7, 0.1, 0.1, 0.1],
            vec![0.1, 0.1, 0.7, 0.1],
            vec![0.1, 0.1, 0.1, 0.7],
        ];
        let search = search_over(&frames, CtcSearchConfig::default());
        for hyp in search.nbest(10) {
            assert_eq!(hyp.times.len(), hyp.tokens.len());
            assert!(hyp.times.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_determinism() {
        let frames: Vec<Vec<f32>> = (0..8)
            .map(|i| {
                let mut row = vec![0.1; 6];
                row[(i * 3 + 1) % 6] = 0.5;
                row
            })
            .collect();
        let a = search_over(&frames, CtcSearchConfig::default());
        let b = search_over(&frames, CtcSearchConfig::default());
        let na = a.nbest(10);
        let nb = b.nbest(10);
        assert_eq!(na.len(), nb.len());
        for (x, y) in na.iter().zip(nb.iter()) {
            assert_eq!(x.tokens, y.tokens);
            assert_eq!(x.score, y.score);
        }
    }

    #[test]
    fn test_context_bonus_changes_ranking() {
        let frames = vec![
            vec![0.08, 0.40, 0.02, 0.50],
            vec![0.08, 0.02, 0.50, 0.40],
        ];
        // Unbiased: [3, 2] wins.
        let unbiased = search_over(&frames, CtcSearchConfig::default());
        assert_eq!(unbiased.top_tokens(), &[3, 2]);

        // Biasing towards the phrase [1, 2] flips the ranking.
        let graph = Arc::new(ContextGraph::new(&[vec![1, 2]], 3.0));
        let mut biased = CtcPrefixBeamSearch::new(CtcSearchConfig::default(), Some(graph));
        biased.search(logp(&frames).view());
        assert_eq!(biased.top_tokens(), &[1, 2]);
    }

    #[test]
    fn test_reset() {
        let mut search = search_over(
            &[vec![0.1, 0.8, 0.1]],
            CtcSearchConfig::default(),
        );
        assert!(!search.top_is_empty());

        search.reset();
        assert!(search.top_is_empty());
        assert_eq!(search.time_step(), 0);
        assert_eq!(search.nbest(1)[0].tokens, Vec::<i32>::new());
    }
}
