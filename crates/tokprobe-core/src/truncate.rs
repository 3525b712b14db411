//! Adaptive truncation against a token-count oracle
//!
//! The oracle can only answer "how many tokens is this string", so finding the
//! longest prefix within a budget is a search over prefix lengths where every
//! probe costs a remote call. The search runs in four phases:
//!
//! 1. Baseline: count the whole text; return it untouched if it fits.
//! 2. Coarse: secant steps through the two latest observations, seeded by
//!    [`RatioEstimator`] and kept strictly inside the current bracket.
//! 3. Chunked: fixed steps from the side of the last observation until the
//!    bracket is narrow.
//! 4. Fine: halve the narrow bracket until it is a single unit wide.
//!
//! Candidate lengths are grapheme-cluster boundaries, so a prefix never ends
//! inside a combining sequence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::calibrate::OverheadCalibrator;
use crate::error::{Error, Result};
use crate::ratio::RatioEstimator;

/// Default ceiling on oracle calls (cache misses) per truncation
pub const DEFAULT_CALL_BUDGET: usize = 20;

/// Calibration plus the baseline count
pub const MIN_CALL_BUDGET: usize = 2;

const CLOSE_ENOUGH_TOKENS: usize = 2;
const COARSE_RESERVE: usize = 6;
const CHUNK_STEP: usize = 8;
const FINE_WIDTH: usize = 10;
const MAX_FINE_STEP: usize = 5;

/// Outcome of one truncation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationResult {
    /// The chosen prefix
    pub text: String,
    /// Prefix length in characters
    pub chars: usize,
    /// Content-only token count of the prefix
    pub tokens: usize,
    /// Oracle calls (cache misses) spent on this truncation
    pub oracle_calls: usize,
    /// True when the next grapheme is proven to exceed the target
    pub exact: bool,
}

impl TruncationResult {
    fn empty() -> Self {
        Self {
            text: String::new(),
            chars: 0,
            tokens: 0,
            oracle_calls: 0,
            exact: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Baseline,
    Coarse,
    Chunked,
    Fine,
}

/// Byte offsets of every grapheme boundary, `0` and `text.len()` included
struct Boundaries<'a> {
    text: &'a str,
    offsets: Vec<usize>,
}

impl<'a> Boundaries<'a> {
    fn new(text: &'a str) -> Self {
        let mut offsets: Vec<usize> = text.grapheme_indices(true).map(|(i, _)| i).collect();
        offsets.push(text.len());
        Self { text, offsets }
    }

    fn units(&self) -> usize {
        self.offsets.len() - 1
    }

    fn prefix(&self, units: usize) -> &'a str {
        &self.text[..self.offsets[units]]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observation {
    len: usize,
    tokens: usize,
}

pub struct AdaptiveTruncator {
    calibrator: Arc<OverheadCalibrator>,
    call_budget: usize,
}

impl AdaptiveTruncator {
    pub fn new(calibrator: Arc<OverheadCalibrator>, call_budget: usize) -> Result<Self> {
        if call_budget < MIN_CALL_BUDGET {
            return Err(Error::InvalidCallBudget {
                min: MIN_CALL_BUDGET,
                got: call_budget,
            });
        }
        Ok(Self {
            calibrator,
            call_budget,
        })
    }

    /// Longest prefix of `text` whose content-only count is at most `target_tokens`.
    ///
    /// Running out of call budget is not an error: the best proven prefix is
    /// returned with `exact == false`. Oracle failures abort the search.
    pub async fn truncate(
        &self,
        text: &str,
        target_tokens: usize,
        model: &str,
    ) -> Result<TruncationResult> {
        if target_tokens == 0 || text.is_empty() {
            return Ok(TruncationResult::empty());
        }

        let mut search = Search::new(&self.calibrator, model, text, target_tokens, self.call_budget);
        let units = search.bounds.units();

        let Some(full) = search.probe(Phase::Baseline, units).await? else {
            return Ok(search.finish());
        };
        if full.tokens <= target_tokens {
            tracing::debug!(model, tokens = full.tokens, "text already within target");
            return Ok(search.finish_full(full));
        }

        search.coarse(RatioEstimator::estimate(text)).await?;
        search.chunked().await?;
        search.fine().await?;

        Ok(search.finish())
    }
}

struct Search<'a> {
    calibrator: &'a OverheadCalibrator,
    model: &'a str,
    bounds: Boundaries<'a>,
    target: usize,
    budget: usize,
    calls: usize,
    /// Longest probed prefix within target; the empty prefix counts as zero tokens
    lower: Observation,
    /// Shortest probed prefix over target
    upper: Observation,
    last: Option<Observation>,
    prev: Option<Observation>,
}

impl<'a> Search<'a> {
    fn new(
        calibrator: &'a OverheadCalibrator,
        model: &'a str,
        text: &'a str,
        target: usize,
        budget: usize,
    ) -> Self {
        let bounds = Boundaries::new(text);
        let units = bounds.units();
        Self {
            calibrator,
            model,
            bounds,
            target,
            budget,
            calls: 0,
            lower: Observation { len: 0, tokens: 0 },
            upper: Observation {
                len: units,
                tokens: usize::MAX,
            },
            last: None,
            prev: None,
        }
    }

    fn width(&self) -> usize {
        self.upper.len - self.lower.len
    }

    fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.calls)
    }

    /// Content tokens of the prefix of `len` units, or `None` once the budget
    /// is spent and the answer is not already cached.
    async fn probe(&mut self, phase: Phase, len: usize) -> Result<Option<Observation>> {
        let prefix = self.bounds.prefix(len);

        let tokens = if self.calls < self.budget {
            let calibration = self.calibrator.calibrate(self.model).await?;
            self.calls += calibration.oracle_calls;
            if self.calls < self.budget {
                let measured = self
                    .calibrator
                    .measure_with_overhead(prefix, self.model, calibration.tokens)
                    .await?;
                self.calls += measured.oracle_calls;
                Some(measured.tokens)
            } else {
                self.calibrator.cached_content(prefix, self.model)
            }
        } else {
            self.calibrator.cached_content(prefix, self.model)
        };

        let Some(tokens) = tokens else {
            tracing::debug!(?phase, len, calls = self.calls, "call budget exhausted");
            return Ok(None);
        };

        let observation = Observation { len, tokens };
        tracing::debug!(?phase, len, tokens, calls = self.calls, "probed prefix");

        if tokens <= self.target {
            if len > self.lower.len {
                self.lower = observation;
            }
        } else if len <= self.upper.len {
            self.upper = observation;
        }
        if self.last.map_or(true, |last| last.len != len) {
            self.prev = self.last;
            self.last = Some(observation);
        }

        Ok(Some(observation))
    }

    /// Pull `len` strictly inside the bracket, bisecting when it falls outside
    fn inside_bracket(&self, len: usize) -> usize {
        if len > self.lower.len && len < self.upper.len {
            len
        } else {
            self.lower.len + self.width() / 2
        }
    }

    /// Length predicted to hit the target from the latest observations
    fn interpolate(&self, ratio: f64) -> usize {
        let Some(last) = self.last else {
            return self.lower.len + self.width() / 2;
        };
        let missing = self.target as f64 - last.tokens as f64;
        let estimate = match self.prev {
            Some(prev) if prev.tokens != last.tokens => {
                let slope =
                    (last.len as f64 - prev.len as f64) / (last.tokens as f64 - prev.tokens as f64);
                last.len as f64 + missing * slope
            }
            _ => last.len as f64 + missing * ratio,
        };
        if estimate.is_finite() && estimate > 0.0 {
            estimate.round() as usize
        } else {
            0
        }
    }

    async fn coarse(&mut self, mut ratio: f64) -> Result<()> {
        let mut len = RatioEstimator::initial_guess(ratio, self.target, self.bounds.units());

        while self.width() > FINE_WIDTH && self.remaining() >= COARSE_RESERVE {
            let Some(observation) = self.probe(Phase::Coarse, self.inside_bracket(len)).await?
            else {
                break;
            };
            if observation.tokens.abs_diff(self.target) <= CLOSE_ENOUGH_TOKENS {
                break;
            }
            if observation.tokens > 0 {
                ratio = observation.len as f64 / observation.tokens as f64;
            }
            len = self.interpolate(ratio);
        }
        Ok(())
    }

    async fn chunked(&mut self) -> Result<()> {
        while self.width() > FINE_WIDTH {
            let below = self.last.map_or(true, |last| last.tokens <= self.target);
            let len = if below {
                self.lower.len + CHUNK_STEP
            } else {
                self.upper.len.saturating_sub(CHUNK_STEP)
            };
            if self
                .probe(Phase::Chunked, self.inside_bracket(len))
                .await?
                .is_none()
            {
                break;
            }
        }
        Ok(())
    }

    async fn fine(&mut self) -> Result<()> {
        while self.width() > 1 {
            let step = (self.width() / 2).clamp(1, MAX_FINE_STEP);
            if self
                .probe(Phase::Fine, self.lower.len + step)
                .await?
                .is_none()
            {
                break;
            }
        }
        Ok(())
    }

    fn finish_full(self, full: Observation) -> TruncationResult {
        TruncationResult {
            text: self.bounds.text.to_string(),
            chars: self.bounds.text.chars().count(),
            tokens: full.tokens,
            oracle_calls: self.calls,
            exact: true,
        }
    }

    fn finish(self) -> TruncationResult {
        let text = self.bounds.prefix(self.lower.len);
        let exact = self.width() <= 1;
        tracing::info!(
            model = self.model,
            target = self.target,
            tokens = self.lower.tokens,
            oracle_calls = self.calls,
            exact,
            "truncated text"
        );
        TruncationResult {
            text: text.to_string(),
            chars: text.chars().count(),
            tokens: self.lower.tokens,
            oracle_calls: self.calls,
            exact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoizedOracle;
    use crate::error::OracleError;
    use crate::oracle::TokenOracle;
    use crate::testing::CharOracle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};

    const SAMPLE: &str = "Hello, world! This is a test.";

    fn truncator(oracle: Arc<CharOracle>, budget: usize) -> AdaptiveTruncator {
        let memo = Arc::new(MemoizedOracle::new(oracle, 1_000).unwrap());
        let calibrator = Arc::new(OverheadCalibrator::new(memo));
        AdaptiveTruncator::new(calibrator, budget).unwrap()
    }

    fn mock_tokens(text: &str) -> usize {
        text.chars().count() / 4
    }

    #[test]
    fn test_budget_must_cover_baseline() {
        let memo = Arc::new(MemoizedOracle::new(Arc::new(CharOracle::new(0)), 10).unwrap());
        let calibrator = Arc::new(OverheadCalibrator::new(memo));
        assert!(matches!(
            AdaptiveTruncator::new(calibrator, 1),
            Err(Error::InvalidCallBudget { min: 2, got: 1 })
        ));
    }

    #[tokio::test]
    async fn test_reference_example() {
        let oracle = Arc::new(CharOracle::new(7));
        let truncator = truncator(oracle.clone(), DEFAULT_CALL_BUDGET);

        let result = truncator.truncate(SAMPLE, 3, "m").await.unwrap();

        assert!(result.exact);
        assert_eq!(result.tokens, 3);
        assert_eq!(result.text, "Hello, world! T");
        assert_eq!(result.chars, 15);
        assert_eq!(mock_tokens(&SAMPLE[..result.chars + 1]), 4);
        assert_eq!(result.oracle_calls, oracle.calls());
        assert!(result.oracle_calls <= DEFAULT_CALL_BUDGET);
    }

    #[tokio::test]
    async fn test_zero_target_and_empty_text_skip_oracle() {
        let oracle = Arc::new(CharOracle::new(7));
        let truncator = truncator(oracle.clone(), DEFAULT_CALL_BUDGET);

        let result = truncator.truncate(SAMPLE, 0, "m").await.unwrap();
        assert_eq!(result, TruncationResult::empty());

        let result = truncator.truncate("", 100, "m").await.unwrap();
        assert_eq!(result, TruncationResult::empty());

        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_full_text_short_circuit() {
        let oracle = Arc::new(CharOracle::new(7));
        let truncator = truncator(oracle.clone(), DEFAULT_CALL_BUDGET);

        let result = truncator.truncate(SAMPLE, 7, "m").await.unwrap();

        assert_eq!(result.text, SAMPLE);
        assert_eq!(result.tokens, 7);
        assert!(result.exact);
        // Calibration plus baseline
        assert_eq!(result.oracle_calls, 2);

        let again = truncator.truncate(SAMPLE, 100, "m").await.unwrap();
        assert_eq!(again.text, SAMPLE);
        assert_eq!(again.oracle_calls, 0);
    }

    #[tokio::test]
    async fn test_every_target_is_exact_and_within_budget() {
        let text = "This is a sample text that will be truncated. ".repeat(50);
        let total = mock_tokens(&text);

        for target in 1..total {
            let oracle = Arc::new(CharOracle::new(5));
            let truncator = truncator(oracle.clone(), DEFAULT_CALL_BUDGET);

            let result = truncator.truncate(&text, target, "m").await.unwrap();

            assert!(text.starts_with(&result.text));
            assert_eq!(mock_tokens(&result.text), result.tokens);
            assert!(result.tokens <= target, "target {target}");
            assert!(oracle.calls() <= DEFAULT_CALL_BUDGET, "target {target}");
            assert_eq!(result.oracle_calls, oracle.calls());
            assert!(result.exact, "target {target}");
            let next = text.chars().take(result.chars + 1).collect::<String>();
            assert!(mock_tokens(&next) > target, "target {target}");
        }
    }

    #[tokio::test]
    async fn test_large_text_to_few_tokens() {
        let text = "This is an extremely long text designed to test the algorithm's \
                    efficiency when truncating from a very large input to a very small output. "
            .repeat(200);
        let oracle = Arc::new(CharOracle::new(7));
        let truncator = truncator(oracle.clone(), DEFAULT_CALL_BUDGET);

        let result = truncator.truncate(&text, 10, "m").await.unwrap();

        assert!(result.exact);
        assert_eq!(result.tokens, 10);
        assert_eq!(result.chars, 43);
        assert!(oracle.calls() <= DEFAULT_CALL_BUDGET);
    }

    #[tokio::test]
    async fn test_small_budget_degrades_to_approximate() {
        let text = "A".repeat(2_000);

        for budget in MIN_CALL_BUDGET..8 {
            let oracle = Arc::new(CharOracle::new(7));
            let truncator = truncator(oracle.clone(), budget);

            let result = truncator.truncate(&text, 100, "m").await.unwrap();

            assert!(oracle.calls() <= budget, "budget {budget}");
            assert!(result.tokens <= 100);
            assert_eq!(mock_tokens(&result.text), result.tokens);
        }

        let oracle = Arc::new(CharOracle::new(7));
        let result = truncator(oracle.clone(), MIN_CALL_BUDGET)
            .truncate(&text, 100, "m")
            .await
            .unwrap();
        assert!(!result.exact);
        assert_eq!(result.text, "");
        assert_eq!(oracle.calls(), 2);
    }

    #[tokio::test]
    async fn test_never_splits_graphemes() {
        let text = "e\u{301}".repeat(20);
        let oracle = Arc::new(CharOracle::new(0));
        let truncator = truncator(oracle, DEFAULT_CALL_BUDGET);

        let result = truncator.truncate(&text, 3, "m").await.unwrap();

        assert!(result.exact);
        assert_eq!(result.chars, 14);
        assert_eq!(result.tokens, 3);
        assert!(result.text.ends_with('\u{301}'));
    }

    #[tokio::test]
    async fn test_short_texts() {
        let oracle = Arc::new(CharOracle::new(0));
        let truncator = truncator(oracle, DEFAULT_CALL_BUDGET);

        let result = truncator.truncate("abc", 1, "m").await.unwrap();
        assert_eq!(result.text, "abc");

        let result = truncator.truncate("abcdefgh", 1, "m").await.unwrap();
        assert!(result.exact);
        assert_eq!(result.text, "abcdefg");
    }

    #[tokio::test]
    async fn test_oracle_failure_aborts() {
        let text = "abcdefghijklmnopqrstuvwxyz".repeat(4);
        let oracle = Arc::new(CharOracle::new(7).failing_on(&text));
        let truncator = truncator(oracle, DEFAULT_CALL_BUDGET);

        let err = truncator.truncate(&text, 5, "m").await.unwrap_err();
        assert!(matches!(err, Error::Oracle(_)));
    }

    /// Drops every cached count and overhead whenever it measures content,
    /// like a concurrent `clear_cache` landing mid-search.
    #[derive(Default)]
    struct ClearingOracle {
        calibrator: OnceLock<Weak<OverheadCalibrator>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenOracle for ClearingOracle {
        async fn measure(&self, text: &str, _model: &str) -> std::result::Result<usize, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !text.is_empty() {
                if let Some(calibrator) = self.calibrator.get().and_then(Weak::upgrade) {
                    calibrator.memo().clear();
                    calibrator.reset();
                }
            }
            Ok(text.chars().count() / 4 + 7)
        }
    }

    #[tokio::test]
    async fn test_budget_holds_when_cache_cleared_mid_search() {
        let oracle = Arc::new(ClearingOracle::default());
        let memo = Arc::new(MemoizedOracle::new(oracle.clone(), 1_000).unwrap());
        let calibrator = Arc::new(OverheadCalibrator::new(memo));
        oracle
            .calibrator
            .set(Arc::downgrade(&calibrator))
            .unwrap();
        let truncator = AdaptiveTruncator::new(calibrator, 6).unwrap();

        let text = "word ".repeat(400);
        let result = truncator.truncate(&text, 10, "m").await.unwrap();

        // Every probe now pays for calibration and content
        assert_eq!(result.oracle_calls, 6);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 6);
        assert!(!result.exact);
        assert!(text.starts_with(&result.text));
        assert!(result.tokens <= 10);
        assert_eq!(mock_tokens(&result.text), result.tokens);
    }
}
