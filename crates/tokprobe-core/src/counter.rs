//! Token counter facade

use std::sync::Arc;

use crate::cache::{CacheInfo, DEFAULT_CACHE_CAPACITY, MemoizedOracle};
use crate::calibrate::OverheadCalibrator;
use crate::error::Result;
use crate::oracle::TokenOracle;
use crate::truncate::{AdaptiveTruncator, DEFAULT_CALL_BUDGET, TruncationResult};

/// Construction options for [`TokenCounter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOptions {
    /// Maximum number of cached oracle counts
    pub cache_capacity: usize,
    /// Maximum oracle calls per truncation
    pub call_budget: usize,
}

impl Default for CounterOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            call_budget: DEFAULT_CALL_BUDGET,
        }
    }
}

/// Counts and truncates text using a remote token-count oracle.
///
/// Each counter owns its cache; clones of the `Arc` it is usually wrapped in
/// share it safely across tasks.
pub struct TokenCounter {
    memo: Arc<MemoizedOracle>,
    calibrator: Arc<OverheadCalibrator>,
    truncator: AdaptiveTruncator,
}

impl TokenCounter {
    pub fn new(oracle: Arc<dyn TokenOracle>, options: CounterOptions) -> Result<Self> {
        let memo = Arc::new(MemoizedOracle::new(oracle, options.cache_capacity)?);
        let calibrator = Arc::new(OverheadCalibrator::new(memo.clone()));
        let truncator = AdaptiveTruncator::new(calibrator.clone(), options.call_budget)?;
        Ok(Self {
            memo,
            calibrator,
            truncator,
        })
    }

    /// Content-only token count, oracle overhead removed
    pub async fn count_tokens(&self, text: &str, model: &str) -> Result<usize> {
        self.calibrator.content_count(text, model).await
    }

    /// Longest prefix of `text` within `max_tokens`
    pub async fn truncate(&self, text: &str, max_tokens: usize, model: &str) -> Result<String> {
        Ok(self.truncate_with_metadata(text, max_tokens, model).await?.text)
    }

    /// Like [`TokenCounter::truncate`], with search diagnostics
    pub async fn truncate_with_metadata(
        &self,
        text: &str,
        max_tokens: usize,
        model: &str,
    ) -> Result<TruncationResult> {
        self.truncator.truncate(text, max_tokens, model).await
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.memo.cache_info()
    }

    /// Drop cached counts and calibrated overheads
    pub fn clear_cache(&self) {
        self.memo.clear();
        self.calibrator.reset();
    }
}
