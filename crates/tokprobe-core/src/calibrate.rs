//! Per-model overhead calibration
//!
//! Oracles count the structure they wrap content in (message envelopes, role
//! markers). The calibrator measures that overhead once per model so callers
//! only ever see content tokens.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::cache::{CacheKey, MemoizedOracle};
use crate::error::{Error, Result};

/// A content-only count together with the oracle calls it cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measured {
    pub tokens: usize,
    pub oracle_calls: usize,
}

pub struct OverheadCalibrator {
    memo: Arc<MemoizedOracle>,
    overheads: DashMap<String, Arc<OnceCell<usize>>>,
}

impl OverheadCalibrator {
    pub fn new(memo: Arc<MemoizedOracle>) -> Self {
        Self {
            memo,
            overheads: DashMap::new(),
        }
    }

    pub fn memo(&self) -> &MemoizedOracle {
        &self.memo
    }

    /// Overhead for `model`, probing the oracle on first use
    pub async fn overhead(&self, model: &str) -> Result<usize> {
        Ok(self.calibrate(model).await?.tokens)
    }

    /// Overhead for `model` and whether obtaining it cost an oracle call.
    ///
    /// Concurrent first callers for the same model share a single probe; only
    /// the caller that performed it sees `oracle_calls == 1`. A failed probe
    /// is not remembered.
    pub async fn calibrate(&self, model: &str) -> Result<Measured> {
        let cell = self
            .overheads
            .entry(model.to_string())
            .or_default()
            .value()
            .clone();

        let mut oracle_calls = 0;
        let calls = &mut oracle_calls;
        let overhead = cell
            .get_or_try_init(|| async move {
                let probe = self.memo.oracle().calibration_probe();
                let lookup = self
                    .memo
                    .measure(CacheKey::calibration(probe.text, model), probe.text)
                    .await?;
                if lookup.fresh {
                    *calls += 1;
                }
                if lookup.tokens < probe.content_tokens {
                    tracing::warn!(
                        model,
                        raw = lookup.tokens,
                        probe_tokens = probe.content_tokens,
                        "calibration probe counted fewer tokens than its own content"
                    );
                }
                let overhead = lookup.tokens.saturating_sub(probe.content_tokens);
                tracing::debug!(model, overhead, "calibrated oracle overhead");
                Ok::<usize, Error>(overhead)
            })
            .await?;

        Ok(Measured {
            tokens: *overhead,
            oracle_calls,
        })
    }

    /// Content-only token count for `text`
    pub async fn content_count(&self, text: &str, model: &str) -> Result<usize> {
        Ok(self.measure_content(text, model).await?.tokens)
    }

    /// Content-only token count and the oracle calls it cost, calibration included
    pub async fn measure_content(&self, text: &str, model: &str) -> Result<Measured> {
        let calibration = self.calibrate(model).await?;
        let measured = self
            .measure_with_overhead(text, model, calibration.tokens)
            .await?;

        Ok(Measured {
            tokens: measured.tokens,
            oracle_calls: calibration.oracle_calls + measured.oracle_calls,
        })
    }

    /// Content-only count using an overhead the caller already holds.
    ///
    /// Costs at most one oracle call, even if the overheads were reset since
    /// `overhead` was obtained.
    pub async fn measure_with_overhead(
        &self,
        text: &str,
        model: &str,
        overhead: usize,
    ) -> Result<Measured> {
        let lookup = self
            .memo
            .measure(CacheKey::content(text, model), text)
            .await?;

        Ok(Measured {
            tokens: self.strip_overhead(lookup.tokens, overhead, model),
            oracle_calls: usize::from(lookup.fresh),
        })
    }

    /// Content-only count answered purely from cache, if possible
    pub fn cached_content(&self, text: &str, model: &str) -> Option<usize> {
        let overhead = self.overheads.get(model)?.get().copied()?;
        let raw = self.memo.cached(&CacheKey::content(text, model))?;
        Some(self.strip_overhead(raw, overhead, model))
    }

    /// Forget every calibrated overhead
    pub fn reset(&self) {
        self.overheads.clear();
    }

    fn strip_overhead(&self, raw: usize, overhead: usize, model: &str) -> usize {
        if raw < overhead {
            tracing::warn!(
                model,
                raw,
                overhead,
                "oracle count below calibrated overhead, clamping to zero"
            );
        }
        raw.saturating_sub(overhead)
    }
}
