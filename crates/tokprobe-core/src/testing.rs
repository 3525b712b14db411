//! Deterministic oracles for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::OracleError;
use crate::oracle::TokenOracle;

/// Counts one token per four characters plus a fixed overhead
pub struct CharOracle {
    overhead: usize,
    calls: AtomicUsize,
    fail_on: Option<String>,
    latency: Option<Duration>,
}

impl CharOracle {
    pub fn new(overhead: usize) -> Self {
        Self {
            overhead,
            calls: AtomicUsize::new(0),
            fail_on: None,
            latency: None,
        }
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenOracle for CharOracle {
    async fn measure(&self, text: &str, _model: &str) -> Result<usize, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_on.as_deref() == Some(text) {
            return Err(OracleError::Throttled("rate exceeded".to_string()));
        }
        Ok(text.chars().count() / 4 + self.overhead)
    }
}
