//! Token-count oracle abstraction

use async_trait::async_trait;

use crate::error::OracleError;

/// Text used to measure the structural overhead an oracle adds around content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationProbe {
    /// Text sent to the oracle
    pub text: &'static str,
    /// Tokens the text itself is known to contribute
    pub content_tokens: usize,
}

impl CalibrationProbe {
    /// The empty string, which contributes no content tokens.
    pub const EMPTY: Self = Self {
        text: "",
        content_tokens: 0,
    };
}

impl Default for CalibrationProbe {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Remote source of truth for token counts.
///
/// Implementations must be deterministic for identical `(text, model)` pairs;
/// the cache in front of them relies on it.
#[async_trait]
pub trait TokenOracle: Send + Sync {
    /// Raw token count for `text` under `model`, including any wrapping overhead
    async fn measure(&self, text: &str, model: &str) -> Result<usize, OracleError>;

    /// Probe used to calibrate per-model overhead.
    ///
    /// Oracles that reject empty input should override this with a short text
    /// of known size.
    fn calibration_probe(&self) -> CalibrationProbe {
        CalibrationProbe::EMPTY
    }
}
