//! Token counting and truncation backed by a remote token-count oracle
//!
//! This crate contains:
//! - The oracle abstraction ([`TokenOracle`])
//! - An LRU memo in front of it ([`MemoizedOracle`])
//! - Per-model overhead calibration ([`OverheadCalibrator`])
//! - The adaptive prefix search ([`AdaptiveTruncator`])
//! - A facade tying them together ([`TokenCounter`])

pub mod cache;
pub mod calibrate;
pub mod counter;
pub mod error;
pub mod oracle;
pub mod ratio;
pub mod truncate;

#[cfg(test)]
mod testing;

pub use cache::{CacheInfo, CacheKey, MemoizedOracle};
pub use calibrate::{Measured, OverheadCalibrator};
pub use counter::{CounterOptions, TokenCounter};
pub use error::{Error, OracleError, Result};
pub use oracle::{CalibrationProbe, TokenOracle};
pub use ratio::RatioEstimator;
pub use truncate::{AdaptiveTruncator, TruncationResult};
