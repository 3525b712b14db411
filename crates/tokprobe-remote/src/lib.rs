//! Remote token-count oracles

pub mod http;

pub use http::{HttpOracle, HttpOracleConfig};
