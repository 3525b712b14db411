use thiserror::Error;

/// Failures reported by a token-count oracle.
///
/// These are surfaced to callers unchanged: the cache never stores them and a
/// truncation aborts on the first one.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Model {0} is not supported by the token-count oracle")]
    InvalidModel(String),

    #[error("Unable to locate credentials: {0}")]
    MissingCredentials(String),

    #[error("No region configured. Use --region or configure a default region.")]
    MissingRegion,

    #[error("Token-count oracle is throttling requests: {0}")]
    Throttled(String),

    #[error("Token-count oracle error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("Cache capacity must be greater than zero")]
    InvalidCapacity,

    #[error("Call budget must allow at least {min} oracle calls, got {got}")]
    InvalidCallBudget { min: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
