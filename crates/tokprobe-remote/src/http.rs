//! Count-tokens oracle over HTTP
//!
//! Speaks the Anthropic-style `POST /v1/messages/count_tokens` protocol: the
//! text is sent as a single user message and the response carries
//! `input_tokens`, which includes the message envelope. That envelope is what
//! overhead calibration strips off again.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokprobe_core::{CalibrationProbe, OracleError, TokenOracle};

const API_VERSION: &str = "2023-06-01";
const REGION_PLACEHOLDER: &str = "{region}";

#[derive(Debug, Clone)]
pub struct HttpOracleConfig {
    /// Base URL; may contain `{region}`
    pub endpoint: String,
    pub region: Option<String>,
    pub api_key: Option<String>,
    /// Name of the variable the key was expected in, for error messages
    pub api_key_env: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct CountTokensRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CountTokensResponse {
    input_tokens: usize,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct HttpOracle {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpOracle {
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        let base = resolve_endpoint(&config.endpoint, config.region.as_deref())?;
        let api_key = config
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                OracleError::MissingCredentials(format!(
                    "set {} to an API key for {}",
                    config.api_key_env, base
                ))
            })?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("tokprobe/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/v1/messages/count_tokens", base.trim_end_matches('/')),
            api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenOracle for HttpOracle {
    async fn measure(&self, text: &str, model: &str) -> Result<usize, OracleError> {
        let request = CountTokensRequest {
            model,
            messages: [Message {
                role: "user",
                content: text,
            }],
        };

        tracing::trace!(model, chars = text.len(), "requesting token count");
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Transport(format!("Failed to reach {}: {}", self.url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Transport(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify(status.as_u16(), &body, model));
        }

        let parsed: CountTokensResponse = serde_json::from_str(&body)
            .map_err(|e| OracleError::InvalidResponse(format!("{}: {}", e, body)))?;
        Ok(parsed.input_tokens)
    }

    /// Count-tokens endpoints reject empty content
    fn calibration_probe(&self) -> CalibrationProbe {
        CalibrationProbe {
            text: "A",
            content_tokens: 1,
        }
    }
}

/// Substitute the region into `endpoint` when it asks for one
fn resolve_endpoint(endpoint: &str, region: Option<&str>) -> Result<String, OracleError> {
    if !endpoint.contains(REGION_PLACEHOLDER) {
        return Ok(endpoint.to_string());
    }
    match region.map(str::trim).filter(|r| !r.is_empty()) {
        Some(region) => Ok(endpoint.replace(REGION_PLACEHOLDER, region)),
        None => Err(OracleError::MissingRegion),
    }
}

/// Map a non-success response onto an oracle error kind
fn classify(status: u16, body: &str, model: &str) -> OracleError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        429 => OracleError::Throttled(message),
        401 | 403 => OracleError::MissingCredentials(message),
        400 | 404 if message.to_lowercase().contains("model") => {
            OracleError::InvalidModel(model.to_string())
        }
        _ => OracleError::Api { status, message },
    }
}
