//! Count or truncate the assembled input

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokprobe_config::Config;
use tokprobe_core::{CounterOptions, TokenCounter};
use tokprobe_remote::{HttpOracle, HttpOracleConfig};

use crate::cli::Cli;

pub async fn handle(cli: Cli) -> Result<()> {
    let text = super::read_text(&cli.prompt, cli.input.as_deref(), std::io::stdin())?;

    let config = load_config(cli.config.as_deref())?;
    let api_key = std::env::var(&config.oracle.api_key_env).ok();

    run(
        &cli,
        config,
        api_key,
        &text,
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .await
}

/// Count or truncate `text`, writing the result to `out` and metadata to `err`
async fn run(
    cli: &Cli,
    mut config: Config,
    api_key: Option<String>,
    text: &str,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<()> {
    if let Some(region) = &cli.region {
        config.oracle.region = Some(region.clone());
    }
    let model = cli.model.clone().unwrap_or_else(|| config.model.clone());

    let counter = build_counter(&config, api_key)?;

    match cli.truncate {
        Some(max_tokens) => {
            let result = counter
                .truncate_with_metadata(text, max_tokens, &model)
                .await?;
            out.write_all(result.text.as_bytes())?;
            out.flush()?;

            if cli.metadata {
                let metadata = serde_json::json!({
                    "model": model,
                    "chars": result.chars,
                    "tokens": result.tokens,
                    "oracle_calls": result.oracle_calls,
                    "call_budget": config.call_budget,
                    "exact": result.exact,
                    "cache": counter.cache_info(),
                });
                writeln!(err, "{}", serde_json::to_string_pretty(&metadata)?)?;
            }
        }
        None => {
            let tokens = counter.count_tokens(text, &model).await?;
            writeln!(out, "{}", tokens)?;

            if cli.metadata {
                let metadata = serde_json::json!({
                    "model": model,
                    "tokens": tokens,
                    "cache": counter.cache_info(),
                });
                writeln!(err, "{}", serde_json::to_string_pretty(&metadata)?)?;
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Config::load(),
    }
}

fn build_counter(config: &Config, api_key: Option<String>) -> Result<TokenCounter> {
    let oracle = HttpOracle::new(HttpOracleConfig {
        endpoint: config.oracle.endpoint.clone(),
        region: config.oracle.region.clone(),
        api_key,
        api_key_env: config.oracle.api_key_env.clone(),
        timeout: Duration::from_secs(config.oracle.timeout_secs),
    })?;
    tracing::debug!(url = oracle.url(), "using count-tokens oracle");

    let counter = TokenCounter::new(
        Arc::new(oracle),
        CounterOptions {
            cache_capacity: config.cache_capacity,
            call_budget: config.call_budget,
        },
    )?;
    Ok(counter)
}
