//! CLI command implementations

use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Fetch `/status` from a running bridge and print it.
pub async fn status(url: &str, timeout_ms: u64) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!(
            "Invalid url: '{}'\n\n\
             Expected a base URL like:\n  \
             http://127.0.0.1:3002",
            url
        );
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .context("Failed to build HTTP client")?;

    let endpoint = format!("{}/status", url.trim_end_matches('/'));
    let response = client
        .get(&endpoint)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", endpoint))?;

    if !response.status().is_success() {
        bail!("{} returned {}", endpoint, response.status());
    }

    let body: serde_json::Value = response
        .json()
        .await
        .context("Failed to parse status response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Print the effective configuration and where it came from.
pub fn show_config(config_path: Option<&std::path::Path>) -> Result<()> {
    let (config, sources) = tetherconf::TetherConfig::load_with_sources_from(config_path)
        .context("Failed to load configuration")?;

    if sources.files.is_empty() {
        println!("# no config files found, using defaults");
    }
    for file in &sources.files {
        println!("# loaded: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# env override: {}", var);
    }
    println!("{}", config.to_toml());
    Ok(())
}
