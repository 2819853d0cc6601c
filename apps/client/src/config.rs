use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Client configuration loaded from environment variables.
/// Every variable has a default, so a bare environment talks to a local service.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    /// The chat service has historically run on its own port.
    pub chat_url: String,
    pub timeout: Duration,
    pub download_dir: PathBuf,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let api_url = normalize_base_url(
            &std::env::var("CAREERPATH_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
        );
        let chat_url = std::env::var("CAREERPATH_CHAT_URL")
            .map(|url| normalize_base_url(&url))
            .unwrap_or_else(|_| api_url.clone());

        Ok(Config {
            api_url,
            chat_url,
            timeout: Duration::from_secs(
                std::env::var("CAREERPATH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse::<u64>()
                    .context("CAREERPATH_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            download_dir: std::env::var("CAREERPATH_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Configuration pointing both services at one base URL. Used by tests and embedders.
    pub fn for_base_url(base_url: &str) -> Self {
        let api_url = normalize_base_url(base_url);
        Config {
            chat_url: api_url.clone(),
            api_url,
            timeout: Duration::from_secs(120),
            download_dir: PathBuf::from("."),
            rust_log: "info".to_string(),
        }
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
