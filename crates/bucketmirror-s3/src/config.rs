//! Where the rule table comes from.
//!
//! The rule table is JSON fetched from an HTTP(S) URL, carried base64-encoded
//! in an environment variable, or read from a local file.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use bucketmirror_core::{ReplError, Result, RuleTable};

/// Environment variable holding the configuration URL.
pub const CONFIG_URL_VAR: &str = "CONFIG_URL";
/// Environment variable holding the base64-encoded configuration.
pub const CONFIG_VAR: &str = "CONFIG";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

fn config_error(msg: impl Into<String>) -> ReplError {
    ReplError::Config { msg: msg.into() }
}

/// Location of the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Fetched with GET from an `http` or `https` URL.
    Url(String),
    /// Base64-encoded JSON.
    Inline(String),
    /// Local JSON file.
    File(PathBuf),
}

impl ConfigSource {
    /// Picks a source from `CONFIG_URL` and `CONFIG`; the URL wins.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            std::env::var(CONFIG_URL_VAR).ok(),
            std::env::var(CONFIG_VAR).ok(),
        )
    }

    /// Same as [`ConfigSource::from_env`] with the values passed in.
    pub fn from_vars(config_url: Option<String>, config: Option<String>) -> Result<Self> {
        match (config_url, config) {
            (Some(url), _) if !url.trim().is_empty() => Ok(Self::Url(url.trim().to_string())),
            (_, Some(inline)) => Ok(Self::Inline(inline)),
            _ => Err(config_error("unable to get configuration")),
        }
    }

    /// Retrieves the raw configuration bytes.
    pub async fn fetch(&self) -> Result<Vec<u8>> {
        match self {
            Self::Url(raw) => fetch_url(raw).await,
            Self::Inline(encoded) => STANDARD
                .decode(encoded.trim())
                .map_err(|e| config_error(format!("Base64 decode error: {}", e))),
            Self::File(path) => tokio::fs::read(path)
                .await
                .map_err(|e| config_error(format!("reading {}: {}", path.display(), e))),
        }
    }

    /// Retrieves, parses and validates the rule table.
    pub async fn load(&self) -> Result<RuleTable> {
        let data = self.fetch().await?;
        let rules = RuleTable::from_json(&data)?;
        info!("Loaded {} replication rules from {}", rules.len(), self);
        Ok(rules)
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => write!(f, "url {}", url),
            Self::Inline(_) => write!(f, "inline configuration"),
            Self::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Parses a configuration URL. A URL without a scheme is taken as `https`.
pub fn parse_config_url(raw: &str) -> Result<reqwest::Url> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = reqwest::Url::parse(&candidate)
        .map_err(|e| config_error(format!("invalid configuration url {}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(config_error(format!("unsupported protocol scheme {}", other))),
    }
}

async fn fetch_url(raw: &str) -> Result<Vec<u8>> {
    let url = parse_config_url(raw)?;
    debug!("Fetching configuration from {}", url);

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| config_error(format!("http client: {}", e)))?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| config_error(format!("GET {}: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(config_error(format!(
            "GET {}: HTTP {}",
            url,
            response.status()
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| config_error(format!("reading body from {}: {}", url, e)))?;
    Ok(body.to_vec())
}
