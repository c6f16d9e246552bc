use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::errors::VmdeckError;

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_dir: PathBuf,
    pub api_url: Url,
    pub log_path: PathBuf,
    pub default_node: Option<String>,
    pub alerts: AlertTiming,
}

/// How long an alert stays fully visible, and how long its fade-out lasts
/// before it is dropped from the shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTiming {
    pub ttl: Duration,
    pub fade: Duration,
}

impl Default for AlertTiming {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(5_000),
            fade: Duration::from_millis(150),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let base_dir = env::var("VMDECK_HOME")
            .map(PathBuf::from)
            .ok()
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(env::temp_dir)
                    .join("vmdeck")
            });
        let raw_url = env::var("VMDECK_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = parse_api_url(&raw_url)?;
        let default_node = env::var("VMDECK_NODE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let defaults = AlertTiming::default();
        let alerts = AlertTiming {
            ttl: Duration::from_millis(
                env_u64("VMDECK_ALERT_TTL_MS", defaults.ttl.as_millis() as u64).max(1),
            ),
            fade: Duration::from_millis(env_u64(
                "VMDECK_ALERT_FADE_MS",
                defaults.fade.as_millis() as u64,
            )),
        };

        let config = Self {
            log_path: base_dir.join("vmdeck.log"),
            base_dir,
            api_url,
            default_node,
            alerts,
        };
        config.ensure_layout()?;
        Ok(config)
    }

    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("failed to create {}", self.base_dir.display()))?;
        Ok(())
    }

    /// Explicit `--node` wins over `VMDECK_NODE`.
    pub fn node_filter(&self, explicit: Option<String>) -> Option<String> {
        explicit
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.default_node.clone())
    }
}

pub fn parse_api_url(raw: &str) -> Result<Url, VmdeckError> {
    let trimmed = raw.trim();
    Url::parse(trimmed).map_err(|source| VmdeckError::InvalidApiUrl {
        url: trimmed.to_string(),
        source,
    })
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
