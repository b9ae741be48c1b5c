use serde::Deserialize;
use std::{fs, path::PathBuf};

use crate::forecast::BlendPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config JSON in {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Where and how to reach the live air-quality feed.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    /// WAQI station selector, e.g. `geo:<lat>;<lon>` or a city slug.
    pub city: String,
    pub token: String,
    pub location_name: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.waqi.info/feed".to_string(),
            city: "geo:31.5204;74.3587".to_string(),
            token: "demo".to_string(),
            location_name: "Lahore, Pakistan".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub model_path: PathBuf,
    pub feature_path: PathBuf,
    /// Index used when the live feed is unavailable.
    pub fallback_aqi: i64,
    pub blend: BlendPolicy,
    /// Fixed RNG seed; `None` draws a fresh seed per run.
    pub seed: Option<u64>,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            model_path: PathBuf::from("model_registry/rf_model.json"),
            feature_path: PathBuf::from("model_registry/feature_columns.json"),
            fallback_aqi: 160,
            blend: BlendPolicy::default(),
            seed: None,
            port: 8080,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Defaults, overlaid by the file named in `AQI_CONFIG` and then `PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("AQI_CONFIG") {
            Ok(path) => {
                tracing::info!("loading config from {}", path);
                Self::load(&path)?
            }
            Err(_) => Self::default(),
        };
        if let Some(port) = std::env::var("PORT").ok().and_then(|s| s.parse().ok()) {
            cfg.port = port;
        }
        Ok(cfg)
    }
}
