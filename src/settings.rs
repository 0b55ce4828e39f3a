//! Process-wide cache settings.
//!
//! Two values are read once per process, at first use:
//!
//! | Key | Env override | Default |
//! |-----|--------------|---------|
//! | `cache.ttl` (seconds) | `ENDPOINT_CACHE_TTL_SECS` | `3600` |
//! | `cache.uri` | `ENDPOINT_CACHE_URI` | `memory://` |
//!
//! A YAML file can supply both values under a top-level `cache:` section;
//! its path is taken from `ENDPOINT_CACHE_CONFIG`. Environment variables
//! win over the file.
//!
//! ```yaml
//! cache:
//!   ttl: 600
//!   uri: "memory://?max_entries=5000"
//! ```

use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "ENDPOINT_CACHE_CONFIG";
pub const TTL_ENV: &str = "ENDPOINT_CACHE_TTL_SECS";
pub const URI_ENV: &str = "ENDPOINT_CACHE_URI";

const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_URI: &str = "memory://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Default freshness lifetime for endpoints without an explicit TTL.
    pub ttl: Duration,
    /// Connection URI of the backing store.
    pub uri: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            uri: DEFAULT_URI.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    cache: CacheSection,
}

#[derive(Debug, Default, Deserialize)]
struct CacheSection {
    #[serde(default)]
    ttl: Option<u64>,
    #[serde(default)]
    uri: Option<String>,
}

impl CacheSettings {
    /// Parse settings from a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: SettingsFile = serde_yaml::from_str(yaml).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid settings document: {}", e),
                ErrorContext::new().with_source("settings"),
            )
        })?;
        let mut settings = Self::default();
        if let Some(ttl) = file.cache.ttl {
            settings.ttl = Duration::from_secs(ttl);
        }
        if let Some(uri) = file.cache.uri {
            settings.uri = uri;
        }
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load settings from the optional config file, then apply env overrides.
    pub fn from_env() -> Result<Self> {
        let base = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        base.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = env::var(TTL_ENV) {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                Error::configuration_with_context(
                    format!("{} must be a whole number of seconds", TTL_ENV),
                    ErrorContext::new()
                        .with_field_path("cache.ttl")
                        .with_details(format!("{:?}: {}", raw, e))
                        .with_source("settings"),
                )
            })?;
            self.ttl = Duration::from_secs(secs);
        }
        if let Ok(uri) = env::var(URI_ENV) {
            if !uri.is_empty() {
                self.uri = uri;
            }
        }
        Ok(self)
    }
}

static GLOBAL_SETTINGS: once_cell::sync::Lazy<CacheSettings> =
    once_cell::sync::Lazy::new(|| match CacheSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load cache settings, using defaults: {}", e);
            CacheSettings::default()
        }
    });

/// Returns the process-wide settings, loading them on first access.
pub fn global() -> &'static CacheSettings {
    &GLOBAL_SETTINGS
}
