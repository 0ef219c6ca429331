// Deployment configuration, stored as a JSON file

use crate::error::ConfigError;
use crate::expand::ExpandContext;
use crate::snapshot::DEFAULT_TTL;
use crate::treemap::DEFAULT_MAX_PREFIX;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/vantage/config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub topology: TopologyConfig,
    pub treemap: TreemapConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            username: "neo4j".to_string(),
            password: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub path: String,
    pub ttl_hours: f64,
    /// Re-fetch top-level data when a stale snapshot was discarded on start-up.
    pub repopulate_on_stale: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: "~/.config/vantage/network-cache.json".to_string(),
            ttl_hours: DEFAULT_TTL.as_secs_f64() / 3600.0,
            repopulate_on_stale: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::try_from_secs_f64(self.ttl_hours * 3600.0).unwrap_or(DEFAULT_TTL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopologyConfig {
    /// Only this organization unit is fetched at top level when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub cidr_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_cidr: Option<String>,
    pub expand_timeout_secs: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            organization: None,
            cidr_base: String::new(),
            excluded_cidr: None,
            expand_timeout_secs: 30,
        }
    }
}

impl TopologyConfig {
    pub fn expand_timeout(&self) -> Duration {
        Duration::from_secs(self.expand_timeout_secs)
    }

    pub fn expand_context(&self) -> ExpandContext {
        ExpandContext {
            cidr_base: self.cidr_base.clone(),
            excluded_cidr: self.excluded_cidr.clone(),
            timeout: self.expand_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreemapConfig {
    pub supernet: String,
    pub max_prefix: u8,
}

impl Default for TreemapConfig {
    fn default() -> Self {
        Self {
            supernet: "10.0.0.0/16".to_string(),
            max_prefix: DEFAULT_MAX_PREFIX,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"topology": {"cidrBase": "10.20."}, "cache": {"ttlHours": 2}}"#)
                .unwrap();

        assert_eq!(config.topology.cidr_base, "10.20.");
        assert_eq!(config.topology.expand_timeout_secs, 30);
        assert_eq!(config.cache.ttl(), Duration::from_secs(7200));
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_default_ttl_is_one_day() {
        assert_eq!(CacheConfig::default().ttl(), DEFAULT_TTL);
    }

    #[test]
    fn test_negative_ttl_falls_back() {
        let cache = CacheConfig {
            ttl_hours: -1.0,
            ..CacheConfig::default()
        };
        assert_eq!(cache.ttl(), DEFAULT_TTL);
    }
}
