use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Geo ranking knobs used by the scheduler's geographic pass
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeoRankerConfig {
    /// Rank boost when a node shares the origin region
    pub local_boost: i64,
    /// Rank boost when a node shares the origin continent
    pub continent_boost: i64,
    /// Rank penalty applied per 50ms of inter-region latency
    pub latency_penalty: i64,
    /// Drop nodes whose latency exceeds the request's maximum
    pub exclude_high_latency: bool,
}

impl Default for GeoRankerConfig {
    fn default() -> Self {
        Self {
            local_boost: 50,
            continent_boost: 20,
            latency_penalty: 5,
            exclude_high_latency: true,
        }
    }
}

/// Atlas runtime configuration, loaded from `Atlasfile.toml`.
///
/// Interval-style keys are integers: `snapshot_interval`, `latency_ttl`,
/// `probe_timeout` and `metadata_timeout` are seconds, `latency_default`
/// is milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Explicitly configured region; takes precedence over every detector
    pub region: Option<String>,
    /// Explicitly configured zone
    pub zone: Option<String>,
    /// Region used when all detection fails
    pub default_region: String,
    /// Cache TTL for the global capacity snapshot, seconds
    pub snapshot_interval: u64,
    /// Latency-matrix entry TTL, seconds
    pub latency_ttl: u64,
    /// Default latency for unknown region pairs, milliseconds
    pub latency_default: u64,
    /// Timeout for latency and geoip probes, seconds
    pub probe_timeout: u64,
    /// Timeout for cloud-metadata probes, seconds
    pub metadata_timeout: u64,
    /// Base URL of the ipinfo-style geolocation service
    pub geoip_endpoint: String,
    /// Balance granted to newly created ledger accounts
    pub initial_credits: f64,
    pub geo_ranker: GeoRankerConfig,
    /// Log level directive when RUST_LOG is unset
    pub log_level: String,
    /// Optional log file; console-only when unset
    pub log_file: Option<PathBuf>,
    #[serde(skip)]
    pub verbose: bool,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            region: None,
            zone: None,
            default_region: "default".to_string(),
            snapshot_interval: 10,
            latency_ttl: 300,
            latency_default: 200,
            probe_timeout: 5,
            metadata_timeout: 2,
            geoip_endpoint: "https://ipinfo.io".to_string(),
            initial_credits: 1000.0,
            geo_ranker: GeoRankerConfig::default(),
            log_level: "info".to_string(),
            log_file: None,
            verbose: false,
        }
    }
}

impl AtlasConfig {
    /// Load configuration from the default locations: `./Atlasfile.toml`
    /// first, then the user config directory, else built-in defaults.
    pub fn load() -> Result<Self> {
        let cwd_path = std::env::current_dir()
            .unwrap_or_default()
            .join("Atlasfile.toml");
        if cwd_path.exists() {
            return Self::load_from(&cwd_path);
        }

        let config_path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("atlas")
            .join("Atlasfile.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read Atlasfile at {:?}", path.as_ref()))?;

        let config: AtlasConfig =
            toml::from_str(&content).with_context(|| "Failed to parse Atlasfile")?;

        Ok(config)
    }

    /// Save configuration to a path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize Atlasfile")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write Atlasfile at {:?}", path.as_ref()))?;

        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval)
    }

    pub fn latency_ttl(&self) -> Duration {
        Duration::from_secs(self.latency_ttl)
    }

    pub fn latency_default(&self) -> Duration {
        Duration::from_millis(self.latency_default)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AtlasConfig::default();
        assert_eq!(config.snapshot_interval(), Duration::from_secs(10));
        assert_eq!(config.latency_ttl(), Duration::from_secs(300));
        assert_eq!(config.latency_default(), Duration::from_millis(200));
        assert_eq!(config.metadata_timeout(), Duration::from_secs(2));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.default_region, "default");
        assert_eq!(config.initial_credits, 1000.0);
        assert_eq!(config.geo_ranker.local_boost, 50);
        assert_eq!(config.geo_ranker.continent_boost, 20);
        assert_eq!(config.geo_ranker.latency_penalty, 5);
        assert!(config.geo_ranker.exclude_high_latency);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: AtlasConfig = toml::from_str(
            r#"
            region = "eu-west"
            snapshot_interval = 30

            [geo_ranker]
            local_boost = 80
            "#,
        )
        .unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west"));
        assert_eq!(config.snapshot_interval, 30);
        assert_eq!(config.geo_ranker.local_boost, 80);
        // untouched keys keep their defaults
        assert_eq!(config.geo_ranker.continent_boost, 20);
        assert_eq!(config.latency_default, 200);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Atlasfile.toml");

        let mut config = AtlasConfig::default();
        config.region = Some("ap-southeast".to_string());
        config.initial_credits = 250.0;
        config.save(&path).unwrap();

        let loaded = AtlasConfig::load_from(&path).unwrap();
        assert_eq!(loaded.region.as_deref(), Some("ap-southeast"));
        assert_eq!(loaded.initial_credits, 250.0);
    }
}
