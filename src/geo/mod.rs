//! Location detection and the inter-region latency model.
//!
//! Self-location resolves through configuration, cloud-provider metadata,
//! IP geolocation, and finally the configured default region. Node regions
//! resolve through the same precedence, with node labels slotted between
//! metadata and geolocation.

use crate::config::AtlasConfig;
use crate::types::NodeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

mod cloud;
pub mod estimates;
mod latency;

pub use latency::{LatencyEntry, LatencyMatrix, LatencySource};

/// How long a detected self-location stays cached
const LOCATION_CACHE_TTL: Duration = Duration::from_secs(300);

/// Node labels recognized as region hints, in precedence order
const REGION_LABELS: [&str; 2] = ["region", "topology.kubernetes.io/region"];

/// Where a location record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Config,
    Metadata,
    Geoip,
    Labels,
    Default,
}

/// A resolved geographic location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub cloud_provider: Option<String>,
    #[serde(default)]
    pub cloud_region: Option<String>,
    pub source: LocationSource,
    pub detected_at: DateTime<Utc>,
}

impl Location {
    /// A bare region-only location
    pub fn from_region(region: impl Into<String>, source: LocationSource) -> Self {
        Self {
            region: region.into(),
            zone: None,
            country: None,
            city: None,
            latitude: None,
            longitude: None,
            isp: None,
            cloud_provider: None,
            cloud_region: None,
            source,
            detected_at: Utc::now(),
        }
    }

    /// The last-resort location
    pub fn fallback(default_region: &str) -> Self {
        Self::from_region(default_region, LocationSource::Default)
    }
}

/// ipinfo-style geolocation response
#[derive(Debug, Deserialize)]
struct GeoipResponse {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    city: Option<String>,
    /// "lat,lon"
    #[serde(default)]
    loc: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

/// Detects locations for the local process and for remote nodes.
/// Safe for concurrent callers; the self-location is cached for 5 minutes.
pub struct LocationDetector {
    client: reqwest::Client,
    configured_region: Option<String>,
    configured_zone: Option<String>,
    default_region: String,
    geoip_endpoint: String,
    metadata_timeout: Duration,
    probe_timeout: Duration,
    self_cache: Mutex<Option<(Location, Instant)>>,
    ip_cache: Mutex<HashMap<String, Location>>,
}

impl LocationDetector {
    pub fn new(config: &AtlasConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            configured_region: config.region.clone(),
            configured_zone: config.zone.clone(),
            default_region: config.default_region.clone(),
            geoip_endpoint: config.geoip_endpoint.trim_end_matches('/').to_string(),
            metadata_timeout: config.metadata_timeout(),
            probe_timeout: config.probe_timeout(),
            self_cache: Mutex::new(None),
            ip_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the local process location. Short-circuits on the first
    /// source that yields a result: configuration, cloud metadata, IP
    /// geolocation, then the default region.
    pub async fn detect_self(&self) -> Location {
        if let Some(region) = &self.configured_region {
            let mut location = Location::from_region(region.clone(), LocationSource::Config);
            location.zone = self.configured_zone.clone();
            return location;
        }

        if let Some((cached, at)) = self.self_cache.lock().unwrap().clone() {
            if at.elapsed() < LOCATION_CACHE_TTL {
                return cached;
            }
        }

        let location = self.detect_self_uncached().await;
        *self.self_cache.lock().unwrap() = Some((location.clone(), Instant::now()));
        location
    }

    async fn detect_self_uncached(&self) -> Location {
        if let Some(location) = cloud::detect(&self.client, self.metadata_timeout).await {
            return location;
        }

        if let Some(location) = self.geoip_lookup(None).await {
            return location;
        }

        debug!("all location sources failed, using default region");
        Location::fallback(&self.default_region)
    }

    /// Resolve the location of a remote IP via geolocation, falling back to
    /// the default region.
    pub async fn detect_ip(&self, ip: &str) -> Location {
        if let Some(cached) = self.ip_cache.lock().unwrap().get(ip).cloned() {
            return cached;
        }

        let location = self
            .geoip_lookup(Some(ip))
            .await
            .unwrap_or_else(|| Location::fallback(&self.default_region));

        self.ip_cache
            .lock()
            .unwrap()
            .insert(ip.to_string(), location.clone());
        location
    }

    /// Resolve a node's region by the standard precedence: explicit labels
    /// first, then geolocation of the node's address, then the default.
    /// (Configuration and cloud metadata only ever describe the local
    /// process, so for remote nodes the chain starts at labels.)
    pub async fn region_for_node(&self, node: &NodeState) -> String {
        for label in REGION_LABELS {
            if let Some(region) = node.labels.get(label) {
                if !region.is_empty() {
                    return region.clone();
                }
            }
        }

        if let Some(address) = &node.address {
            if let Some(ip) = address.split(':').next().filter(|s| !s.is_empty()) {
                let location = self.detect_ip(ip).await;
                if location.source != LocationSource::Default {
                    return location.region;
                }
            }
        }

        self.default_region.clone()
    }

    async fn geoip_lookup(&self, ip: Option<&str>) -> Option<Location> {
        let url = match ip {
            Some(ip) => format!("{}/{}/json", self.geoip_endpoint, ip),
            None => format!("{}/json", self.geoip_endpoint),
        };

        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "geoip lookup rejected");
            return None;
        }

        let body: GeoipResponse = response.json().await.ok()?;
        let region = body
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| {
                body.country
                    .as_deref()
                    .and_then(estimates::region_for_country)
                    .map(str::to_string)
            })?;

        let (latitude, longitude) = body
            .loc
            .as_deref()
            .and_then(|loc| {
                let (lat, lon) = loc.split_once(',')?;
                Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
            })
            .map(|(lat, lon)| (Some(lat), Some(lon)))
            .unwrap_or((None, None));

        Some(Location {
            region,
            zone: None,
            country: body.country,
            city: body.city,
            latitude,
            longitude,
            isp: body.org,
            cloud_provider: None,
            cloud_region: None,
            source: LocationSource::Geoip,
            detected_at: Utc::now(),
        })
    }
}
