use super::estimates;
use crate::config::AtlasConfig;
use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a latency figure was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencySource {
    Probe,
    Reported,
    Estimated,
}

/// One matrix cell
#[derive(Debug, Clone)]
pub struct LatencyEntry {
    pub latency: Duration,
    pub measured_at: Instant,
    pub source: LatencySource,
}

impl LatencyEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.measured_at.elapsed() < ttl
    }
}

/// Symmetric inter-region latency matrix with TTL-expiring entries.
/// Every update writes both directions; entries past the TTL are treated
/// as absent. Component-scoped: wire one per endpoint instance.
pub struct LatencyMatrix {
    entries: Mutex<HashMap<(String, String), LatencyEntry>>,
    ttl: Duration,
    default_latency: Duration,
    probe_timeout: Duration,
    client: reqwest::Client,
}

impl LatencyMatrix {
    pub fn new(config: &AtlasConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: config.latency_ttl(),
            default_latency: config.latency_default(),
            probe_timeout: config.probe_timeout(),
            client: reqwest::Client::new(),
        }
    }

    /// Latency between two regions: zero for self, a fresh matrix entry if
    /// present, the curated static estimate next, else the configured
    /// default.
    pub fn get_latency(&self, from: &str, to: &str) -> Duration {
        if from == to {
            return Duration::ZERO;
        }

        if let Some(latency) = self.cached_latency(from, to) {
            return latency;
        }

        estimates::estimated_latency(from, to).unwrap_or(self.default_latency)
    }

    /// Like [`get_latency`](Self::get_latency) but without the default:
    /// None when neither the matrix nor the static table knows the pair.
    pub fn known_latency(&self, from: &str, to: &str) -> Option<Duration> {
        if from == to {
            return Some(Duration::ZERO);
        }
        self.cached_latency(from, to)
            .or_else(|| estimates::estimated_latency(from, to))
    }

    fn cached_latency(&self, from: &str, to: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&(from.to_string(), to.to_string()))
            .filter(|e| e.is_fresh(self.ttl))
            .map(|e| e.latency)
    }

    /// Record an externally reported measurement, both directions
    pub fn update_latency(&self, from: &str, to: &str, latency: Duration) {
        self.insert(from, to, latency, LatencySource::Reported);
    }

    fn insert(&self, from: &str, to: &str, latency: Duration, source: LatencySource) {
        if from == to {
            return;
        }
        let entry = LatencyEntry {
            latency,
            measured_at: Instant::now(),
            source,
        };
        let mut entries = self.entries.lock().unwrap();
        entries.insert((from.to_string(), to.to_string()), entry.clone());
        entries.insert((to.to_string(), from.to_string()), entry);
    }

    /// Actively probe a region's endpoint with an HTTP HEAD and record the
    /// round trip. Probe failures are swallowed: the caller receives the
    /// configured default and the matrix is left untouched.
    pub async fn probe_latency(&self, from: &str, to: &str, endpoint: &str) -> Duration {
        match self.try_probe(endpoint).await {
            Ok(latency) => {
                debug!(%from, %to, ?latency, "latency probe succeeded");
                self.insert(from, to, latency, LatencySource::Probe);
                latency
            }
            Err(error) => {
                warn!(%from, %to, %endpoint, %error, "latency probe failed, using default");
                self.default_latency
            }
        }
    }

    async fn try_probe(&self, endpoint: &str) -> Result<Duration, ProbeError> {
        let started = Instant::now();
        let response = self
            .client
            .head(endpoint)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout {
                        target: endpoint.to_string(),
                    }
                } else {
                    ProbeError::Failed {
                        target: endpoint.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;
        if !response.status().is_success() {
            return Err(ProbeError::Failed {
                target: endpoint.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(started.elapsed())
    }

    /// All non-expired latencies out of a region
    pub fn get_all_latencies(&self, from: &str) -> HashMap<String, Duration> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|((a, _), entry)| a == from && entry.is_fresh(self.ttl))
            .map(|((_, b), entry)| (b.clone(), entry.latency))
            .collect()
    }

    /// Candidate regions sorted ascending by estimated latency from the
    /// origin. The sort is stable: equal latencies keep their input order.
    /// Unknown regions get the configured default.
    pub fn get_nearest_regions(&self, origin: &str, candidates: &[String]) -> Vec<String> {
        let mut ranked: Vec<(String, Duration)> = candidates
            .iter()
            .map(|region| (region.clone(), self.get_latency(origin, region)))
            .collect();
        ranked.sort_by_key(|(_, latency)| *latency);
        ranked.into_iter().map(|(region, _)| region).collect()
    }

    /// Drop every cached entry
    pub fn clear_cache(&self) {
        self.entries.lock().unwrap().clear();
    }
}
