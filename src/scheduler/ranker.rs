use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Base score every known region starts from
const BASE_SCORE: i64 = 50;

#[derive(Debug, Clone, Default)]
struct RegionEstimate {
    latency: Option<Duration>,
    cost: Option<f64>,
}

/// Maintains per-region latency and cost estimates observed while
/// scheduling, and scores regions for bucket ordering.
#[derive(Debug, Default)]
pub struct RegionRanker {
    estimates: Mutex<HashMap<String, RegionEstimate>>,
}

impl RegionRanker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest latency figure for a region
    pub fn observe_latency(&self, region: &str, latency: Duration) {
        self.estimates
            .lock()
            .unwrap()
            .entry(region.to_string())
            .or_default()
            .latency = Some(latency);
    }

    /// Record the latest relative cost figure for a region
    pub fn observe_cost(&self, region: &str, cost: f64) {
        self.estimates
            .lock()
            .unwrap()
            .entry(region.to_string())
            .or_default()
            .cost = Some(cost);
    }

    /// Integer score for a region: 50 base, latency tier adjustment
    /// (+20 under 50ms, +10 under 100ms, -10 over 200ms), cost tier
    /// adjustment (+10 under 1.0, -10 over 2.0).
    pub fn score(&self, region: &str) -> i64 {
        let estimates = self.estimates.lock().unwrap();
        let estimate = match estimates.get(region) {
            Some(e) => e,
            None => return BASE_SCORE,
        };

        let mut score = BASE_SCORE;

        if let Some(latency) = estimate.latency {
            let ms = latency.as_millis();
            if ms < 50 {
                score += 20;
            } else if ms < 100 {
                score += 10;
            } else if ms > 200 {
                score -= 10;
            }
        }

        if let Some(cost) = estimate.cost {
            if cost < 1.0 {
                score += 10;
            } else if cost > 2.0 {
                score -= 10;
            }
        }

        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_region_scores_base() {
        let ranker = RegionRanker::new();
        assert_eq!(ranker.score("nowhere"), 50);
    }

    #[test]
    fn latency_tiers_are_exclusive() {
        let ranker = RegionRanker::new();
        ranker.observe_latency("fast", Duration::from_millis(20));
        ranker.observe_latency("ok", Duration::from_millis(80));
        ranker.observe_latency("mid", Duration::from_millis(150));
        ranker.observe_latency("slow", Duration::from_millis(300));

        assert_eq!(ranker.score("fast"), 70);
        assert_eq!(ranker.score("ok"), 60);
        assert_eq!(ranker.score("mid"), 50);
        assert_eq!(ranker.score("slow"), 40);
    }

    #[test]
    fn cost_tiers_combine_with_latency() {
        let ranker = RegionRanker::new();
        ranker.observe_latency("cheap-fast", Duration::from_millis(10));
        ranker.observe_cost("cheap-fast", 0.8);
        assert_eq!(ranker.score("cheap-fast"), 80);

        ranker.observe_latency("pricey-slow", Duration::from_millis(250));
        ranker.observe_cost("pricey-slow", 2.5);
        assert_eq!(ranker.score("pricey-slow"), 30);
    }
}
