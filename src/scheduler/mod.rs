//! Multi-stage node ranking and selection. The pipeline runs match →
//! convert → geo rank → preference and exclusion passes → region spread →
//! cost tuning → final sort → cut; every stage past the matcher is a pure
//! `Vec<NodeSelection> -> Vec<NodeSelection>` function. The scheduler is
//! stateless per request: an empty result is a legal answer, not an error.

use crate::config::{AtlasConfig, GeoRankerConfig};
use crate::error::Result;
use crate::geo::{estimates, LatencyMatrix, LocationDetector};
use crate::types::{job_labels, GpuVendor, Job, NodeSelection};
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

mod cost;
mod matcher;
mod ranker;

pub use cost::CostCalculator;
pub use matcher::{MatchedNode, NodeMatcher, RegistryMatcher};
pub use ranker::RegionRanker;

use crate::capacity::GlobalResources;

/// Base rank for a node that satisfies all hard requirements
pub const RANK_POSSIBLE: i64 = 100;
/// Sentinel meaning "never pick"; set by a stage, filtered before output
pub const RANK_UNSUITABLE: i64 = -1_000;

const JOB_PREFERRED_BOOST: i64 = 30;
const OPTION_PREFERRED_BOOST: i64 = 100;
const COST_RANK_STEP: i64 = 10;
const SPREAD_RANK_STEP: i64 = 10;
const LATENCY_PENALTY_WINDOW_MS: u128 = 50;

/// Tuning knobs for one scheduling request
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub preferred_regions: Vec<String>,
    pub exclude_node_ids: Vec<String>,
    /// None disables the latency cut-off
    pub max_latency: Option<Duration>,
    pub prefer_low_cost: bool,
    /// 0 or 1 disables spreading; k > 1 asks for k distinct regions
    pub spread_across_regions: u32,
    pub require_gpu_vendor: Vec<GpuVendor>,
    pub min_memory_gb: u64,
    pub min_cpu: f64,
    pub exclusive: bool,
}

/// One scheduling request
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub job: Job,
    /// Selection cap; 0 means no cut
    pub target_count: u32,
    pub options: ScheduleOptions,
    /// Optional pre-fetched capacity hint; unused by the pipeline itself
    pub capacity: Option<GlobalResources>,
}

/// Geo-pass inputs derived from the job and request options
struct GeoPass<'a> {
    origin: &'a str,
    config: &'a GeoRankerConfig,
    preferred_regions: &'a [String],
    excluded_regions: &'a [String],
    max_latency: Option<Duration>,
}

/// Ranks and selects nodes for jobs across the fleet
pub struct GlobalScheduler {
    matcher: Arc<dyn NodeMatcher>,
    detector: Arc<LocationDetector>,
    latency: Arc<LatencyMatrix>,
    region_ranker: RegionRanker,
    cost_calculator: CostCalculator,
    geo_config: GeoRankerConfig,
    default_region: String,
}

impl GlobalScheduler {
    pub fn new(
        matcher: Arc<dyn NodeMatcher>,
        detector: Arc<LocationDetector>,
        latency: Arc<LatencyMatrix>,
        config: &AtlasConfig,
    ) -> Self {
        Self {
            matcher,
            detector,
            latency,
            region_ranker: RegionRanker::new(),
            cost_calculator: CostCalculator::new(),
            geo_config: config.geo_ranker.clone(),
            default_region: config.default_region.clone(),
        }
    }

    /// Run the full pipeline. Matcher errors propagate; otherwise the
    /// scheduler always returns, possibly with an empty selection set.
    pub async fn schedule(&self, request: &ScheduleRequest) -> Result<Vec<NodeSelection>> {
        let job = &request.job;
        let options = &request.options;

        // 1. match
        let matched = self.matcher.match_nodes(job, options).await?;
        if matched.is_empty() {
            debug!(job_id = %job.id, "no candidates matched hard requirements");
            return Ok(Vec::new());
        }

        let origin = self.origin_region(job).await;

        // 2. convert
        let selections = self.convert(matched, &origin).await;

        // 3. geo rank
        let job_preferred = self.job_preferred_regions(job);
        let job_excluded = job.label_regions(job_labels::EXCLUDE_REGIONS);
        let geo_max_latency = options.max_latency.or_else(|| job_max_latency(job));
        let pass = GeoPass {
            origin: &origin,
            config: &self.geo_config,
            preferred_regions: &job_preferred,
            excluded_regions: &job_excluded,
            max_latency: geo_max_latency,
        };
        let selections = geo_rank(selections, &pass);

        // 4. preferred regions from the request options
        let selections = boost_preferred(selections, &options.preferred_regions);

        // 5. latency cut-off; unknown latencies are kept
        let selections = filter_latency(selections, options.max_latency);

        // 6. cost preference
        let selections = if options.prefer_low_cost {
            prefer_low_cost(selections)
        } else {
            selections
        };

        // 7. region spread
        let selections = spread_regions(selections, options.spread_across_regions, &self.region_ranker);

        // 8. exclusions
        let selections = apply_exclusions(selections, &options.exclude_node_ids);

        // 9. final sort
        let mut selections = final_sort(selections);

        // 10. cut
        if request.target_count > 0 {
            selections.truncate(request.target_count as usize);
        }

        debug!(
            job_id = %job.id,
            selected = selections.len(),
            target = request.target_count,
            "scheduling pipeline complete"
        );
        Ok(selections)
    }

    /// Single best node for a job; an empty pipeline result is an error here
    pub async fn get_best_node_for_job(&self, job: &Job) -> Result<NodeSelection> {
        let request = ScheduleRequest {
            job: job.clone(),
            target_count: 1,
            options: ScheduleOptions::default(),
            capacity: None,
        };
        let mut selections = self.schedule(&request).await?;
        let result = selections
            .drain(..)
            .next()
            .ok_or_else(|| anyhow!("no suitable nodes available for job {}", job.id).into());
        result
    }

    /// All suitable nodes bucketed by region, no cut applied
    pub async fn get_nodes_by_region(
        &self,
        job: &Job,
    ) -> Result<HashMap<String, Vec<NodeSelection>>> {
        let request = ScheduleRequest {
            job: job.clone(),
            target_count: 0,
            options: ScheduleOptions::default(),
            capacity: None,
        };
        let selections = self.schedule(&request).await?;
        let mut by_region: HashMap<String, Vec<NodeSelection>> = HashMap::new();
        for selection in selections {
            by_region
                .entry(selection.region.clone())
                .or_default()
                .push(selection);
        }
        Ok(by_region)
    }

    /// Submitter origin: the job's `region` label, else the detected self
    /// location.
    async fn origin_region(&self, job: &Job) -> String {
        if let Some(region) = job.labels.get(job_labels::REGION) {
            if !region.is_empty() {
                return region.clone();
            }
        }
        self.detector.detect_self().await.region
    }

    fn job_preferred_regions(&self, job: &Job) -> Vec<String> {
        let mut preferred = job.label_regions(job_labels::PREFERRED_REGIONS);
        for constraint in &job.constraints {
            if constraint.key == matcher::PREFERRED_REGION_KEY {
                preferred.extend(constraint.values.iter().cloned());
            }
        }
        preferred
    }

    async fn convert(&self, matched: Vec<MatchedNode>, origin: &str) -> Vec<NodeSelection> {
        let mut selections = Vec::with_capacity(matched.len());
        for candidate in matched {
            let region = self.detector.region_for_node(&candidate.node).await;
            let cost = self.cost_calculator.calculate_cost(&candidate.node);
            let estimated_latency = if region == self.default_region {
                None
            } else {
                self.latency.known_latency(origin, &region)
            };

            if let Some(latency) = estimated_latency {
                self.region_ranker.observe_latency(&region, latency);
            }
            self.region_ranker.observe_cost(&region, cost);

            selections.push(NodeSelection {
                node_id: candidate.node.id.clone(),
                rank: candidate.rank,
                reason: candidate.reason,
                region,
                resources: candidate.node.effective_available().clone(),
                estimated_latency,
                cost,
            });
        }
        selections
    }
}

/// Parse the job's `max-latency` label, milliseconds
fn job_max_latency(job: &Job) -> Option<Duration> {
    job.labels
        .get(job_labels::MAX_LATENCY)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Stage 3: geographic rank adjustment relative to the origin region.
/// Unknown continents neither help nor hurt; nodes past the latency limit
/// become unsuitable when the config says so, and job-excluded regions are
/// always unsuitable.
fn geo_rank(mut selections: Vec<NodeSelection>, pass: &GeoPass<'_>) -> Vec<NodeSelection> {
    for selection in &mut selections {
        if pass.excluded_regions.contains(&selection.region) {
            selection.rank = RANK_UNSUITABLE;
            selection.reason = format!("region {} excluded by job", selection.region);
            continue;
        }

        if selection.region == pass.origin {
            selection.rank += pass.config.local_boost;
        } else if let (Some(a), Some(b)) = (
            estimates::continent_of(pass.origin),
            estimates::continent_of(&selection.region),
        ) {
            if a == b {
                selection.rank += pass.config.continent_boost;
            }
        }

        if let Some(latency) = selection.estimated_latency {
            let windows = (latency.as_millis() / LATENCY_PENALTY_WINDOW_MS) as i64;
            selection.rank -= windows * pass.config.latency_penalty;

            if let Some(max) = pass.max_latency {
                if latency > max && pass.config.exclude_high_latency {
                    selection.rank = RANK_UNSUITABLE;
                    selection.reason = format!(
                        "latency {}ms exceeds limit {}ms",
                        latency.as_millis(),
                        max.as_millis()
                    );
                    continue;
                }
            }
        }

        if pass.preferred_regions.contains(&selection.region) {
            selection.rank += JOB_PREFERRED_BOOST;
        }
    }

    selections.retain(|s| s.rank != RANK_UNSUITABLE);
    selections
}

/// Stage 4: boost for regions preferred in the request options
fn boost_preferred(mut selections: Vec<NodeSelection>, preferred: &[String]) -> Vec<NodeSelection> {
    if preferred.is_empty() {
        return selections;
    }
    for selection in &mut selections {
        if preferred.contains(&selection.region) {
            selection.rank += OPTION_PREFERRED_BOOST;
        }
    }
    selections
}

/// Stage 5: drop selections over the latency limit; unknown latencies stay
fn filter_latency(
    mut selections: Vec<NodeSelection>,
    max_latency: Option<Duration>,
) -> Vec<NodeSelection> {
    let Some(max) = max_latency else {
        return selections;
    };
    selections.retain(|s| s.estimated_latency.map_or(true, |l| l <= max));
    selections
}

/// Stage 6: stable-sort ascending by cost and rewrite ranks so lower cost
/// wins ties downstream
fn prefer_low_cost(mut selections: Vec<NodeSelection>) -> Vec<NodeSelection> {
    selections.sort_by(|a, b| a.cost.total_cmp(&b.cost));
    let len = selections.len() as i64;
    for (index, selection) in selections.iter_mut().enumerate() {
        selection.rank += (len - index as i64) * COST_RANK_STEP;
    }
    selections
}

/// Stage 7: round-robin across the k best regions so replicas land in
/// distinct regions. Ranks are rewritten to the interleave order so the
/// final sort and cut preserve one-per-region prefixes. Fewer than k
/// populated regions returns whatever exists.
fn spread_regions(
    selections: Vec<NodeSelection>,
    spread: u32,
    ranker: &RegionRanker,
) -> Vec<NodeSelection> {
    if spread <= 1 || selections.is_empty() {
        return selections;
    }

    let mut region_order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Vec<NodeSelection>> = HashMap::new();
    for selection in selections {
        if !buckets.contains_key(&selection.region) {
            region_order.push(selection.region.clone());
        }
        buckets
            .entry(selection.region.clone())
            .or_default()
            .push(selection);
    }

    for bucket in buckets.values_mut() {
        bucket.sort_by(|a, b| b.rank.cmp(&a.rank));
    }

    // order candidate regions by ranker score, then best contained rank
    region_order.sort_by(|a, b| {
        let score = ranker.score(b).cmp(&ranker.score(a));
        let best = |r: &String| buckets[r].first().map(|s| s.rank).unwrap_or(i64::MIN);
        score.then(best(b).cmp(&best(a))).then(a.cmp(b))
    });
    region_order.truncate(spread as usize);

    let mut interleaved = Vec::new();
    let mut index = 0;
    loop {
        let mut picked_any = false;
        for region in &region_order {
            if let Some(selection) = buckets.get_mut(region).and_then(|b| {
                if index < b.len() {
                    Some(b[index].clone())
                } else {
                    None
                }
            }) {
                interleaved.push(selection);
                picked_any = true;
            }
        }
        if !picked_any {
            break;
        }
        index += 1;
    }

    let len = interleaved.len() as i64;
    for (i, selection) in interleaved.iter_mut().enumerate() {
        selection.rank = (len - i as i64) * SPREAD_RANK_STEP;
    }
    interleaved
}

/// Stage 8: hard removal of explicitly excluded node ids
fn apply_exclusions(
    mut selections: Vec<NodeSelection>,
    exclude: &[String],
) -> Vec<NodeSelection> {
    if exclude.is_empty() {
        return selections;
    }
    selections.retain(|s| !exclude.iter().any(|id| id == &s.node_id));
    selections
}

/// Stage 9: rank descending, ties by ascending cost, then node id
fn final_sort(mut selections: Vec<NodeSelection>) -> Vec<NodeSelection> {
    selections.sort_by(|a, b| {
        b.rank
            .cmp(&a.rank)
            .then_with(|| a.cost.total_cmp(&b.cost))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    selections
}
