//! Deduplication engine (C5): spatio-temporal clustering of a rolling
//! window of normalized events, canonical-record selection via
//! region-aware source priority, and per-cluster quality metrics.
//!
//! The spatial-clustering step below is DBSCAN with `min_samples = 1`
//! under the haversine metric — which is exactly single-linkage
//! clustering: two events land in the same cluster iff connected by a
//! chain of pairwise distances each ≤ `eps`. That's a connected-components
//! pass over the distance graph, so the default path here builds one
//! directly rather than depending on an external clustering crate. The
//! `greedy-fallback` feature switches to a single global greedy pass
//! (no spatial partition), matching the behavior teams without a DBSCAN
//! implementation fall back to.

use crate::errors::Result;
use crate::filters::haversine_distance;
use crate::models::{EventRecord, EventStatus, MagnitudeType, Source};
use crate::region::{classify_region, region_priority, source_rank};
use crate::store::{RawEventSink, UnifiedStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

pub const MAX_TIME_DIFF_SEC: f64 = 30.0;
pub const MAX_DISTANCE_KM: f64 = 100.0;
pub const MAX_MAG_DIFF: f64 = 0.5;
pub const MATCH_SCORE_THRESHOLD: f64 = 0.6;

/// Group of `EventRecord`s representing one physical earthquake.
///
/// `members` stays in chronological-join order; since events are always
/// processed in ascending `origin_time_utc` order, the first member is
/// always the earliest-time one — the anchor.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub members: Vec<EventRecord>,
    pub best_score: f64,
}

impl Cluster {
    fn new(first: EventRecord) -> Self {
        Self {
            members: vec![first],
            best_score: 0.0,
        }
    }

    #[must_use]
    pub fn anchor(&self) -> &EventRecord {
        &self.members[0]
    }

    fn join(&mut self, member: EventRecord, score: f64) {
        self.members.push(member);
        self.best_score = self.best_score.max(score);
    }
}

/// Similarity score between two events in `[0, 1]`; zero if any gate fails.
#[must_use]
pub fn compute_match_score(a: &EventRecord, b: &EventRecord) -> f64 {
    let dt = (a.origin_time_utc - b.origin_time_utc)
        .num_milliseconds()
        .unsigned_abs() as f64
        / 1000.0;
    if dt > MAX_TIME_DIFF_SEC {
        return 0.0;
    }

    let dist = haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude);
    if dist > MAX_DISTANCE_KM {
        return 0.0;
    }

    let dmag = (a.magnitude_value - b.magnitude_value).abs();
    if dmag > MAX_MAG_DIFF {
        return 0.0;
    }

    0.4 * (1.0 - dt / MAX_TIME_DIFF_SEC).max(0.0)
        + 0.4 * (1.0 - dist / MAX_DISTANCE_KM).max(0.0)
        + 0.2 * (1.0 - dmag / MAX_MAG_DIFF).max(0.0)
}

/// Cluster a rolling window of events.
///
/// `events` need not be pre-sorted; this sorts ascending by
/// `origin_time_utc` internally, per spec §4.5 Step 1.
#[must_use]
pub fn cluster_events(events: Vec<EventRecord>) -> Vec<Cluster> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut sorted = events;
    sorted.sort_by_key(|e| e.origin_time_utc);

    #[cfg(feature = "greedy-fallback")]
    {
        cluster_events_greedy(sorted)
    }
    #[cfg(not(feature = "greedy-fallback"))]
    {
        let spatial_groups = spatial_partition(sorted);
        spatial_groups
            .into_iter()
            .flat_map(sub_cluster_time_mag)
            .collect()
    }
}

/// Spatial partition: connected components of the distance graph with an
/// edge whenever `haversine(a, b) <= MAX_DISTANCE_KM` (DBSCAN with
/// `min_samples = 1` under the haversine metric, `eps = 100km / 6371km`).
#[cfg_attr(feature = "greedy-fallback", allow(dead_code))]
fn spatial_partition(events: Vec<EventRecord>) -> Vec<Vec<EventRecord>> {
    let n = events.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let dist = haversine_distance(
                events[i].latitude,
                events[i].longitude,
                events[j].latitude,
                events[j].longitude,
            );
            if dist <= MAX_DISTANCE_KM {
                union(&mut parent, i, j);
            }
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<EventRecord>> =
        std::collections::HashMap::new();
    for (i, event) in events.into_iter().enumerate() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(event);
    }

    groups.into_values().collect()
}

/// Sub-cluster spatially co-located events by time and magnitude, so
/// aftershocks at the same location land in separate clusters. Greedy
/// chronological join: each event takes the highest-scoring existing
/// sub-cluster that meets the gates, else opens a new one. Ties break
/// toward the earlier-created cluster, which falls out naturally from
/// scanning clusters in creation order and only replacing on strict
/// improvement.
#[must_use]
fn sub_cluster_time_mag(events: Vec<EventRecord>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for event in events {
        let mut best: Option<(usize, f64)> = None;

        for (idx, cluster) in clusters.iter().enumerate() {
            let anchor = cluster.anchor();
            let dt = (event.origin_time_utc - anchor.origin_time_utc)
                .num_milliseconds()
                .unsigned_abs() as f64
                / 1000.0;
            let dmag = (event.magnitude_value - anchor.magnitude_value).abs();
            if dt <= MAX_TIME_DIFF_SEC && dmag <= MAX_MAG_DIFF {
                let score = compute_match_score(&event, anchor);
                if score >= MATCH_SCORE_THRESHOLD {
                    let improves = best.is_none_or(|(_, best_score)| score > best_score);
                    if improves {
                        best = Some((idx, score));
                    }
                }
            }
        }

        match best {
            Some((idx, score)) => clusters[idx].join(event, score),
            None => clusters.push(Cluster::new(event)),
        }
    }

    clusters
}

/// Greedy global clustering (the `greedy-fallback` feature): identical
/// join rule as [`sub_cluster_time_mag`] but against every existing
/// cluster's anchor, with no spatial pre-partition.
#[cfg_attr(not(feature = "greedy-fallback"), allow(dead_code))]
#[must_use]
fn cluster_events_greedy(events: Vec<EventRecord>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for event in events {
        let mut best: Option<(usize, f64)> = None;

        for (idx, cluster) in clusters.iter().enumerate() {
            let score = compute_match_score(&event, cluster.anchor());
            if score >= MATCH_SCORE_THRESHOLD {
                let improves = best.is_none_or(|(_, best_score)| score > best_score);
                if improves {
                    best = Some((idx, score));
                }
            }
        }

        match best {
            Some((idx, score)) => clusters[idx].join(event, score),
            None => clusters.push(Cluster::new(event)),
        }
    }

    clusters
}

fn simple_centroid(cluster: &Cluster) -> (f64, f64) {
    let n = cluster.members.len() as f64;
    let lat = cluster.members.iter().map(|m| m.latitude).sum::<f64>() / n;
    let lon = cluster.members.iter().map(|m| m.longitude).sum::<f64>() / n;
    (lat, lon)
}

/// Select the preferred (canonical) record from a cluster (spec §4.5.2).
#[must_use]
pub fn select_preferred(cluster: &Cluster) -> &EventRecord {
    let reviewed: Vec<&EventRecord> = cluster
        .members
        .iter()
        .filter(|m| m.status == EventStatus::Reviewed)
        .collect();
    let candidates: Vec<&EventRecord> = if reviewed.is_empty() {
        cluster.members.iter().collect()
    } else {
        reviewed
    };

    let (lat, lon) = simple_centroid(cluster);
    let priority = region_priority(classify_region(lat, lon));

    candidates
        .into_iter()
        .min_by_key(|m| source_rank(&priority, m.source))
        .unwrap_or_else(|| cluster.anchor())
}

/// Deterministic, content-addressed cluster ID (spec §4.5.3).
#[must_use]
pub fn compute_unified_id(cluster: &Cluster) -> String {
    let mut uids: Vec<&str> = cluster
        .members
        .iter()
        .map(|m| m.event_uid.as_str())
        .collect();
    uids.sort_unstable();
    let content = uids.join("|");

    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("UE-{}", &hex[..16])
}

/// Weighted centroid over members, weight `= max(1, N - rank)` where `N`
/// is the priority list length and `rank` the member's source rank
/// (spec §4.5.4).
#[must_use]
pub fn weighted_centroid(cluster: &Cluster) -> (f64, f64, f64) {
    let (lat, lon) = simple_centroid(cluster);
    let priority = region_priority(classify_region(lat, lon));
    let n = priority.len() as f64;

    let mut total_weight = 0.0;
    let mut lat_sum = 0.0;
    let mut lon_sum = 0.0;
    let mut depth_sum = 0.0;

    for member in &cluster.members {
        let rank = source_rank(&priority, member.source) as f64;
        let weight = (n - rank).max(1.0);
        lat_sum += member.latitude * weight;
        lon_sum += member.longitude * weight;
        depth_sum += member.depth_km * weight;
        total_weight += weight;
    }

    if total_weight == 0.0 {
        let anchor = cluster.anchor();
        return (anchor.latitude, anchor.longitude, anchor.depth_km);
    }

    (
        lat_sum / total_weight,
        lon_sum / total_weight,
        depth_sum / total_weight,
    )
}

/// Per-cluster quality metrics (spec §4.5.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityMetrics {
    pub magnitude_std: f64,
    pub location_spread_km: f64,
    pub source_agreement_score: f64,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[must_use]
pub fn compute_quality_metrics(cluster: &Cluster) -> QualityMetrics {
    let members = &cluster.members;

    let magnitude_std = if members.len() > 1 {
        let mags: Vec<f64> = members.iter().map(|m| m.magnitude_value).collect();
        let mean = mags.iter().sum::<f64>() / mags.len() as f64;
        let variance = mags.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / mags.len() as f64;
        variance.sqrt()
    } else {
        0.0
    };

    let mut location_spread_km: f64 = 0.0;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            let dist = haversine_distance(
                members[i].latitude,
                members[i].longitude,
                members[j].latitude,
                members[j].longitude,
            );
            location_spread_km = location_spread_km.max(dist);
        }
    }

    let unique_sources: std::collections::HashSet<Source> =
        members.iter().map(|m| m.source).collect();
    let source_agreement_score = if members.is_empty() {
        0.0
    } else {
        unique_sources.len() as f64 / members.len() as f64
    };

    QualityMetrics {
        magnitude_std: round_to(magnitude_std, 4),
        location_spread_km: round_to(location_spread_km, 2),
        source_agreement_score: round_to(source_agreement_score, 4),
    }
}

/// Canonical output row for one cluster (spec §3.4).
#[derive(Debug, Clone)]
pub struct UnifiedEvent {
    pub unified_event_id: String,
    pub origin_time_utc: chrono::DateTime<chrono::Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude_value: f64,
    pub magnitude_type: MagnitudeType,
    pub place: Option<String>,
    pub region: Option<String>,
    pub status: EventStatus,
    pub num_sources: usize,
    pub preferred_source: Source,
    pub preferred_event_uid: String,
    pub magnitude_std: f64,
    pub location_spread_km: f64,
    pub source_agreement_score: f64,
}

/// One `(event_uid, unified_event_id)` crosswalk row (spec §3.5).
#[derive(Debug, Clone)]
pub struct CrosswalkEntry {
    pub event_uid: String,
    pub unified_event_id: String,
    pub match_score: f64,
    pub is_preferred: bool,
}

/// Build the `UnifiedEvent` and its `CrosswalkEntry` rows for one cluster.
#[must_use]
pub fn build_unified_event(cluster: &Cluster) -> (UnifiedEvent, Vec<CrosswalkEntry>) {
    let preferred = select_preferred(cluster).clone();
    let unified_event_id = compute_unified_id(cluster);
    let (latitude, longitude, depth_km) = weighted_centroid(cluster);
    let metrics = compute_quality_metrics(cluster);
    let num_sources = cluster
        .members
        .iter()
        .map(|m| m.source)
        .collect::<std::collections::HashSet<_>>()
        .len();

    let crosswalk = cluster
        .members
        .iter()
        .map(|member| {
            let is_preferred = member.event_uid == preferred.event_uid;
            let match_score = if is_preferred {
                1.0
            } else {
                compute_match_score(member, &preferred)
            };
            CrosswalkEntry {
                event_uid: member.event_uid.clone(),
                unified_event_id: unified_event_id.clone(),
                match_score,
                is_preferred,
            }
        })
        .collect();

    let unified = UnifiedEvent {
        unified_event_id,
        origin_time_utc: preferred.origin_time_utc,
        latitude,
        longitude,
        depth_km,
        magnitude_value: preferred.magnitude_value,
        magnitude_type: preferred.magnitude_type.clone(),
        place: preferred.place.clone(),
        region: preferred.region.clone(),
        status: preferred.status,
        num_sources,
        preferred_source: preferred.source,
        preferred_event_uid: preferred.event_uid.clone(),
        magnitude_std: metrics.magnitude_std,
        location_spread_km: metrics.location_spread_km,
        source_agreement_score: metrics.source_agreement_score,
    };

    (unified, crosswalk)
}

/// Default lookback window for a dedup pass, per §5 of the design notes.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 6;

/// Report echoed by `run_dedup_pass` and serialized as the
/// `POST /deduplicate` response body (spec §3.7).
#[derive(Debug, Clone, Serialize)]
pub struct DedupReport {
    pub clusters: usize,
    pub unified_events: usize,
    pub multi_source_clusters: usize,
    pub duration_s: f64,
}

/// Run one dedup pass over the raw store's lookback window (spec §4.5).
///
/// Load → cluster → select canonical → compute metrics → upsert. Clusters
/// are rebuilt from scratch on every call; nothing about the clustering
/// itself is persisted, only the resulting `UnifiedEvent`/`CrosswalkEntry`
/// rows. The whole pass is a single upsert batch per cluster, so a partial
/// pass (some clusters upserted, others not because of an error) is the
/// store adapter's problem, per spec §4.5.6 — here we stop at the first
/// failing upsert and propagate the error.
///
/// # Errors
///
/// Returns an error if loading the raw window or any upsert fails.
#[instrument(skip(raw_sink, unified_store))]
pub async fn run_dedup_pass(
    lookback_hours: i64,
    raw_sink: &Arc<dyn RawEventSink>,
    unified_store: &Arc<dyn UnifiedStore>,
) -> Result<DedupReport> {
    let start = Instant::now();

    let raw_events = raw_sink.load_recent(lookback_hours).await?;
    if raw_events.is_empty() {
        return Ok(DedupReport {
            clusters: 0,
            unified_events: 0,
            multi_source_clusters: 0,
            duration_s: start.elapsed().as_secs_f64(),
        });
    }

    let records: Vec<EventRecord> = raw_events.iter().map(EventRecord::from).collect();
    let clusters = cluster_events(records);
    let mut multi_source_clusters = 0;

    for cluster in &clusters {
        let (unified, crosswalk) = build_unified_event(cluster);
        if unified.num_sources > 1 {
            multi_source_clusters += 1;
        }
        unified_store.upsert(&unified, &crosswalk).await?;
    }

    let duration_s = start.elapsed().as_secs_f64();
    info!(
        clusters = clusters.len(),
        multi_source_clusters,
        duration_s,
        "dedup pass complete"
    );

    Ok(DedupReport {
        clusters: clusters.len(),
        unified_events: clusters.len(),
        multi_source_clusters,
        duration_s,
    })
}
