//! Store/sink traits (ambient, tied to §6 of the design notes).
//!
//! The core pipeline and dedup pass never talk to a database directly —
//! they depend on these four async traits, so a real deployment swaps the
//! in-memory reference implementations here for database-backed adapters
//! without touching `pipeline.rs` or `dedup.rs`.

use crate::dedup::{CrosswalkEntry, UnifiedEvent};
use crate::errors::Result;
use crate::models::{NormalizedEvent, Source};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// One rejected record, with the reasons it failed validation or parsing.
#[derive(Debug, Clone)]
pub struct DeadLetterRow {
    pub source: Source,
    pub source_event_id: String,
    pub raw_payload: String,
    pub errors: Vec<String>,
}

/// Outcome of a single `run_source_pipeline` invocation, logged once per run.
#[derive(Debug, Clone)]
pub struct PipelineRunAudit {
    pub run_id: String,
    pub window_end: DateTime<Utc>,
    pub status: String,
    pub source_name: String,
    pub raw_count: usize,
    pub dead_letter_count: usize,
    pub duration_s: f64,
}

/// Append-only sink for accepted, normalized events.
///
/// Duplicates (same `event_uid`) are permitted — dedup collapses them.
#[async_trait]
pub trait RawEventSink: Send + Sync {
    async fn insert_raw_events(&self, events: &[NormalizedEvent]) -> Result<usize>;

    /// Events with `origin_time_utc >= now - lookback_hours`, ascending.
    async fn load_recent(&self, lookback_hours: i64) -> Result<Vec<NormalizedEvent>>;
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn insert_dead_letters(&self, rows: &[DeadLetterRow]) -> Result<()>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_pipeline_run(&self, row: PipelineRunAudit) -> Result<()>;
}

/// Unified-event and crosswalk persistence. Upsert rewrites every field on
/// conflict (spec §4.5.6); the in-memory implementation keys on
/// `unified_event_id` for the unified row and `(event_uid, unified_event_id)`
/// for crosswalk rows.
#[async_trait]
pub trait UnifiedStore: Send + Sync {
    async fn upsert(&self, unified: &UnifiedEvent, crosswalk: &[CrosswalkEntry]) -> Result<()>;
}

/// In-memory `RawEventSink`, guarded by a `tokio::sync::Mutex`. Ingestion
/// only ever appends and dedup only ever reads, so contention here is
/// incidental, not a correctness requirement.
#[derive(Default)]
pub struct InMemoryRawEventStore {
    events: Mutex<Vec<NormalizedEvent>>,
}

impl InMemoryRawEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawEventSink for InMemoryRawEventStore {
    async fn insert_raw_events(&self, events: &[NormalizedEvent]) -> Result<usize> {
        let mut guard = self.events.lock().await;
        guard.extend_from_slice(events);
        Ok(events.len())
    }

    async fn load_recent(&self, lookback_hours: i64) -> Result<Vec<NormalizedEvent>> {
        let cutoff = Utc::now() - chrono::Duration::hours(lookback_hours);
        let guard = self.events.lock().await;
        let mut recent: Vec<NormalizedEvent> = guard
            .iter()
            .filter(|e| e.origin_time_utc >= cutoff)
            .cloned()
            .collect();
        recent.sort_by_key(|e| e.origin_time_utc);
        Ok(recent)
    }
}

#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    rows: Mutex<Vec<DeadLetterRow>>,
}

impl InMemoryDeadLetterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterStore {
    async fn insert_dead_letters(&self, rows: &[DeadLetterRow]) -> Result<()> {
        self.rows.lock().await.extend_from_slice(rows);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditStore {
    rows: Mutex<Vec<PipelineRunAudit>>,
}

impl InMemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditStore {
    async fn log_pipeline_run(&self, row: PipelineRunAudit) -> Result<()> {
        self.rows.lock().await.push(row);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUnifiedStore {
    unified: Mutex<std::collections::HashMap<String, UnifiedEvent>>,
    crosswalk: Mutex<std::collections::HashMap<(String, String), CrosswalkEntry>>,
}

impl InMemoryUnifiedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn unified_count(&self) -> usize {
        self.unified.lock().await.len()
    }
}

#[async_trait]
impl UnifiedStore for InMemoryUnifiedStore {
    async fn upsert(&self, unified: &UnifiedEvent, crosswalk: &[CrosswalkEntry]) -> Result<()> {
        self.unified
            .lock()
            .await
            .insert(unified.unified_event_id.clone(), unified.clone());

        let mut guard = self.crosswalk.lock().await;
        for entry in crosswalk {
            guard.insert(
                (entry.event_uid.clone(), entry.unified_event_id.clone()),
                entry.clone(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventStatus, MagnitudeType, Source};
    use chrono::TimeZone;

    fn event(source: Source, id: &str, hours_ago: i64) -> NormalizedEvent {
        NormalizedEvent {
            event_uid: NormalizedEvent::make_event_uid(source, id),
            source,
            source_event_id: id.to_string(),
            origin_time_utc: Utc::now() - chrono::Duration::hours(hours_ago),
            latitude: 10.0,
            longitude: 20.0,
            depth_km: 5.0,
            magnitude_value: 4.0,
            magnitude_type: MagnitudeType::parse("mw"),
            place: None,
            region: None,
            lat_error_km: None,
            lon_error_km: None,
            depth_error_km: None,
            mag_error: None,
            status: EventStatus::Automatic,
            author: None,
            fetched_at: Utc::now(),
            raw_payload: None,
        }
    }

    #[tokio::test]
    async fn raw_store_round_trips_and_filters_by_lookback() {
        let store = InMemoryRawEventStore::new();
        let events = vec![event(Source::Usgs, "a", 1), event(Source::Usgs, "b", 48)];
        let inserted = store.insert_raw_events(&events).await.unwrap();
        assert_eq!(inserted, 2);

        let recent = store.load_recent(6).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source_event_id, "a");
    }

    #[tokio::test]
    async fn dead_letter_store_accumulates() {
        let store = InMemoryDeadLetterStore::new();
        assert!(store.is_empty().await);
        let row = DeadLetterRow {
            source: Source::Gfz,
            source_event_id: "x".into(),
            raw_payload: "garbage".into(),
            errors: vec!["bad column count".into()],
        };
        store.insert_dead_letters(&[row]).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unified_store_upsert_overwrites_same_id() {
        let store = InMemoryUnifiedStore::new();
        let unified = UnifiedEvent {
            unified_event_id: "UE-abc".into(),
            origin_time_utc: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            latitude: 1.0,
            longitude: 2.0,
            depth_km: 3.0,
            magnitude_value: 4.0,
            magnitude_type: MagnitudeType::parse("mw"),
            place: None,
            region: None,
            status: EventStatus::Automatic,
            num_sources: 1,
            preferred_source: Source::Usgs,
            preferred_event_uid: "usgs:1".into(),
            magnitude_std: 0.0,
            location_spread_km: 0.0,
            source_agreement_score: 1.0,
        };
        store.upsert(&unified, &[]).await.unwrap();
        store.upsert(&unified, &[]).await.unwrap();
        assert_eq!(store.unified_count().await, 1);
    }
}
