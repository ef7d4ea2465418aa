//! Canonical data model shared by every parser and by the dedup engine.
//!
//! `NormalizedEvent` is the uniform shape all four source-format parsers
//! (`parsers::usgs`, `parsers::emsc`, `parsers::fdsn_text`,
//! `parsers::quakeml`) translate into. `EventRecord` is the lighter
//! projection the dedup engine clusters over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of agencies this system ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Usgs,
    Emsc,
    Gfz,
    Isc,
    Ipgp,
    Geonet,
}

impl Source {
    /// All sources, in a fixed canonical order.
    #[must_use]
    pub const fn all() -> [Source; 6] {
        [
            Source::Usgs,
            Source::Emsc,
            Source::Gfz,
            Source::Isc,
            Source::Ipgp,
            Source::Geonet,
        ]
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Source::Usgs => "usgs",
            Source::Emsc => "emsc",
            Source::Gfz => "gfz",
            Source::Isc => "isc",
            Source::Ipgp => "ipgp",
            Source::Geonet => "geonet",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "usgs" => Ok(Source::Usgs),
            "emsc" => Ok(Source::Emsc),
            "gfz" => Ok(Source::Gfz),
            "isc" => Ok(Source::Isc),
            "ipgp" => Ok(Source::Ipgp),
            "geonet" => Ok(Source::Geonet),
            _ => Err(format!("unknown source: {s}")),
        }
    }
}

/// Review status of an origin, per spec §3.1.
///
/// QuakeML's richer `{reviewed, confirmed, final}` vocabulary collapses to
/// `Reviewed` at the parser boundary — no downstream component (priority,
/// clustering, canonical selection) branches on the distinction, so we don't
/// carry unused variants. See DESIGN.md for the full rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Automatic,
    Reviewed,
}

impl EventStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventStatus::Automatic => "automatic",
            EventStatus::Reviewed => "reviewed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Magnitude scales common enough across agencies to warrant a checked
/// variant. Anything else still round-trips via `MagnitudeType::Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownMagnitudeType {
    Mw,
    Mb,
    Ms,
    Ml,
    Md,
    Mww,
    Mwc,
    Mwb,
}

impl KnownMagnitudeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            KnownMagnitudeType::Mw => "mw",
            KnownMagnitudeType::Mb => "mb",
            KnownMagnitudeType::Ms => "ms",
            KnownMagnitudeType::Ml => "ml",
            KnownMagnitudeType::Md => "md",
            KnownMagnitudeType::Mww => "mww",
            KnownMagnitudeType::Mwc => "mwc",
            KnownMagnitudeType::Mwb => "mwb",
        }
    }
}

/// Open-vocabulary magnitude type tag. Always stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MagnitudeType {
    Known(KnownMagnitudeType),
    Other(String),
}

impl MagnitudeType {
    /// Parse a raw (possibly mixed-case) magnitude type tag.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        match lower.as_str() {
            "mw" => MagnitudeType::Known(KnownMagnitudeType::Mw),
            "mb" => MagnitudeType::Known(KnownMagnitudeType::Mb),
            "ms" => MagnitudeType::Known(KnownMagnitudeType::Ms),
            "ml" => MagnitudeType::Known(KnownMagnitudeType::Ml),
            "md" => MagnitudeType::Known(KnownMagnitudeType::Md),
            "mww" => MagnitudeType::Known(KnownMagnitudeType::Mww),
            "mwc" => MagnitudeType::Known(KnownMagnitudeType::Mwc),
            "mwb" => MagnitudeType::Known(KnownMagnitudeType::Mwb),
            _ => MagnitudeType::Other(lower),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            MagnitudeType::Known(k) => k.as_str(),
            MagnitudeType::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for MagnitudeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical, validated earthquake record produced by every parser.
///
/// See spec §3.1 for the full invariant list; `validate` is the single
/// source of truth for enforcing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_uid: String,
    pub source: Source,
    pub source_event_id: String,
    pub origin_time_utc: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude_value: f64,
    pub magnitude_type: MagnitudeType,
    pub place: Option<String>,
    pub region: Option<String>,
    pub lat_error_km: Option<f64>,
    pub lon_error_km: Option<f64>,
    pub depth_error_km: Option<f64>,
    pub mag_error: Option<f64>,
    pub status: EventStatus,
    pub author: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Bounded excerpt retained for dead-letter diagnostics; capped by
    /// the caller (parsers leave this empty, the ingestion pipeline fills
    /// it in only when a record is about to be dead-lettered).
    pub raw_payload: Option<String>,
}

/// Max chars kept for a whole-payload parse failure dead-letter (spec §4.3 step 9).
pub const PARSE_FAILURE_EXCERPT_LIMIT: usize = 10_000;

/// Max chars kept for a per-event validation failure dead-letter (spec §4.3 step 10).
pub const VALIDATION_FAILURE_EXCERPT_LIMIT: usize = 5_000;

impl NormalizedEvent {
    /// Build `event_uid` from `source:source_event_id`.
    #[must_use]
    pub fn make_event_uid(source: Source, source_event_id: &str) -> String {
        format!("{source}:{source_event_id}")
    }

    /// Wrap a longitude into the valid `[-180, 180]` range by repeated
    /// +-360 shifts, per spec §3.1.
    #[must_use]
    pub fn normalize_longitude(mut lon: f64) -> f64 {
        while lon > 180.0 {
            lon -= 360.0;
        }
        while lon < -180.0 {
            lon += 360.0;
        }
        lon
    }
}

/// Validate all invariants from spec §3.1, returning every failure (not
/// short-circuiting) so a dead-letter row carries a complete diagnosis.
#[must_use]
pub fn validate(event: &NormalizedEvent) -> Vec<String> {
    let mut errors = Vec::new();

    if event.source_event_id.trim().is_empty() {
        errors.push("source_event_id must not be empty".to_string());
    }
    if !(-90.0..=90.0).contains(&event.latitude) {
        errors.push(format!(
            "latitude {} out of range [-90, 90]",
            event.latitude
        ));
    }
    if !(-180.0..=180.0).contains(&event.longitude) {
        errors.push(format!(
            "longitude {} out of range [-180, 180]",
            event.longitude
        ));
    }
    if event.depth_km < 0.0 {
        errors.push(format!("depth_km {} must be >= 0", event.depth_km));
    }
    if !event.magnitude_value.is_finite() {
        errors.push(format!(
            "magnitude_value {} is not finite",
            event.magnitude_value
        ));
    }

    errors
}

/// Clustering-view projection of `NormalizedEvent` loaded from the raw
/// store for the dedup pass (spec §3.2). Identical semantics to
/// `NormalizedEvent`, dropping `raw_payload`, `author`, the uncertainty
/// fields, and `fetched_at` — none of those participate in matching,
/// canonical selection, or quality metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_uid: String,
    pub source: Source,
    pub source_event_id: String,
    pub origin_time_utc: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude_value: f64,
    pub magnitude_type: MagnitudeType,
    pub place: Option<String>,
    pub region: Option<String>,
    pub status: EventStatus,
}

impl From<&NormalizedEvent> for EventRecord {
    fn from(e: &NormalizedEvent) -> Self {
        Self {
            event_uid: e.event_uid.clone(),
            source: e.source,
            source_event_id: e.source_event_id.clone(),
            origin_time_utc: e.origin_time_utc,
            latitude: e.latitude,
            longitude: e.longitude,
            depth_km: e.depth_km,
            magnitude_value: e.magnitude_value,
            magnitude_type: e.magnitude_type.clone(),
            place: e.place.clone(),
            region: e.region.clone(),
            status: e.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn valid_event() -> NormalizedEvent {
        NormalizedEvent {
            event_uid: "usgs:eq1".into(),
            source: Source::Usgs,
            source_event_id: "eq1".into(),
            origin_time_utc: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
            latitude: 35.0,
            longitude: -120.0,
            depth_km: 10.0,
            magnitude_value: 5.0,
            magnitude_type: MagnitudeType::parse("mw"),
            place: Some("Central California".into()),
            region: Some("Central California".into()),
            lat_error_km: None,
            lon_error_km: None,
            depth_error_km: None,
            mag_error: None,
            status: EventStatus::Automatic,
            author: None,
            fetched_at: Utc.with_ymd_and_hms(2024, 1, 15, 12, 1, 0).unwrap(),
            raw_payload: None,
        }
    }

    #[test]
    fn valid_event_has_no_errors() {
        assert!(validate(&valid_event()).is_empty());
    }

    #[test]
    fn empty_source_event_id_fails() {
        let mut e = valid_event();
        e.source_event_id = String::new();
        let errors = validate(&e);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn reports_all_failures_not_just_first() {
        let mut e = valid_event();
        e.source_event_id = String::new();
        e.latitude = 200.0;
        e.depth_km = -5.0;
        e.magnitude_value = f64::NAN;
        let errors = validate(&e);
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn depth_exactly_zero_is_valid() {
        let mut e = valid_event();
        e.depth_km = 0.0;
        assert!(validate(&e).is_empty());
    }

    #[test]
    fn longitude_boundary_180_is_valid() {
        let mut e = valid_event();
        e.longitude = 180.0;
        assert!(validate(&e).is_empty());
        e.longitude = -180.0;
        assert!(validate(&e).is_empty());
    }

    #[test]
    fn longitude_wraps_past_180() {
        assert!((NormalizedEvent::normalize_longitude(180.5) - (-179.5)).abs() < 1e-9);
        assert!((NormalizedEvent::normalize_longitude(-185.0) - 175.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_magnitude_type_preserved_lowercase() {
        let mt = MagnitudeType::parse("Mfoo");
        assert_eq!(mt.as_str(), "mfoo");
        assert_eq!(mt, MagnitudeType::Other("mfoo".into()));
    }

    #[test]
    fn source_round_trips_through_str() {
        for s in Source::all() {
            let parsed: Source = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let e = valid_event();
        let json = serde_json::to_string(&e).unwrap();
        let back: NormalizedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_uid, e.event_uid);
        assert_eq!(back.source, e.source);
        assert_eq!(back.magnitude_type, e.magnitude_type);
        assert_eq!(back.status, e.status);
        assert!((back.latitude - e.latitude).abs() < 1e-12);
    }

    #[test]
    fn event_record_drops_diagnostic_only_fields() {
        let mut e = valid_event();
        e.author = Some("ISC".into());
        e.raw_payload = Some("<xml/>".into());
        let record = EventRecord::from(&e);
        assert_eq!(record.event_uid, e.event_uid);
        assert_eq!(record.magnitude_value, e.magnitude_value);
    }
}
