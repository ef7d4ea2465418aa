//! FDSN pipe-delimited text parser (used by the GFZ GEOFON web service).
//!
//! Header line begins with `#` and is discarded. Each data line has 13
//! pipe-separated columns:
//!
//! `EventID|Time|Latitude|Longitude|Depth/km|Author|Catalog|Contributor|
//! ContributorID|MagType|Magnitude|MagAuthor|EventLocationName`

use super::EventParser;
use crate::models::{EventStatus, MagnitudeType, NormalizedEvent, Source};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

const EXPECTED_COLUMNS: usize = 13;

pub struct FdsnTextParser {
    source: Source,
    /// Catalog names (case-insensitive) treated as reviewed bulletins for
    /// this source; any other catalog is reported `automatic`.
    reviewed_catalogs: Vec<String>,
}

impl FdsnTextParser {
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self {
            source,
            reviewed_catalogs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_reviewed_catalogs(source: Source, reviewed_catalogs: Vec<String>) -> Self {
        Self {
            source,
            reviewed_catalogs,
        }
    }

    fn status_for_catalog(&self, catalog: &str) -> EventStatus {
        if self
            .reviewed_catalogs
            .iter()
            .any(|c| c.eq_ignore_ascii_case(catalog))
        {
            EventStatus::Reviewed
        } else {
            EventStatus::Automatic
        }
    }
}

impl EventParser for FdsnTextParser {
    fn parse(&self, raw_payload: &str, fetched_at: DateTime<Utc>) -> Result<Vec<NormalizedEvent>, String> {
        if raw_payload.trim().is_empty() {
            return Ok(Vec::new());
        }

        // No top-level container to fail on for line-oriented text; malformed
        // individual lines are skipped, never the whole batch.
        Ok(raw_payload
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
            .filter_map(|line| self.parse_line(line, fetched_at))
            .collect())
    }
}

impl FdsnTextParser {
    fn parse_line(&self, line: &str, fetched_at: DateTime<Utc>) -> Option<NormalizedEvent> {
        let columns: Vec<&str> = line.split('|').map(str::trim).collect();
        if columns.len() != EXPECTED_COLUMNS {
            debug!(
                "fdsn_text: expected {EXPECTED_COLUMNS} columns, got {}",
                columns.len()
            );
            return None;
        }

        let event_id = columns[0];
        if event_id.is_empty() {
            return None;
        }
        let time_str = columns[1];
        let latitude: f64 = columns[2].parse().ok()?;
        let longitude: f64 = columns[3].parse().ok()?;
        let depth_km: f64 = columns[4].parse().ok()?;
        let author = non_empty(columns[5]);
        let catalog = columns[6];
        let mag_type_str = columns[9];
        let magnitude_value: f64 = columns[10].parse().ok()?;
        let place = non_empty(columns[12]);

        let origin_time_utc = parse_fdsn_time(time_str)?;

        Some(NormalizedEvent {
            event_uid: NormalizedEvent::make_event_uid(self.source, event_id),
            source: self.source,
            source_event_id: event_id.to_string(),
            origin_time_utc,
            latitude,
            longitude: NormalizedEvent::normalize_longitude(longitude),
            depth_km,
            magnitude_value,
            magnitude_type: MagnitudeType::parse(mag_type_str),
            place: place.clone(),
            region: place,
            lat_error_km: None,
            lon_error_km: None,
            depth_error_km: None,
            mag_error: None,
            status: self.status_for_catalog(catalog),
            author,
            fetched_at,
            raw_payload: None,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_fdsn_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_line(catalog: &str) -> String {
        format!(
            "gfz2024abcd|2024-01-15T12:00:00.0|35.2|-120.5|8.1|GFZ|{catalog}|GFZ|contrib1|mb|4.5|GFZ|Offshore Region\n"
        )
    }

    #[test]
    fn parses_data_line_skipping_header() {
        let payload = format!("# EventID|Time|...\n{}", sample_line("GFZ"));
        let parser = FdsnTextParser::new(Source::Gfz);
        let events = parser.parse(&payload, Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.source_event_id, "gfz2024abcd");
        assert!((e.latitude - 35.2).abs() < 1e-9);
        assert!((e.depth_km - 8.1).abs() < 1e-9);
        assert_eq!(e.author.as_deref(), Some("GFZ"));
        assert_eq!(e.place.as_deref(), Some("Offshore Region"));
        assert_eq!(e.region, e.place);
        assert_eq!(e.status, EventStatus::Automatic);
    }

    #[test]
    fn reviewed_catalog_yields_reviewed_status() {
        let payload = sample_line("GFZ-REVIEWED");
        let parser =
            FdsnTextParser::with_reviewed_catalogs(Source::Gfz, vec!["GFZ-REVIEWED".to_string()]);
        let events = parser.parse(&payload, Utc::now()).unwrap();
        assert_eq!(events[0].status, EventStatus::Reviewed);
    }

    #[test]
    fn malformed_line_is_skipped_not_panic() {
        let payload = "only|two|columns\n";
        let parser = FdsnTextParser::new(Source::Gfz);
        assert!(parser.parse(payload, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn empty_payload_returns_empty() {
        let parser = FdsnTextParser::new(Source::Gfz);
        assert!(parser.parse("", Utc::now()).unwrap().is_empty());
        assert!(parser.parse("   \n  ", Utc::now()).unwrap().is_empty());
    }
}
