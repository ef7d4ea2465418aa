//! EMSC GeoJSON feed parser.
//!
//! Same `FeatureCollection` shape as the USGS feed, but EMSC's
//! seismicportal.eu service uses its own property names and an ISO-8601
//! timestamp instead of epoch milliseconds. Key mapping:
//!
//! | EMSC key       | normalized field        |
//! |----------------|--------------------------|
//! | `unid`         | `source_event_id`        |
//! | `mag`          | `magnitude_value`        |
//! | `magtype`      | `magnitude_type`         |
//! | `time`         | `origin_time_utc` (ISO)  |
//! | `flynn_region` | `place` / `region`       |
//! | `auth`         | `author`                 |
//! | `evtype`       | `status` (`"ke"` known event -> reviewed) |

use super::EventParser;
use crate::models::{EventStatus, MagnitudeType, NormalizedEvent, Source};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    unid: Option<String>,
    mag: Option<f64>,
    magtype: Option<String>,
    time: Option<String>,
    flynn_region: Option<String>,
    auth: Option<String>,
    evtype: Option<String>,
}

pub struct EmscGeoJsonParser;

impl EventParser for EmscGeoJsonParser {
    fn parse(&self, raw_payload: &str, fetched_at: DateTime<Utc>) -> Result<Vec<NormalizedEvent>, String> {
        if raw_payload.trim().is_empty() {
            return Ok(Vec::new());
        }

        let collection: FeatureCollection = serde_json::from_str(raw_payload).map_err(|e| {
            debug!("emsc parse: malformed payload: {e}");
            format!("malformed EMSC payload: {e}")
        })?;

        Ok(collection
            .features
            .into_iter()
            .filter_map(|f| parse_feature(f, fetched_at))
            .collect())
    }
}

fn parse_feature(feature: Feature, fetched_at: DateTime<Utc>) -> Option<NormalizedEvent> {
    let mag = feature.properties.mag?;
    let source_event_id = feature.properties.unid?;
    if source_event_id.trim().is_empty() {
        return None;
    }
    if feature.geometry.coordinates.len() != 3 {
        return None;
    }
    let lon = feature.geometry.coordinates[0];
    let lat = feature.geometry.coordinates[1];
    let depth_km = feature.geometry.coordinates[2];

    let origin_time_utc = feature
        .properties
        .time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;

    let status = match feature.properties.evtype.as_deref() {
        Some("ke") => EventStatus::Reviewed,
        _ => EventStatus::Automatic,
    };

    let magnitude_type = feature
        .properties
        .magtype
        .as_deref()
        .map_or(MagnitudeType::parse("md"), MagnitudeType::parse);

    let region = feature.properties.flynn_region.clone();

    Some(NormalizedEvent {
        event_uid: NormalizedEvent::make_event_uid(Source::Emsc, &source_event_id),
        source: Source::Emsc,
        source_event_id,
        origin_time_utc,
        latitude: lat,
        longitude: NormalizedEvent::normalize_longitude(lon),
        depth_km,
        magnitude_value: mag,
        magnitude_type,
        place: feature.properties.flynn_region,
        region,
        lat_error_km: None,
        lon_error_km: None,
        depth_error_km: None,
        mag_error: None,
        status,
        author: feature.properties.auth,
        fetched_at,
        raw_payload: None,
    })
}
