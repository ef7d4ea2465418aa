//! USGS GeoJSON feed parser.
//!
//! Wire shape: a `FeatureCollection` of `Feature`s, `properties.time` in
//! milliseconds since epoch, coordinates `[lon, lat, depth_km]`.

use super::EventParser;
use crate::models::{MagnitudeType, NormalizedEvent, Source};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    geometry: Geometry,
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    mag: Option<f64>,
    #[serde(rename = "magType")]
    mag_type: Option<String>,
    time: i64,
    place: Option<String>,
    status: Option<String>,
}

pub struct UsgsGeoJsonParser;

impl EventParser for UsgsGeoJsonParser {
    fn parse(&self, raw_payload: &str, fetched_at: DateTime<Utc>) -> Result<Vec<NormalizedEvent>, String> {
        if raw_payload.trim().is_empty() {
            return Ok(Vec::new());
        }

        let collection: FeatureCollection = serde_json::from_str(raw_payload).map_err(|e| {
            debug!("usgs parse: malformed payload: {e}");
            format!("malformed USGS GeoJSON payload: {e}")
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
    if feature.geometry.coordinates.len() != 3 {
        return None;
    }
    let lon = feature.geometry.coordinates[0];
    let lat = feature.geometry.coordinates[1];
    let depth_km = feature.geometry.coordinates[2];

    let origin_time_utc = DateTime::<Utc>::from_timestamp_millis(feature.properties.time)?;

    let status = match feature.properties.status.as_deref() {
        Some("reviewed") => crate::models::EventStatus::Reviewed,
        _ => crate::models::EventStatus::Automatic,
    };

    let magnitude_type = feature
        .properties
        .mag_type
        .as_deref()
        .map_or(MagnitudeType::parse("md"), MagnitudeType::parse);

    Some(NormalizedEvent {
        event_uid: NormalizedEvent::make_event_uid(Source::Usgs, &feature.id),
        source: Source::Usgs,
        source_event_id: feature.id,
        origin_time_utc,
        latitude: lat,
        longitude: NormalizedEvent::normalize_longitude(lon),
        depth_km,
        magnitude_value: mag,
        magnitude_type,
        place: feature.properties.place,
        region: None,
        lat_error_km: None,
        lon_error_km: None,
        depth_error_km: None,
        mag_error: None,
        status,
        author: None,
        fetched_at,
        raw_payload: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mag: &str, status: &str) -> String {
        format!(
            r#"{{"type":"FeatureCollection","features":[{{"type":"Feature","id":"us7000abcd","properties":{{"mag":{mag},"magType":"mb","time":1700000000000,"place":"10km N of Somewhere","status":"{status}"}},"geometry":{{"type":"Point","coordinates":[-120.5,35.2,8.1]}}}}]}}"#
        )
    }

    #[test]
    fn parses_basic_feature() {
        let parser = UsgsGeoJsonParser;
        let events = parser.parse(&sample("4.5", "reviewed"), Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.source, Source::Usgs);
        assert_eq!(e.source_event_id, "us7000abcd");
        assert_eq!(e.event_uid, "usgs:us7000abcd");
        assert!((e.magnitude_value - 4.5).abs() < 1e-9);
        assert_eq!(e.magnitude_type.as_str(), "mb");
        assert!((e.latitude - 35.2).abs() < 1e-9);
        assert!((e.longitude - (-120.5)).abs() < 1e-9);
        assert!((e.depth_km - 8.1).abs() < 1e-9);
        assert_eq!(e.status, crate::models::EventStatus::Reviewed);
    }

    #[test]
    fn automatic_status_default() {
        let parser = UsgsGeoJsonParser;
        let events = parser.parse(&sample("4.5", "automatic"), Utc::now()).unwrap();
        assert_eq!(events[0].status, crate::models::EventStatus::Automatic);
    }

    #[test]
    fn null_magnitude_is_skipped() {
        let payload = r#"{"type":"FeatureCollection","features":[{"type":"Feature","id":"us1","properties":{"mag":null,"magType":null,"time":1700000000000,"place":null,"status":null},"geometry":{"type":"Point","coordinates":[1.0,2.0,3.0]}}]}"#;
        let parser = UsgsGeoJsonParser;
        let events = parser.parse(payload, Utc::now()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn empty_payload_returns_empty() {
        let parser = UsgsGeoJsonParser;
        assert!(parser.parse("", Utc::now()).unwrap().is_empty());
        assert!(parser.parse("   ", Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn malformed_json_returns_error_not_panics() {
        let parser = UsgsGeoJsonParser;
        assert!(parser.parse("{not valid json", Utc::now()).is_err());
    }
}
