//! QuakeML 1.2 XML parser (ISC, IPGP, GeoNet, and any other FDSN event
//! service that returns QuakeML).
//!
//! Handles two namespace scenarios transparently: elements under
//! `http://quakeml.org/xmlns/bed/1.2` and, as a fallback, no namespace at
//! all. Rather than re-running each lookup once namespaced and once bare
//! (the approach a DOM API without local-name matching forces), every tag
//! is matched on its local name only, so both documents parse through the
//! same code path.

use super::EventParser;
use crate::models::{EventStatus, MagnitudeType, NormalizedEvent, Source};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

/// Magnitude type preference order used when no `preferredMagnitudeID` is
/// present (the ISC quirk).
const MAG_PREFERENCE: [&str; 3] = ["mw", "mb", "ms"];

pub struct QuakeMlParser {
    default_source: Source,
}

impl QuakeMlParser {
    #[must_use]
    pub fn new(default_source: Source) -> Self {
        Self { default_source }
    }
}

impl EventParser for QuakeMlParser {
    fn parse(&self, raw_payload: &str, fetched_at: DateTime<Utc>) -> Result<Vec<NormalizedEvent>, String> {
        if raw_payload.trim().is_empty() {
            return Ok(Vec::new());
        }

        let root = parse_xml(raw_payload).ok_or_else(|| "malformed QuakeML payload".to_string())?;

        Ok(root
            .find_descendants("event")
            .into_iter()
            .filter_map(|event_node| parse_event(event_node, self.default_source, fetched_at))
            .collect())
    }
}

fn parse_event(
    event_node: &XmlNode,
    default_source: Source,
    fetched_at: DateTime<Utc>,
) -> Option<NormalizedEvent> {
    let public_id = event_node.attr("publicID").unwrap_or("");
    let source_event_id = extract_event_id(public_id);
    if source_event_id.is_empty() {
        return None;
    }

    let pref_origin_id = child_text(event_node, &["preferredOriginID"]);
    let pref_mag_id = child_text(event_node, &["preferredMagnitudeID"]);

    let origins = event_node.find_children("origin");
    let origin = find_preferred(&origins, pref_origin_id.as_deref())?;

    let magnitudes = event_node.find_children("magnitude");
    let magnitude_el = match pref_mag_id.as_deref() {
        Some(id) => find_preferred(&magnitudes, Some(id))?,
        None => select_best_magnitude(&magnitudes)?,
    };

    let time_str = child_text(origin, &["time", "value"])?;
    if time_str.is_empty() {
        return None;
    }
    let origin_time_utc = parse_quakeml_time(&time_str)?;

    let lat_str = child_text(origin, &["latitude", "value"])?;
    let lon_str = child_text(origin, &["longitude", "value"])?;
    if lat_str.is_empty() || lon_str.is_empty() {
        return None;
    }
    let latitude: f64 = lat_str.parse().ok()?;
    let longitude_raw: f64 = lon_str.parse().ok()?;
    let longitude = NormalizedEvent::normalize_longitude(longitude_raw);

    let depth_km = child_text(origin, &["depth", "value"])
        .and_then(|s| s.parse::<f64>().ok())
        .map_or(0.0, |meters| meters / 1000.0);

    let mag_str = child_text(magnitude_el, &["mag", "value"])?;
    if mag_str.is_empty() {
        return None;
    }
    let magnitude_value: f64 = mag_str.parse().ok()?;

    let mag_type_str = child_text(magnitude_el, &["type"]);
    let magnitude_type = MagnitudeType::parse(
        mag_type_str
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("ml"),
    );

    let eval_mode = child_text(origin, &["evaluationMode"]);
    let eval_status = child_text(origin, &["evaluationStatus"]);
    let status = map_status(eval_mode.as_deref(), eval_status.as_deref());

    let place = extract_description(event_node);

    let lat_error_km = child_text(origin, &["latitude", "uncertainty"]).and_then(|s| s.parse().ok());
    let lon_error_km = child_text(origin, &["longitude", "uncertainty"]).and_then(|s| s.parse().ok());
    let depth_error_km = child_text(origin, &["depth", "uncertainty"])
        .and_then(|s| s.parse::<f64>().ok())
        .map(|meters| meters / 1000.0);
    let mag_error = child_text(magnitude_el, &["mag", "uncertainty"]).and_then(|s| s.parse().ok());

    let author = child_text(origin, &["creationInfo", "author"]).filter(|s| !s.is_empty());

    Some(NormalizedEvent {
        event_uid: NormalizedEvent::make_event_uid(default_source, &source_event_id),
        source: default_source,
        source_event_id,
        origin_time_utc,
        latitude,
        longitude,
        depth_km,
        magnitude_value,
        magnitude_type,
        place: place.clone(),
        region: place,
        lat_error_km,
        lon_error_km,
        depth_error_km,
        mag_error,
        status,
        author,
        fetched_at,
        raw_payload: None,
    })
}

/// Extract the event ID from a `publicID` URI.
///
/// ISC convention: `smi:ISC/evid=600516598` -> `600516598`. Generic SMI URI:
/// take the final path segment. Opaque URI with a fragment: take the part
/// after `#`. Otherwise: verbatim.
fn extract_event_id(public_id: &str) -> String {
    if public_id.is_empty() {
        return String::new();
    }
    if let Some(idx) = public_id.rfind("evid=") {
        return public_id[idx + "evid=".len()..].to_string();
    }
    if let Some(idx) = public_id.rfind('/') {
        return public_id[idx + 1..].to_string();
    }
    if let Some(idx) = public_id.rfind('#') {
        return public_id[idx + 1..].to_string();
    }
    public_id.to_string()
}

/// Find the child matching `preferred_id` by `publicID`, falling back to
/// the first child in document order.
fn find_preferred<'a>(children: &[&'a XmlNode], preferred_id: Option<&str>) -> Option<&'a XmlNode> {
    if children.is_empty() {
        return None;
    }
    if let Some(id) = preferred_id {
        if let Some(found) = children.iter().find(|c| c.attr("publicID") == Some(id)) {
            return Some(found);
        }
    }
    children.first().copied()
}

/// Select the magnitude ranking earliest in `MAG_PREFERENCE`; types absent
/// from the list rank last, ties break by document order.
fn select_best_magnitude<'a>(magnitudes: &[&'a XmlNode]) -> Option<&'a XmlNode> {
    magnitudes
        .iter()
        .copied()
        .min_by_key(|m| {
            let mag_type = child_text(m, &["type"]).map(|t| t.to_lowercase());
            match mag_type {
                Some(t) => MAG_PREFERENCE
                    .iter()
                    .position(|p| *p == t)
                    .unwrap_or(MAG_PREFERENCE.len()),
                None => MAG_PREFERENCE.len(),
            }
        })
}

fn map_status(eval_mode: Option<&str>, eval_status: Option<&str>) -> EventStatus {
    if let Some(mode) = eval_mode {
        match mode.to_lowercase().as_str() {
            "manual" => return EventStatus::Reviewed,
            "automatic" => return EventStatus::Automatic,
            _ => {}
        }
    }
    if let Some(status) = eval_status {
        let s = status.to_lowercase();
        if s == "reviewed" || s == "confirmed" || s == "final" {
            return EventStatus::Reviewed;
        }
    }
    EventStatus::Automatic
}

fn extract_description(event_node: &XmlNode) -> Option<String> {
    let descriptions = event_node.find_children("description");

    for d in &descriptions {
        let dtype = child_text(d, &["type"]).map(|t| t.to_lowercase());
        let text = child_text(d, &["text"]).filter(|t| !t.is_empty());
        if let (Some(dtype), Some(text)) = (dtype, text) {
            if dtype == "flinn-engdahl region" || dtype == "region name" {
                return Some(text);
            }
        }
    }
    for d in &descriptions {
        if let Some(text) = child_text(d, &["text"]).filter(|t| !t.is_empty()) {
            return Some(text);
        }
    }
    None
}

/// ISO 8601 timestamp parsing per spec: fractional seconds are right-padded
/// (or truncated) to exactly 6 digits before parsing; `Z` is `+00:00`; a
/// timestamp with no zone is assumed UTC.
fn parse_quakeml_time(raw: &str) -> Option<DateTime<Utc>> {
    let mut s = raw.replace('Z', "+00:00");

    if let Some(dot_idx) = s.find('.') {
        let base = s[..dot_idx].to_string();
        let rest = &s[dot_idx + 1..];
        let tz_start = rest.find(['+', '-']).unwrap_or(rest.len());
        let (frac, tz_suffix) = rest.split_at(tz_start);
        let mut frac = frac.to_string();
        if frac.len() > 6 {
            frac.truncate(6);
        } else {
            while frac.len() < 6 {
                frac.push('0');
            }
        }
        s = format!("{base}.{frac}{tz_suffix}");
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

fn child_text(node: &XmlNode, path: &[&str]) -> Option<String> {
    node.find_child_path(path).map(|n| n.text.trim().to_string())
}

// ── Minimal namespace-agnostic XML tree ────────────────────────────────

#[derive(Debug, Default)]
struct XmlNode {
    tag: String,
    attrs: HashMap<String, String>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Direct children matching a local tag name, in document order.
    fn find_children(&self, tag: &str) -> Vec<&XmlNode> {
        self.children.iter().filter(|c| c.tag == tag).collect()
    }

    /// Stepwise direct-child navigation, e.g. `["time", "value"]` finds the
    /// direct `<time>` child, then its direct `<value>` child.
    fn find_child_path(&self, path: &[&str]) -> Option<&XmlNode> {
        let mut current = self;
        for segment in path {
            current = current.children.iter().find(|c| c.tag == *segment)?;
        }
        Some(current)
    }

    /// Any descendant (at any depth) matching a local tag name, in document order.
    fn find_descendants(&self, tag: &str) -> Vec<&XmlNode> {
        let mut out = Vec::new();
        for child in &self.children {
            if child.tag == tag {
                out.push(child);
            }
            out.extend(child.find_descendants(tag));
        }
        out
    }

    fn from_start(e: &BytesStart) -> Option<XmlNode> {
        let tag = String::from_utf8(e.name().local_name().as_ref().to_vec()).ok()?;
        let mut attrs = HashMap::new();
        for attr in e.attributes() {
            let attr = attr.ok()?;
            let key = String::from_utf8(attr.key.local_name().as_ref().to_vec()).ok()?;
            let value = attr.unescape_value().ok()?.into_owned();
            attrs.insert(key, value);
        }
        Some(XmlNode {
            tag,
            attrs,
            children: Vec::new(),
            text: String::new(),
        })
    }
}

fn parse_xml(raw: &str) -> Option<XmlNode> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text = true;

    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(XmlNode::from_start(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let node = XmlNode::from_start(&e)?;
                stack.last_mut()?.children.push(node);
            }
            Ok(Event::End(_)) => {
                let finished = stack.pop()?;
                stack.last_mut()?.children.push(finished);
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().ok()?.into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return None;
    }
    stack.pop()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ISC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<q:quakeml xmlns:q="http://quakeml.org/xmlns/quakeml/1.2"
           xmlns="http://quakeml.org/xmlns/bed/1.2">
  <eventParameters publicID="smi:ISC/bulletin">
    <event publicID="smi:ISC/evid=600516598">
      <origin publicID="smi:ISC/origid=100001">
        <time><value>2024-01-15T12:00:00.000Z</value></time>
        <latitude>
          <value>-1.5</value>
          <uncertainty>0.05</uncertainty>
        </latitude>
        <longitude>
          <value>29.2</value>
          <uncertainty>0.08</uncertainty>
        </longitude>
        <depth>
          <value>15000</value>
          <uncertainty>3000</uncertainty>
        </depth>
        <evaluationMode>manual</evaluationMode>
        <evaluationStatus>reviewed</evaluationStatus>
        <creationInfo><author>ISC</author></creationInfo>
      </origin>
      <magnitude publicID="smi:ISC/magid=300001">
        <mag><value>4.8</value><uncertainty>0.2</uncertainty></mag>
        <type>mb</type>
      </magnitude>
      <magnitude publicID="smi:ISC/magid=300002">
        <mag><value>5.1</value><uncertainty>0.15</uncertainty></mag>
        <type>Mw</type>
      </magnitude>
      <magnitude publicID="smi:ISC/magid=300003">
        <mag><value>4.5</value><uncertainty>0.3</uncertainty></mag>
        <type>Ms</type>
      </magnitude>
      <description>
        <type>Flinn-Engdahl region</type>
        <text>Lake Kivu Region</text>
      </description>
    </event>
  </eventParameters>
</q:quakeml>
"#;

    const SAMPLE_IPGP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<q:quakeml xmlns:q="http://quakeml.org/xmlns/quakeml/1.2"
           xmlns="http://quakeml.org/xmlns/bed/1.2">
  <eventParameters>
    <event publicID="smi:ipgp.fr/event/12345">
      <preferredOriginID>smi:ipgp.fr/origin/98765</preferredOriginID>
      <preferredMagnitudeID>smi:ipgp.fr/magnitude/54321</preferredMagnitudeID>
      <origin publicID="smi:ipgp.fr/origin/98765">
        <time><value>2024-03-10T08:30:15.500Z</value></time>
        <latitude><value>14.6</value></latitude>
        <longitude><value>-61.0</value></longitude>
        <depth><value>5000</value></depth>
        <evaluationMode>automatic</evaluationMode>
      </origin>
      <origin publicID="smi:ipgp.fr/origin/99999">
        <time><value>2024-03-10T08:30:20.000Z</value></time>
        <latitude><value>14.7</value></latitude>
        <longitude><value>-61.1</value></longitude>
        <depth><value>6000</value></depth>
      </origin>
      <magnitude publicID="smi:ipgp.fr/magnitude/54321">
        <mag><value>3.2</value></mag>
        <type>ML</type>
      </magnitude>
      <magnitude publicID="smi:ipgp.fr/magnitude/54322">
        <mag><value>3.5</value></mag>
        <type>Mw</type>
      </magnitude>
      <description>
        <type>Flinn-Engdahl region</type>
        <text>Martinique Region</text>
      </description>
    </event>
  </eventParameters>
</q:quakeml>
"#;

    #[test]
    fn parses_isc_format_preferring_mw_over_mb_ms() {
        let parser = QuakeMlParser::new(Source::Isc);
        let events = parser.parse(SAMPLE_ISC, Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.source, Source::Isc);
        assert_eq!(e.source_event_id, "600516598");
        assert_eq!(e.event_uid, "isc:600516598");
        assert_eq!(e.magnitude_type.as_str(), "mw");
        assert!((e.magnitude_value - 5.1).abs() < 1e-9);
        assert_eq!(e.status, EventStatus::Reviewed);
        assert_eq!(e.place.as_deref(), Some("Lake Kivu Region"));
    }

    #[test]
    fn isc_depth_meters_converted_to_km() {
        let parser = QuakeMlParser::new(Source::Isc);
        let events = parser.parse(SAMPLE_ISC, Utc::now()).unwrap();
        assert!((events[0].depth_km - 15.0).abs() < 1e-9);
    }

    #[test]
    fn isc_uncertainty_fields_parsed() {
        let parser = QuakeMlParser::new(Source::Isc);
        let events = parser.parse(SAMPLE_ISC, Utc::now()).unwrap();
        let e = &events[0];
        assert!((e.lat_error_km.unwrap() - 0.05).abs() < 1e-9);
        assert!((e.lon_error_km.unwrap() - 0.08).abs() < 1e-9);
        assert!((e.depth_error_km.unwrap() - 3.0).abs() < 1e-9);
        assert!((e.mag_error.unwrap() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn parses_ipgp_using_preferred_ids() {
        let parser = QuakeMlParser::new(Source::Ipgp);
        let events = parser.parse(SAMPLE_IPGP, Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.source_event_id, "12345");
        assert_eq!(e.event_uid, "ipgp:12345");
        // preferred magnitude is ML 3.2, not Mw 3.5
        assert!((e.magnitude_value - 3.2).abs() < 1e-9);
        assert_eq!(e.magnitude_type.as_str(), "ml");
        // preferred origin is the first one (98765)
        assert!((e.latitude - 14.6).abs() < 1e-9);
        assert!((e.longitude - (-61.0)).abs() < 1e-9);
        assert!((e.depth_km - 5.0).abs() < 1e-9);
        assert_eq!(e.status, EventStatus::Automatic);
        assert_eq!(e.place.as_deref(), Some("Martinique Region"));
    }

    #[test]
    fn empty_payload_returns_empty() {
        let parser = QuakeMlParser::new(Source::Isc);
        assert!(parser.parse("", Utc::now()).unwrap().is_empty());
        assert!(parser.parse("   ", Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn empty_event_parameters_returns_empty() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?><q:quakeml xmlns:q="http://quakeml.org/xmlns/quakeml/1.2" xmlns="http://quakeml.org/xmlns/bed/1.2"><eventParameters></eventParameters></q:quakeml>"#;
        let parser = QuakeMlParser::new(Source::Isc);
        assert!(parser.parse(xml, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn missing_description_leaves_place_none() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<q:quakeml xmlns:q="http://quakeml.org/xmlns/quakeml/1.2" xmlns="http://quakeml.org/xmlns/bed/1.2">
  <eventParameters>
    <event publicID="smi:test/ev1">
      <origin publicID="smi:test/orig1">
        <time><value>2024-01-15T12:00:00Z</value></time>
        <latitude><value>35.0</value></latitude>
        <longitude><value>-120.0</value></longitude>
        <depth><value>10000</value></depth>
      </origin>
      <magnitude publicID="smi:test/mag1">
        <mag><value>4.0</value></mag>
        <type>ML</type>
      </magnitude>
    </event>
  </eventParameters>
</q:quakeml>"#;
        let parser = QuakeMlParser::new(Source::Isc);
        let events = parser.parse(xml, Utc::now()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].place.is_none());
    }

    #[test]
    fn malformed_xml_returns_error_not_panics() {
        let parser = QuakeMlParser::new(Source::Isc);
        assert!(parser.parse("<not>valid<xml", Utc::now()).is_err());
    }

    #[test]
    fn event_id_extraction_variants() {
        assert_eq!(extract_event_id("smi:ISC/evid=600516598"), "600516598");
        assert_eq!(extract_event_id("smi:ipgp.fr/event/12345"), "12345");
        assert_eq!(extract_event_id("quakeml:org#ev999"), "ev999");
        assert_eq!(extract_event_id("plain_id"), "plain_id");
        assert_eq!(extract_event_id(""), "");
    }

    #[test]
    fn parsed_events_pass_validation() {
        let parser = QuakeMlParser::new(Source::Isc);
        for event in parser.parse(SAMPLE_ISC, Utc::now()).unwrap() {
            assert!(crate::models::validate(&event).is_empty());
        }
    }
}
