//! Source-format parsers: translate a raw agency payload into
//! [`NormalizedEvent`](crate::models::NormalizedEvent) records.
//!
//! Every parser implements the same contract: never fail the whole batch on
//! a per-event error (a malformed individual event is silently skipped — it
//! reappears on the next fetch if the agency re-serves it). A payload that
//! fails to parse at the top level (invalid JSON/XML) returns `Err`, which
//! the ingestion pipeline turns into a single dead-letter row (spec §4.3
//! step 9) — distinct from a well-formed payload that legitimately contains
//! zero events, which returns `Ok(vec![])`.

pub mod emsc;
pub mod fdsn_text;
pub mod quakeml;
pub mod usgs;

use crate::config::SourceConfig;
use crate::models::{NormalizedEvent, Source};
use chrono::{DateTime, Utc};

/// Common parser contract implemented by all four source-format parsers.
pub trait EventParser {
    /// # Errors
    ///
    /// Returns `Err` only when the payload fails to parse at the top level
    /// (malformed JSON/XML). Per-event malformation is handled internally —
    /// the offending record is skipped, not surfaced as an error.
    fn parse(&self, raw_payload: &str, fetched_at: DateTime<Utc>) -> Result<Vec<NormalizedEvent>, String>;
}

/// Look up the parser for a source, per the static dispatch table in spec
/// §4.3 step 8. `config.reviewed_catalogs` threads through to the FDSN text
/// parser so "configurable per source" (spec §4.2) is actually reachable
/// from the ingestion pipeline, not just from a unit test.
#[must_use]
pub fn parser_for(config: &SourceConfig) -> Box<dyn EventParser> {
    match config.source {
        Source::Usgs => Box::new(usgs::UsgsGeoJsonParser),
        Source::Emsc => Box::new(emsc::EmscGeoJsonParser),
        Source::Gfz => Box::new(fdsn_text::FdsnTextParser::with_reviewed_catalogs(
            Source::Gfz,
            config.reviewed_catalogs.clone(),
        )),
        Source::Isc => Box::new(quakeml::QuakeMlParser::new(Source::Isc)),
        Source::Ipgp => Box::new(quakeml::QuakeMlParser::new(Source::Ipgp)),
        Source::Geonet => Box::new(quakeml::QuakeMlParser::new(Source::Geonet)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gfz_parser_carries_the_configured_reviewed_catalogs() {
        let config = SourceConfig::default_for(Source::Gfz);
        assert_eq!(config.reviewed_catalogs, vec!["GFZ".to_string()]);
        // parser_for doesn't expose the inner list directly; exercised
        // end-to-end via fdsn_text.rs's own reviewed-catalog tests and
        // pipeline.rs's dispatch, which both construct through this path.
        let _parser = parser_for(&config);
    }
}
