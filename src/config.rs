//! Per-source configuration (ambient, mirrors the `SOURCES`/`FORMAT_MAP`
//! tables in the original Python ingester).
//!
//! Defaults are compiled in, matching the teacher's `ServerConfig::default()`
//! pattern; `base_url` can be overridden per source for testing against a
//! mock server via `QUAKE_UNIFY_<SOURCE>_BASE_URL`.

use crate::models::Source;
use std::time::Duration;

/// Wire format token used in the `format` query parameter (spec §4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    GeoJson,
    Json,
    Text,
    Xml,
}

impl WireFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            WireFormat::GeoJson => "geojson",
            WireFormat::Json => "json",
            WireFormat::Text => "text",
            WireFormat::Xml => "xml",
        }
    }
}

/// Static per-source deployment settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub source: Source,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_base: f64,
    pub format: WireFormat,
    /// FDSN text catalog names (case-insensitive) treated as reviewed
    /// bulletins for this source, per spec §4.2: "Status is `automatic`
    /// unless the catalog is a reviewed-bulletin catalog (configurable per
    /// source)." Empty for every source whose parser isn't FDSN text.
    pub reviewed_catalogs: Vec<String>,
}

impl SourceConfig {
    #[must_use]
    pub fn default_for(source: Source) -> Self {
        let (base_url, format) = match source {
            Source::Usgs => (
                "https://earthquake.usgs.gov/fdsnws/event/1/query",
                WireFormat::GeoJson,
            ),
            Source::Emsc => (
                "https://www.seismicportal.eu/fdsnws/event/1/query",
                WireFormat::Json,
            ),
            Source::Gfz => (
                "https://geofon.gfz-potsdam.de/fdsnws/event/1/query",
                WireFormat::Text,
            ),
            Source::Isc => ("https://www.isc.ac.uk/fdsnws/event/1/query", WireFormat::Xml),
            Source::Ipgp => (
                "https://www.webservices.ipgp.fr/fdsnws/event/1/query",
                WireFormat::Xml,
            ),
            Source::Geonet => (
                "https://service.geonet.org.nz/fdsnws/event/1/query",
                WireFormat::Xml,
            ),
        };

        // GEOFON (GFZ) tags its own reviewed bulletin with catalog "GFZ";
        // contributed/automatic picks carry other catalog names and stay
        // `automatic`. No other source's parser reads this field.
        let reviewed_catalogs = match source {
            Source::Gfz => vec!["GFZ".to_string()],
            _ => Vec::new(),
        };

        Self {
            source,
            base_url: env_override(source).unwrap_or_else(|| base_url.to_string()),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff_base: 2.0,
            format,
            reviewed_catalogs,
        }
    }
}

fn env_override(source: Source) -> Option<String> {
    let var = format!("QUAKE_UNIFY_{}_BASE_URL", source.as_str().to_uppercase());
    std::env::var(var).ok()
}
