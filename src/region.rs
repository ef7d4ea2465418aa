//! Region-aware source priority for earthquake deduplication.
//!
//! Classifies a coordinate into a broad geographic region and returns the
//! source priority order that reflects which agencies provide the best
//! coverage for that region (used to pick a preferred source and to weight
//! the centroid in the dedup engine's canonical-selection step).

use crate::models::Source;
use std::fmt;

/// Broad geographic region a coordinate falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Americas,
    Europe,
    Africa,
    AsiaPacific,
    Global,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Region::Americas => "americas",
            Region::Europe => "europe",
            Region::Africa => "africa",
            Region::AsiaPacific => "asia_pacific",
            Region::Global => "global",
        };
        f.write_str(s)
    }
}

/// Classify a lat/lon coordinate into a broad geographic region.
#[must_use]
pub fn classify_region(lat: f64, lon: f64) -> Region {
    if (-170.0..=-30.0).contains(&lon) {
        return Region::Americas;
    }
    if lon > -30.0 && lon <= 45.0 && lat >= 30.0 {
        return Region::Europe;
    }
    if (-20.0..=55.0).contains(&lon) && lat < 30.0 {
        return Region::Africa;
    }
    if lon > 45.0 || lon < -170.0 {
        return Region::AsiaPacific;
    }
    Region::Global
}

/// Region-specific source priority orders, highest priority first.
#[must_use]
pub const fn region_priority(region: Region) -> [Source; 6] {
    match region {
        Region::Americas => [
            Source::Usgs,
            Source::Emsc,
            Source::Gfz,
            Source::Isc,
            Source::Ipgp,
            Source::Geonet,
        ],
        Region::Europe => [
            Source::Emsc,
            Source::Gfz,
            Source::Usgs,
            Source::Isc,
            Source::Ipgp,
            Source::Geonet,
        ],
        Region::Africa => [
            Source::Isc,
            Source::Emsc,
            Source::Ipgp,
            Source::Usgs,
            Source::Gfz,
            Source::Geonet,
        ],
        Region::AsiaPacific => [
            Source::Isc,
            Source::Usgs,
            Source::Geonet,
            Source::Emsc,
            Source::Gfz,
            Source::Ipgp,
        ],
        Region::Global => [
            Source::Usgs,
            Source::Emsc,
            Source::Isc,
            Source::Gfz,
            Source::Ipgp,
            Source::Geonet,
        ],
    }
}

/// Get the source priority order for a given location.
#[must_use]
pub fn get_source_priority(lat: f64, lon: f64) -> [Source; 6] {
    region_priority(classify_region(lat, lon))
}

/// Rank of `source` within `priority`, or `priority.len()` if absent.
#[must_use]
pub fn source_rank(priority: &[Source; 6], source: Source) -> usize {
    priority.iter().position(|s| *s == source).unwrap_or(priority.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn california_is_americas() {
        assert_eq!(classify_region(36.5, -118.0), Region::Americas);
    }

    #[test]
    fn chile_is_americas() {
        assert_eq!(classify_region(-33.0, -70.0), Region::Americas);
    }

    #[test]
    fn paris_is_europe() {
        assert_eq!(classify_region(48.85, 2.35), Region::Europe);
    }

    #[test]
    fn greece_is_europe() {
        assert_eq!(classify_region(39.0, 22.0), Region::Europe);
    }

    #[test]
    fn nairobi_is_africa() {
        assert_eq!(classify_region(-1.3, 36.8), Region::Africa);
    }

    #[test]
    fn lagos_is_africa() {
        assert_eq!(classify_region(6.5, 3.4), Region::Africa);
    }

    #[test]
    fn tokyo_is_asia_pacific() {
        assert_eq!(classify_region(35.7, 139.7), Region::AsiaPacific);
    }

    #[test]
    fn new_zealand_is_asia_pacific() {
        assert_eq!(classify_region(-41.3, 174.8), Region::AsiaPacific);
    }

    #[test]
    fn north_atlantic_boundary_is_ambiguous_but_defined() {
        // lon = -30 exactly falls in the Americas band (-170..=-30 inclusive).
        assert_eq!(classify_region(40.0, -30.0), Region::Americas);
    }

    #[test]
    fn priority_first_choice_per_region() {
        assert_eq!(region_priority(Region::Americas)[0], Source::Usgs);
        assert_eq!(region_priority(Region::Europe)[0], Source::Emsc);
        assert_eq!(region_priority(Region::Africa)[0], Source::Isc);
        assert_eq!(region_priority(Region::AsiaPacific)[0], Source::Isc);
        assert_eq!(region_priority(Region::Global)[0], Source::Usgs);
    }

    #[test]
    fn every_region_lists_all_six_sources() {
        for region in [
            Region::Americas,
            Region::Europe,
            Region::Africa,
            Region::AsiaPacific,
            Region::Global,
        ] {
            let priority = region_priority(region);
            for source in Source::all() {
                assert!(priority.contains(&source));
            }
        }
    }

    #[test]
    fn source_rank_finds_position() {
        let priority = region_priority(Region::Americas);
        assert_eq!(source_rank(&priority, Source::Usgs), 0);
        assert_eq!(source_rank(&priority, Source::Geonet), 5);
    }
}
