//! Core data types shared between components.

use chrono::{DateTime, Utc};

/// How a tweet's location was captured.
#[derive(Clone, Debug, PartialEq)]
pub enum LocationType {
    /// The user typed a free-form location string into their profile.
    LocationString(String),
    /// The tweet carries a precise `(lat, lon)` geotag.
    GeoLocation(f64, f64),
    /// No location information at all.
    None,
}

/// An immutable tweet as read from the message store.
#[derive(Clone, Debug, PartialEq)]
pub struct Tweet {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub location_type: LocationType,
}

impl Tweet {
    /// The free-form location string, if this tweet carries one.
    pub fn location_string(&self) -> Option<&str> {
        match &self.location_type {
            LocationType::LocationString(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A fixed-width time bucket and the tweet count observed in it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bin {
    pub start: DateTime<Utc>,
    pub count: u64,
}

/// A detection emitted by the STA/LTA trigger.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trigger {
    pub time: DateTime<Utc>,
    pub sta: f64,
    pub lta: f64,
    pub ratio: f64,
    pub threshold: f64,
}

/// Sentinel used for an unknown latitude or longitude, matching the source
/// system's convention.
pub const UNKNOWN_COORDINATE: &str = "999";

/// A normalized geocode response, produced by the geocoder client and
/// consumed by the region estimator and alert assembler. Never mutated after
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct GeocodeResult {
    /// The location string (or `"lat,lon"`) that was geocoded.
    pub loc_string: String,
    /// Latitude, as a string rounded to 3 decimal places, or [`UNKNOWN_COORDINATE`].
    pub lat: String,
    /// Longitude, as a string rounded to 3 decimal places, or [`UNKNOWN_COORDINATE`].
    pub lon: String,
    /// Confidence score in `0..=18`.
    pub quality: u8,
    /// Country common name, e.g. `"United States"`.
    pub l0: String,
    /// State or region, e.g. `"California"`.
    pub l1: String,
    /// City, e.g. `"Napa"`.
    pub l3: String,
    /// Human-readable `"l3, l1, l0"` with empty levels omitted.
    pub geos: String,
}

impl GeocodeResult {
    /// An empty result: no match, quality 0.
    pub fn empty(loc_string: impl Into<String>) -> GeocodeResult {
        GeocodeResult {
            loc_string: loc_string.into(),
            lat: UNKNOWN_COORDINATE.to_owned(),
            lon: UNKNOWN_COORDINATE.to_owned(),
            quality: 0,
            l0: String::new(),
            l1: String::new(),
            l3: String::new(),
            geos: String::new(),
        }
    }

    /// Is this result usable, per §4.C's "callers treat quality >= 10 as usable"?
    pub fn is_usable(&self) -> bool {
        self.quality >= 10
    }

    /// Build the human-readable `"l3, l1, l0"` string, omitting empty levels.
    pub fn build_geos(l3: &str, l1: &str, l0: &str) -> String {
        [l3, l1, l0]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The source through which a triggering tweet was geocoded, used to
/// annotate the alert's "GEO:" line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeocodeSource {
    /// Forward-geocoded from a location string.
    Forward,
    /// Reverse-geocoded from a lat/lon pair.
    Reverse,
}

impl GeocodeSource {
    /// The single-letter suffix used in the rendered alert (`(C)` or `(A)`).
    pub fn letter(&self) -> char {
        match self {
            GeocodeSource::Forward => 'C',
            GeocodeSource::Reverse => 'A',
        }
    }
}

/// A triggering tweet paired with its geocode result.
#[derive(Clone, Debug)]
pub struct GeocodedTweet {
    pub tweet: Tweet,
    pub geocode: GeocodeResult,
    pub source: GeocodeSource,
}

/// The consensus location elected by the region estimator, plus the ratio of
/// tweets that agreed with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Consensus {
    pub key: String,
    pub count: usize,
    pub total: usize,
}

impl Consensus {
    /// Render as `"(count/total)"`, matching the source format.
    pub fn ratio_str(&self) -> String {
        format!("({}/{})", self.count, self.total)
    }
}

/// Everything needed to render and dispatch one alert.
#[derive(Clone, Debug)]
pub struct AlertSpec {
    pub detection_time: DateTime<Utc>,
    pub subject_location: String,
    pub consensus: Option<Consensus>,
    pub consensus_geocode: Option<GeocodeResult>,
    pub top_words: Vec<(String, usize)>,
    pub triggering_tweets: Vec<GeocodedTweet>,
    pub other_tweets: Vec<Tweet>,
}
