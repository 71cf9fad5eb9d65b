//! Forward and reverse geocoding against the ESRI (ArcGIS) REST service,
//! with retry, text normalization, and whole-word match scoring (component
//! C, SPEC_FULL.md §4.C).

use std::{sync::Arc, time::Duration};

use hyper::{Body, Request};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::{
    errors::TedError,
    geocoders::{normalize::{clean_for_matching, clean_location_string, contains_whole_word}, token::TokenCache, SharedHttpClient},
    model::GeocodeResult,
    reference_tables::ReferenceTables,
};

const MAX_ATTEMPTS: u8 = 4;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw fields parsed from ESRI's `findAddressCandidates` response.
#[derive(Debug, Deserialize, Default)]
struct ForwardCandidate {
    attributes: ForwardAttributes,
    location: Option<ForwardLocation>,
}

#[derive(Debug, Deserialize, Default)]
struct ForwardAttributes {
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "City")]
    city: Option<String>,
    #[serde(rename = "MetroArea")]
    metro_area: Option<String>,
    #[serde(rename = "Region")]
    region: Option<String>,
    #[serde(rename = "Country")]
    country: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ForwardLocation {
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize, Default)]
struct ForwardResponse {
    candidates: Vec<ForwardCandidate>,
}

/// Raw fields parsed from ESRI's `reverseGeocode` response.
#[derive(Debug, Deserialize, Default)]
struct ReverseResponse {
    address: ReverseAddress,
}

#[derive(Debug, Deserialize, Default)]
struct ReverseAddress {
    #[serde(rename = "CountryCode")]
    country_code: Option<String>,
    #[serde(rename = "City")]
    city: Option<String>,
    #[serde(rename = "Region")]
    region: Option<String>,
}

/// The ESRI geocoding client: forward/reverse lookups, backed by a shared
/// HTTP client and a cached OAuth2 token.
pub struct EsriGeocoder {
    client: SharedHttpClient,
    tokens: Arc<TokenCache>,
    reference_tables: Arc<ReferenceTables>,
}

impl EsriGeocoder {
    pub fn new(
        client: SharedHttpClient,
        tokens: Arc<TokenCache>,
        reference_tables: Arc<ReferenceTables>,
    ) -> EsriGeocoder {
        describe_counter!(
            "ted.geocode.selected_errors.count",
            "Particularly interesting geocoding errors, by cause"
        );
        describe_histogram!(
            "ted.geocode.request.duration_seconds",
            Unit::Seconds,
            "Time required for an ESRI geocode request"
        );
        EsriGeocoder {
            client,
            tokens,
            reference_tables,
        }
    }

    /// Forward-geocode a free-form location string (§4.C).
    #[instrument(name = "EsriGeocoder::forward", level = "debug", skip(self))]
    pub async fn forward(&self, location_string: &str) -> Result<GeocodeResult, TedError> {
        let cleaned = clean_location_string(location_string);
        if cleaned.is_empty() {
            return Ok(GeocodeResult::empty(location_string));
        }

        let response = self.request_with_retry(|token| {
            let mut url = Url::parse(
                "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/findAddressCandidates",
            )
            .expect("static URL parses");
            url.query_pairs_mut()
                .append_pair("SingleLine", &cleaned)
                .append_pair("f", "json")
                .append_pair("token", token)
                .finish();
            url
        })
        .await?;

        let parsed: ForwardResponse = match response {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| TedError::GeocodeTransient(err.to_string()))?,
            None => return Ok(GeocodeResult::empty(location_string)),
        };

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return Err(TedError::GeocodeUnmatched);
        };

        self.score_forward_candidate(location_string, &cleaned, candidate)
    }

    /// Reverse-geocode a `(lat, lon)` pair (§4.C "Reverse geocode").
    #[instrument(name = "EsriGeocoder::reverse", level = "debug", skip(self))]
    pub async fn reverse(&self, lat: f64, lon: f64) -> Result<GeocodeResult, TedError> {
        let loc_string = format!("{},{}", lat, lon);

        let response = self.request_with_retry(|token| {
            let mut url = Url::parse(
                "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/reverseGeocode",
            )
            .expect("static URL parses");
            url.query_pairs_mut()
                .append_pair("location", &format!("{},{}", lon, lat))
                .append_pair("f", "json")
                .append_pair("token", token)
                .finish();
            url
        })
        .await?;

        let parsed: ReverseResponse = match response {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| TedError::GeocodeTransient(err.to_string()))?,
            None => return Ok(GeocodeResult::empty(&loc_string)),
        };

        let mut quality: u8 = 0;
        let l0 = parsed
            .address
            .country_code
            .as_deref()
            .and_then(|code| self.reference_tables.country(code))
            .map(|c| c.common_name.clone())
            .unwrap_or_default();
        if !l0.is_empty() {
            quality += 10;
        }
        let l1 = parsed.address.region.clone().unwrap_or_default();
        if !l1.is_empty() {
            quality += 10;
        }
        let l3 = parsed.address.city.clone().unwrap_or_default();
        if !l3.is_empty() {
            quality += 10;
        }

        let geos = GeocodeResult::build_geos(&l3, &l1, &l0);
        Ok(GeocodeResult {
            loc_string,
            lat: format!("{:.3}", lat),
            lon: format!("{:.3}", lon),
            quality,
            l0,
            l1,
            l3,
            geos,
        })
    }

    /// Apply the §4.C matching and quality-scoring rules to one candidate.
    fn score_forward_candidate(
        &self,
        original: &str,
        cleaned: &str,
        candidate: ForwardCandidate,
    ) -> Result<GeocodeResult, TedError> {
        let attrs = candidate.attributes;
        if attrs.status.as_deref() == Some("U") {
            return Err(TedError::GeocodeUnmatched);
        }
        let Some(country_code) = attrs.country.as_deref().filter(|s| !s.is_empty()) else {
            return Err(TedError::GeocodeUnmatched);
        };

        let country_entry = self.reference_tables.country(country_code);
        let l0 = country_entry
            .map(|c| c.common_name.clone())
            .unwrap_or_else(|| country_code.to_owned());
        let is_us = l0 == "United States";

        let city_candidate = attrs
            .city
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| attrs.metro_area.clone().filter(|s| !s.is_empty()))
            .or_else(|| {
                if !is_us {
                    attrs.region.clone().filter(|s| !s.is_empty())
                } else {
                    None
                }
            })
            .unwrap_or_default();

        let mut l1 = String::new();
        let mut state_code = String::new();
        let mut state_aliases: Vec<String> = Vec::new();
        if is_us {
            if let Some(region) = attrs.region.as_deref() {
                if let Some(state) = self.reference_tables.state(region) {
                    l1 = region.to_owned();
                    state_code = state.code.clone();
                    state_aliases = state.aliases.clone();
                }
            }
        } else if let Some(region) = attrs.region.as_deref() {
            if !region.is_empty() && region != city_candidate && region != "England" {
                l1 = region.to_owned();
            }
        }

        let haystack = clean_for_matching(original);
        let stripped_city = city_candidate.replace(['(', ')'], "");

        let country_match = contains_whole_word(&haystack, &l0)
            || country_entry
                .map(|c| c.aliases.iter().any(|alias| contains_whole_word(&haystack, alias)))
                .unwrap_or(false);

        let city_match = contains_whole_word(&haystack, &stripped_city);

        let state_match = if is_us {
            contains_whole_word(&haystack, &l1)
                || contains_whole_word(&haystack, &state_code)
                || state_aliases.iter().any(|alias| contains_whole_word(&haystack, alias))
        } else if !l1.is_empty() {
            let haystack_and = normalize_ampersand(&haystack);
            let l1_and = normalize_ampersand(&l1.to_lowercase());
            haystack_and.contains(&format!(" {} ", l1_and.trim()))
        } else {
            false
        };

        let mut quality: u8 = if is_us {
            9
        } else if country_match {
            10
        } else {
            0
        };
        if city_match {
            quality += 4;
        }
        if state_match {
            quality += 4;
        }

        let (lat, lon) = candidate
            .location
            .map(|loc| (format!("{:.3}", loc.y), format!("{:.3}", loc.x)))
            .unwrap_or_else(|| {
                (
                    crate::model::UNKNOWN_COORDINATE.to_owned(),
                    crate::model::UNKNOWN_COORDINATE.to_owned(),
                )
            });

        let geos = GeocodeResult::build_geos(&city_candidate, &l1, &l0);
        Ok(GeocodeResult {
            loc_string: cleaned.to_owned(),
            lat,
            lon,
            quality,
            l0,
            l1,
            l3: city_candidate,
            geos,
        })
    }

    /// Issue a request, retrying up to [`MAX_ATTEMPTS`] times on network
    /// errors, timeouts, and non-2xx responses, and retrying once more (with
    /// a forced token refresh) on a 401. `build_url` is called fresh for
    /// every attempt so it can embed the current token.
    async fn request_with_retry(
        &self,
        build_url: impl Fn(&str) -> Url,
    ) -> Result<Option<Vec<u8>>, TedError> {
        let mut token = self.tokens.token().await?;
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let url = build_url(&token);
            let start = std::time::Instant::now();
            let req = Request::builder()
                .method("GET")
                .uri(url.as_str())
                .body(Body::empty())
                .map_err(|err| TedError::GeocodeTransient(err.to_string()))?;

            let attempt_result =
                tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(req)).await;

            let response = match attempt_result {
                Ok(Ok(res)) => res,
                Ok(Err(err)) => {
                    counter!("ted.geocode.selected_errors.count", 1, "cause" => "connect_error");
                    last_error = Some(err.to_string());
                    continue;
                }
                Err(_) => {
                    counter!("ted.geocode.selected_errors.count", 1, "cause" => "timeout");
                    last_error = Some("request timed out".to_owned());
                    continue;
                }
            };

            histogram!(
                "ted.geocode.request.duration_seconds",
                start.elapsed().as_secs_f64()
            );

            if response.status() == hyper::StatusCode::UNAUTHORIZED && attempt < MAX_ATTEMPTS {
                token = self.tokens.refresh().await?;
                continue;
            }

            if !response.status().is_success() {
                counter!("ted.geocode.selected_errors.count", 1, "cause" => response.status().to_string());
                last_error = Some(format!("geocoder returned {}", response.status()));
                continue;
            }

            let body = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|err| TedError::GeocodeTransient(err.to_string()))?;
            return Ok(Some(body.to_vec()));
        }

        let _ = last_error;
        Ok(None)
    }
}

/// Treat `&` and `and` as equivalent when comparing non-US region names.
fn normalize_ampersand(s: &str) -> String {
    s.replace('&', "and")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EsriConfig, geocoders::{shared_http_client, token::TokenCache}, reference_tables::ReferenceTables};

    #[test]
    fn ampersand_equivalence() {
        assert_eq!(normalize_ampersand("bosnia & herzegovina"), "bosnia and herzegovina");
        assert_eq!(normalize_ampersand("trinidad and tobago"), "trinidad and tobago");
    }

    fn geocoder_with_reference_tables() -> EsriGeocoder {
        let client = shared_http_client();
        let tokens = TokenCache::new(
            client.clone(),
            EsriConfig {
                client_id: "id".to_owned(),
                client_secret: "secret".to_owned(),
            },
        );
        let reference_tables = Arc::new(ReferenceTables::for_test(
            &[("USA", "United States", &[])],
            &[("California", "CA", &[])],
        ));
        EsriGeocoder::new(client, tokens, reference_tables)
    }

    /// S6 — Geocode string match, US no country: forward-geocoding
    /// "Napa, CA" against `City=Napa, Region=California, Country=USA`
    /// should score 9 (US base) + 4 (city match) + 4 (state match) = 17.
    #[test]
    fn s6_us_geocode_string_match_no_country() {
        let geocoder = geocoder_with_reference_tables();
        let candidate = ForwardCandidate {
            attributes: ForwardAttributes {
                status: None,
                city: Some("Napa".to_owned()),
                metro_area: None,
                region: Some("California".to_owned()),
                country: Some("USA".to_owned()),
            },
            location: None,
        };

        let original = "Napa, CA";
        let cleaned = clean_location_string(original);
        let result = geocoder
            .score_forward_candidate(original, &cleaned, candidate)
            .expect("candidate should score, not be rejected as unmatched");

        assert_eq!(result.quality, 17);
        assert_eq!(result.l0, "United States");
        assert_eq!(result.l1, "California");
        assert_eq!(result.l3, "Napa");
        assert_eq!(result.geos, "Napa, California, United States");
    }
}
