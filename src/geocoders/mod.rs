//! Geocoder Client (component C).
//!
//! Resolves a free-form location string, or a `(lat, lon)` pair, into a
//! normalized [`GeocodeResult`]. Wraps the ESRI REST client with the
//! dispatch-by-location-type rule from SPEC_FULL.md §9.

use std::sync::Arc;

use hyper::{client::HttpConnector, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};

use crate::{
    config::EsriConfig,
    errors::TedError,
    model::{GeocodeResult, GeocodeSource, LocationType},
    reference_tables::ReferenceTables,
};

pub mod esri;
pub mod normalize;
pub mod token;

use esri::EsriGeocoder;
use token::TokenCache;

/// A `hyper` client shared between the token endpoint and both geocode
/// endpoints, so we benefit from connection keep-alive.
pub type SharedHttpClient = Arc<Client<HttpsConnector<HttpConnector>>>;

pub fn shared_http_client() -> SharedHttpClient {
    Arc::new(
        Client::builder().pool_max_idle_per_host(4).build(
            HttpsConnectorBuilder::new()
                .with_native_roots()
                .https_only()
                .enable_http2()
                .build(),
        ),
    )
}

/// The geocoder client used by the alert assembler (component E). Owns the
/// HTTP client, the cached OAuth2 token, and the reference tables.
pub struct GeocoderClient {
    esri: EsriGeocoder,
}

impl GeocoderClient {
    pub fn new(
        client: SharedHttpClient,
        esri_config: EsriConfig,
        reference_tables: Arc<ReferenceTables>,
    ) -> GeocoderClient {
        let tokens = TokenCache::new(client.clone(), esri_config);
        GeocoderClient {
            esri: EsriGeocoder::new(client, tokens, reference_tables),
        }
    }

    /// Geocode a tweet's location, dispatching to forward or reverse
    /// geocoding based on its `location_type` (SPEC_FULL.md §9).
    pub async fn geocode(
        &self,
        location_type: &LocationType,
    ) -> Result<(GeocodeResult, GeocodeSource), TedError> {
        match location_type {
            LocationType::LocationString(s) => {
                Ok((self.esri.forward(s).await?, GeocodeSource::Forward))
            }
            LocationType::GeoLocation(lat, lon) => {
                Ok((self.esri.reverse(*lat, *lon).await?, GeocodeSource::Reverse))
            }
            LocationType::None => Err(TedError::GeocodeUnmatched),
        }
    }

    /// Forward-geocode a plain string, used by the alert assembler to get
    /// display coordinates for the elected consensus location (§4.E step 5).
    pub async fn forward(&self, location_string: &str) -> Result<GeocodeResult, TedError> {
        self.esri.forward(location_string).await
    }
}
