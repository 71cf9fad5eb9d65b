//! OAuth2 client-credentials token cache for the ESRI geocoding service.
//!
//! The token is shared read-mostly across concurrent geocode calls for one
//! alert; refresh is serialized behind a mutex, ordinary reads are
//! lock-free once cached (SPEC_FULL.md §5).

use std::sync::Arc;

use hyper::{Body, Request};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::instrument;
use url::Url;

use crate::{config::EsriConfig, errors::TedError, geocoders::SharedHttpClient};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Clone, Debug)]
struct CachedToken {
    access_token: String,
}

/// Caches and refreshes an ESRI OAuth2 access token.
pub struct TokenCache {
    client: SharedHttpClient,
    config: EsriConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(client: SharedHttpClient, config: EsriConfig) -> Arc<TokenCache> {
        Arc::new(TokenCache {
            client,
            config,
            cached: Mutex::new(None),
        })
    }

    /// Return the cached token, fetching a fresh one on first use.
    pub async fn token(&self) -> Result<String, TedError> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = &*guard {
            return Ok(cached.access_token.clone());
        }
        let fetched = self.fetch().await?;
        let token = fetched.access_token.clone();
        *guard = Some(fetched);
        Ok(token)
    }

    /// Force a refresh, e.g. after a 401 from the geocoding endpoint.
    pub async fn refresh(&self) -> Result<String, TedError> {
        let mut guard = self.cached.lock().await;
        let fetched = self.fetch().await?;
        let token = fetched.access_token.clone();
        *guard = Some(fetched);
        Ok(token)
    }

    #[instrument(name = "TokenCache::fetch", level = "debug", skip(self))]
    async fn fetch(&self) -> Result<CachedToken, TedError> {
        let mut url = Url::parse("https://www.arcgis.com/sharing/oauth2/token")
            .map_err(|err| TedError::AuthUnavailable(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", &self.config.client_secret)
            .append_pair("grant_type", "client_credentials")
            .append_pair("f", "json")
            .finish();

        let req = Request::builder()
            .method("POST")
            .uri(url.as_str())
            .body(Body::empty())
            .map_err(|err| TedError::AuthUnavailable(err.to_string()))?;

        let res = self
            .client
            .request(req)
            .await
            .map_err(|err| TedError::AuthUnavailable(err.to_string()))?;

        if !res.status().is_success() {
            return Err(TedError::AuthUnavailable(format!(
                "token endpoint returned {}",
                res.status()
            )));
        }

        let body = hyper::body::to_bytes(res.into_body())
            .await
            .map_err(|err| TedError::AuthUnavailable(err.to_string()))?;
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|err| TedError::AuthUnavailable(err.to_string()))?;

        Ok(CachedToken {
            access_token: parsed.access_token,
        })
    }
}
