use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

/// A resolved (latitude, longitude) pair. Ephemeral: resolved once per
/// request and only persisted as columns of a cached record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn resolve(&self, location: &str) -> AppResult<Coordinates>;
}

#[derive(Clone)]
pub struct GeocodingService {
    inner: Arc<dyn GeoLookup>,
}

impl GeocodingService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let client = HttpGeoClient::new(config)?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    #[cfg(test)]
    pub fn from_lookup(lookup: Arc<dyn GeoLookup>) -> Self {
        Self { inner: lookup }
    }

    pub async fn resolve(&self, location: &str) -> AppResult<Coordinates> {
        self.inner.resolve(location).await
    }
}

struct HttpGeoClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpGeoClient {
    fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.geocoder_endpoint.clone(),
            api_key: config.geocoder_api_key.clone(),
        })
    }

    fn lookup_url(&self, location: &str) -> AppResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| AppError::Config(format!("invalid geocoder endpoint: {err}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", location);
            if let Some(key) = &self.api_key {
                pairs.append_pair("key", key.expose_secret());
            }
            pairs.append_pair("limit", "1");
        }
        Ok(url)
    }
}

#[async_trait]
impl GeoLookup for HttpGeoClient {
    async fn resolve(&self, location: &str) -> AppResult<Coordinates> {
        #[derive(serde::Deserialize)]
        struct Response {
            results: Option<Vec<ResponseResult>>,
        }

        #[derive(serde::Deserialize)]
        struct ResponseResult {
            geometry: Option<ResponseGeometry>,
        }

        #[derive(serde::Deserialize)]
        struct ResponseGeometry {
            lat: Option<f64>,
            lng: Option<f64>,
        }

        let url = self.lookup_url(location)?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                location,
                "geocoder rejected the lookup"
            );
            return Err(AppError::CoordinateResolutionFailed(location.to_string()));
        }

        let parsed: Response = response.json().await?;
        let candidate = parsed
            .results
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
            .and_then(|result| result.geometry);

        match candidate {
            Some(ResponseGeometry {
                lat: Some(latitude),
                lng: Some(longitude),
            }) => Ok(Coordinates {
                latitude,
                longitude,
            }),
            _ => Err(AppError::CoordinateResolutionFailed(location.to_string())),
        }
    }
}
