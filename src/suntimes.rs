use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geocoding::Coordinates;
use crate::records::{DateRange, DATE_FORMAT};

/// One provider row, exactly as it came off the wire. Every field is
/// optional: the provider is free to return partial rows and the resolver
/// decides what survives.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSunTimes {
    pub date: Option<String>,
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
    pub golden_hour: Option<String>,
}

#[async_trait]
pub trait SunTimesLookup: Send + Sync {
    async fn fetch_range(
        &self,
        coordinates: Coordinates,
        range: DateRange,
    ) -> AppResult<Vec<RawSunTimes>>;
}

#[derive(Clone)]
pub struct SunTimesService {
    inner: Arc<dyn SunTimesLookup>,
}

impl SunTimesService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let client = HttpSunTimesClient::new(config)?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    #[cfg(test)]
    pub fn from_lookup(lookup: Arc<dyn SunTimesLookup>) -> Self {
        Self { inner: lookup }
    }

    pub async fn fetch_range(
        &self,
        coordinates: Coordinates,
        range: DateRange,
    ) -> AppResult<Vec<RawSunTimes>> {
        self.inner.fetch_range(coordinates, range).await
    }
}

struct HttpSunTimesClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSunTimesClient {
    fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.suntimes_endpoint.clone(),
        })
    }

    fn range_url(&self, coordinates: Coordinates, range: DateRange) -> AppResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| AppError::Config(format!("invalid sun-times endpoint: {err}")))?;
        url.query_pairs_mut()
            .append_pair("lat", &coordinates.latitude.to_string())
            .append_pair("lng", &coordinates.longitude.to_string())
            .append_pair("date_start", &range.start().format(DATE_FORMAT).to_string())
            .append_pair("date_end", &range.end().format(DATE_FORMAT).to_string());
        Ok(url)
    }
}

#[async_trait]
impl SunTimesLookup for HttpSunTimesClient {
    async fn fetch_range(
        &self,
        coordinates: Coordinates,
        range: DateRange,
    ) -> AppResult<Vec<RawSunTimes>> {
        #[derive(Deserialize)]
        struct Response {
            results: Option<Vec<RawSunTimes>>,
        }

        let lookup_failed = || AppError::SunTimesLookupFailed {
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
        };

        let url = self.range_url(coordinates, range)?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                latitude = coordinates.latitude,
                longitude = coordinates.longitude,
                "sun-times provider rejected the lookup"
            );
            return Err(lookup_failed());
        }

        let parsed: Response = response.json().await?;
        match parsed.results {
            Some(rows) if !rows.is_empty() => Ok(rows),
            _ => Err(lookup_failed()),
        }
    }
}
