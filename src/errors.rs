use std::io;

use chrono::NaiveDate;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing required parameters: {0}")]
    MissingField(String),
    #[error("unexpected date format: {0}")]
    InvalidDateFormat(String),
    #[error("start date {start} cannot be after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("could not resolve the coordinates for [{0}]")]
    CoordinateResolutionFailed(String),
    #[error("could not resolve the sun times for [{latitude}@{longitude}]")]
    SunTimesLookupFailed { latitude: f64, longitude: f64 },
    #[error("provider left fields unresolved for [{date}]: {fields}")]
    IncompleteProviderData { date: String, fields: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
}

impl AppError {
    /// Errors a host should answer with a 400-class response: bad caller
    /// input, an upstream that rejected the lookup, or provider data too
    /// incomplete to persist. Everything else is the host's 500.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::MissingField(_)
                | AppError::InvalidDateFormat(_)
                | AppError::InvalidRange { .. }
                | AppError::CoordinateResolutionFailed(_)
                | AppError::SunTimesLookupFailed { .. }
                | AppError::IncompleteProviderData { .. }
        )
    }
}
