mod config;
mod db;
mod errors;
mod geocoding;
mod records;
mod resolver;
mod suntimes;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::config::{AppConfig, IncompleteRowPolicy, PublicAppConfig};
pub use crate::db::{bootstrap, DatabaseContext};
pub use crate::errors::{AppError, AppResult};
pub use crate::geocoding::{Coordinates, GeoLookup, GeocodingService};
pub use crate::records::{location_key, parse_date, DateRange, SunDayRecord, SunRecordStore};
pub use crate::resolver::GapFillResolver;
pub use crate::suntimes::{RawSunTimes, SunTimesLookup, SunTimesService};
pub use crate::telemetry::TelemetryClient;

/// Everything a host needs wired together: config, the sqlite-backed
/// record store, telemetry, both upstream clients and the resolver on
/// top. The host owns request framing; this owns the lookups.
pub struct SunCacheService {
    db_path: PathBuf,
    config: AppConfig,
    telemetry: TelemetryClient,
    resolver: GapFillResolver,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub db_path: String,
    pub telemetry_buffer_path: String,
    pub telemetry_queue_depth: usize,
    pub config: PublicAppConfig,
}

impl SunCacheService {
    pub fn initialize<P: AsRef<Path>>(data_dir: P) -> AppResult<Self> {
        init_tracing();
        Self::with_config(data_dir, AppConfig::from_env())
    }

    pub fn with_config<P: AsRef<Path>>(data_dir: P, config: AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        let DatabaseContext { connection, path } =
            db::bootstrap(data_dir, &config.database_file_name)?;
        let telemetry = TelemetryClient::new(data_dir, &config)?;

        if let Err(err) = telemetry.record(
            "service_start",
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "incomplete_row_policy": config.incomplete_row_policy.as_str(),
            }),
        ) {
            warn!(?err, "failed to queue telemetry bootstrap event");
        }
        if let Err(err) = telemetry.flush() {
            warn!(?err, "failed to flush telemetry queue");
        }

        let store = SunRecordStore::new(Arc::new(Mutex::new(connection)));
        let geocoder = GeocodingService::new(&config)?;
        let suntimes = SunTimesService::new(&config)?;
        let resolver = GapFillResolver::new(
            store,
            geocoder,
            suntimes,
            telemetry.clone(),
            config.incomplete_row_policy,
        );

        Ok(Self {
            db_path: path,
            config,
            telemetry,
            resolver,
        })
    }

    /// The one operation exposed to hosts. Dates are `YYYY-MM-DD`
    /// strings straight from the request; every failure comes back as a
    /// typed [`AppError`] ready for status mapping.
    pub async fn resolve(
        &self,
        location: &str,
        start_date: &str,
        end_date: &str,
    ) -> AppResult<Vec<SunDayRecord>> {
        self.resolver.resolve(location, start_date, end_date).await
    }

    pub fn health(&self) -> ServiceHealth {
        ServiceHealth {
            db_path: self.db_path.to_string_lossy().to_string(),
            telemetry_buffer_path: self.telemetry.buffer_path().to_string_lossy().to_string(),
            telemetry_queue_depth: self.telemetry.queue_depth(),
            config: self.config.public_profile(),
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,suncache=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
