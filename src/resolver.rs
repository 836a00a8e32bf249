use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::IncompleteRowPolicy;
use crate::errors::{AppError, AppResult};
use crate::geocoding::GeocodingService;
use crate::records::{location_key, parse_date, DateRange, SunDayRecord, SunRecordStore, DATE_FORMAT};
use crate::suntimes::{RawSunTimes, SunTimesService};
use crate::telemetry::TelemetryClient;

/// Per-request accounting, flushed to telemetry once the merge is done.
#[derive(Debug, Clone, Serialize)]
struct ResolveStats {
    requested_days: usize,
    cached: usize,
    fetched_rows: usize,
    inserted: usize,
    skipped_incomplete: usize,
}

/// Answers "sun times for this place, for each day in this range" against
/// the local cache, fetching only the days the cache is missing.
///
/// The cache is consulted before either upstream: a fully-cached range
/// performs no geocoding and no provider call. When gaps exist the
/// location is geocoded once and the provider is asked for the single
/// span `[first missing, last missing]`; whatever comes back is filtered
/// down to the missing dates, validated, persisted row by row and merged
/// with the cached rows.
pub struct GapFillResolver {
    store: SunRecordStore,
    geocoder: GeocodingService,
    suntimes: SunTimesService,
    telemetry: TelemetryClient,
    incomplete_row_policy: IncompleteRowPolicy,
}

impl GapFillResolver {
    pub fn new(
        store: SunRecordStore,
        geocoder: GeocodingService,
        suntimes: SunTimesService,
        telemetry: TelemetryClient,
        incomplete_row_policy: IncompleteRowPolicy,
    ) -> Self {
        Self {
            store,
            geocoder,
            suntimes,
            telemetry,
            incomplete_row_policy,
        }
    }

    /// Resolves the inclusive `[start, end]` range for a free-text
    /// location. Returns records ordered by date with no duplicate dates;
    /// days the provider could not supply are absent, not errors.
    pub async fn resolve(
        &self,
        location: &str,
        start: &str,
        end: &str,
    ) -> AppResult<Vec<SunDayRecord>> {
        require_present(&[
            ("location", location),
            ("start_date", start),
            ("end_date", end),
        ])?;
        let range = DateRange::new(parse_date(start)?, parse_date(end)?)?;

        let key = location_key(location);
        let all_dates = range.days();
        let existing = self.store.find_by_location_and_range(&key, range)?;
        let existing_dates: HashSet<NaiveDate> = existing.iter().map(|row| row.date).collect();
        let missing_dates: Vec<NaiveDate> = all_dates
            .iter()
            .copied()
            .filter(|date| !existing_dates.contains(date))
            .collect();

        let mut stats = ResolveStats {
            requested_days: all_dates.len(),
            cached: existing.len(),
            fetched_rows: 0,
            inserted: 0,
            skipped_incomplete: 0,
        };

        let mut fresh = Vec::new();
        if let (Some(&span_start), Some(&span_end)) =
            (missing_dates.first(), missing_dates.last())
        {
            let coordinates = self.geocoder.resolve(location.trim()).await?;
            let span = DateRange::new(span_start, span_end)?;
            let rows = self.suntimes.fetch_range(coordinates, span).await?;
            stats.fetched_rows = rows.len();

            let wanted: HashSet<NaiveDate> = missing_dates.iter().copied().collect();
            for raw in rows {
                let Some(date) = raw
                    .date
                    .as_deref()
                    .and_then(|value| NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok())
                else {
                    warn!(location = %key, "skipping provider row with unparseable date");
                    continue;
                };
                if !wanted.contains(&date) {
                    continue;
                }

                match required_times(&raw) {
                    Ok((sunrise, sunset, golden_hour)) => {
                        let record = SunDayRecord {
                            location: key.clone(),
                            latitude: coordinates.latitude,
                            longitude: coordinates.longitude,
                            date,
                            sunrise,
                            sunset,
                            golden_hour,
                        };
                        self.store.insert(&record)?;
                        stats.inserted += 1;
                        fresh.push(record);
                    }
                    Err(fields) => {
                        let date = date.format(DATE_FORMAT).to_string();
                        match self.incomplete_row_policy {
                            IncompleteRowPolicy::Abort => {
                                return Err(AppError::IncompleteProviderData { date, fields });
                            }
                            IncompleteRowPolicy::Skip => {
                                warn!(
                                    location = %key,
                                    date = %date,
                                    fields = %fields,
                                    "dropping incomplete provider row"
                                );
                                stats.skipped_incomplete += 1;
                            }
                        }
                    }
                }
            }
        } else {
            debug!(location = %key, days = all_dates.len(), "range fully cached");
        }

        let mut seen = HashSet::new();
        let mut merged: Vec<SunDayRecord> = existing
            .into_iter()
            .chain(fresh)
            .filter(|record| seen.insert(record.date))
            .collect();
        merged.sort_by_key(|record| record.date);

        if let Err(err) = self.telemetry.record(
            "resolve_served",
            serde_json::json!({
                "location": key,
                "stats": stats,
            }),
        ) {
            warn!(?err, "failed to record resolve telemetry event");
        }

        Ok(merged)
    }
}

fn require_present(labeled: &[(&str, &str)]) -> AppResult<()> {
    let missing: Vec<&str> = labeled
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(label, _)| *label)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::MissingField(missing.join(", ")))
    }
}

/// A provider row may only become a cache record with all three times
/// present; a partially-filled row would read back as authoritative later
/// with nothing marking it as incomplete.
fn required_times(raw: &RawSunTimes) -> Result<(String, String, String), String> {
    match (
        present(&raw.sunrise),
        present(&raw.sunset),
        present(&raw.golden_hour),
    ) {
        (Some(sunrise), Some(sunset), Some(golden_hour)) => Ok((sunrise, sunset, golden_hour)),
        (sunrise, sunset, golden_hour) => {
            let mut missing = Vec::new();
            if sunrise.is_none() {
                missing.push("sunrise");
            }
            if sunset.is_none() {
                missing.push("sunset");
            }
            if golden_hour.is_none() {
                missing.push("golden_hour");
            }
            Err(missing.join(", "))
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
