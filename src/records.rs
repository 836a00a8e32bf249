use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::errors::{AppError, AppResult};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One resolved sun-time observation. `sunrise`, `sunset` and
/// `golden_hour` stay in the provider's local-time string format; parsing
/// them is a presentation concern for whatever hosts this crate.
#[derive(Debug, Clone, Serialize)]
pub struct SunDayRecord {
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub date: NaiveDate,
    pub sunrise: String,
    pub sunset: String,
    pub golden_hour: String,
}

/// Cache partition key for a free-text location: trimmed and case-folded,
/// applied the same way on read and insert.
pub fn location_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| AppError::InvalidDateFormat(value.trim().to_string()))
}

/// Inclusive, ordered span of calendar dates. Construction enforces
/// `start <= end`; the resolver never sees an inverted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AppResult<Self> {
        if start > end {
            return Err(AppError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|day| *day <= self.end)
            .collect()
    }
}

/// Persistent key space of resolved records, one row per
/// (location key, date). Reads return whatever subset of the range is
/// cached; the resolver re-sorts and deduplicates.
#[derive(Clone)]
pub struct SunRecordStore {
    db: Arc<Mutex<Connection>>,
}

impl SunRecordStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn find_by_location_and_range(
        &self,
        location_key: &str,
        range: DateRange,
    ) -> AppResult<Vec<SunDayRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT location, latitude, longitude, date, sunrise, sunset, golden_hour
            FROM sun_records
            WHERE location = ?1 AND date BETWEEN ?2 AND ?3",
        )?;
        let rows = stmt
            .query_map(
                params![
                    location_key,
                    range.start().format(DATE_FORMAT).to_string(),
                    range.end().format(DATE_FORMAT).to_string(),
                ],
                parse_sun_record,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Inserts one row. A concurrent request may have landed the same
    /// (location, date) first; the conflict is ignored and the read path
    /// collapses whatever is there.
    pub fn insert(&self, record: &SunDayRecord) -> AppResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO sun_records (location, latitude, longitude, date, sunrise, sunset, golden_hour)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(location, date) DO NOTHING",
            params![
                record.location,
                record.latitude,
                record.longitude,
                record.date.format(DATE_FORMAT).to_string(),
                record.sunrise,
                record.sunset,
                record.golden_hour,
            ],
        )?;
        Ok(())
    }
}

fn parse_sun_record(row: &Row<'_>) -> rusqlite::Result<SunDayRecord> {
    let date_text: String = row.get(3)?;
    let date = NaiveDate::parse_from_str(&date_text, DATE_FORMAT).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(SunDayRecord {
        location: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        date,
        sunrise: row.get(4)?,
        sunset: row.get(5)?,
        golden_hour: row.get(6)?,
    })
}
