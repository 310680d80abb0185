//! Hourly station readings and the typed feature columns derived from them.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

const READING_SELECT: &str = "
    SELECT
        timestamp,
        temp_indoor,
        temp_outdoor,
        co2,
        humidity_indoor,
        humidity_outdoor,
        noise,
        pressure,
        pressure_absolute,
        temp_indoor_min,
        temp_indoor_max,
        temp_outdoor_min,
        temp_outdoor_max,
        date_min_temp_indoor,
        date_max_temp_indoor,
        date_min_temp_outdoor,
        date_max_temp_outdoor,
        temp_trend,
        pressure_trend,
        temp_outdoor_trend,
        wifi_status,
        battery_percent,
        rf_status
    FROM readings
    WHERE temp_indoor IS NOT NULL
      AND temp_outdoor IS NOT NULL
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Down,
    Stable,
    Up,
}

impl Trend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "down" => Some(Self::Down),
            "stable" => Some(Self::Stable),
            "up" => Some(Self::Up),
            _ => None,
        }
    }

    pub fn encode(self) -> f64 {
        match self {
            Self::Down => -1.0,
            Self::Stable => 0.0,
            Self::Up => 1.0,
        }
    }
}

pub fn encode_trend(trend: Option<Trend>) -> f64 {
    trend.map(Trend::encode).unwrap_or(0.0)
}

/// One observation hour. Sensor fields stay optional exactly as stored; the
/// defaults are applied in one place, [`Reading::value`], so training and
/// inference see identical numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: i64,
    pub temp_indoor: f64,
    pub temp_outdoor: f64,
    pub co2: Option<f64>,
    pub humidity_indoor: Option<f64>,
    pub humidity_outdoor: Option<f64>,
    pub noise: Option<f64>,
    pub pressure: Option<f64>,
    pub pressure_absolute: Option<f64>,
    pub temp_indoor_min: Option<f64>,
    pub temp_indoor_max: Option<f64>,
    pub temp_outdoor_min: Option<f64>,
    pub temp_outdoor_max: Option<f64>,
    pub date_min_temp_indoor: Option<i64>,
    pub date_max_temp_indoor: Option<i64>,
    pub date_min_temp_outdoor: Option<i64>,
    pub date_max_temp_outdoor: Option<i64>,
    pub temp_trend: Option<Trend>,
    pub pressure_trend: Option<Trend>,
    pub temp_outdoor_trend: Option<Trend>,
    pub wifi_status: Option<f64>,
    pub battery_percent: Option<f64>,
    pub rf_status: Option<f64>,
}

impl Reading {
    pub fn new(timestamp: i64, temp_indoor: f64, temp_outdoor: f64) -> Self {
        Self {
            timestamp,
            temp_indoor,
            temp_outdoor,
            co2: None,
            humidity_indoor: None,
            humidity_outdoor: None,
            noise: None,
            pressure: None,
            pressure_absolute: None,
            temp_indoor_min: None,
            temp_indoor_max: None,
            temp_outdoor_min: None,
            temp_outdoor_max: None,
            date_min_temp_indoor: None,
            date_max_temp_indoor: None,
            date_min_temp_outdoor: None,
            date_max_temp_outdoor: None,
            temp_trend: None,
            pressure_trend: None,
            temp_outdoor_trend: None,
            wifi_status: None,
            battery_percent: None,
            rf_status: None,
        }
    }

    pub fn value(&self, column: Column) -> f64 {
        match column {
            Column::TempIndoor => self.temp_indoor,
            Column::TempOutdoor => self.temp_outdoor,
            Column::Co2 => self.co2.unwrap_or(0.0),
            Column::HumidityIndoor => self.humidity_indoor.unwrap_or(0.0),
            Column::HumidityOutdoor => self.humidity_outdoor.unwrap_or(0.0),
            Column::Noise => self.noise.unwrap_or(0.0),
            Column::Pressure => self.pressure.unwrap_or(0.0),
            Column::PressureAbsolute => self.pressure_absolute.unwrap_or(0.0),
            Column::TempIndoorMin => self.temp_indoor_min.unwrap_or(0.0),
            Column::TempIndoorMax => self.temp_indoor_max.unwrap_or(0.0),
            Column::TempOutdoorMin => self.temp_outdoor_min.unwrap_or(0.0),
            Column::TempOutdoorMax => self.temp_outdoor_max.unwrap_or(0.0),
            Column::HoursSinceMinTempIndoor => self.hours_since(self.date_min_temp_indoor),
            Column::HoursSinceMaxTempIndoor => self.hours_since(self.date_max_temp_indoor),
            Column::HoursSinceMinTempOutdoor => self.hours_since(self.date_min_temp_outdoor),
            Column::HoursSinceMaxTempOutdoor => self.hours_since(self.date_max_temp_outdoor),
            Column::TempTrend => encode_trend(self.temp_trend),
            Column::PressureTrend => encode_trend(self.pressure_trend),
            Column::TempOutdoorTrend => encode_trend(self.temp_outdoor_trend),
            Column::WifiStatus => self.wifi_status.unwrap_or(0.0),
            Column::BatteryPercent => self.battery_percent.unwrap_or(100.0),
            Column::RfStatus => self.rf_status.unwrap_or(0.0),
            Column::HourOfDay => (self.timestamp.rem_euclid(SECONDS_PER_DAY) / SECONDS_PER_HOUR) as f64,
        }
    }

    fn hours_since(&self, event_ts: Option<i64>) -> f64 {
        let event_ts = event_ts.unwrap_or(self.timestamp);
        (self.timestamp - event_ts) as f64 / SECONDS_PER_HOUR as f64
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let trend = |idx: usize| -> rusqlite::Result<Option<Trend>> {
            let raw: Option<String> = row.get(idx)?;
            Ok(raw.as_deref().and_then(Trend::parse))
        };

        Ok(Self {
            timestamp: row.get(0)?,
            temp_indoor: row.get(1)?,
            temp_outdoor: row.get(2)?,
            co2: row.get(3)?,
            humidity_indoor: row.get(4)?,
            humidity_outdoor: row.get(5)?,
            noise: row.get(6)?,
            pressure: row.get(7)?,
            pressure_absolute: row.get(8)?,
            temp_indoor_min: row.get(9)?,
            temp_indoor_max: row.get(10)?,
            temp_outdoor_min: row.get(11)?,
            temp_outdoor_max: row.get(12)?,
            date_min_temp_indoor: row.get(13)?,
            date_max_temp_indoor: row.get(14)?,
            date_min_temp_outdoor: row.get(15)?,
            date_max_temp_outdoor: row.get(16)?,
            temp_trend: trend(17)?,
            pressure_trend: trend(18)?,
            temp_outdoor_trend: trend(19)?,
            wifi_status: row.get(20)?,
            battery_percent: row.get(21)?,
            rf_status: row.get(22)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    TempIndoor,
    TempOutdoor,
    Co2,
    HumidityIndoor,
    HumidityOutdoor,
    Noise,
    Pressure,
    PressureAbsolute,
    TempIndoorMin,
    TempIndoorMax,
    TempOutdoorMin,
    TempOutdoorMax,
    HoursSinceMinTempIndoor,
    HoursSinceMaxTempIndoor,
    HoursSinceMinTempOutdoor,
    HoursSinceMaxTempOutdoor,
    TempTrend,
    PressureTrend,
    TempOutdoorTrend,
    WifiStatus,
    BatteryPercent,
    RfStatus,
    HourOfDay,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Self::TempIndoor => "temp_indoor",
            Self::TempOutdoor => "temp_outdoor",
            Self::Co2 => "co2",
            Self::HumidityIndoor => "humidity_indoor",
            Self::HumidityOutdoor => "humidity_outdoor",
            Self::Noise => "noise",
            Self::Pressure => "pressure",
            Self::PressureAbsolute => "pressure_absolute",
            Self::TempIndoorMin => "temp_indoor_min",
            Self::TempIndoorMax => "temp_indoor_max",
            Self::TempOutdoorMin => "temp_outdoor_min",
            Self::TempOutdoorMax => "temp_outdoor_max",
            Self::HoursSinceMinTempIndoor => "hours_since_min_temp_indoor",
            Self::HoursSinceMaxTempIndoor => "hours_since_max_temp_indoor",
            Self::HoursSinceMinTempOutdoor => "hours_since_min_temp_outdoor",
            Self::HoursSinceMaxTempOutdoor => "hours_since_max_temp_outdoor",
            Self::TempTrend => "temp_trend",
            Self::PressureTrend => "pressure_trend",
            Self::TempOutdoorTrend => "temp_outdoor_trend",
            Self::WifiStatus => "wifi_status",
            Self::BatteryPercent => "battery_percent",
            Self::RfStatus => "rf_status",
            Self::HourOfDay => "hour_of_day",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("reading store not found at {0}")]
    NotFound(String),
}

/// Read-only access to the reading table, always in ascending timestamp order.
pub trait ReadingSource {
    fn recent(&self, n: usize) -> Result<Vec<Reading>, StoreError>;
    fn all(&self) -> Result<Vec<Reading>, StoreError>;
}

pub struct SqliteReadingStore {
    conn: Connection,
}

impl SqliteReadingStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }
}

impl ReadingSource for SqliteReadingStore {
    fn recent(&self, n: usize) -> Result<Vec<Reading>, StoreError> {
        let sql = format!("{READING_SELECT} ORDER BY timestamp DESC LIMIT ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let mut readings = stmt
            .query_map(params![limit], Reading::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        readings.reverse();
        Ok(readings)
    }

    fn all(&self) -> Result<Vec<Reading>, StoreError> {
        let sql = format!("{READING_SELECT} ORDER BY timestamp ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map([], Reading::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryReadings {
    readings: Vec<Reading>,
}

impl InMemoryReadings {
    pub fn new(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|reading| reading.timestamp);
        Self { readings }
    }
}

impl ReadingSource for InMemoryReadings {
    fn recent(&self, n: usize) -> Result<Vec<Reading>, StoreError> {
        let start = self.readings.len().saturating_sub(n);
        Ok(self.readings[start..].to_vec())
    }

    fn all(&self) -> Result<Vec<Reading>, StoreError> {
        Ok(self.readings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn trend_encoding_is_symmetric_and_defaults_to_zero() {
        assert_eq!(encode_trend(Trend::parse("down")), -1.0);
        assert_eq!(encode_trend(Trend::parse("Stable")), 0.0);
        assert_eq!(encode_trend(Trend::parse(" up ")), 1.0);
        assert_eq!(encode_trend(Trend::parse("sideways")), 0.0);
        assert_eq!(encode_trend(None), 0.0);
    }

    #[test]
    fn derived_columns_are_relative_to_the_reading_timestamp() {
        let mut reading = Reading::new(1_771_000_000, 20.0, 5.0);
        reading.date_min_temp_indoor = Some(1_771_000_000 - 3 * 3_600);
        reading.date_max_temp_outdoor = Some(1_771_000_000 - 1_800);

        assert_eq!(reading.value(Column::HoursSinceMinTempIndoor), 3.0);
        assert_eq!(reading.value(Column::HoursSinceMaxTempOutdoor), 0.5);
        assert_eq!(reading.value(Column::HoursSinceMaxTempIndoor), 0.0);
    }

    #[test]
    fn device_health_defaults_match_training_defaults() {
        let reading = Reading::new(0, 20.0, 5.0);
        assert_eq!(reading.value(Column::WifiStatus), 0.0);
        assert_eq!(reading.value(Column::BatteryPercent), 100.0);
        assert_eq!(reading.value(Column::RfStatus), 0.0);
        assert_eq!(reading.value(Column::Co2), 0.0);
    }

    #[test]
    fn hour_of_day_uses_utc() {
        // 2026-02-15T13:20:00Z
        let reading = Reading::new(1_771_113_600 + 13 * 3_600 + 1_200, 20.0, 5.0);
        assert_eq!(reading.value(Column::HourOfDay), 13.0);
    }

    #[test]
    fn sqlite_store_returns_ascending_rows_and_skips_missing_targets() {
        let tmp = NamedTempFile::new().expect("temp db");
        let conn = Connection::open(tmp.path()).expect("open db");
        conn.execute_batch(
            "CREATE TABLE readings (
                timestamp INTEGER PRIMARY KEY,
                temp_indoor REAL, temp_outdoor REAL, co2 INTEGER,
                humidity_indoor INTEGER, humidity_outdoor INTEGER, noise INTEGER,
                pressure REAL, pressure_absolute REAL,
                temp_indoor_min REAL, temp_indoor_max REAL,
                temp_outdoor_min REAL, temp_outdoor_max REAL,
                date_min_temp_indoor INTEGER, date_max_temp_indoor INTEGER,
                date_min_temp_outdoor INTEGER, date_max_temp_outdoor INTEGER,
                temp_trend TEXT, pressure_trend TEXT, temp_outdoor_trend TEXT,
                wifi_status INTEGER, battery_percent INTEGER, rf_status INTEGER
            );",
        )
        .expect("schema");
        for (ts, indoor) in [(7_200_i64, Some(21.0)), (0, Some(20.0)), (3_600, None)] {
            conn.execute(
                "INSERT INTO readings (timestamp, temp_indoor, temp_outdoor, co2, temp_trend)
                 VALUES (?1, ?2, 4.0, 410, 'up')",
                params![ts, indoor],
            )
            .expect("insert");
        }
        drop(conn);

        let store = SqliteReadingStore::open(tmp.path()).expect("open store");
        let all = store.all().expect("all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp, 0);
        assert_eq!(all[1].timestamp, 7_200);
        assert_eq!(all[1].co2, Some(410.0));
        assert_eq!(all[1].temp_trend, Some(Trend::Up));

        let recent = store.recent(1).expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].timestamp, 7_200);
    }

    #[test]
    fn in_memory_recent_keeps_ascending_order() {
        let source = InMemoryReadings::new(vec![
            Reading::new(7_200, 21.0, 4.0),
            Reading::new(0, 20.0, 3.0),
            Reading::new(3_600, 20.5, 3.5),
        ]);
        let recent = source.recent(2).expect("recent");
        let timestamps: Vec<i64> = recent.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![3_600, 7_200]);
        assert_eq!(source.recent(10).expect("recent").len(), 3);
    }
}
