//! Regional features from nearby public stations.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use thiserror::Error;
use tracing::{debug, info};

/// Public-station rows strictly closer than this to a reading contribute.
pub const SPATIAL_HALF_WINDOW_SECONDS: i64 = 1_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialColumn {
    AvgTemp,
    TempDelta,
    TempSpread,
    AvgHumidity,
    AvgPressure,
    StationCount,
    AvgRain60Min,
    AvgRain24h,
    AvgWindStrength,
    AvgGustStrength,
}

impl SpatialColumn {
    pub fn name(self) -> &'static str {
        match self {
            Self::AvgTemp => "regional_avg_temp",
            Self::TempDelta => "regional_temp_delta",
            Self::TempSpread => "regional_temp_spread",
            Self::AvgHumidity => "regional_avg_humidity",
            Self::AvgPressure => "regional_avg_pressure",
            Self::StationCount => "regional_station_count",
            Self::AvgRain60Min => "regional_avg_rain_60min",
            Self::AvgRain24h => "regional_avg_rain_24h",
            Self::AvgWindStrength => "regional_avg_wind_strength",
            Self::AvgGustStrength => "regional_avg_gust_strength",
        }
    }
}

const SIMPLE_COLUMNS: [SpatialColumn; 3] = [
    SpatialColumn::AvgTemp,
    SpatialColumn::TempDelta,
    SpatialColumn::StationCount,
];

const FULL_COLUMNS: [SpatialColumn; 6] = [
    SpatialColumn::AvgTemp,
    SpatialColumn::TempDelta,
    SpatialColumn::TempSpread,
    SpatialColumn::AvgHumidity,
    SpatialColumn::AvgPressure,
    SpatialColumn::StationCount,
];

const ENRICHED_COLUMNS: [SpatialColumn; 10] = [
    SpatialColumn::AvgTemp,
    SpatialColumn::TempDelta,
    SpatialColumn::TempSpread,
    SpatialColumn::AvgHumidity,
    SpatialColumn::AvgPressure,
    SpatialColumn::StationCount,
    SpatialColumn::AvgRain60Min,
    SpatialColumn::AvgRain24h,
    SpatialColumn::AvgWindStrength,
    SpatialColumn::AvgGustStrength,
];

/// Nested column sets: every column of `Simple` is in `Full`, and `Full` is a
/// prefix of `Enriched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialColumnSet {
    Simple,
    Full,
    Enriched,
}

impl SpatialColumnSet {
    pub fn columns(self) -> &'static [SpatialColumn] {
        match self {
            Self::Simple => &SIMPLE_COLUMNS,
            Self::Full => &FULL_COLUMNS,
            Self::Enriched => &ENRICHED_COLUMNS,
        }
    }

    pub fn len(self) -> usize {
        self.columns().len()
    }

    pub fn is_empty(self) -> bool {
        self.columns().is_empty()
    }
}

/// Regional aggregates for one timestamp. `Default` is the all-zero block
/// used whenever no public-station data is available.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpatialFeatures {
    pub avg_temp: f64,
    pub temp_delta: f64,
    pub temp_spread: f64,
    pub avg_humidity: f64,
    pub avg_pressure: f64,
    pub station_count: f64,
    pub avg_rain_60min: f64,
    pub avg_rain_24h: f64,
    pub avg_wind_strength: f64,
    pub avg_gust_strength: f64,
}

impl SpatialFeatures {
    pub fn value(&self, column: SpatialColumn) -> f64 {
        match column {
            SpatialColumn::AvgTemp => self.avg_temp,
            SpatialColumn::TempDelta => self.temp_delta,
            SpatialColumn::TempSpread => self.temp_spread,
            SpatialColumn::AvgHumidity => self.avg_humidity,
            SpatialColumn::AvgPressure => self.avg_pressure,
            SpatialColumn::StationCount => self.station_count,
            SpatialColumn::AvgRain60Min => self.avg_rain_60min,
            SpatialColumn::AvgRain24h => self.avg_rain_24h,
            SpatialColumn::AvgWindStrength => self.avg_wind_strength,
            SpatialColumn::AvgGustStrength => self.avg_gust_strength,
        }
    }

    pub fn project(&self, set: SpatialColumnSet) -> Vec<f64> {
        set.columns().iter().map(|column| self.value(*column)).collect()
    }
}

#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub trait SpatialFeatureProvider {
    fn features_for(
        &self,
        timestamp: i64,
        local_outdoor_temp: Option<f64>,
    ) -> Result<SpatialFeatures, SpatialError>;

    fn values_for(
        &self,
        timestamp: i64,
        local_outdoor_temp: Option<f64>,
        set: SpatialColumnSet,
    ) -> Result<Vec<(&'static str, f64)>, SpatialError> {
        let features = self.features_for(timestamp, local_outdoor_temp)?;
        Ok(set
            .columns()
            .iter()
            .map(|column| (column.name(), features.value(*column)))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSpatialData;

impl SpatialFeatureProvider for NoSpatialData {
    fn features_for(
        &self,
        _timestamp: i64,
        _local_outdoor_temp: Option<f64>,
    ) -> Result<SpatialFeatures, SpatialError> {
        Ok(SpatialFeatures::default())
    }
}

pub struct SqliteSpatialProvider {
    conn: Option<Connection>,
}

impl SqliteSpatialProvider {
    /// Opens the station table read-only. A missing database, a missing
    /// `public_stations` table or an empty one all yield a provider that
    /// answers with zeros.
    pub fn open(path: &Path) -> Result<Self, SpatialError> {
        if !path.exists() {
            info!(
                component = "spatial",
                event = "spatial.source.absent",
                db_path = %path.display()
            );
            return Ok(Self { conn: None });
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, SpatialError> {
        if has_public_stations(&conn)? {
            Ok(Self { conn: Some(conn) })
        } else {
            info!(
                component = "spatial",
                event = "spatial.source.empty",
                fallback = "zeros"
            );
            Ok(Self { conn: None })
        }
    }

    pub fn has_data(&self) -> bool {
        self.conn.is_some()
    }
}

impl SpatialFeatureProvider for SqliteSpatialProvider {
    fn features_for(
        &self,
        timestamp: i64,
        local_outdoor_temp: Option<f64>,
    ) -> Result<SpatialFeatures, SpatialError> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(SpatialFeatures::default());
        };

        let mut stmt = conn.prepare_cached(
            "
            SELECT
                temperature,
                humidity,
                pressure,
                rain_60min,
                rain_24h,
                wind_strength,
                gust_strength
            FROM public_stations
            WHERE abs(cast(strftime('%s', fetched_at) as integer) - ?1) < ?2
              AND temperature IS NOT NULL
            ",
        )?;
        let rows = stmt
            .query_map(params![timestamp, SPATIAL_HALF_WINDOW_SECONDS], |row| {
                Ok(StationSample {
                    temperature: row.get(0)?,
                    humidity: row.get(1)?,
                    pressure: row.get(2)?,
                    rain_60min: row.get(3)?,
                    rain_24h: row.get(4)?,
                    wind_strength: row.get(5)?,
                    gust_strength: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            component = "spatial",
            event = "spatial.query",
            timestamp,
            station_rows = rows.len()
        );

        Ok(aggregate(&rows, local_outdoor_temp))
    }
}

#[derive(Debug, Clone, Copy)]
struct StationSample {
    temperature: f64,
    humidity: Option<f64>,
    pressure: Option<f64>,
    rain_60min: Option<f64>,
    rain_24h: Option<f64>,
    wind_strength: Option<f64>,
    gust_strength: Option<f64>,
}

fn aggregate(rows: &[StationSample], local_outdoor_temp: Option<f64>) -> SpatialFeatures {
    if rows.is_empty() {
        return SpatialFeatures::default();
    }

    let temps: Vec<f64> = rows.iter().map(|row| row.temperature).collect();
    let avg_temp = mean(&temps).unwrap_or(0.0);
    let temp_spread = if temps.len() > 1 {
        let max = temps.iter().copied().fold(f64::MIN, f64::max);
        let min = temps.iter().copied().fold(f64::MAX, f64::min);
        max - min
    } else {
        0.0
    };

    let avg_of = |pick: fn(&StationSample) -> Option<f64>| -> f64 {
        let present: Vec<f64> = rows.iter().filter_map(pick).collect();
        mean(&present).unwrap_or(0.0)
    };

    SpatialFeatures {
        avg_temp,
        temp_delta: local_outdoor_temp
            .map(|local| local - avg_temp)
            .unwrap_or(0.0),
        temp_spread,
        avg_humidity: avg_of(|row| row.humidity),
        avg_pressure: avg_of(|row| row.pressure),
        station_count: rows.len() as f64,
        avg_rain_60min: avg_of(|row| row.rain_60min),
        avg_rain_24h: avg_of(|row| row.rain_24h),
        avg_wind_strength: avg_of(|row| row.wind_strength),
        avg_gust_strength: avg_of(|row| row.gust_strength),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn has_public_stations(conn: &Connection) -> Result<bool, SpatialError> {
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'public_stations'",
        [],
        |row| row.get(0),
    )?;
    if tables == 0 {
        return Ok(false);
    }
    let rows: i64 = conn.query_row("SELECT COUNT(*) FROM public_stations", [], |row| row.get(0))?;
    Ok(rows > 0)
}
