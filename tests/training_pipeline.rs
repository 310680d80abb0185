use std::path::Path;

use rusqlite::{params, Connection};
use tempcast::{
    predict_cascade, standard_cascade, train_all, validate_predictions, CascadeInputs,
    CascadeMode, ErrorLookup, ErrorSnapshot, ModelIdentity, ModelRegistry, ReadingSource,
    SqliteErrorLedger, SqliteReadingStore, SqliteSpatialProvider, TrainingOutcome,
    ValidationOutcome,
};
use tempfile::TempDir;

const START_TS: i64 = 1_771_156_800; // 2026-02-15T12:00:00Z
const HOUR: i64 = 3_600;

fn seed_weather_db(path: &Path, hours: usize) {
    let conn = Connection::open(path).expect("open db");
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
        );
        CREATE TABLE public_stations (
            station_id TEXT, fetched_at TEXT, temperature REAL, humidity REAL,
            pressure REAL, rain_60min REAL, rain_24h REAL,
            wind_strength REAL, gust_strength REAL
        );",
    )
    .expect("schema");

    for i in 0..hours {
        let ts = START_TS + i as i64 * HOUR;
        let outdoor = 5.0 + 4.0 * (i as f64 * std::f64::consts::PI / 12.0).sin();
        let trend = ["up", "stable", "down"][i % 3];
        conn.execute(
            "INSERT INTO readings (
                timestamp, temp_indoor, temp_outdoor, co2, humidity_indoor,
                humidity_outdoor, noise, pressure, pressure_absolute,
                temp_outdoor_min, temp_outdoor_max, date_min_temp_outdoor,
                temp_trend, pressure_trend, wifi_status, battery_percent
            ) VALUES (?1, ?2, ?3, ?4, 45, 80, 35, ?5, ?6, ?7, ?8, ?9, ?10, 'stable', 60, NULL)",
            params![
                ts,
                20.5 + 0.1 * outdoor,
                outdoor,
                420 + (i % 7) as i64,
                1_012.0 + (i % 5) as f64,
                1_009.0 + (i % 5) as f64,
                outdoor - 1.0,
                outdoor + 1.0,
                ts - 3 * HOUR,
                trend,
            ],
        )
        .expect("insert reading");

        if i % 2 == 0 {
            conn.execute(
                "INSERT INTO public_stations VALUES
                    ('s1', datetime(?1, 'unixepoch'), ?2, 75.0, 1011.0, 0.0, 0.4, 3.0, 6.0)",
                params![ts + 300, outdoor + 0.5],
            )
            .expect("insert station");
        }
    }
}

#[test]
fn train_predict_validate_round_against_sqlite() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("weather.db");
    seed_weather_db(&db_path, 60);
    let registry = ModelRegistry::new(dir.path().join("models"));

    let store = SqliteReadingStore::open(&db_path).expect("store");
    let mut readings = store.all().expect("readings");
    assert_eq!(readings.len(), 60);
    let actual = readings.pop().expect("held-out reading");

    let spatial = SqliteSpatialProvider::open(&db_path).expect("spatial");
    assert!(spatial.has_data());
    let errors = ErrorSnapshot::load(&db_path).expect("snapshot");
    assert!(errors.is_empty());

    let reports = train_all(&readings, &spatial, &errors, &registry);
    let trained: Vec<ModelIdentity> = reports
        .iter()
        .filter(|r| matches!(r.outcome, TrainingOutcome::Trained { .. }))
        .map(|r| r.identity)
        .collect();
    assert_eq!(
        trained,
        vec![
            ModelIdentity::Raw24h,
            ModelIdentity::Raw3h,
            ModelIdentity::ResidualCorrection6h
        ]
    );
    assert!(registry
        .rankings_path(ModelIdentity::Raw24h)
        .is_file());

    // Predict from everything except the held-out hour.
    let history = tempcast::InMemoryReadings::new(readings.clone());
    let ledger = SqliteErrorLedger::open(&db_path).expect("ledger");
    let inputs = CascadeInputs {
        readings: &history,
        spatial: &spatial,
        errors: &ledger,
    };
    let predictions = predict_cascade(&standard_cascade(&registry), &inputs, CascadeMode::All)
        .expect("predictions");
    assert_eq!(predictions.len(), 3);
    assert!(predictions
        .iter()
        .all(|p| p.prediction_for == actual.timestamp));

    let outcomes = validate_predictions(&ledger, &predictions, &actual).expect("validate");
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ValidationOutcome::Recorded { .. })));

    let for_hour = tempcast::hour_key(actual.timestamp).expect("hour key");
    let recorded = ledger
        .get("6hrRC", &for_hour)
        .expect("get")
        .expect("recorded error");
    let rc = predictions
        .iter()
        .find(|p| p.model_identity == ModelIdentity::ResidualCorrection6h)
        .expect("rc prediction");
    assert!((recorded.indoor - (actual.temp_indoor - rc.temp_indoor)).abs() < 1e-9);

    // The next training run sees the new ledger rows and bumps every version.
    let errors = ErrorSnapshot::load(&db_path).expect("snapshot");
    assert_eq!(errors.len(), 3);
    let reports = train_all(&readings, &spatial, &errors, &registry);
    for report in reports.iter().take(3) {
        match &report.outcome {
            TrainingOutcome::Trained { meta, .. } => assert_eq!(meta.version, 2),
            other => panic!("{}: {other:?}", report.identity),
        }
    }
}

#[test]
fn rows_without_temperatures_are_not_loaded() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("weather.db");
    seed_weather_db(&db_path, 5);
    let conn = Connection::open(&db_path).expect("open");
    conn.execute(
        "INSERT INTO readings (timestamp, temp_indoor, temp_outdoor) VALUES (?1, NULL, 3.0)",
        params![START_TS + 5 * HOUR],
    )
    .expect("insert");
    drop(conn);

    let store = SqliteReadingStore::open(&db_path).expect("store");
    let recent = store.recent(3).expect("recent");
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[2].timestamp, START_TS + 4 * HOUR);
    assert!(recent.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}
