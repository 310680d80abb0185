use std::fs;

use tempcast::{
    forecast_config_from_env, init_logging, log_app_finish, log_app_start,
    logging_config_from_env, validate_predictions, PredictionResult, ReadingSource,
    SqliteErrorLedger, SqliteReadingStore, ValidationOutcome,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    let config = forecast_config_from_env()?;
    log_app_start("validate_predictions", &logging, &config);

    let predictions: Vec<PredictionResult> =
        serde_json::from_slice(&fs::read(&config.prediction_path)?)?;

    let store = SqliteReadingStore::open(&config.db_path)?;
    let Some(actual) = store.recent(1)?.pop() else {
        return Err("no readings available to validate against".into());
    };
    let ledger = SqliteErrorLedger::open(&config.db_path)?;

    let outcomes = validate_predictions(&ledger, &predictions, &actual)?;
    let mut recorded = 0;
    for outcome in &outcomes {
        match outcome {
            ValidationOutcome::Recorded {
                model_identity,
                for_hour,
                error,
            } => {
                recorded += 1;
                println!(
                    "{model_identity} {for_hour}: error indoor {:+.2}, outdoor {:+.2}",
                    error.indoor, error.outdoor
                );
            }
            ValidationOutcome::AlreadyRecorded {
                model_identity,
                for_hour,
            } => println!("{model_identity} {for_hour}: already validated"),
            ValidationOutcome::OutOfWindow {
                model_identity,
                offset_seconds,
            } => println!("{model_identity}: reading is {offset_seconds}s from target, skipped"),
        }
    }

    log_app_finish(
        "validate_predictions",
        &format!("{recorded} of {} prediction(s) recorded", outcomes.len()),
    );
    Ok(())
}
