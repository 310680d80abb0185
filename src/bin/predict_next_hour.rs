use std::fs;

use tempcast::{
    forecast_config_from_env, init_logging, log_app_finish, log_app_start,
    logging_config_from_env, predict_cascade, standard_cascade, CascadeInputs, ModelRegistry,
    SqliteErrorLedger, SqliteReadingStore, SqliteSpatialProvider,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    let config = forecast_config_from_env()?;
    log_app_start("predict_next_hour", &logging, &config);

    let store = SqliteReadingStore::open(&config.db_path)?;
    let spatial = SqliteSpatialProvider::open(&config.db_path)?;
    let ledger = SqliteErrorLedger::open_read_only(&config.db_path)?;
    let registry = ModelRegistry::new(&config.model_dir);

    let inputs = CascadeInputs {
        readings: &store,
        spatial: &spatial,
        errors: &ledger,
    };
    let results = predict_cascade(&standard_cascade(&registry), &inputs, config.cascade_mode)?;

    if let Some(parent) = config.prediction_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(
        &config.prediction_path,
        serde_json::to_vec_pretty(&results)?,
    )?;

    for result in &results {
        println!(
            "{} v{}: indoor {:.1}, outdoor {:.1}",
            result.model_identity, result.model_version, result.temp_indoor, result.temp_outdoor
        );
    }

    log_app_finish(
        "predict_next_hour",
        &format!(
            "{} prediction(s) written to {}",
            results.len(),
            config.prediction_path.display()
        ),
    );
    Ok(())
}
