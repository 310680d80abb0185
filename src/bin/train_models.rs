use tempcast::{
    forecast_config_from_env, init_logging, log_app_finish, log_app_start,
    logging_config_from_env, train_all, ErrorSnapshot, ModelRegistry, ReadingSource,
    SqliteReadingStore, SqliteSpatialProvider, TrainingOutcome,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    let config = forecast_config_from_env()?;
    log_app_start("train_models", &logging, &config);

    let store = SqliteReadingStore::open(&config.db_path)?;
    let readings = store.all()?;
    let spatial = SqliteSpatialProvider::open(&config.db_path)?;
    let errors = ErrorSnapshot::load(&config.db_path)?;
    let registry = ModelRegistry::new(&config.model_dir);

    let reports = train_all(&readings, &spatial, &errors, &registry);

    let mut failed = Vec::new();
    for report in &reports {
        match &report.outcome {
            TrainingOutcome::Trained { meta, .. } => println!(
                "{}: v{} on {} samples (MAE indoor {:.4}, outdoor {:.4})",
                report.identity, meta.version, meta.sample_count, meta.mae_indoor, meta.mae_outdoor
            ),
            TrainingOutcome::Skipped { reason } => {
                println!("{}: skipped ({reason:?})", report.identity)
            }
            TrainingOutcome::Failed { error } => {
                println!("{}: failed ({error})", report.identity);
                failed.push(report.identity.as_str());
            }
        }
    }

    if !failed.is_empty() {
        return Err(format!("training failed for: {}", failed.join(", ")).into());
    }

    log_app_finish("train_models", &format!("{} families processed", reports.len()));
    Ok(())
}
