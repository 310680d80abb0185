//! Run configuration shared by the training, prediction and validation
//! binaries.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::cascade::CascadeMode;

pub const DEFAULT_DB_PATH: &str = "data/weather.db";
pub const DEFAULT_MODEL_DIR: &str = "models";
pub const DEFAULT_PREDICTION_PATH: &str = "data/prediction.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastConfig {
    pub db_path: PathBuf,
    pub model_dir: PathBuf,
    pub cascade_mode: CascadeMode,
    pub prediction_path: PathBuf,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            cascade_mode: CascadeMode::Best,
            prediction_path: PathBuf::from(DEFAULT_PREDICTION_PATH),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid TEMPCAST_CASCADE_MODE {0:?}: expected best or all")]
    InvalidCascadeMode(String),
}

pub fn forecast_config_from_env() -> Result<ForecastConfig, ConfigError> {
    let mut config = ForecastConfig::default();

    if let Some(path) = non_empty_var("TEMPCAST_DB_PATH") {
        config.db_path = PathBuf::from(path);
    }
    if let Some(dir) = non_empty_var("TEMPCAST_MODEL_DIR") {
        config.model_dir = PathBuf::from(dir);
    }
    if let Some(path) = non_empty_var("TEMPCAST_PREDICTION_PATH") {
        config.prediction_path = PathBuf::from(path);
    }
    if let Some(mode) = non_empty_var("TEMPCAST_CASCADE_MODE") {
        config.cascade_mode =
            CascadeMode::parse(&mode).ok_or(ConfigError::InvalidCascadeMode(mode))?;
    }

    Ok(config)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const KEYS: [&str; 4] = [
        "TEMPCAST_DB_PATH",
        "TEMPCAST_MODEL_DIR",
        "TEMPCAST_CASCADE_MODE",
        "TEMPCAST_PREDICTION_PATH",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        for key in KEYS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let output = f();
        for key in KEYS {
            env::remove_var(key);
        }
        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env(&[], forecast_config_from_env).expect("config");
        assert_eq!(cfg, ForecastConfig::default());
    }

    #[test]
    fn reads_paths_and_mode() {
        let cfg = with_env(
            &[
                ("TEMPCAST_DB_PATH", "/tmp/w.db"),
                ("TEMPCAST_MODEL_DIR", "/tmp/models"),
                ("TEMPCAST_CASCADE_MODE", "All"),
            ],
            forecast_config_from_env,
        )
        .expect("config");
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/w.db"));
        assert_eq!(cfg.model_dir, PathBuf::from("/tmp/models"));
        assert_eq!(cfg.cascade_mode, CascadeMode::All);
        assert_eq!(cfg.prediction_path, PathBuf::from(DEFAULT_PREDICTION_PATH));
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = with_env(
            &[("TEMPCAST_CASCADE_MODE", "fastest")],
            forecast_config_from_env,
        )
        .expect_err("invalid mode");
        assert_eq!(err, ConfigError::InvalidCascadeMode("fastest".to_string()));
    }
}
