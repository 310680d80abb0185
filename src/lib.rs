//! Next-hour indoor/outdoor temperature forecasting core.
//!
//! Current implemented scope:
//! - sliding-window feature assembly with spatial and residual-correction blocks
//! - ridge and boosted-stump regressors with a versioned on-disk registry
//! - per-family training and the inference-time model cascade
//! - validation of stored predictions into the error ledger

mod cascade;
mod config;
mod layout;
mod ledger;
mod model;
mod observability;
mod reading;
mod registry;
mod spatial;
mod training;
mod validation;
mod windows;

pub use cascade::{
    predict_cascade, predict_with, standard_cascade, ArtifactLoader, CascadeError, CascadeInputs,
    CascadeMode, CascadeSkip, ModelDescriptor, PredictionResult, SkipReason,
};
pub use config::{
    forecast_config_from_env, ConfigError, ForecastConfig, DEFAULT_DB_PATH, DEFAULT_MODEL_DIR,
    DEFAULT_PREDICTION_PATH,
};
pub use layout::{
    ErrorStream, FeatureLayout, ModelIdentity, CASCADE_ORDER, FULL_COLUMNS, GB_24H, GB_COLUMNS,
    MAX_GAP_SECONDS, RAW_24H, RAW_3H, RC_6H, SIMPLE_COLUMNS, TRAINING_ORDER,
};
pub use ledger::{
    floor_hour, hour_key, ErrorLookup, ErrorPair, ErrorSnapshot, LedgerError, SqliteErrorLedger,
    HOUR_KEY_FORMAT,
};
pub use model::{
    evaluate, mean_absolute_error, BoostedModel, Evaluation, EvaluationMethod, ModelError,
    ModelSpec, RidgeModel, Stump, Target, TrainedModel,
};
pub use observability::{
    init_logging, log_app_finish, log_app_start, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use reading::{
    encode_trend, Column, InMemoryReadings, Reading, ReadingSource, SqliteReadingStore,
    StoreError, Trend,
};
pub use registry::{
    round4, ArtifactError, ArtifactSlot, FeatureRanking, LoadedModel, ModelMetadata,
    ModelRegistry, RegistryError, TrainingStats, ARTIFACT_FORMAT_VERSION,
};
pub use spatial::{
    NoSpatialData, SpatialColumn, SpatialColumnSet, SpatialError, SpatialFeatureProvider,
    SpatialFeatures, SqliteSpatialProvider, SPATIAL_HALF_WINDOW_SECONDS,
};
pub use training::{
    min_readings, train_all, train_identity, FamilyReport, InsufficientData,
    TrainingError, TrainingOutcome, GB_MIN_READINGS, MIN_TRAINING_WINDOWS,
};
pub use validation::{
    validate_predictions, ValidationError, ValidationOutcome, VALIDATION_TOLERANCE_SECONDS,
};
pub use windows::{build_inference_window, build_windows, find_gap, TrainingSet, WindowError};
