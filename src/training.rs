//! Per-family training runs with local data-sufficiency gates.

use thiserror::Error;
use tracing::{error, info};

use crate::layout::{ModelIdentity, TRAINING_ORDER};
use crate::ledger::ErrorLookup;
use crate::model::{evaluate, Evaluation, ModelError};
use crate::reading::Reading;
use crate::registry::{ModelMetadata, ModelRegistry, RegistryError, TrainingStats};
use crate::spatial::SpatialFeatureProvider;
use crate::windows::{build_windows, WindowError};

pub const GB_MIN_READINGS: usize = 336;
pub const MIN_TRAINING_WINDOWS: usize = 2;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Windows(#[from] WindowError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientData {
    TooFewReadings { needed: usize, available: usize },
    TooFewWindows { needed: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingOutcome {
    Trained {
        meta: ModelMetadata,
        evaluation: Evaluation,
    },
    Skipped {
        reason: InsufficientData,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FamilyReport {
    pub identity: ModelIdentity,
    pub outcome: TrainingOutcome,
}

pub fn min_readings(identity: ModelIdentity) -> usize {
    let windowed = identity.lookback() + MIN_TRAINING_WINDOWS;
    match identity {
        ModelIdentity::GradientBoosted24h => GB_MIN_READINGS.max(windowed),
        _ => windowed,
    }
}

/// Trains and publishes one family. Insufficient data is a `Skipped`
/// outcome; only genuine failures are errors.
pub fn train_identity(
    identity: ModelIdentity,
    readings: &[Reading],
    spatial: &dyn SpatialFeatureProvider,
    errors: &dyn ErrorLookup,
    registry: &ModelRegistry,
) -> Result<TrainingOutcome, TrainingError> {
    let needed = min_readings(identity);
    if readings.len() < needed {
        return Ok(TrainingOutcome::Skipped {
            reason: InsufficientData::TooFewReadings {
                needed,
                available: readings.len(),
            },
        });
    }

    let layout = identity.layout();
    let set = build_windows(layout, readings, spatial, errors)?;
    if set.len() < MIN_TRAINING_WINDOWS {
        return Ok(TrainingOutcome::Skipped {
            reason: InsufficientData::TooFewWindows {
                needed: MIN_TRAINING_WINDOWS,
                available: set.len(),
            },
        });
    }

    let spec = identity.model_spec();
    let evaluation = evaluate(&spec, &set.x, &set.y)?;
    let model = spec.fit(&set.x, &set.y)?;

    let meta = registry.publish(
        identity,
        &model,
        TrainingStats {
            sample_count: set.len(),
            mae_indoor: evaluation.mae_indoor,
            mae_outdoor: evaluation.mae_outdoor,
        },
    )?;
    registry.write_rankings(identity, &model)?;

    Ok(TrainingOutcome::Trained { meta, evaluation })
}

/// Trains every family in dependency order. One family's outcome never stops
/// the next from being attempted.
pub fn train_all(
    readings: &[Reading],
    spatial: &dyn SpatialFeatureProvider,
    errors: &dyn ErrorLookup,
    registry: &ModelRegistry,
) -> Vec<FamilyReport> {
    info!(
        component = "training",
        event = "training.run.start",
        readings = readings.len(),
        model_dir = %registry.dir().display()
    );

    let mut reports = Vec::with_capacity(TRAINING_ORDER.len());
    for identity in TRAINING_ORDER {
        let outcome = match train_identity(identity, readings, spatial, errors, registry) {
            Ok(outcome) => outcome,
            Err(err) => TrainingOutcome::Failed {
                error: err.to_string(),
            },
        };
        log_outcome(identity, &outcome);
        reports.push(FamilyReport { identity, outcome });
    }

    let trained = reports
        .iter()
        .filter(|report| matches!(report.outcome, TrainingOutcome::Trained { .. }))
        .count();
    info!(
        component = "training",
        event = "training.run.finish",
        families = reports.len(),
        trained = trained
    );

    reports
}

fn log_outcome(identity: ModelIdentity, outcome: &TrainingOutcome) {
    match outcome {
        TrainingOutcome::Trained { meta, evaluation } => info!(
            component = "training",
            event = "training.family.trained",
            model_identity = identity.as_str(),
            version = meta.version,
            sample_count = meta.sample_count,
            evaluation = ?evaluation.method,
            mae_indoor = meta.mae_indoor,
            mae_outdoor = meta.mae_outdoor
        ),
        TrainingOutcome::Skipped { reason } => info!(
            component = "training",
            event = "training.family.skipped",
            model_identity = identity.as_str(),
            reason = ?reason
        ),
        TrainingOutcome::Failed { error: message } => error!(
            component = "training",
            event = "training.family.failed",
            model_identity = identity.as_str(),
            error = %message
        ),
    }
}
