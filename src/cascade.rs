//! Inference-time model cascade.
//!
//! Models are described declaratively by [`ModelDescriptor`] and walked by a
//! single routine. Every per-identity failure (missing artifact, short or
//! gapped history, corrupt artifact) is a skip; only a cascade in which no
//! identity produced a prediction is an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::layout::{FeatureLayout, ModelIdentity, CASCADE_ORDER};
use crate::ledger::ErrorLookup;
use crate::reading::{Reading, ReadingSource};
use crate::registry::{ArtifactError, ArtifactSlot, LoadedModel, ModelRegistry};
use crate::spatial::SpatialFeatureProvider;
use crate::windows::{build_inference_window, WindowError};

const SECONDS_PER_HOUR: i64 = 3_600;

pub trait ArtifactLoader {
    fn exists(&self, identity: ModelIdentity, slot: ArtifactSlot) -> bool;
    fn load(&self, identity: ModelIdentity, slot: ArtifactSlot)
        -> Result<LoadedModel, ArtifactError>;
}

impl ArtifactLoader for ModelRegistry {
    fn exists(&self, identity: ModelIdentity, slot: ArtifactSlot) -> bool {
        self.artifact_exists(identity, slot)
    }

    fn load(
        &self,
        identity: ModelIdentity,
        slot: ArtifactSlot,
    ) -> Result<LoadedModel, ArtifactError> {
        ModelRegistry::load(self, identity, slot)
    }
}

#[derive(Clone, Copy)]
pub struct ModelDescriptor<'a> {
    identity: ModelIdentity,
    layout: &'static FeatureLayout,
    loader: &'a dyn ArtifactLoader,
}

impl<'a> ModelDescriptor<'a> {
    pub fn new(identity: ModelIdentity, loader: &'a dyn ArtifactLoader) -> Self {
        Self {
            identity,
            layout: identity.layout(),
            loader,
        }
    }

    pub fn identity(&self) -> ModelIdentity {
        self.identity
    }

    pub fn layout(&self) -> &'static FeatureLayout {
        self.layout
    }

    /// Always the layout's lookback, so the history fetch matches the window.
    pub fn lookback(&self) -> usize {
        self.layout.lookback
    }
}

impl fmt::Debug for ModelDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("identity", &self.identity)
            .field("lookback", &self.lookback())
            .finish_non_exhaustive()
    }
}

pub fn standard_cascade(loader: &dyn ArtifactLoader) -> Vec<ModelDescriptor<'_>> {
    CASCADE_ORDER
        .iter()
        .map(|identity| ModelDescriptor::new(*identity, loader))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeMode {
    Best,
    All,
}

impl CascadeMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "best" => Some(Self::Best),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub model_identity: ModelIdentity,
    pub model_version: u32,
    pub prediction_for: i64,
    pub temp_indoor: f64,
    pub temp_outdoor: f64,
    pub last_reading: Reading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ArtifactMissing,
    DataInsufficient(String),
    ArtifactCorrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeSkip {
    pub identity: ModelIdentity,
    pub reason: SkipReason,
}

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("no model in the cascade produced a prediction ({} skipped)", skipped.len())]
    Exhausted { skipped: Vec<CascadeSkip> },
}

pub struct CascadeInputs<'a> {
    pub readings: &'a dyn ReadingSource,
    pub spatial: &'a dyn SpatialFeatureProvider,
    pub errors: &'a dyn ErrorLookup,
}

/// Walks `descriptors` in order. `Best` stops at the first prediction; `All`
/// attempts every descriptor. The result is never empty.
pub fn predict_cascade(
    descriptors: &[ModelDescriptor<'_>],
    inputs: &CascadeInputs<'_>,
    mode: CascadeMode,
) -> Result<Vec<PredictionResult>, CascadeError> {
    let mut results = Vec::new();
    let mut skipped = Vec::new();

    for descriptor in descriptors {
        match predict_with(descriptor, inputs) {
            Ok(result) => {
                info!(
                    component = "cascade",
                    event = "cascade.model.selected",
                    model_identity = result.model_identity.as_str(),
                    model_version = result.model_version,
                    prediction_for = result.prediction_for,
                    mode = mode.as_str()
                );
                results.push(result);
                if mode == CascadeMode::Best {
                    break;
                }
            }
            Err(reason) => skipped.push(CascadeSkip {
                identity: descriptor.identity,
                reason,
            }),
        }
    }

    if results.is_empty() {
        error!(
            component = "cascade",
            event = "cascade.exhausted",
            attempted = descriptors.len(),
            mode = mode.as_str()
        );
        return Err(CascadeError::Exhausted { skipped });
    }

    Ok(results)
}

pub fn predict_with(
    descriptor: &ModelDescriptor<'_>,
    inputs: &CascadeInputs<'_>,
) -> Result<PredictionResult, SkipReason> {
    let identity = descriptor.identity;
    if !descriptor.loader.exists(identity, ArtifactSlot::Current) {
        debug!(
            component = "cascade",
            event = "cascade.artifact.missing",
            model_identity = identity.as_str()
        );
        return Err(SkipReason::ArtifactMissing);
    }

    let recent = match inputs.readings.recent(descriptor.lookback()) {
        Ok(recent) => recent,
        Err(err) => {
            warn!(
                component = "cascade",
                event = "cascade.readings.failed",
                model_identity = identity.as_str(),
                error = %err
            );
            return Err(SkipReason::DataInsufficient(err.to_string()));
        }
    };

    let features = match build_inference_window(
        descriptor.layout,
        &recent,
        inputs.spatial,
        inputs.errors,
    ) {
        Ok(features) => features,
        Err(err) => {
            match &err {
                WindowError::DataInsufficient { .. } | WindowError::GapViolation { .. } => info!(
                    component = "cascade",
                    event = "cascade.data.insufficient",
                    model_identity = identity.as_str(),
                    lookback = descriptor.lookback(),
                    reason = %err
                ),
                WindowError::Spatial(_) | WindowError::Ledger(_) => warn!(
                    component = "cascade",
                    event = "cascade.features.failed",
                    model_identity = identity.as_str(),
                    error = %err
                ),
            }
            return Err(SkipReason::DataInsufficient(err.to_string()));
        }
    };

    // Guarded by the window builder: `recent` holds at least `lookback` rows.
    let Some(last_reading) = recent.last().cloned() else {
        return Err(SkipReason::DataInsufficient("no readings".to_string()));
    };

    let mut last_failure = String::new();
    for slot in [ArtifactSlot::Current, ArtifactSlot::Previous] {
        if slot == ArtifactSlot::Previous && !descriptor.loader.exists(identity, slot) {
            break;
        }
        let attempt = descriptor
            .loader
            .load(identity, slot)
            .map_err(|err| err.to_string())
            .and_then(|loaded| {
                loaded
                    .model
                    .predict(&features)
                    .map(|target| (loaded.version, target))
                    .map_err(|err| err.to_string())
            });
        match attempt {
            Ok((model_version, target)) => {
                if slot == ArtifactSlot::Previous {
                    info!(
                        component = "cascade",
                        event = "cascade.fallback.used",
                        model_identity = identity.as_str(),
                        model_version = model_version
                    );
                }
                return Ok(PredictionResult {
                    model_identity: identity,
                    model_version,
                    prediction_for: last_reading.timestamp + SECONDS_PER_HOUR,
                    temp_indoor: target.temp_indoor,
                    temp_outdoor: target.temp_outdoor,
                    last_reading,
                });
            }
            Err(reason) => {
                warn!(
                    component = "cascade",
                    event = "cascade.artifact.corrupt",
                    model_identity = identity.as_str(),
                    slot = slot.as_str(),
                    error = %reason
                );
                last_failure = reason;
            }
        }
    }

    Err(SkipReason::ArtifactCorrupt(last_failure))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::ledger::ErrorSnapshot;
    use crate::model::{ModelSpec, Target};
    use crate::reading::InMemoryReadings;
    use crate::spatial::NoSpatialData;

    const TS: i64 = 1_771_156_800;

    struct FakeLoader {
        available: Vec<(ModelIdentity, ArtifactSlot, u32)>,
        loads: RefCell<Vec<(ModelIdentity, ArtifactSlot)>>,
    }

    impl ArtifactLoader for FakeLoader {
        fn exists(&self, identity: ModelIdentity, slot: ArtifactSlot) -> bool {
            self.available
                .iter()
                .any(|(i, s, _)| *i == identity && *s == slot)
        }

        fn load(
            &self,
            identity: ModelIdentity,
            slot: ArtifactSlot,
        ) -> Result<LoadedModel, ArtifactError> {
            self.loads.borrow_mut().push((identity, slot));
            let (_, _, version) = self
                .available
                .iter()
                .find(|(i, s, _)| *i == identity && *s == slot)
                .ok_or_else(|| ArtifactError::Missing(format!("{identity}").into()))?;
            let dim = identity.layout().dimension();
            let x = vec![vec![0.0; dim], vec![1.0; dim]];
            let y = vec![
                Target {
                    temp_indoor: 20.0,
                    temp_outdoor: 5.0,
                },
                Target {
                    temp_indoor: 21.0,
                    temp_outdoor: 6.0,
                },
            ];
            let model = ModelSpec::Ridge { alpha: 1.0 }
                .fit(&x, &y)
                .map_err(|err| ArtifactError::Corrupt {
                    path: "fake".into(),
                    reason: err.to_string(),
                })?;
            Ok(LoadedModel {
                identity,
                slot,
                version: *version,
                model,
            })
        }
    }

    fn readings(n: usize) -> InMemoryReadings {
        InMemoryReadings::new(
            (0..n)
                .map(|i| Reading::new(TS + i as i64 * 3_600, 20.0, 5.0))
                .collect(),
        )
    }

    #[test]
    fn best_mode_skips_identities_without_enough_history() {
        let loader = FakeLoader {
            available: vec![
                (ModelIdentity::Raw24h, ArtifactSlot::Current, 4),
                (ModelIdentity::Raw3h, ArtifactSlot::Current, 2),
            ],
            loads: RefCell::new(Vec::new()),
        };
        let source = readings(5);
        let errors = ErrorSnapshot::default();
        let inputs = CascadeInputs {
            readings: &source,
            spatial: &NoSpatialData,
            errors: &errors,
        };
        let results =
            predict_cascade(&standard_cascade(&loader), &inputs, CascadeMode::Best).expect("ok");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].model_identity, ModelIdentity::Raw3h);
        assert_eq!(results[0].model_version, 2);
        assert_eq!(results[0].prediction_for, TS + 5 * 3_600);
        assert_eq!(results[0].last_reading.timestamp, TS + 4 * 3_600);
        // The 24h model was never loaded because its window could not be built.
        assert_eq!(
            *loader.loads.borrow(),
            vec![(ModelIdentity::Raw3h, ArtifactSlot::Current)]
        );
    }

    #[test]
    fn missing_previous_slot_means_corrupt_skip() {
        struct Broken;
        impl ArtifactLoader for Broken {
            fn exists(&self, _: ModelIdentity, slot: ArtifactSlot) -> bool {
                slot == ArtifactSlot::Current
            }
            fn load(
                &self,
                _: ModelIdentity,
                _: ArtifactSlot,
            ) -> Result<LoadedModel, ArtifactError> {
                Err(ArtifactError::Corrupt {
                    path: "broken".into(),
                    reason: "truncated".to_string(),
                })
            }
        }
        let source = readings(4);
        let errors = ErrorSnapshot::default();
        let inputs = CascadeInputs {
            readings: &source,
            spatial: &NoSpatialData,
            errors: &errors,
        };
        let descriptor = ModelDescriptor::new(ModelIdentity::Raw3h, &Broken);
        assert!(matches!(
            predict_with(&descriptor, &inputs),
            Err(SkipReason::ArtifactCorrupt(_))
        ));
    }

    #[test]
    fn descriptor_lookback_follows_its_layout() {
        let loader = FakeLoader {
            available: Vec::new(),
            loads: RefCell::new(Vec::new()),
        };
        let descriptors = standard_cascade(&loader);
        let lookbacks: Vec<usize> = descriptors.iter().map(|d| d.lookback()).collect();
        assert_eq!(lookbacks, vec![24, 24, 6, 3]);
        for descriptor in &descriptors {
            assert_eq!(descriptor.identity().layout(), descriptor.layout());
        }
    }

    #[test]
    fn cascade_mode_parses_case_insensitively() {
        assert_eq!(CascadeMode::parse("ALL"), Some(CascadeMode::All));
        assert_eq!(CascadeMode::parse(" best "), Some(CascadeMode::Best));
        assert_eq!(CascadeMode::parse("first"), None);
    }
}
