//! On-disk model registry: current and previous artifact per identity, each
//! with a JSON metadata sidecar.
//!
//! Publishing never leaves an identity without a readable artifact: the new
//! model is staged and synced first, the old pair is copied to the `_prev`
//! slot, and only then is the staged file renamed over the current one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::ModelIdentity;
use crate::model::TrainedModel;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactSlot {
    Current,
    Previous,
}

impl ArtifactSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Previous => "previous",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Current => "",
            Self::Previous => "_prev",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: u32,
    pub trained_at: String,
    pub sample_count: usize,
    pub mae_indoor: f64,
    pub mae_outdoor: f64,
    #[serde(default)]
    pub feature_count: usize,
    #[serde(default)]
    pub layout_fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingStats {
    pub sample_count: usize,
    pub mae_indoor: f64,
    pub mae_outdoor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArtifactEnvelope {
    format_version: u32,
    model_identity: ModelIdentity,
    version: u32,
    layout_fingerprint: String,
    feature_count: usize,
    model: TrainedModel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub identity: ModelIdentity,
    pub slot: ArtifactSlot,
    pub version: u32,
    pub model: TrainedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRanking {
    pub name: String,
    pub importance: f64,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("artifact {path} was built for a different feature layout ({found}, expected {expected})")]
    LayoutMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
    #[error("model has {model} features, layout {identity} declares {layout}")]
    FeatureCount {
        identity: ModelIdentity,
        model: usize,
        layout: usize,
    },
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
}

impl ModelRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, identity: ModelIdentity, slot: ArtifactSlot) -> PathBuf {
        self.dir
            .join(format!("{}{}.json", identity.artifact_stem(), slot.suffix()))
    }

    pub fn meta_path(&self, identity: ModelIdentity, slot: ArtifactSlot) -> PathBuf {
        self.dir
            .join(format!("{}{}.json", identity.meta_stem(), slot.suffix()))
    }

    pub fn rankings_path(&self, identity: ModelIdentity) -> PathBuf {
        self.dir
            .join(format!("feature_rankings_{}.json", identity.as_str()))
    }

    pub fn artifact_exists(&self, identity: ModelIdentity, slot: ArtifactSlot) -> bool {
        self.artifact_path(identity, slot).is_file()
    }

    /// Missing or unreadable metadata reads as `None`.
    pub fn read_meta(&self, identity: ModelIdentity, slot: ArtifactSlot) -> Option<ModelMetadata> {
        let path = self.meta_path(identity, slot);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(
                    component = "registry",
                    event = "registry.meta.unreadable",
                    model_identity = identity.as_str(),
                    path = %path.display(),
                    error = %err
                );
                None
            }
        }
    }

    pub fn current_version(&self, identity: ModelIdentity) -> u32 {
        self.read_meta(identity, ArtifactSlot::Current)
            .map_or(0, |meta| meta.version)
    }

    pub fn load(
        &self,
        identity: ModelIdentity,
        slot: ArtifactSlot,
    ) -> Result<LoadedModel, ArtifactError> {
        let path = self.artifact_path(identity, slot);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::Missing(path));
            }
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };

        let envelope: ArtifactEnvelope =
            serde_json::from_slice(&bytes).map_err(|err| ArtifactError::Corrupt {
                path: path.clone(),
                reason: err.to_string(),
            })?;

        if envelope.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ArtifactError::Corrupt {
                path,
                reason: format!("unsupported format version {}", envelope.format_version),
            });
        }
        if envelope.model_identity != identity {
            return Err(ArtifactError::Corrupt {
                path,
                reason: format!("artifact belongs to {}", envelope.model_identity),
            });
        }

        let layout = identity.layout();
        let expected = layout.fingerprint();
        if envelope.layout_fingerprint != expected {
            return Err(ArtifactError::LayoutMismatch {
                path,
                expected,
                found: envelope.layout_fingerprint,
            });
        }
        if envelope.feature_count != layout.dimension()
            || envelope.model.feature_count() != layout.dimension()
        {
            return Err(ArtifactError::Corrupt {
                path,
                reason: format!(
                    "feature count {} does not match layout dimension {}",
                    envelope.model.feature_count(),
                    layout.dimension()
                ),
            });
        }

        envelope
            .model
            .validate()
            .map_err(|err| ArtifactError::Corrupt {
                path,
                reason: err.to_string(),
            })?;

        debug!(
            component = "registry",
            event = "registry.artifact.loaded",
            model_identity = identity.as_str(),
            slot = slot.as_str(),
            version = envelope.version
        );

        Ok(LoadedModel {
            identity,
            slot,
            version: envelope.version,
            model: envelope.model,
        })
    }

    /// Publishes `model` as the next version of `identity` and retains the
    /// outgoing pair under the `_prev` slot.
    pub fn publish(
        &self,
        identity: ModelIdentity,
        model: &TrainedModel,
        stats: TrainingStats,
    ) -> Result<ModelMetadata, RegistryError> {
        let layout = identity.layout();
        if model.feature_count() != layout.dimension() {
            return Err(RegistryError::FeatureCount {
                identity,
                model: model.feature_count(),
                layout: layout.dimension(),
            });
        }

        fs::create_dir_all(&self.dir).map_err(|source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let previous_version = self.current_version(identity);
        let version = previous_version + 1;
        let fingerprint = layout.fingerprint();

        let envelope = ArtifactEnvelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            model_identity: identity,
            version,
            layout_fingerprint: fingerprint.clone(),
            feature_count: layout.dimension(),
            model: model.clone(),
        };
        let current = self.artifact_path(identity, ArtifactSlot::Current);
        let staged = sibling_path(&current, "staged")?;
        write_synced(&staged, &serde_json::to_vec(&envelope)?)?;

        let current_meta = self.meta_path(identity, ArtifactSlot::Current);
        retain_previous(&current, &self.artifact_path(identity, ArtifactSlot::Previous))?;
        retain_previous(
            &current_meta,
            &self.meta_path(identity, ArtifactSlot::Previous),
        )?;

        fs::rename(&staged, &current).map_err(|source| RegistryError::Io {
            path: current.clone(),
            source,
        })?;

        let meta = ModelMetadata {
            version,
            trained_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            sample_count: stats.sample_count,
            mae_indoor: round4(stats.mae_indoor),
            mae_outdoor: round4(stats.mae_outdoor),
            feature_count: layout.dimension(),
            layout_fingerprint: fingerprint,
        };
        write_atomic(&current_meta, &serde_json::to_vec_pretty(&meta)?)?;

        info!(
            component = "registry",
            event = "registry.model.published",
            model_identity = identity.as_str(),
            version = version,
            previous_version = previous_version,
            sample_count = meta.sample_count,
            mae_indoor = meta.mae_indoor,
            mae_outdoor = meta.mae_outdoor
        );

        Ok(meta)
    }

    pub fn write_rankings(
        &self,
        identity: ModelIdentity,
        model: &TrainedModel,
    ) -> Result<Vec<FeatureRanking>, RegistryError> {
        let names = identity.layout().feature_names();
        let mut rankings: Vec<FeatureRanking> = names
            .into_iter()
            .zip(model.feature_importance())
            .map(|(name, importance)| FeatureRanking { name, importance })
            .collect();
        rankings.sort_by(|a, b| b.importance.total_cmp(&a.importance));

        fs::create_dir_all(&self.dir).map_err(|source| RegistryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        write_atomic(
            &self.rankings_path(identity),
            &serde_json::to_vec_pretty(&rankings)?,
        )?;
        Ok(rankings)
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn sibling_path(path: &Path, suffix: &str) -> Result<PathBuf, RegistryError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| RegistryError::InvalidPath(path.to_path_buf()))?;
    Ok(path.with_file_name(format!("{file_name}.{suffix}")))
}

fn retain_previous(current: &Path, previous: &Path) -> Result<(), RegistryError> {
    let bytes = match fs::read(current) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(RegistryError::Io {
                path: current.to_path_buf(),
                source,
            })
        }
    };
    write_atomic(previous, &bytes)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), RegistryError> {
    let io_err = |source: std::io::Error| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RegistryError> {
    let tmp_path = sibling_path(path, "tmp")?;
    write_synced(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
