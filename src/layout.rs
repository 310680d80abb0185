//! Feature layouts: the single shared definition of how each model identity
//! flattens a window into a vector.
//!
//! Training and inference both resolve a layout through
//! [`ModelIdentity::layout`], so column order and vector length cannot drift
//! between the two paths. Artifacts embed [`FeatureLayout::fingerprint`] and are
//! rejected at load time when it no longer matches.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::ModelSpec;
use crate::reading::Column;
use crate::spatial::SpatialColumnSet;

/// Largest timestamp delta (inclusive) between two readings that still counts
/// as an unbroken sequence.
pub const MAX_GAP_SECONDS: i64 = 7_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelIdentity {
    #[serde(rename = "24hr_pubRA_RC3_GB")]
    GradientBoosted24h,
    #[serde(rename = "24hrRaw", alias = "full")]
    Raw24h,
    #[serde(rename = "6hrRC")]
    ResidualCorrection6h,
    #[serde(rename = "3hrRaw", alias = "simple")]
    Raw3h,
}

pub const CASCADE_ORDER: [ModelIdentity; 4] = [
    ModelIdentity::GradientBoosted24h,
    ModelIdentity::Raw24h,
    ModelIdentity::ResidualCorrection6h,
    ModelIdentity::Raw3h,
];

/// Residual-correction inputs must exist before the models that read them.
pub const TRAINING_ORDER: [ModelIdentity; 4] = [
    ModelIdentity::Raw24h,
    ModelIdentity::Raw3h,
    ModelIdentity::ResidualCorrection6h,
    ModelIdentity::GradientBoosted24h,
];

impl ModelIdentity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GradientBoosted24h => "24hr_pubRA_RC3_GB",
            Self::Raw24h => "24hrRaw",
            Self::ResidualCorrection6h => "6hrRC",
            Self::Raw3h => "3hrRaw",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "24hr_pubRA_RC3_GB" => Some(Self::GradientBoosted24h),
            "24hrRaw" | "full" => Some(Self::Raw24h),
            "6hrRC" => Some(Self::ResidualCorrection6h),
            "3hrRaw" | "simple" => Some(Self::Raw3h),
            _ => None,
        }
    }

    pub fn artifact_stem(self) -> &'static str {
        match self {
            Self::GradientBoosted24h => "temp_predictor_gb",
            Self::Raw24h => "temp_predictor",
            Self::ResidualCorrection6h => "temp_predictor_6hr_rc",
            Self::Raw3h => "temp_predictor_simple",
        }
    }

    pub fn meta_stem(self) -> &'static str {
        match self {
            Self::GradientBoosted24h => "gb_meta",
            Self::Raw24h => "model_meta",
            Self::ResidualCorrection6h => "6hr_rc_meta",
            Self::Raw3h => "simple_meta",
        }
    }

    pub fn layout(self) -> &'static FeatureLayout {
        match self {
            Self::GradientBoosted24h => &GB_24H,
            Self::Raw24h => &RAW_24H,
            Self::ResidualCorrection6h => &RC_6H,
            Self::Raw3h => &RAW_3H,
        }
    }

    pub fn lookback(self) -> usize {
        self.layout().lookback
    }

    pub fn model_spec(self) -> ModelSpec {
        match self {
            Self::GradientBoosted24h => ModelSpec::BoostedStumps {
                rounds: 200,
                learning_rate: 0.05,
            },
            Self::Raw24h | Self::Raw3h | Self::ResidualCorrection6h => {
                ModelSpec::Ridge { alpha: 1.0 }
            }
        }
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of lagged residuals. `sources` are ledger identities tried in
/// order; the first with a record for a given hour wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStream {
    pub label: &'static str,
    pub sources: &'static [&'static str],
}

#[derive(Debug, PartialEq, Eq)]
pub struct FeatureLayout {
    pub identity: ModelIdentity,
    pub lookback: usize,
    pub base_columns: &'static [Column],
    pub spatial: SpatialColumnSet,
    pub error_streams: &'static [ErrorStream],
}

impl FeatureLayout {
    pub fn row_width(&self) -> usize {
        self.base_columns.len() + self.spatial.len()
    }

    /// `lookback` lags of each stream for indoor and outdoor, plus two averages.
    pub fn error_block_width(&self) -> usize {
        self.error_streams.len() * (2 * self.lookback + 2)
    }

    pub fn dimension(&self) -> usize {
        self.lookback * self.row_width() + self.error_block_width()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.dimension());
        for row in 0..self.lookback {
            let lag = self.lookback - row;
            for column in self.base_columns {
                names.push(format!("{}_lag_{lag}", column.name()));
            }
            for column in self.spatial.columns() {
                names.push(format!("{}_lag_{lag}", column.name()));
            }
        }
        for stream in self.error_streams {
            for side in ["indoor", "outdoor"] {
                for lag in 1..=self.lookback {
                    names.push(format!("rc_{}_error_{side}_lag_{lag}", stream.label));
                }
            }
            names.push(format!("rc_{}_avg_error_indoor", stream.label));
            names.push(format!("rc_{}_avg_error_outdoor", stream.label));
        }
        names
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.identity.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.lookback.to_string().as_bytes());
        for name in self.feature_names() {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

pub const FULL_COLUMNS: [Column; 22] = [
    Column::TempIndoor,
    Column::TempOutdoor,
    Column::Co2,
    Column::HumidityIndoor,
    Column::HumidityOutdoor,
    Column::Noise,
    Column::Pressure,
    Column::PressureAbsolute,
    Column::TempIndoorMin,
    Column::TempIndoorMax,
    Column::TempOutdoorMin,
    Column::TempOutdoorMax,
    Column::HoursSinceMinTempIndoor,
    Column::HoursSinceMaxTempIndoor,
    Column::HoursSinceMinTempOutdoor,
    Column::HoursSinceMaxTempOutdoor,
    Column::TempTrend,
    Column::PressureTrend,
    Column::TempOutdoorTrend,
    Column::WifiStatus,
    Column::BatteryPercent,
    Column::RfStatus,
];

pub const SIMPLE_COLUMNS: [Column; 9] = [
    Column::TempIndoor,
    Column::TempOutdoor,
    Column::Co2,
    Column::HumidityIndoor,
    Column::HumidityOutdoor,
    Column::Noise,
    Column::Pressure,
    Column::TempTrend,
    Column::PressureTrend,
];

pub const GB_COLUMNS: [Column; 23] = [
    Column::TempIndoor,
    Column::TempOutdoor,
    Column::Co2,
    Column::HumidityIndoor,
    Column::HumidityOutdoor,
    Column::Noise,
    Column::Pressure,
    Column::PressureAbsolute,
    Column::TempIndoorMin,
    Column::TempIndoorMax,
    Column::TempOutdoorMin,
    Column::TempOutdoorMax,
    Column::HoursSinceMinTempIndoor,
    Column::HoursSinceMaxTempIndoor,
    Column::HoursSinceMinTempOutdoor,
    Column::HoursSinceMaxTempOutdoor,
    Column::TempTrend,
    Column::PressureTrend,
    Column::TempOutdoorTrend,
    Column::WifiStatus,
    Column::BatteryPercent,
    Column::RfStatus,
    Column::HourOfDay,
];

const RC_6H_STREAMS: [ErrorStream; 1] = [ErrorStream {
    label: "3hrRaw",
    sources: &["3hrRaw", "simple"],
}];

const GB_STREAMS: [ErrorStream; 3] = [
    ErrorStream {
        label: "3hrRaw",
        sources: &["3hrRaw"],
    },
    ErrorStream {
        label: "24hrRaw",
        sources: &["24hrRaw"],
    },
    ErrorStream {
        label: "6hrRC",
        sources: &["6hrRC"],
    },
];

pub static RAW_24H: FeatureLayout = FeatureLayout {
    identity: ModelIdentity::Raw24h,
    lookback: 24,
    base_columns: &FULL_COLUMNS,
    spatial: SpatialColumnSet::Full,
    error_streams: &[],
};

pub static RAW_3H: FeatureLayout = FeatureLayout {
    identity: ModelIdentity::Raw3h,
    lookback: 3,
    base_columns: &SIMPLE_COLUMNS,
    spatial: SpatialColumnSet::Simple,
    error_streams: &[],
};

pub static RC_6H: FeatureLayout = FeatureLayout {
    identity: ModelIdentity::ResidualCorrection6h,
    lookback: 6,
    base_columns: &SIMPLE_COLUMNS,
    spatial: SpatialColumnSet::Simple,
    error_streams: &RC_6H_STREAMS,
};

pub static GB_24H: FeatureLayout = FeatureLayout {
    identity: ModelIdentity::GradientBoosted24h,
    lookback: 24,
    base_columns: &GB_COLUMNS,
    spatial: SpatialColumnSet::Enriched,
    error_streams: &GB_STREAMS,
};

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn declared_dimensions_match_contract() {
        assert_eq!(RAW_24H.dimension(), 672);
        assert_eq!(RAW_3H.dimension(), 36);
        assert_eq!(RC_6H.dimension(), 86);
        assert_eq!(GB_24H.dimension(), 942);
    }

    #[test]
    fn feature_names_are_unique_and_sized() {
        for identity in CASCADE_ORDER {
            let layout = identity.layout();
            let names = layout.feature_names();
            assert_eq!(names.len(), layout.dimension(), "{identity}");
            let unique: HashSet<&String> = names.iter().collect();
            assert_eq!(unique.len(), names.len(), "{identity}");
        }
    }

    #[test]
    fn names_run_oldest_lag_first() {
        let names = RAW_3H.feature_names();
        assert_eq!(names[0], "temp_indoor_lag_3");
        assert_eq!(names[9], "regional_avg_temp_lag_3");
        assert_eq!(names[35], "regional_station_count_lag_1");

        let rc = RC_6H.feature_names();
        assert_eq!(rc[72], "rc_3hrRaw_error_indoor_lag_1");
        assert_eq!(rc[78], "rc_3hrRaw_error_outdoor_lag_1");
        assert_eq!(rc[84], "rc_3hrRaw_avg_error_indoor");
        assert_eq!(rc[85], "rc_3hrRaw_avg_error_outdoor");
    }

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        assert_eq!(RAW_24H.fingerprint(), RAW_24H.fingerprint());
        let all: HashSet<String> = CASCADE_ORDER
            .iter()
            .map(|identity| identity.layout().fingerprint())
            .collect();
        assert_eq!(all.len(), 4);
        assert_eq!(RAW_3H.fingerprint().len(), 64);
    }

    #[test]
    fn identity_parsing_accepts_legacy_names() {
        assert_eq!(ModelIdentity::parse("full"), Some(ModelIdentity::Raw24h));
        assert_eq!(ModelIdentity::parse("simple"), Some(ModelIdentity::Raw3h));
        assert_eq!(
            ModelIdentity::parse(" 24hr_pubRA_RC3_GB "),
            Some(ModelIdentity::GradientBoosted24h)
        );
        assert_eq!(ModelIdentity::parse("lasso"), None);
        for identity in CASCADE_ORDER {
            assert_eq!(ModelIdentity::parse(identity.as_str()), Some(identity));
            assert_eq!(identity.layout().identity, identity);
        }
    }

    #[test]
    fn full_spatial_set_extends_simple() {
        let full = SpatialColumnSet::Full.columns();
        for column in SpatialColumnSet::Simple.columns() {
            assert!(full.contains(column));
        }
        assert!(SpatialColumnSet::Enriched.columns().starts_with(full));
    }
}
