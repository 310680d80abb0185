//! Scores stored predictions once the reading they targeted has arrived.

use thiserror::Error;
use tracing::info;

use crate::cascade::PredictionResult;
use crate::layout::ModelIdentity;
use crate::ledger::{hour_key, ErrorPair, LedgerError, SqliteErrorLedger};
use crate::model::Target;
use crate::reading::Reading;

pub const VALIDATION_TOLERANCE_SECONDS: i64 = 1_800;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Recorded {
        model_identity: ModelIdentity,
        for_hour: String,
        error: ErrorPair,
    },
    AlreadyRecorded {
        model_identity: ModelIdentity,
        for_hour: String,
    },
    OutOfWindow {
        model_identity: ModelIdentity,
        offset_seconds: i64,
    },
}

/// Records `actual - predicted` for every prediction whose target time is
/// within [`VALIDATION_TOLERANCE_SECONDS`] of `actual`.
pub fn validate_predictions(
    ledger: &SqliteErrorLedger,
    predictions: &[PredictionResult],
    actual: &Reading,
) -> Result<Vec<ValidationOutcome>, ValidationError> {
    let observed = Target {
        temp_indoor: actual.temp_indoor,
        temp_outdoor: actual.temp_outdoor,
    };
    let mut outcomes = Vec::with_capacity(predictions.len());

    for prediction in predictions {
        let model_identity = prediction.model_identity;
        let offset_seconds = actual.timestamp - prediction.prediction_for;
        if offset_seconds.abs() > VALIDATION_TOLERANCE_SECONDS {
            info!(
                component = "validation",
                event = "validation.prediction.out_of_window",
                model_identity = model_identity.as_str(),
                prediction_for = prediction.prediction_for,
                actual_ts = actual.timestamp,
                offset_seconds = offset_seconds
            );
            outcomes.push(ValidationOutcome::OutOfWindow {
                model_identity,
                offset_seconds,
            });
            continue;
        }

        let for_hour = hour_key(prediction.prediction_for)?;
        let predicted = Target {
            temp_indoor: prediction.temp_indoor,
            temp_outdoor: prediction.temp_outdoor,
        };
        let inserted = ledger.record(
            model_identity.as_str(),
            Some(prediction.model_version),
            &for_hour,
            predicted,
            observed,
        )?;

        outcomes.push(if inserted {
            ValidationOutcome::Recorded {
                model_identity,
                for_hour,
                error: ErrorPair::between(predicted, observed),
            }
        } else {
            ValidationOutcome::AlreadyRecorded {
                model_identity,
                for_hour,
            }
        });
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::ledger::ErrorLookup;

    // 2026-02-15T12:00:00Z
    const TS: i64 = 1_771_156_800;

    fn prediction(identity: ModelIdentity, last_ts: i64) -> PredictionResult {
        PredictionResult {
            model_identity: identity,
            model_version: 3,
            prediction_for: last_ts + 3_600,
            temp_indoor: 21.0,
            temp_outdoor: 4.0,
            last_reading: Reading::new(last_ts, 20.0, 5.0),
        }
    }

    #[test]
    fn records_signed_error_once_per_hour() {
        let ledger =
            SqliteErrorLedger::from_connection(Connection::open_in_memory().expect("db"))
                .expect("ledger");
        let actual = Reading::new(TS + 3_600 + 600, 21.5, 3.0);
        let predictions = vec![
            prediction(ModelIdentity::Raw3h, TS),
            prediction(ModelIdentity::Raw24h, TS),
        ];

        let first = validate_predictions(&ledger, &predictions, &actual).expect("validate");
        assert_eq!(
            first[0],
            ValidationOutcome::Recorded {
                model_identity: ModelIdentity::Raw3h,
                for_hour: "2026-02-15T13:00:00Z".to_string(),
                error: ErrorPair {
                    indoor: 0.5,
                    outdoor: -1.0
                },
            }
        );
        assert_eq!(
            ledger
                .get("24hrRaw", "2026-02-15T13:00:00Z")
                .expect("get")
                .map(|pair| pair.outdoor),
            Some(-1.0)
        );

        let second = validate_predictions(&ledger, &predictions, &actual).expect("validate");
        assert!(second
            .iter()
            .all(|outcome| matches!(outcome, ValidationOutcome::AlreadyRecorded { .. })));
    }

    #[test]
    fn readings_outside_tolerance_are_not_scored() {
        let ledger =
            SqliteErrorLedger::from_connection(Connection::open_in_memory().expect("db"))
                .expect("ledger");
        let actual = Reading::new(TS + 3_600 + 1_801, 21.5, 3.0);
        let outcomes =
            validate_predictions(&ledger, &[prediction(ModelIdentity::Raw3h, TS)], &actual)
                .expect("validate");
        assert_eq!(
            outcomes,
            vec![ValidationOutcome::OutOfWindow {
                model_identity: ModelIdentity::Raw3h,
                offset_seconds: 1_801
            }]
        );
        assert_eq!(ledger.get("3hrRaw", "2026-02-15T13:00:00Z").expect("get"), None);
    }
}
