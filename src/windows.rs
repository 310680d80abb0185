//! Sliding-window feature assembly shared by training and inference.
//!
//! A window is `lookback` consecutive readings flattened row-major (base
//! columns then the spatial block per row), followed by the layout's error
//! block. Training scans every candidate end position; inference assembles the
//! one terminal window through the same code path.

use thiserror::Error;
use tracing::{debug, info};

use crate::layout::{FeatureLayout, MAX_GAP_SECONDS};
use crate::ledger::{floor_hour, hour_key, ErrorLookup, ErrorPair, LedgerError};
use crate::model::Target;
use crate::reading::Reading;
use crate::spatial::{SpatialError, SpatialFeatureProvider};

const SECONDS_PER_HOUR: i64 = 3_600;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("need {needed} readings, have {available}")]
    DataInsufficient { needed: usize, available: usize },
    #[error("gap of {gap_seconds}s between {from_ts} and {to_ts} exceeds {max_gap_seconds}s")]
    GapViolation {
        from_ts: i64,
        to_ts: i64,
        gap_seconds: i64,
        max_gap_seconds: i64,
    },
    #[error("spatial features failed: {0}")]
    Spatial(#[from] SpatialError),
    #[error("error ledger failed: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<Target>,
    pub target_timestamps: Vec<i64>,
    pub skipped_gap_windows: usize,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

pub fn find_gap(readings: &[Reading]) -> Option<(i64, i64)> {
    readings
        .windows(2)
        .find(|pair| pair[1].timestamp - pair[0].timestamp > MAX_GAP_SECONDS)
        .map(|pair| (pair[0].timestamp, pair[1].timestamp))
}

/// Builds every valid training window. Readings must already be ascending by
/// timestamp. Fewer than `lookback + 1` readings yields an empty set.
pub fn build_windows(
    layout: &FeatureLayout,
    readings: &[Reading],
    spatial: &dyn SpatialFeatureProvider,
    errors: &dyn ErrorLookup,
) -> Result<TrainingSet, WindowError> {
    let lookback = layout.lookback;
    let mut set = TrainingSet::default();
    let mut rows: Vec<Option<Vec<f64>>> = vec![None; readings.len()];

    for i in lookback..readings.len() {
        // The span includes the step into the target row.
        if find_gap(&readings[i - lookback..=i]).is_some() {
            set.skipped_gap_windows += 1;
            continue;
        }

        let mut features = Vec::with_capacity(layout.dimension());
        for j in (i - lookback)..i {
            if rows[j].is_none() {
                rows[j] = Some(row_features(layout, &readings[j], spatial)?);
            }
            if let Some(row) = &rows[j] {
                features.extend_from_slice(row);
            }
        }
        push_error_block(&mut features, layout, readings[i - 1].timestamp, errors)?;

        let target = &readings[i];
        set.x.push(features);
        set.y.push(Target {
            temp_indoor: target.temp_indoor,
            temp_outdoor: target.temp_outdoor,
        });
        set.target_timestamps.push(target.timestamp);
    }

    info!(
        component = "windows",
        event = "windows.build.finish",
        model_identity = layout.identity.as_str(),
        lookback = lookback,
        readings = readings.len(),
        windows = set.len(),
        skipped_gap_windows = set.skipped_gap_windows,
        dimension = layout.dimension()
    );

    Ok(set)
}

pub fn build_inference_window(
    layout: &FeatureLayout,
    recent: &[Reading],
    spatial: &dyn SpatialFeatureProvider,
    errors: &dyn ErrorLookup,
) -> Result<Vec<f64>, WindowError> {
    let lookback = layout.lookback;
    if lookback == 0 || recent.len() < lookback {
        return Err(WindowError::DataInsufficient {
            needed: lookback,
            available: recent.len(),
        });
    }
    let window = &recent[recent.len() - lookback..];
    if let Some((from_ts, to_ts)) = find_gap(window) {
        return Err(WindowError::GapViolation {
            from_ts,
            to_ts,
            gap_seconds: to_ts - from_ts,
            max_gap_seconds: MAX_GAP_SECONDS,
        });
    }

    let mut features = Vec::with_capacity(layout.dimension());
    for reading in window {
        features.extend(row_features(layout, reading, spatial)?);
    }
    let anchor = window[lookback - 1].timestamp;
    push_error_block(&mut features, layout, anchor, errors)?;

    debug!(
        component = "windows",
        event = "windows.inference.built",
        model_identity = layout.identity.as_str(),
        anchor_ts = anchor,
        dimension = features.len()
    );

    Ok(features)
}

fn row_features(
    layout: &FeatureLayout,
    reading: &Reading,
    spatial: &dyn SpatialFeatureProvider,
) -> Result<Vec<f64>, WindowError> {
    let mut row = Vec::with_capacity(layout.row_width());
    row.extend(layout.base_columns.iter().map(|column| reading.value(*column)));
    let regional = spatial.features_for(reading.timestamp, Some(reading.temp_outdoor))?;
    row.extend(regional.project(layout.spatial));
    Ok(row)
}

/// Lag `k` of each stream reads the hour `k - 1` hours before the anchor's
/// hour. Misses contribute 0.0 to the lag slot and nothing to the average.
fn push_error_block(
    out: &mut Vec<f64>,
    layout: &FeatureLayout,
    anchor_ts: i64,
    errors: &dyn ErrorLookup,
) -> Result<(), WindowError> {
    if layout.error_streams.is_empty() {
        return Ok(());
    }

    let anchor_hour = floor_hour(anchor_ts);
    let keys = (0..layout.lookback as i64)
        .map(|offset| hour_key(anchor_hour - offset * SECONDS_PER_HOUR))
        .collect::<Result<Vec<_>, _>>()?;

    for stream in layout.error_streams {
        let mut lags: Vec<Option<ErrorPair>> = Vec::with_capacity(keys.len());
        for key in &keys {
            let mut found = None;
            for source in stream.sources {
                if let Some(pair) = errors.get(source, key)? {
                    found = Some(pair);
                    break;
                }
            }
            lags.push(found);
        }

        out.extend(lags.iter().map(|lag| lag.map_or(0.0, |pair| pair.indoor)));
        out.extend(lags.iter().map(|lag| lag.map_or(0.0, |pair| pair.outdoor)));

        let recorded: Vec<ErrorPair> = lags.iter().flatten().copied().collect();
        if recorded.is_empty() {
            out.extend([0.0, 0.0]);
        } else {
            let n = recorded.len() as f64;
            out.push(recorded.iter().map(|pair| pair.indoor).sum::<f64>() / n);
            out.push(recorded.iter().map(|pair| pair.outdoor).sum::<f64>() / n);
        }
    }

    Ok(())
}
