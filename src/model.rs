//! Regressors behind the `fit(X, y) -> model`, `model.predict(x)` seam.
//!
//! Two concrete families are provided: ridge regression on standardized
//! features for the raw and residual-correction layouts, and gradient-boosted
//! depth-1 trees for the gradient-boosted layout. Both serialize with serde so
//! the registry can persist them as JSON artifacts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_SCALE: f64 = 1e-12;
const KFOLD_THRESHOLD: usize = 50;
const MAX_FOLDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub temp_indoor: f64,
    pub temp_outdoor: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("training set is ragged: {features} feature rows, {targets} targets")]
    RaggedTrainingSet { features: usize, targets: usize },
    #[error("feature vector has {actual} values, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("linear system is not positive definite")]
    Singular,
    #[error("model produced a non-finite prediction")]
    NonFinite,
    #[error("model parameters are malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Ridge { alpha: f64 },
    BoostedStumps { rounds: usize, learning_rate: f64 },
}

impl ModelSpec {
    pub fn fit(&self, x: &[Vec<f64>], y: &[Target]) -> Result<TrainedModel, ModelError> {
        let feature_count = validate_training_set(x, y)?;
        match *self {
            Self::Ridge { alpha } => fit_ridge(x, y, feature_count, alpha).map(TrainedModel::Ridge),
            Self::BoostedStumps {
                rounds,
                learning_rate,
            } => Ok(TrainedModel::BoostedStumps(fit_boosted(
                x,
                y,
                feature_count,
                rounds,
                learning_rate,
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    Ridge(RidgeModel),
    BoostedStumps(BoostedModel),
}

impl TrainedModel {
    pub fn feature_count(&self) -> usize {
        match self {
            Self::Ridge(model) => model.feature_count,
            Self::BoostedStumps(model) => model.feature_count,
        }
    }

    /// Checks that deserialized parameters agree with `feature_count`, so
    /// `predict` never indexes past a truncated vector.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Self::Ridge(model) => model.validate(),
            Self::BoostedStumps(model) => model.validate(),
        }
    }

    pub fn predict(&self, features: &[f64]) -> Result<Target, ModelError> {
        if features.len() != self.feature_count() {
            return Err(ModelError::DimensionMismatch {
                expected: self.feature_count(),
                actual: features.len(),
            });
        }
        let target = match self {
            Self::Ridge(model) => model.predict(features),
            Self::BoostedStumps(model) => model.predict(features),
        };
        if !target.temp_indoor.is_finite() || !target.temp_outdoor.is_finite() {
            return Err(ModelError::NonFinite);
        }
        Ok(target)
    }

    pub fn feature_importance(&self) -> Vec<f64> {
        match self {
            Self::Ridge(model) => model
                .coef_indoor
                .iter()
                .zip(&model.coef_outdoor)
                .map(|(indoor, outdoor)| (indoor.abs() + outdoor.abs()) / 2.0)
                .collect(),
            Self::BoostedStumps(model) => {
                let mut importance = vec![0.0; model.feature_count];
                for stump in model.indoor.iter().chain(&model.outdoor) {
                    if let Some(slot) = importance.get_mut(stump.feature) {
                        *slot += stump.gain;
                    }
                }
                importance
            }
        }
    }
}

/// Coefficients live in standardized space: `x' = (x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    pub feature_count: usize,
    pub alpha: f64,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub coef_indoor: Vec<f64>,
    pub coef_outdoor: Vec<f64>,
    pub intercept: Target,
}

impl RidgeModel {
    fn validate(&self) -> Result<(), ModelError> {
        for (name, values) in [
            ("means", &self.means),
            ("scales", &self.scales),
            ("coef_indoor", &self.coef_indoor),
            ("coef_outdoor", &self.coef_outdoor),
        ] {
            if values.len() != self.feature_count {
                return Err(ModelError::Malformed(format!(
                    "{name} has {} values, expected {}",
                    values.len(),
                    self.feature_count
                )));
            }
        }
        if let Some(j) = self
            .scales
            .iter()
            .position(|scale| !scale.is_finite() || *scale == 0.0)
        {
            return Err(ModelError::Malformed(format!(
                "scale {j} is zero or non-finite"
            )));
        }
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> Target {
        let mut indoor = self.intercept.temp_indoor;
        let mut outdoor = self.intercept.temp_outdoor;
        for (j, value) in features.iter().enumerate() {
            let z = (value - self.means[j]) / self.scales[j];
            indoor += self.coef_indoor[j] * z;
            outdoor += self.coef_outdoor[j] * z;
        }
        Target {
            temp_indoor: indoor,
            temp_outdoor: outdoor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
    pub gain: f64,
}

impl Stump {
    fn apply(&self, features: &[f64]) -> f64 {
        if features[self.feature] <= self.threshold {
            self.left
        } else {
            self.right
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    pub feature_count: usize,
    pub learning_rate: f64,
    pub base: Target,
    pub indoor: Vec<Stump>,
    pub outdoor: Vec<Stump>,
}

impl BoostedModel {
    fn validate(&self) -> Result<(), ModelError> {
        match self
            .indoor
            .iter()
            .chain(&self.outdoor)
            .find(|stump| stump.feature >= self.feature_count)
        {
            Some(stump) => Err(ModelError::Malformed(format!(
                "stump splits on feature {}, model has {}",
                stump.feature, self.feature_count
            ))),
            None => Ok(()),
        }
    }

    fn predict(&self, features: &[f64]) -> Target {
        Target {
            temp_indoor: self.base.temp_indoor
                + self.indoor.iter().map(|s| s.apply(features)).sum::<f64>(),
            temp_outdoor: self.base.temp_outdoor
                + self.outdoor.iter().map(|s| s.apply(features)).sum::<f64>(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMethod {
    KFold { folds: usize },
    HoldoutTail { test_samples: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub method: EvaluationMethod,
    pub mae_indoor: f64,
    pub mae_outdoor: f64,
}

/// Out-of-sample MAE. Small sets use contiguous k-fold; larger ones train on
/// the oldest 80% and score the newest 20%.
pub fn evaluate(spec: &ModelSpec, x: &[Vec<f64>], y: &[Target]) -> Result<Evaluation, ModelError> {
    validate_training_set(x, y)?;
    let n = x.len();
    if n < 2 {
        return Err(ModelError::EmptyTrainingSet);
    }

    let mut predicted = Vec::with_capacity(n);
    let mut actual = Vec::with_capacity(n);

    let method = if n < KFOLD_THRESHOLD {
        let folds = n.min(MAX_FOLDS);
        for fold in 0..folds {
            let start = fold * n / folds;
            let end = (fold + 1) * n / folds;
            let (train_x, train_y) = without_range(x, y, start, end);
            let model = spec.fit(&train_x, &train_y)?;
            for i in start..end {
                predicted.push(model.predict(&x[i])?);
                actual.push(y[i]);
            }
        }
        EvaluationMethod::KFold { folds }
    } else {
        let split = n - n / 5;
        let model = spec.fit(&x[..split], &y[..split])?;
        for i in split..n {
            predicted.push(model.predict(&x[i])?);
            actual.push(y[i]);
        }
        EvaluationMethod::HoldoutTail {
            test_samples: n - split,
        }
    };

    let (mae_indoor, mae_outdoor) = mean_absolute_error(&predicted, &actual);
    Ok(Evaluation {
        method,
        mae_indoor,
        mae_outdoor,
    })
}

pub fn mean_absolute_error(predicted: &[Target], actual: &[Target]) -> (f64, f64) {
    if predicted.is_empty() {
        return (0.0, 0.0);
    }
    let n = predicted.len() as f64;
    let (indoor, outdoor) = predicted
        .iter()
        .zip(actual)
        .fold((0.0, 0.0), |(indoor, outdoor), (p, a)| {
            (
                indoor + (p.temp_indoor - a.temp_indoor).abs(),
                outdoor + (p.temp_outdoor - a.temp_outdoor).abs(),
            )
        });
    (indoor / n, outdoor / n)
}

fn without_range(
    x: &[Vec<f64>],
    y: &[Target],
    start: usize,
    end: usize,
) -> (Vec<Vec<f64>>, Vec<Target>) {
    let keep = |i: &usize| *i < start || *i >= end;
    let train_x = (0..x.len()).filter(keep).map(|i| x[i].clone()).collect();
    let train_y = (0..y.len()).filter(keep).map(|i| y[i]).collect();
    (train_x, train_y)
}

fn validate_training_set(x: &[Vec<f64>], y: &[Target]) -> Result<usize, ModelError> {
    if x.len() != y.len() {
        return Err(ModelError::RaggedTrainingSet {
            features: x.len(),
            targets: y.len(),
        });
    }
    let first = x.first().ok_or(ModelError::EmptyTrainingSet)?;
    let feature_count = first.len();
    if let Some(row) = x.iter().find(|row| row.len() != feature_count) {
        return Err(ModelError::DimensionMismatch {
            expected: feature_count,
            actual: row.len(),
        });
    }
    Ok(feature_count)
}

fn target_means(y: &[Target]) -> Target {
    let n = y.len() as f64;
    Target {
        temp_indoor: y.iter().map(|t| t.temp_indoor).sum::<f64>() / n,
        temp_outdoor: y.iter().map(|t| t.temp_outdoor).sum::<f64>() / n,
    }
}

fn fit_ridge(
    x: &[Vec<f64>],
    y: &[Target],
    p: usize,
    alpha: f64,
) -> Result<RidgeModel, ModelError> {
    let n = x.len();
    let mut means = vec![0.0; p];
    for row in x {
        for (j, value) in row.iter().enumerate() {
            means[j] += value;
        }
    }
    for mean in &mut means {
        *mean /= n as f64;
    }
    let mut scales = vec![0.0; p];
    for row in x {
        for (j, value) in row.iter().enumerate() {
            let d = value - means[j];
            scales[j] += d * d;
        }
    }
    for scale in &mut scales {
        let std = (*scale / n as f64).sqrt();
        *scale = if std > MIN_SCALE { std } else { 1.0 };
    }

    let z: Vec<Vec<f64>> = x
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(j, value)| (value - means[j]) / scales[j])
                .collect()
        })
        .collect();

    let intercept = target_means(y);
    let y_indoor: Vec<f64> = y.iter().map(|t| t.temp_indoor - intercept.temp_indoor).collect();
    let y_outdoor: Vec<f64> = y
        .iter()
        .map(|t| t.temp_outdoor - intercept.temp_outdoor)
        .collect();

    let (coef_indoor, coef_outdoor) = if n <= p {
        // Dual form: (Z Z^T + alpha I) a = y, w = Z^T a.
        let mut gram = vec![vec![0.0; n]; n];
        for a in 0..n {
            for b in 0..=a {
                let dot: f64 = z[a].iter().zip(&z[b]).map(|(u, v)| u * v).sum();
                gram[a][b] = dot;
                gram[b][a] = dot;
            }
            gram[a][a] += alpha;
        }
        let factor = cholesky(gram)?;
        let dual_indoor = cholesky_solve(&factor, &y_indoor);
        let dual_outdoor = cholesky_solve(&factor, &y_outdoor);
        let mut w_indoor = vec![0.0; p];
        let mut w_outdoor = vec![0.0; p];
        for (i, row) in z.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                w_indoor[j] += value * dual_indoor[i];
                w_outdoor[j] += value * dual_outdoor[i];
            }
        }
        (w_indoor, w_outdoor)
    } else {
        // Primal form: (Z^T Z + alpha I) w = Z^T y.
        let mut gram = vec![vec![0.0; p]; p];
        let mut rhs_indoor = vec![0.0; p];
        let mut rhs_outdoor = vec![0.0; p];
        for (i, row) in z.iter().enumerate() {
            for a in 0..p {
                let za = row[a];
                if za == 0.0 {
                    continue;
                }
                rhs_indoor[a] += za * y_indoor[i];
                rhs_outdoor[a] += za * y_outdoor[i];
                for b in 0..=a {
                    gram[a][b] += za * row[b];
                }
            }
        }
        for a in 0..p {
            gram[a][a] += alpha;
            for b in 0..a {
                gram[b][a] = gram[a][b];
            }
        }
        let factor = cholesky(gram)?;
        (
            cholesky_solve(&factor, &rhs_indoor),
            cholesky_solve(&factor, &rhs_outdoor),
        )
    };

    Ok(RidgeModel {
        feature_count: p,
        alpha,
        means,
        scales,
        coef_indoor,
        coef_outdoor,
        intercept,
    })
}

/// Lower-triangular `L` with `L L^T = a`.
fn cholesky(mut a: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, ModelError> {
    let n = a.len();
    for j in 0..n {
        let mut diag = a[j][j];
        for k in 0..j {
            diag -= a[j][k] * a[j][k];
        }
        if !(diag.is_finite() && diag > 0.0) {
            return Err(ModelError::Singular);
        }
        let diag = diag.sqrt();
        a[j][j] = diag;
        for i in (j + 1)..n {
            let mut value = a[i][j];
            for k in 0..j {
                value -= a[i][k] * a[j][k];
            }
            a[i][j] = value / diag;
        }
        for i in 0..j {
            a[i][j] = 0.0;
        }
    }
    Ok(a)
}

fn cholesky_solve(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = l.len();
    let mut forward = vec![0.0; n];
    for i in 0..n {
        let mut value = b[i];
        for k in 0..i {
            value -= l[i][k] * forward[k];
        }
        forward[i] = value / l[i][i];
    }
    let mut solution = vec![0.0; n];
    for i in (0..n).rev() {
        let mut value = forward[i];
        for k in (i + 1)..n {
            value -= l[k][i] * solution[k];
        }
        solution[i] = value / l[i][i];
    }
    solution
}

fn fit_boosted(
    x: &[Vec<f64>],
    y: &[Target],
    p: usize,
    rounds: usize,
    learning_rate: f64,
) -> BoostedModel {
    let base = target_means(y);
    let order: Vec<Vec<usize>> = (0..p)
        .map(|j| {
            let mut idx: Vec<usize> = (0..x.len()).collect();
            idx.sort_by(|&a, &b| x[a][j].total_cmp(&x[b][j]));
            idx
        })
        .collect();

    let indoor_targets: Vec<f64> = y.iter().map(|t| t.temp_indoor).collect();
    let outdoor_targets: Vec<f64> = y.iter().map(|t| t.temp_outdoor).collect();

    BoostedModel {
        feature_count: p,
        learning_rate,
        base,
        indoor: boost_output(x, &order, &indoor_targets, base.temp_indoor, rounds, learning_rate),
        outdoor: boost_output(
            x,
            &order,
            &outdoor_targets,
            base.temp_outdoor,
            rounds,
            learning_rate,
        ),
    }
}

fn boost_output(
    x: &[Vec<f64>],
    order: &[Vec<usize>],
    targets: &[f64],
    base: f64,
    rounds: usize,
    learning_rate: f64,
) -> Vec<Stump> {
    let n = targets.len();
    let mut fitted = vec![base; n];
    let mut stumps = Vec::with_capacity(rounds);

    for _ in 0..rounds {
        let residual: Vec<f64> = targets.iter().zip(&fitted).map(|(t, f)| t - f).collect();
        let Some(stump) = best_stump(x, order, &residual) else {
            break;
        };
        let stump = Stump {
            left: stump.left * learning_rate,
            right: stump.right * learning_rate,
            ..stump
        };
        for (i, row) in x.iter().enumerate() {
            fitted[i] += stump.apply(row);
        }
        stumps.push(stump);
    }

    stumps
}

fn best_stump(x: &[Vec<f64>], order: &[Vec<usize>], residual: &[f64]) -> Option<Stump> {
    let n = residual.len();
    let total: f64 = residual.iter().sum();
    let baseline = total * total / n as f64;
    let mut best: Option<Stump> = None;

    for (feature, idx) in order.iter().enumerate() {
        let mut left_sum = 0.0;
        for k in 0..n.saturating_sub(1) {
            left_sum += residual[idx[k]];
            let here = x[idx[k]][feature];
            let next = x[idx[k + 1]][feature];
            if here == next {
                continue;
            }
            let left_n = (k + 1) as f64;
            let right_n = (n - k - 1) as f64;
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n + right_sum * right_sum / right_n - baseline;
            if gain > best.as_ref().map_or(1e-12, |b| b.gain) {
                best = Some(Stump {
                    feature,
                    threshold: (here + next) / 2.0,
                    left: left_sum / left_n,
                    right: right_sum / right_n,
                    gain,
                });
            }
        }
    }

    best
}
