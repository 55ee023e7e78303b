//! Gaussian-process surrogate for output and cost.
//!
//! Two GPs share basis-space inputs and ARD length scales: one models the
//! output, the other models `ln(cost)` so cost predictions stay positive.
//! Both use a Matérn 5/2 kernel on standardized targets, factorized with
//! Cholesky. Length scales come from the spread of the Pareto front, so the
//! model gets coarser as the productive region widens.

use nalgebra::{linalg::Cholesky, DMatrix, DVector, Dyn};

use cb_types::{CbError, CbResult};

/// Most recent successful observations used for fitting.
pub const MAX_TRAIN_POINTS: usize = 512;

/// Observation noise on standardized targets. Repeated trials of the same
/// input are expected to disagree.
const NOISE_VARIANCE: f64 = 1e-2;

/// Extra diagonal jitter tried in order when factorization fails.
const JITTER_LADDER: [f64; 4] = [0.0, 1e-6, 1e-4, 1e-2];

/// Costs are floored here before taking the log.
const MIN_COST: f64 = 1e-9;

const SQRT_5: f64 = 2.236_067_977_499_79;

/// `k(a, b) = (1 + √5 r + 5/3 r²) exp(-√5 r)` with `r` the length-scaled distance.
fn matern52(a: &[f64], b: &[f64], length_scales: &[f64]) -> f64 {
    let r_sq: f64 = a
        .iter()
        .zip(b)
        .zip(length_scales)
        .map(|((x, y), l)| ((x - y) / l).powi(2))
        .sum();
    let sqrt5_r = SQRT_5 * r_sq.sqrt();
    (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * (-sqrt5_r).exp()
}

/// Per-dimension length scales from the standard deviation of `front_points`,
/// floored at `floor`. Fewer than two points yields `floor` everywhere.
pub fn length_scales_from_front(front_points: &[Vec<f64>], dims: usize, floor: f64) -> Vec<f64> {
    let n = front_points.len();
    if n < 2 {
        return vec![floor; dims];
    }
    (0..dims)
        .map(|j| {
            let mean = front_points.iter().map(|p| p[j]).sum::<f64>() / n as f64;
            let var = front_points
                .iter()
                .map(|p| (p[j] - mean).powi(2))
                .sum::<f64>()
                / n as f64;
            let std = var.sqrt();
            if std.is_finite() {
                std.max(floor)
            } else {
                floor
            }
        })
        .collect()
}

/// Single-output GP regression with fixed hyperparameters.
pub struct GaussianProcess {
    cholesky: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
    x_train: Vec<Vec<f64>>,
    length_scales: Vec<f64>,
    y_mean: f64,
    y_std: f64,
}

impl GaussianProcess {
    pub fn fit(x: &[Vec<f64>], y: &[f64], length_scales: &[f64]) -> CbResult<Self> {
        let n = y.len();
        if n == 0 || x.len() != n {
            return Err(CbError::Surrogate(format!(
                "need matching non-empty inputs, got {} points and {} targets",
                x.len(),
                n
            )));
        }
        if length_scales.iter().any(|l| !(l.is_finite() && *l > 0.0)) {
            return Err(CbError::Surrogate("length scales must be positive".to_string()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(CbError::Surrogate("targets must be finite".to_string()));
        }

        let y_mean = y.iter().sum::<f64>() / n as f64;
        let y_std = if n > 1 {
            let var = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt().max(1e-10)
        } else {
            1.0
        };
        let y_standardized = DVector::from_iterator(n, y.iter().map(|v| (v - y_mean) / y_std));

        for jitter in JITTER_LADDER {
            let k = DMatrix::from_fn(n, n, |i, j| {
                let k = matern52(&x[i], &x[j], length_scales);
                if i == j {
                    k + NOISE_VARIANCE + jitter
                } else {
                    k
                }
            });
            if let Some(cholesky) = Cholesky::new(k) {
                let alpha = cholesky.solve(&y_standardized);
                return Ok(Self {
                    cholesky,
                    alpha,
                    x_train: x.to_vec(),
                    length_scales: length_scales.to_vec(),
                    y_mean,
                    y_std,
                });
            }
        }

        Err(CbError::Surrogate(format!(
            "kernel matrix is not positive definite for {n} points"
        )))
    }

    /// Posterior mean and standard deviation at `x`, in target units.
    pub fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star = DVector::from_fn(self.x_train.len(), |i, _| {
            matern52(x, &self.x_train[i], &self.length_scales)
        });
        let mean = k_star.dot(&self.alpha);
        let v = self.cholesky.solve(&k_star);
        let var = (1.0 - k_star.dot(&v)).max(0.0);
        (self.y_mean + self.y_std * mean, self.y_std * var.sqrt())
    }
}

/// Surrogate estimates at one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurrogatePrediction {
    pub output_mean: f64,
    pub output_std: f64,
    pub cost_mean: f64,
}

/// Output and cost models fitted on the same basis-space points.
pub struct SurrogateModel {
    output: GaussianProcess,
    log_cost: GaussianProcess,
}

impl SurrogateModel {
    pub fn fit(
        points: &[Vec<f64>],
        outputs: &[f64],
        costs: &[f64],
        length_scales: &[f64],
    ) -> CbResult<Self> {
        if points.len() != outputs.len() || points.len() != costs.len() {
            return Err(CbError::Surrogate(format!(
                "mismatched training data: {} points, {} outputs, {} costs",
                points.len(),
                outputs.len(),
                costs.len()
            )));
        }
        let start = points.len().saturating_sub(MAX_TRAIN_POINTS);
        let points = &points[start..];
        let log_costs: Vec<f64> = costs[start..].iter().map(|c| c.max(MIN_COST).ln()).collect();

        Ok(Self {
            output: GaussianProcess::fit(points, &outputs[start..], length_scales)?,
            log_cost: GaussianProcess::fit(points, &log_costs, length_scales)?,
        })
    }

    pub fn predict(&self, candidate: &[f64]) -> SurrogatePrediction {
        let (output_mean, output_std) = self.output.predict(candidate);
        let (log_cost, _) = self.log_cost.predict(candidate);
        SurrogatePrediction {
            output_mean,
            output_std,
            cost_mean: log_cost.exp(),
        }
    }
}
