//! Optimizer configuration.

use serde::{Deserialize, Serialize};

use cb_types::{config_error, CbResult};

/// Whether larger or smaller outputs are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

impl ObjectiveDirection {
    /// `+1` when maximizing, `-1` when minimizing.
    pub fn sign(self) -> f64 {
        match self {
            Self::Maximize => 1.0,
            Self::Minimize => -1.0,
        }
    }

    pub fn from_sign(sign: i32) -> CbResult<Self> {
        match sign {
            1 => Ok(Self::Maximize),
            -1 => Ok(Self::Minimize),
            other => Err(config_error!("better_direction_sign must be 1 or -1, got {other}")),
        }
    }
}

/// Top-level configuration for a CARBS optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbsParams {
    pub better_direction_sign: ObjectiveDirection,

    /// Resample a Pareto point every this many successful observations.
    /// Zero disables resampling.
    pub resample_frequency: usize,

    /// Size of the bootstrap phase.
    pub num_random_samples: usize,

    /// Upper bound on the predicted cost of guided suggestions.
    pub max_suggestion_cost: Option<f64>,

    /// Hook for an external tracking collaborator; the engine ignores it.
    pub is_wandb_logging_enabled: bool,

    /// Basis-space standard deviation for random draws around the search
    /// center, and the floor for surrogate length scales.
    pub initial_search_radius: f64,

    /// Guided candidates generated per dimension in each batch.
    pub candidates_per_dimension: usize,

    /// Novelty-guard attempts before giving up.
    pub max_suggestion_retries: usize,

    pub novelty_rtol: f64,
    pub novelty_atol: f64,

    /// Relative cost band used to bucket observations in conservative mode.
    pub conservative_cost_tolerance: f64,

    pub seed: u64,
}

impl Default for CarbsParams {
    fn default() -> Self {
        Self {
            better_direction_sign: ObjectiveDirection::Maximize,
            resample_frequency: 5,
            num_random_samples: 4,
            max_suggestion_cost: None,
            is_wandb_logging_enabled: false,
            initial_search_radius: 0.3,
            candidates_per_dimension: 100,
            max_suggestion_retries: 100,
            novelty_rtol: 1e-5,
            novelty_atol: 1e-6,
            conservative_cost_tolerance: 0.05,
            seed: 0,
        }
    }
}

impl CarbsParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.better_direction_sign = direction;
        self
    }

    pub fn with_resample_frequency(mut self, n: usize) -> Self {
        self.resample_frequency = n;
        self
    }

    pub fn with_num_random_samples(mut self, n: usize) -> Self {
        self.num_random_samples = n;
        self
    }

    pub fn with_max_suggestion_cost(mut self, cost: f64) -> Self {
        self.max_suggestion_cost = Some(cost);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> CbResult<()> {
        if let Some(cost) = self.max_suggestion_cost {
            if cost.is_nan() || cost <= 0.0 {
                return Err(config_error!("max_suggestion_cost must be positive, got {cost}"));
            }
        }
        if !(self.initial_search_radius.is_finite() && self.initial_search_radius > 0.0) {
            return Err(config_error!(
                "initial_search_radius must be positive, got {}",
                self.initial_search_radius
            ));
        }
        if self.candidates_per_dimension == 0 {
            return Err(config_error!("candidates_per_dimension must be at least 1"));
        }
        if self.max_suggestion_retries == 0 {
            return Err(config_error!("max_suggestion_retries must be at least 1"));
        }
        if !(self.novelty_rtol >= 0.0 && self.novelty_atol >= 0.0) {
            return Err(config_error!("novelty tolerances must be non-negative"));
        }
        if !(self.conservative_cost_tolerance >= 0.0 && self.conservative_cost_tolerance.is_finite())
        {
            return Err(config_error!(
                "conservative_cost_tolerance must be non-negative, got {}",
                self.conservative_cost_tolerance
            ));
        }
        Ok(())
    }
}
