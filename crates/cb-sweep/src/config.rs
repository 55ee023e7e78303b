//! Sweep configuration files.
//!
//! A sweep file names the metric, describes each parameter's space, and may
//! override optimizer settings:
//!
//! ```json
//! {
//!   "metric": { "goal": "maximize", "name": "episode_return" },
//!   "parameters": {
//!     "learning_rate": { "space": "log", "min": 1e-5, "max": 1e-1, "search_center": 3e-4 },
//!     "gamma": { "space": "logit", "min": 0.0, "max": 1.0, "search_center": 0.97 }
//!   },
//!   "carbs": { "num_random_samples": 5 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use cb_optimizer::{Carbs, CarbsParams, ObjectiveDirection, Param, ParameterSpace, SpaceKind};
use cb_types::{config_error, CbResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub goal: ObjectiveDirection,
    pub name: String,
}

/// One parameter entry of a sweep file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamConfig {
    pub space: SpaceKind,
    #[serde(default)]
    pub min: Option<f64>,
    /// Missing means unbounded above.
    #[serde(default)]
    pub max: Option<f64>,
    /// Discrete candidates; only their min and max are used.
    #[serde(default)]
    pub values: Option<Vec<f64>>,
    #[serde(default)]
    pub search_center: Option<f64>,
    #[serde(default)]
    pub is_integer: bool,
    #[serde(default)]
    pub rounding_factor: Option<f64>,
    #[serde(default)]
    pub scale: Option<f64>,
}

impl ParamConfig {
    pub fn to_param(&self, name: &str) -> CbResult<Param> {
        let (min, max) = match &self.values {
            Some(values) => {
                if values.is_empty() {
                    return Err(config_error!("parameter {name}: values must not be empty"));
                }
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max)
            }
            None => {
                let min = self
                    .min
                    .ok_or_else(|| config_error!("parameter {name}: min is required"))?;
                (min, self.max.unwrap_or(f64::INFINITY))
            }
        };

        let mut space = ParameterSpace::from_kind(self.space, min, max)
            .map_err(|e| config_error!("parameter {name}: {e}"))?;
        if self.is_integer {
            space = space.integer();
        }
        if let Some(factor) = self.rounding_factor {
            space = space.with_rounding_factor(factor)?;
        }
        if let Some(scale) = self.scale {
            space = space.with_scale(scale)?;
        }
        Param::new(name, space, self.search_center)
    }
}

/// A complete sweep description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub metric: MetricConfig,
    /// Ordered by name so parameter order is stable across runs.
    pub parameters: BTreeMap<String, ParamConfig>,
    #[serde(default)]
    pub carbs: CarbsParams,
}

impl SweepConfig {
    pub fn from_json_str(json: &str) -> CbResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> CbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn params(&self) -> CbResult<Vec<Param>> {
        if self.parameters.is_empty() {
            return Err(config_error!("sweep defines no parameters"));
        }
        self.parameters
            .iter()
            .map(|(name, param)| param.to_param(name))
            .collect()
    }

    /// Optimizer settings with the direction taken from the metric goal.
    pub fn carbs_params(&self) -> CarbsParams {
        self.carbs.clone().with_direction(self.metric.goal)
    }

    pub fn build(&self) -> CbResult<Carbs> {
        Carbs::new(self.carbs_params(), self.params()?)
    }
}
