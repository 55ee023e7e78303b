//! Trial records exchanged between the optimizer and the training loop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameter name -> real value mapping, as seen by the training loop.
pub type ParamDict = HashMap<String, f64>;

/// Outcome of executing one suggested configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// The configuration that was run; must reuse the suggestion's mapping.
    pub input: ParamDict,
    pub output: f64,
    pub cost: f64,
    #[serde(default)]
    pub is_failure: bool,
}

impl Observation {
    pub fn success(input: ParamDict, output: f64, cost: f64) -> Self {
        Self {
            input,
            output,
            cost,
            is_failure: false,
        }
    }

    /// A failed run. `output` is a sentinel; it never reaches the Pareto front.
    pub fn failure(input: ParamDict, output: f64, cost: f64) -> Self {
        Self {
            input,
            output,
            cost,
            is_failure: true,
        }
    }
}

/// Which generation path produced a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    /// Random draw during the bootstrap phase.
    Bootstrap,
    /// Verbatim re-proposal of a Pareto-optimal input.
    Resample,
    /// Surrogate-scored local search around the Pareto front.
    Guided,
}

impl std::fmt::Display for SuggestionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Resample => write!(f, "resample"),
            Self::Guided => write!(f, "guided"),
        }
    }
}

/// Surrogate estimates attached to a guided suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub output_mean: f64,
    pub output_std: f64,
    pub cost_mean: f64,
    pub acquisition: f64,
}

/// The next configuration to try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestion: ParamDict,
    pub source: SuggestionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
}

/// Acknowledgment returned after recording an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserveOutput {
    pub num_success: usize,
    pub num_failure: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_defaults_to_success_when_flag_missing() {
        let json = r#"{"input":{"lr":0.01},"output":1.5,"cost":10.0}"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        assert!(!obs.is_failure);
        assert_eq!(obs.input.get("lr"), Some(&0.01));
    }

    #[test]
    fn suggestion_serialization_skips_missing_prediction() {
        let mut params = ParamDict::new();
        params.insert("lr".to_string(), 3e-4);
        let suggestion = Suggestion {
            suggestion: params,
            source: SuggestionSource::Bootstrap,
            prediction: None,
        };

        let json = serde_json::to_string(&suggestion).unwrap();
        assert!(json.contains("\"bootstrap\""));
        assert!(!json.contains("prediction"));

        let back: Suggestion = serde_json::from_str(&json).unwrap();
        assert_eq!(suggestion, back);
    }

    #[test]
    fn failure_constructor_sets_flag() {
        let obs = Observation::failure(ParamDict::new(), 0.0, 0.0);
        assert!(obs.is_failure);
        assert_eq!(SuggestionSource::Guided.to_string(), "guided");
    }
}
