//! # cb-optimizer
//!
//! Cost-aware Pareto search for expensive parameter tuning.
//!
//! Provides parameter spaces with basis-space transforms, Pareto-front
//! analysis over (cost, output), a Gaussian-process surrogate, and the
//! [`Carbs`] handle that alternates bootstrap sampling, Pareto resampling,
//! and surrogate-guided local search.

mod carbs;
mod config;
mod param;
mod pareto;
mod space;
mod suggest;
mod surrogate;

pub use carbs::{Carbs, CarbsState, RngState};
pub use config::{CarbsParams, ObjectiveDirection};
pub use param::{basis_point, real_point, Param};
pub use pareto::{compute_front, dominates, ParetoGroup};
pub use space::{ParameterSpace, SpaceKind};
pub use suggest::{expected_improvement, is_close, SuggestionEngine};
pub use surrogate::{
    length_scales_from_front, GaussianProcess, SurrogateModel, SurrogatePrediction,
    MAX_TRAIN_POINTS,
};

pub use cb_types::{
    CbError, CbResult, Observation, ObserveOutput, ParamDict, Prediction, Suggestion,
    SuggestionSource,
};
