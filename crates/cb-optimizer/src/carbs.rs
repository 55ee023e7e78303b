//! The optimizer handle driven by an external training loop.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use cb_types::{
    config_error, CbError, CbResult, Observation, ObserveOutput, Suggestion, SuggestionSource,
};

use crate::config::CarbsParams;
use crate::param::Param;
use crate::pareto::{compute_front, ParetoGroup};
use crate::suggest::SuggestionEngine;

/// Position of the random stream, enough to resume it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: u64,
    pub word_pos: u128,
}

/// Serializable snapshot of a [`Carbs`] instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbsState {
    pub config: CarbsParams,
    pub params: Vec<Param>,
    pub success_observations: Vec<Observation>,
    pub failure_observations: Vec<Observation>,
    pub rng: RngState,
    /// Success count at the most recent resample, if any.
    #[serde(default)]
    pub last_resample_at: Option<usize>,
}

/// Cost-aware optimizer: owns the parameter list, the observation history,
/// and the random stream.
///
/// `suggest` and `observe` are meant to be called alternately by a single
/// loop. History is append-only; the Pareto front and surrogate are rebuilt
/// from it on every `suggest`.
pub struct Carbs {
    config: CarbsParams,
    params: Vec<Param>,
    success_observations: Vec<Observation>,
    failure_observations: Vec<Observation>,
    rng: ChaCha8Rng,
    seed: u64,
    last_resample_at: Option<usize>,
}

impl Carbs {
    pub fn new(config: CarbsParams, params: Vec<Param>) -> CbResult<Self> {
        config.validate()?;
        validate_params(&params)?;

        info!(
            num_params = params.len(),
            num_random_samples = config.num_random_samples,
            resample_frequency = config.resample_frequency,
            "Creating CARBS optimizer"
        );
        let seed = config.seed;
        Ok(Self {
            config,
            params,
            success_observations: Vec::new(),
            failure_observations: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            last_resample_at: None,
        })
    }

    pub fn config(&self) -> &CarbsParams {
        &self.config
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn success_observations(&self) -> &[Observation] {
        &self.success_observations
    }

    pub fn failure_observations(&self) -> &[Observation] {
        &self.failure_observations
    }

    fn engine(&self) -> SuggestionEngine<'_> {
        SuggestionEngine::new(
            &self.params,
            &self.config,
            &self.success_observations,
            &self.failure_observations,
        )
        .with_last_resample(self.last_resample_at)
    }

    /// Propose the next configuration. History is not modified; the random
    /// stream advances and a resample marks its trigger point as spent.
    pub fn suggest(&mut self) -> CbResult<Suggestion> {
        let engine = SuggestionEngine::new(
            &self.params,
            &self.config,
            &self.success_observations,
            &self.failure_observations,
        )
        .with_last_resample(self.last_resample_at);
        let suggestion = engine.suggest(&mut self.rng)?;
        if suggestion.source == SuggestionSource::Resample {
            self.last_resample_at = Some(self.success_observations.len());
        }
        Ok(suggestion)
    }

    /// A bootstrap-style random draw, still subject to the novelty guard.
    pub fn random_suggestion(&mut self) -> CbResult<Suggestion> {
        let engine = SuggestionEngine::new(
            &self.params,
            &self.config,
            &self.success_observations,
            &self.failure_observations,
        );
        engine.random_suggestion(&mut self.rng)
    }

    /// Record a finished trial. On error the history is left untouched.
    pub fn observe(&mut self, observation: Observation) -> CbResult<ObserveOutput> {
        self.validate_observation(&observation)?;

        debug!(
            output = observation.output,
            cost = observation.cost,
            is_failure = observation.is_failure,
            "Recording observation"
        );
        if observation.is_failure {
            self.failure_observations.push(observation);
        } else {
            self.success_observations.push(observation);
        }

        Ok(ObserveOutput {
            num_success: self.success_observations.len(),
            num_failure: self.failure_observations.len(),
        })
    }

    fn validate_observation(&self, observation: &Observation) -> CbResult<()> {
        let missing: Vec<String> = self
            .params
            .iter()
            .filter(|p| !observation.input.contains_key(&p.name))
            .map(|p| p.name.clone())
            .collect();
        let mut unexpected: Vec<String> = observation
            .input
            .keys()
            .filter(|k| !self.params.iter().any(|p| &p.name == *k))
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            unexpected.sort();
            return Err(CbError::ObservationMismatch {
                missing,
                unexpected,
            });
        }

        if let Some((name, value)) = observation.input.iter().find(|(_, v)| !v.is_finite()) {
            return Err(CbError::InvalidObservation(format!(
                "input {name} is not finite: {value}"
            )));
        }
        if !(observation.cost.is_finite() && observation.cost >= 0.0) {
            return Err(CbError::InvalidObservation(format!(
                "cost must be finite and non-negative, got {}",
                observation.cost
            )));
        }
        if !observation.output.is_finite() {
            return Err(CbError::InvalidObservation(format!(
                "output must be finite, got {}",
                observation.output
            )));
        }
        Ok(())
    }

    /// Current Pareto front over successful observations.
    pub fn pareto_groups(&self, is_conservative: bool) -> Vec<ParetoGroup> {
        compute_front(
            &self.success_observations,
            self.config.better_direction_sign,
            is_conservative,
            self.config.conservative_cost_tolerance,
        )
    }

    /// Which path the next `suggest` will take.
    pub fn next_source(&self) -> SuggestionSource {
        self.engine().phase()
    }

    /// Reset the random stream. A test hook: reseeding before every call
    /// replays the same draws.
    pub fn set_seed(&mut self, seed: u64) {
        debug!(seed, "Reseeding random stream");
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn state_dict(&self) -> CarbsState {
        CarbsState {
            config: self.config.clone(),
            params: self.params.clone(),
            success_observations: self.success_observations.clone(),
            failure_observations: self.failure_observations.clone(),
            rng: RngState {
                seed: self.seed,
                word_pos: self.rng.get_word_pos(),
            },
            last_resample_at: self.last_resample_at,
        }
    }

    /// Replace this instance's state with `state`, after validating it.
    pub fn load_state_dict(&mut self, state: CarbsState) -> CbResult<()> {
        *self = Self::from_state(state)?;
        Ok(())
    }

    pub fn from_state(state: CarbsState) -> CbResult<Self> {
        let mut carbs = Self::new(state.config, state.params)?;
        for observation in state
            .success_observations
            .iter()
            .chain(&state.failure_observations)
        {
            carbs.validate_observation(observation)?;
        }
        if state.success_observations.iter().any(|o| o.is_failure)
            || state.failure_observations.iter().any(|o| !o.is_failure)
        {
            return Err(config_error!("snapshot mixes failures and successes"));
        }

        carbs.success_observations = state.success_observations;
        carbs.failure_observations = state.failure_observations;
        carbs.last_resample_at = state.last_resample_at;
        carbs.set_seed(state.rng.seed);
        carbs.rng.set_word_pos(state.rng.word_pos);
        info!(
            successes = carbs.success_observations.len(),
            failures = carbs.failure_observations.len(),
            "Restored CARBS state"
        );
        Ok(carbs)
    }
}

fn validate_params(params: &[Param]) -> CbResult<()> {
    if params.is_empty() {
        return Err(config_error!("at least one parameter is required"));
    }
    let mut seen = HashSet::new();
    for param in params {
        param.validate()?;
        if !seen.insert(param.name.as_str()) {
            return Err(config_error!("duplicate parameter name: {}", param.name));
        }
    }
    Ok(())
}
