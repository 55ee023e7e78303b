//! Suggest, train, observe.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use cb_optimizer::Carbs;
use cb_types::{CbResult, Observation, ParamDict};

use crate::results::{ResultsLog, SessionRecord};

/// Tracing target for per-session tracking events.
pub const TRACKING_TARGET: &str = "carbs::tracking";

/// Measured result of one training run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutcome {
    pub output: f64,
    pub cost: f64,
}

/// Runs one configuration to completion.
///
/// An `Err` marks the session as failed; the sweep itself keeps going.
pub trait Trainer {
    fn train(&mut self, params: &ParamDict) -> anyhow::Result<TrainOutcome>;
}

impl<F> Trainer for F
where
    F: FnMut(&ParamDict) -> anyhow::Result<TrainOutcome>,
{
    fn train(&mut self, params: &ParamDict) -> anyhow::Result<TrainOutcome> {
        self(params)
    }
}

pub struct SweepRunner<T: Trainer> {
    id: Uuid,
    carbs: Carbs,
    trainer: T,
    results: Option<ResultsLog>,
    failure_output: f64,
    sessions: usize,
}

impl<T: Trainer> SweepRunner<T> {
    pub fn new(carbs: Carbs, trainer: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            carbs,
            trainer,
            results: None,
            failure_output: 0.0,
            sessions: 0,
        }
    }

    pub fn with_results_log(mut self, log: ResultsLog) -> Self {
        self.results = Some(log);
        self
    }

    /// Output recorded for sessions whose trainer fails.
    pub fn with_failure_output(mut self, output: f64) -> Self {
        self.failure_output = output;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sessions(&self) -> usize {
        self.sessions
    }

    pub fn carbs(&self) -> &Carbs {
        &self.carbs
    }

    pub fn into_carbs(self) -> Carbs {
        self.carbs
    }

    pub fn run_session(&mut self) -> CbResult<SessionRecord> {
        let session = self.sessions;
        let suggestion = self.carbs.suggest()?;
        info!(
            sweep_id = %self.id,
            session,
            source = %suggestion.source,
            "Starting sweep session"
        );

        let (output, cost, is_failure) = match self.trainer.train(&suggestion.suggestion) {
            Ok(outcome)
                if outcome.output.is_finite() && outcome.cost.is_finite() && outcome.cost >= 0.0 =>
            {
                (outcome.output, outcome.cost, false)
            }
            Ok(outcome) => {
                warn!(
                    session,
                    output = outcome.output,
                    cost = outcome.cost,
                    "Trainer returned a non-finite result, recording failure"
                );
                (self.failure_output, 0.0, true)
            }
            Err(e) => {
                warn!(session, error = %e, "Training run failed");
                (self.failure_output, 0.0, true)
            }
        };

        let observation = Observation {
            input: suggestion.suggestion.clone(),
            output,
            cost,
            is_failure,
        };
        let counts = self.carbs.observe(observation)?;
        self.sessions += 1;

        let record = SessionRecord {
            sweep_id: self.id,
            session,
            timestamp: Utc::now(),
            input: suggestion.suggestion,
            output,
            cost,
            is_failure,
            source: suggestion.source,
        };
        if let Some(log) = self.results.as_mut() {
            log.append(&record)?;
        }
        if self.carbs.config().is_wandb_logging_enabled {
            info!(
                target: TRACKING_TARGET,
                sweep_id = %self.id,
                session,
                output,
                cost,
                is_failure,
                num_success = counts.num_success,
                num_failure = counts.num_failure,
                "session result"
            );
        }
        Ok(record)
    }

    pub fn run(&mut self, sessions: usize) -> CbResult<Vec<SessionRecord>> {
        let mut records = Vec::with_capacity(sessions);
        for _ in 0..sessions {
            records.push(self.run_session()?);
        }
        info!(
            sweep_id = %self.id,
            successes = self.carbs.success_observations().len(),
            failures = self.carbs.failure_observations().len(),
            "Sweep finished"
        );
        Ok(records)
    }
}
