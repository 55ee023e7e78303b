//! Runs a sweep against a synthetic trainer and prints the Pareto fronts.
//!
//! Usage: `carbs-sweep [SWEEP_JSON]`. Without an argument a built-in demo
//! sweep is used. `CARBS_SWEEP_SESSIONS` sets the session count and
//! `CARBS_RESULTS_LOG` enables the JSON Lines results log.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cb_optimizer::ParetoGroup;
use cb_sweep::{ResultsLog, SweepConfig, SweepRunner, TrainOutcome, Trainer};
use cb_types::ParamDict;

const DEMO_SWEEP: &str = r#"{
    "metric": { "goal": "maximize", "name": "environment/episode_return" },
    "parameters": {
        "total_timesteps": { "space": "log", "min": 1000000, "search_center": 1000000, "is_integer": true },
        "learning_rate": { "space": "log", "min": 1e-5, "max": 1e-1, "search_center": 3e-4 },
        "gamma": { "space": "logit", "min": 0.0, "max": 1.0, "search_center": 0.97 },
        "update_epochs": { "space": "linear", "min": 1, "max": 20, "search_center": 4, "is_integer": true }
    },
    "carbs": { "num_random_samples": 5, "resample_frequency": 5, "seed": 1 }
}"#;

const DEFAULT_SESSIONS: usize = 30;

/// Noisy objective that rewards a moderate learning rate and discount,
/// with cost growing in the training budget. Unknown parameters are ignored.
struct SyntheticTrainer {
    rng: StdRng,
}

impl SyntheticTrainer {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Trainer for SyntheticTrainer {
    fn train(&mut self, params: &ParamDict) -> Result<TrainOutcome> {
        let get = |name: &str, default: f64| params.get(name).copied().unwrap_or(default);
        let steps = get("total_timesteps", 1e6);
        let lr = get("learning_rate", 3e-4).ln() - 1e-3f64.ln();
        let gamma = get("gamma", 0.97) - 0.98;
        let epochs = get("update_epochs", 4.0);

        let noise: f64 = self.rng.random_range(-0.5..0.5);
        let output = 100.0 - 4.0 * lr * lr - 2_000.0 * gamma * gamma
            + 10.0 * (steps / 1e6).ln()
            + noise;
        let cost = steps / 1e4 * (1.0 + 0.05 * epochs);
        Ok(TrainOutcome { output, cost })
    }
}

fn print_front(title: &str, front: &[ParetoGroup]) {
    println!("{title}");
    for group in front {
        println!(
            "  cost {:>10.2}  output {:>8.3}  (n = {})",
            group.mean_cost(),
            group.mean_output(),
            group.len()
        );
        if let Some(first) = group.observations.first() {
            let mut names: Vec<&String> = first.input.keys().collect();
            names.sort();
            for name in names {
                println!("      {name} = {:.6}", first.input[name]);
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SweepConfig::from_path(&path)
            .with_context(|| format!("failed to load sweep config {path}"))?,
        None => SweepConfig::from_json_str(DEMO_SWEEP).context("invalid demo sweep")?,
    };
    let sessions = std::env::var("CARBS_SWEEP_SESSIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SESSIONS);

    let carbs = config.build()?;
    let seed = carbs.config().seed;
    let mut runner = SweepRunner::new(carbs, SyntheticTrainer::new(seed));
    if let Ok(path) = std::env::var("CARBS_RESULTS_LOG") {
        let log = ResultsLog::open(&path)
            .with_context(|| format!("failed to open results log {path}"))?;
        runner = runner.with_results_log(log);
    }

    info!(
        sweep_id = %runner.id(),
        metric = %config.metric.name,
        sessions,
        "Starting sweep"
    );
    runner.run(sessions)?;

    let carbs = runner.into_carbs();
    print_front("Pareto front:", &carbs.pareto_groups(false));
    print_front("Conservative Pareto front:", &carbs.pareto_groups(true));
    Ok(())
}
