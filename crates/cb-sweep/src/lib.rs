//! # cb-sweep
//!
//! Drives a training loop with the CARBS optimizer: parses sweep files,
//! runs sessions through a [`Trainer`], and keeps a JSON Lines record of
//! every result.

pub mod config;
pub mod results;
pub mod runner;

pub use config::{MetricConfig, ParamConfig, SweepConfig};
pub use results::{ResultsLog, SessionRecord};
pub use runner::{SweepRunner, TrainOutcome, Trainer, TRACKING_TARGET};
