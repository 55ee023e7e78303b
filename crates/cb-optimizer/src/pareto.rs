//! Pareto-front analysis over the (cost, output) trade-off.
//!
//! In plain mode every non-dominated observation forms its own group. In
//! conservative mode observations of near-equal cost are bucketed first and
//! dominance is judged on bucket means, so one lucky sample cannot put a
//! noisy configuration on the front by itself.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use cb_types::Observation;

use crate::config::ObjectiveDirection;

/// Observations backing one point of the Pareto front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoGroup {
    pub observations: Vec<Observation>,
}

impl ParetoGroup {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn mean_cost(&self) -> f64 {
        mean(self.observations.iter().map(|o| o.cost))
    }

    pub fn mean_output(&self) -> f64 {
        mean(self.observations.iter().map(|o| o.output))
    }

    /// Sample standard deviation of the outputs; zero for a single sample.
    pub fn output_std(&self) -> f64 {
        let n = self.observations.len();
        if n < 2 {
            return 0.0;
        }
        let m = self.mean_output();
        let var = self
            .observations
            .iter()
            .map(|o| (o.output - m).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        var.sqrt()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// True when `a` dominates `b`: no more expensive, no worse, and strictly
/// better on at least one axis. `a` and `b` are `(cost, output)` pairs.
pub fn dominates(a: (f64, f64), b: (f64, f64), direction: ObjectiveDirection) -> bool {
    let sign = direction.sign();
    let (a_cost, a_out) = (a.0, sign * a.1);
    let (b_cost, b_out) = (b.0, sign * b.1);
    a_cost <= b_cost && a_out >= b_out && (a_cost < b_cost || a_out > b_out)
}

/// Compute the Pareto front of the successful observations in `observations`.
///
/// Groups are returned by ascending mean cost. Groups with identical means
/// are all retained.
pub fn compute_front(
    observations: &[Observation],
    direction: ObjectiveDirection,
    is_conservative: bool,
    cost_tolerance: f64,
) -> Vec<ParetoGroup> {
    let mut successes: Vec<&Observation> = observations.iter().filter(|o| !o.is_failure).collect();
    successes.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap_or(Ordering::Equal));

    let buckets: Vec<Vec<&Observation>> = if is_conservative {
        bucket_by_cost(&successes, cost_tolerance)
    } else {
        successes.into_iter().map(|o| vec![o]).collect()
    };

    let representatives: Vec<(f64, f64)> = buckets
        .iter()
        .map(|bucket| {
            (
                mean(bucket.iter().map(|o| o.cost)),
                mean(bucket.iter().map(|o| o.output)),
            )
        })
        .collect();

    buckets
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            !representatives
                .iter()
                .enumerate()
                .any(|(j, other)| j != *i && dominates(*other, representatives[*i], direction))
        })
        .map(|(_, bucket)| ParetoGroup {
            observations: bucket.iter().map(|o| (*o).clone()).collect(),
        })
        .collect()
}

/// Greedy bucketing of cost-sorted observations: a bucket keeps absorbing
/// observations while their cost stays within `tolerance` (relative) of the
/// bucket's cheapest cost.
fn bucket_by_cost<'a>(sorted: &[&'a Observation], tolerance: f64) -> Vec<Vec<&'a Observation>> {
    let mut buckets: Vec<Vec<&Observation>> = Vec::new();
    let mut anchor = f64::NAN;

    for &obs in sorted {
        let within = !anchor.is_nan()
            && (obs.cost - anchor).abs() <= tolerance * anchor.abs();
        if within {
            if let Some(bucket) = buckets.last_mut() {
                bucket.push(obs);
                continue;
            }
        }
        anchor = obs.cost;
        buckets.push(vec![obs]);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_types::ParamDict;

    fn obs(x: f64, cost: f64, output: f64) -> Observation {
        let mut input = ParamDict::new();
        input.insert("x".to_string(), x);
        Observation::success(input, output, cost)
    }

    fn costs_outputs(front: &[ParetoGroup]) -> Vec<(f64, f64)> {
        front.iter().map(|g| (g.mean_cost(), g.mean_output())).collect()
    }

    #[test]
    fn plain_front_matches_known_subset() {
        let history = vec![
            obs(0.0, 1.0, 1.0),  // front
            obs(1.0, 2.0, 3.0),  // front
            obs(2.0, 2.5, 2.0),  // dominated by (2, 3)
            obs(3.0, 4.0, 5.0),  // front
            obs(4.0, 5.0, 4.0),  // dominated by (4, 5)
            obs(5.0, 1.5, 0.5),  // dominated by (1, 1)
        ];
        let front = compute_front(&history, ObjectiveDirection::Maximize, false, 0.05);
        assert!(front.iter().all(|g| g.len() == 1));
        assert_eq!(costs_outputs(&front), vec![(1.0, 1.0), (2.0, 3.0), (4.0, 5.0)]);
    }

    #[test]
    fn minimize_flips_output_axis() {
        let history = vec![obs(0.0, 1.0, 5.0), obs(1.0, 2.0, 1.0), obs(2.0, 3.0, 3.0)];
        let front = compute_front(&history, ObjectiveDirection::Minimize, false, 0.05);
        assert_eq!(costs_outputs(&front), vec![(1.0, 5.0), (2.0, 1.0)]);
    }

    #[test]
    fn identical_points_are_both_retained() {
        let history = vec![obs(0.0, 1.0, 2.0), obs(1.0, 1.0, 2.0)];
        let front = compute_front(&history, ObjectiveDirection::Maximize, false, 0.05);
        assert_eq!(front.len(), 2);
    }

    #[test]
    fn conservative_mode_uses_bucket_mean() {
        let history = vec![
            obs(0.0, 100.0, 10.0),
            obs(1.0, 101.0, 90.0),
            obs(2.0, 50.0, 20.0),
        ];

        let plain = compute_front(&history, ObjectiveDirection::Maximize, false, 0.05);
        assert_eq!(costs_outputs(&plain), vec![(50.0, 20.0), (101.0, 90.0)]);

        let conservative = compute_front(&history, ObjectiveDirection::Maximize, true, 0.05);
        assert_eq!(conservative.len(), 2);
        let bucket = &conservative[1];
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.mean_output(), 50.0);
        assert!((bucket.mean_cost() - 100.5).abs() < 1e-12);
        assert!(bucket.output_std() > 0.0);
    }

    #[test]
    fn conservative_bucket_can_fall_off_the_front() {
        // The noisy 90 alone would beat the (80, 60) point; its bucket mean does not.
        let history = vec![
            obs(0.0, 100.0, 10.0),
            obs(1.0, 101.0, 90.0),
            obs(2.0, 80.0, 60.0),
        ];
        let plain = compute_front(&history, ObjectiveDirection::Maximize, false, 0.05);
        assert_eq!(plain.len(), 2);

        let conservative = compute_front(&history, ObjectiveDirection::Maximize, true, 0.05);
        assert_eq!(costs_outputs(&conservative), vec![(80.0, 60.0)]);
    }

    #[test]
    fn conservative_band_is_relative_to_cheapest_cost() {
        // A 5.2 gap exceeds 5% of the cheaper cost, 100.
        let history = vec![obs(0.0, 100.0, 10.0), obs(1.0, 105.2, 20.0)];
        let conservative = compute_front(&history, ObjectiveDirection::Maximize, true, 0.05);
        assert_eq!(conservative.len(), 2);
        assert!(conservative.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn failures_never_join_the_front() {
        let mut failed = obs(9.0, 0.1, 1000.0);
        failed.is_failure = true;
        let history = vec![obs(0.0, 1.0, 1.0), failed];

        for conservative in [false, true] {
            let front = compute_front(&history, ObjectiveDirection::Maximize, conservative, 0.05);
            assert_eq!(front.len(), 1);
            assert!(front[0].observations.iter().all(|o| !o.is_failure));
        }
    }

    #[test]
    fn empty_history_has_empty_front() {
        assert!(compute_front(&[], ObjectiveDirection::Maximize, true, 0.05).is_empty());
    }
}
