//! Candidate generation: bootstrap, resample, and surrogate-guided search.
//!
//! The engine is a pure function of the history snapshot it borrows plus the
//! random stream handed to each call; nothing is cached between calls.

use rand::Rng;
use rand_distr::StandardNormal;
use statrs::function::erf::erfc;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

use cb_types::{CbError, CbResult, Observation, Prediction, Suggestion, SuggestionSource};

use crate::config::CarbsParams;
use crate::param::{basis_point, real_point, Param};
use crate::pareto::compute_front;
use crate::surrogate::{length_scales_from_front, SurrogateModel, SurrogatePrediction};

/// Costs are floored here before dividing the acquisition by them.
const MIN_PREDICTED_COST: f64 = 1e-9;

/// Per-dimension closeness: `|a - b| <= atol + rtol * |b|` on every axis.
pub fn is_close(a: &[f64], b: &[f64], rtol: f64, atol: f64) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= atol + rtol * y.abs())
}

/// Expected improvement of a maximized quantity over `target`.
pub fn expected_improvement(mean: f64, std: f64, target: f64) -> f64 {
    let gap = mean - target;
    if std < 1e-12 {
        return gap.max(0.0);
    }
    let z = gap / std;
    let pdf = (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt();
    let cdf = 0.5 * erfc(-z / std::f64::consts::SQRT_2);
    (gap * cdf + std * pdf).max(0.0)
}

/// Candidate generator over one history snapshot.
pub struct SuggestionEngine<'a> {
    params: &'a [Param],
    config: &'a CarbsParams,
    successes: &'a [Observation],
    failures: &'a [Observation],
    last_resample_at: Option<usize>,
}

impl<'a> SuggestionEngine<'a> {
    pub fn new(
        params: &'a [Param],
        config: &'a CarbsParams,
        successes: &'a [Observation],
        failures: &'a [Observation],
    ) -> Self {
        Self {
            params,
            config,
            successes,
            failures,
            last_resample_at: None,
        }
    }

    /// Success count at which a resample was last proposed. A trigger point
    /// fires at most once, so a failed resample moves on to guided search.
    pub fn with_last_resample(mut self, success_count: Option<usize>) -> Self {
        self.last_resample_at = success_count;
        self
    }

    /// Which generation path the next call to [`suggest`](Self::suggest) takes.
    pub fn phase(&self) -> SuggestionSource {
        let n = self.successes.len();
        if n < self.config.num_random_samples {
            SuggestionSource::Bootstrap
        } else if self.config.resample_frequency > 0
            && n > 0
            && n % self.config.resample_frequency == 0
            && self.last_resample_at != Some(n)
        {
            SuggestionSource::Resample
        } else {
            SuggestionSource::Guided
        }
    }

    pub fn suggest<R: Rng>(&self, rng: &mut R) -> CbResult<Suggestion> {
        let history = self.history_points()?;
        let phase = self.phase();
        debug!(%phase, successes = self.successes.len(), failures = self.failures.len(), "selecting suggestion path");

        match phase {
            SuggestionSource::Bootstrap => self.bootstrap(rng, &history),
            SuggestionSource::Resample => match self.resample(rng)? {
                Some(suggestion) => Ok(suggestion),
                None => self.guided(rng, &history),
            },
            SuggestionSource::Guided => self.guided(rng, &history),
        }
    }

    /// One bootstrap draw regardless of phase.
    pub fn random_suggestion<R: Rng>(&self, rng: &mut R) -> CbResult<Suggestion> {
        let history = self.history_points()?;
        self.bootstrap(rng, &history)
    }

    /// Basis coordinates of every prior observation, successes and failures.
    fn history_points(&self) -> CbResult<Vec<Vec<f64>>> {
        self.successes
            .iter()
            .chain(self.failures)
            .map(|o| basis_point(self.params, &o.input))
            .collect()
    }

    fn is_novel(&self, candidate: &[f64], history: &[Vec<f64>], rejected: &[Vec<f64>]) -> bool {
        let (rtol, atol) = (self.config.novelty_rtol, self.config.novelty_atol);
        !history
            .iter()
            .chain(rejected)
            .any(|prior| is_close(candidate, prior, rtol, atol))
    }

    /// Snap basis coordinates onto values the real domain can represent.
    fn round_trip(&self, basis: &[f64]) -> Vec<f64> {
        self.params
            .iter()
            .zip(basis)
            .map(|(p, b)| p.space.to_basis(p.space.from_basis(*b)))
            .collect()
    }

    fn to_suggestion(
        &self,
        basis: &[f64],
        source: SuggestionSource,
        prediction: Option<Prediction>,
    ) -> Suggestion {
        Suggestion {
            suggestion: real_point(self.params, basis),
            source,
            prediction,
        }
    }

    fn sample_random_basis<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.params
            .iter()
            .map(|p| {
                let (lo, hi) = p.space.basis_bounds();
                if lo.is_finite() && hi.is_finite() {
                    lo + (hi - lo) * rng.random::<f64>()
                } else {
                    let noise: f64 = rng.sample(StandardNormal);
                    p.space
                        .clamp_basis(p.basis_center() + self.config.initial_search_radius * noise)
                }
            })
            .collect()
    }

    fn bootstrap<R: Rng>(&self, rng: &mut R, history: &[Vec<f64>]) -> CbResult<Suggestion> {
        let mut rejected: Vec<Vec<f64>> = Vec::new();
        for attempt in 0..self.config.max_suggestion_retries {
            let candidate = self.round_trip(&self.sample_random_basis(rng));
            if self.is_novel(&candidate, history, &rejected) {
                info!(attempt, "bootstrap suggestion");
                return Ok(self.to_suggestion(&candidate, SuggestionSource::Bootstrap, None));
            }
            debug!(attempt, "bootstrap candidate rejected by novelty guard");
            rejected.push(candidate);
        }
        warn!(
            attempts = self.config.max_suggestion_retries,
            "no novel bootstrap candidate found"
        );
        Err(CbError::SuggestionExhausted {
            attempts: self.config.max_suggestion_retries,
        })
    }

    /// Re-propose a Pareto-optimal input, favoring points with few samples.
    /// Inputs that have already failed are skipped. Returns `None` when no
    /// front member is left.
    fn resample<R: Rng>(&self, rng: &mut R) -> CbResult<Option<Suggestion>> {
        let (rtol, atol) = (self.config.novelty_rtol, self.config.novelty_atol);
        let front = compute_front(
            self.successes,
            self.config.better_direction_sign,
            false,
            self.config.conservative_cost_tolerance,
        );
        let failure_points: Vec<Vec<f64>> = self
            .failures
            .iter()
            .map(|o| basis_point(self.params, &o.input))
            .collect::<CbResult<_>>()?;

        let mut members: Vec<&Observation> = Vec::new();
        for member in front.iter().flat_map(|g| &g.observations) {
            let point = basis_point(self.params, &member.input)?;
            if failure_points.iter().any(|f| is_close(&point, f, rtol, atol)) {
                debug!(cost = member.cost, "skipping front member that has failed before");
                continue;
            }
            members.push(member);
        }
        if members.is_empty() {
            return Ok(None);
        }

        let success_points: Vec<Vec<f64>> = self
            .successes
            .iter()
            .map(|o| basis_point(self.params, &o.input))
            .collect::<CbResult<_>>()?;

        let mut weights = Vec::with_capacity(members.len());
        for member in &members {
            let point = basis_point(self.params, &member.input)?;
            let samples = success_points
                .iter()
                .filter(|p| is_close(&point, p, rtol, atol))
                .count()
                .max(1);
            weights.push(1.0 / samples as f64);
        }

        let total: f64 = weights.iter().sum();
        let mut draw = rng.random::<f64>() * total;
        let mut chosen = members.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if draw < *w {
                chosen = i;
                break;
            }
            draw -= w;
        }

        let member = members[chosen];
        info!(
            cost = member.cost,
            output = member.output,
            samples = (1.0 / weights[chosen]).round(),
            "resampling pareto point"
        );
        Ok(Some(Suggestion {
            suggestion: member.input.clone(),
            source: SuggestionSource::Resample,
            prediction: None,
        }))
    }

    fn guided<R: Rng>(&self, rng: &mut R, history: &[Vec<f64>]) -> CbResult<Suggestion> {
        let sign = self.config.better_direction_sign.sign();
        let front = compute_front(
            self.successes,
            self.config.better_direction_sign,
            false,
            self.config.conservative_cost_tolerance,
        );
        if front.is_empty() {
            debug!("no successful observations yet, falling back to bootstrap");
            return self.bootstrap(rng, history);
        }

        let centers: Vec<Vec<f64>> = front
            .iter()
            .flat_map(|g| &g.observations)
            .map(|o| basis_point(self.params, &o.input))
            .collect::<CbResult<_>>()?;
        // (cost, signed output), ascending cost.
        let frontier: Vec<(f64, f64)> = front
            .iter()
            .map(|g| (g.mean_cost(), sign * g.mean_output()))
            .collect();

        let length_scales = length_scales_from_front(
            &centers,
            self.params.len(),
            self.config.initial_search_radius,
        );
        let model = match self.fit_surrogate(&length_scales) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!(error = %e, "surrogate fit failed, using unscored candidates");
                None
            }
        };

        let batch_size = self.config.candidates_per_dimension * self.params.len().max(1);
        let mut rejected: Vec<Vec<f64>> = Vec::new();

        for attempt in 0..self.config.max_suggestion_retries {
            let mut best: Option<(Vec<f64>, Prediction)> = None;

            for _ in 0..batch_size {
                let center = &centers[rng.random_range(0..centers.len())];
                let perturbed: Vec<f64> = self
                    .params
                    .iter()
                    .zip(center)
                    .zip(&length_scales)
                    .map(|((p, c), l)| {
                        let noise: f64 = rng.sample(StandardNormal);
                        p.space.clamp_basis(c + l * noise)
                    })
                    .collect();
                let candidate = self.round_trip(&perturbed);

                if !self.is_novel(&candidate, history, &rejected) {
                    rejected.push(candidate);
                    continue;
                }

                let Some(model) = &model else {
                    return Ok(self.to_suggestion(&candidate, SuggestionSource::Guided, None));
                };

                let pred = model.predict(&candidate);
                if let Some(max_cost) = self.config.max_suggestion_cost {
                    if pred.cost_mean > max_cost {
                        continue;
                    }
                }
                let acquisition = acquisition(&pred, &frontier, sign);
                let better = match &best {
                    None => true,
                    Some((_, b)) => acquisition > b.acquisition,
                };
                if better {
                    best = Some((
                        candidate,
                        Prediction {
                            output_mean: pred.output_mean,
                            output_std: pred.output_std,
                            cost_mean: pred.cost_mean,
                            acquisition,
                        },
                    ));
                }
            }

            if let Some((candidate, prediction)) = best {
                info!(
                    attempt,
                    predicted_output = prediction.output_mean,
                    predicted_cost = prediction.cost_mean,
                    acquisition = prediction.acquisition,
                    "guided suggestion"
                );
                return Ok(self.to_suggestion(
                    &candidate,
                    SuggestionSource::Guided,
                    Some(prediction),
                ));
            }
            debug!(attempt, "guided batch produced no admissible candidate");
        }

        warn!(
            attempts = self.config.max_suggestion_retries,
            "no novel guided candidate found"
        );
        Err(CbError::SuggestionExhausted {
            attempts: self.config.max_suggestion_retries,
        })
    }

    fn fit_surrogate(&self, length_scales: &[f64]) -> CbResult<SurrogateModel> {
        let points: Vec<Vec<f64>> = self
            .successes
            .iter()
            .map(|o| basis_point(self.params, &o.input))
            .collect::<CbResult<_>>()?;
        let outputs: Vec<f64> = self.successes.iter().map(|o| o.output).collect();
        let costs: Vec<f64> = self.successes.iter().map(|o| o.cost).collect();
        SurrogateModel::fit(&points, &outputs, &costs, length_scales)
    }
}

/// Expected improvement over the front at the candidate's predicted cost,
/// per unit of predicted cost.
///
/// `frontier` holds `(cost, signed output)` sorted by cost. The target is the
/// best front output reachable at or below the predicted cost; a candidate
/// cheaper than the whole front competes with the cheapest point.
fn acquisition(pred: &SurrogatePrediction, frontier: &[(f64, f64)], sign: f64) -> f64 {
    let target = frontier
        .iter()
        .filter(|(cost, _)| *cost <= pred.cost_mean)
        .map(|(_, out)| *out)
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .or_else(|| frontier.first().map(|(_, out)| *out))
        .unwrap_or(0.0);
    let ei = expected_improvement(sign * pred.output_mean, pred.output_std, target);
    ei / pred.cost_mean.max(MIN_PREDICTED_COST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObjectiveDirection;
    use crate::space::ParameterSpace;
    use cb_types::ParamDict;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params() -> Vec<Param> {
        vec![
            Param::new("lr", ParameterSpace::log(1e-5, 1e-1).unwrap(), Some(3e-4)).unwrap(),
            Param::new("gamma", ParameterSpace::logit(0.0, 1.0).unwrap(), Some(0.97)).unwrap(),
            Param::new(
                "epochs",
                ParameterSpace::linear(1.0, 20.0).unwrap().integer(),
                Some(4.0),
            )
            .unwrap(),
        ]
    }

    fn observation(lr: f64, gamma: f64, epochs: f64, output: f64, cost: f64) -> Observation {
        let mut input = ParamDict::new();
        input.insert("lr".to_string(), lr);
        input.insert("gamma".to_string(), gamma);
        input.insert("epochs".to_string(), epochs);
        Observation::success(input, output, cost)
    }

    fn seeded_history() -> Vec<Observation> {
        vec![
            observation(1e-4, 0.9, 3.0, 1.0, 10.0),
            observation(1e-3, 0.95, 5.0, 3.0, 20.0),
            observation(1e-2, 0.99, 8.0, 4.0, 40.0),
            observation(3e-2, 0.5, 12.0, 2.0, 60.0),
        ]
    }

    #[test]
    fn is_close_is_per_dimension() {
        assert!(is_close(&[1.0, 2.0], &[1.0, 2.0 + 1e-9], 1e-5, 1e-6));
        assert!(!is_close(&[1.0, 2.0], &[1.0, 2.1], 1e-5, 1e-6));
        assert!(!is_close(&[1.0], &[1.0, 2.0], 1e-5, 1e-6));
    }

    #[test]
    fn expected_improvement_behaviour() {
        assert_eq!(expected_improvement(1.0, 0.0, 2.0), 0.0);
        assert_eq!(expected_improvement(3.0, 0.0, 2.0), 1.0);
        let uncertain = expected_improvement(1.0, 1.0, 2.0);
        assert!(uncertain > 0.0 && uncertain < 1.0);
        assert!(expected_improvement(2.0, 1.0, 2.0) > uncertain);
    }

    #[test]
    fn phase_transitions() {
        let params = params();
        let config = CarbsParams::new()
            .with_num_random_samples(4)
            .with_resample_frequency(5);
        let history = seeded_history();

        let engine = SuggestionEngine::new(&params, &config, &history[..2], &[]);
        assert_eq!(engine.phase(), SuggestionSource::Bootstrap);

        let engine = SuggestionEngine::new(&params, &config, &history, &[]);
        assert_eq!(engine.phase(), SuggestionSource::Guided);

        let mut five = history.clone();
        five.push(observation(5e-3, 0.8, 6.0, 3.5, 30.0));
        let engine = SuggestionEngine::new(&params, &config, &five, &[]);
        assert_eq!(engine.phase(), SuggestionSource::Resample);

        let no_resample = config.clone().with_resample_frequency(0);
        let engine = SuggestionEngine::new(&params, &no_resample, &five, &[]);
        assert_eq!(engine.phase(), SuggestionSource::Guided);
    }

    #[test]
    fn bootstrap_stays_in_bounds() {
        let params = params();
        let config = CarbsParams::default();
        let engine = SuggestionEngine::new(&params, &config, &[], &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..50 {
            let s = engine.random_suggestion(&mut rng).unwrap();
            assert_eq!(s.source, SuggestionSource::Bootstrap);
            let lr = s.suggestion["lr"];
            let gamma = s.suggestion["gamma"];
            let epochs = s.suggestion["epochs"];
            assert!((1e-5..=1e-1).contains(&lr));
            assert!((0.0..=1.0).contains(&gamma));
            assert!((1.0..=20.0).contains(&epochs));
            assert_eq!(epochs.fract(), 0.0);
        }
    }

    #[test]
    fn resample_reproposes_a_front_input_verbatim() {
        let params = params();
        let config = CarbsParams::new()
            .with_num_random_samples(2)
            .with_resample_frequency(4);
        let history = seeded_history();
        let engine = SuggestionEngine::new(&params, &config, &history, &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let s = engine.suggest(&mut rng).unwrap();
        assert_eq!(s.source, SuggestionSource::Resample);
        let front = compute_front(&history, ObjectiveDirection::Maximize, false, 0.05);
        assert!(front
            .iter()
            .flat_map(|g| &g.observations)
            .any(|o| o.input == s.suggestion));
    }

    #[test]
    fn resample_prefers_under_sampled_points() {
        let params = params();
        let config = CarbsParams::new()
            .with_num_random_samples(0)
            .with_resample_frequency(1);
        // Two front points; the first has been run three times.
        let history = vec![
            observation(1e-4, 0.9, 3.0, 1.0, 10.0),
            observation(1e-4, 0.9, 3.0, 1.0, 10.0),
            observation(1e-4, 0.9, 3.0, 1.0, 10.0),
            observation(1e-2, 0.99, 8.0, 4.0, 40.0),
        ];
        let engine = SuggestionEngine::new(&params, &config, &history, &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let mut rare = 0;
        for _ in 0..400 {
            let s = engine.suggest(&mut rng).unwrap();
            if s.suggestion["epochs"] == 8.0 {
                rare += 1;
            }
        }
        // Each copy of the thrice-run point weighs 1/3, the single sample 1,
        // so the single sample should win about half the draws.
        assert!(rare > 150, "under-sampled point chosen {rare} times");
    }

    #[test]
    fn resample_fires_once_per_trigger_point() {
        let params = params();
        let config = CarbsParams::new()
            .with_num_random_samples(2)
            .with_resample_frequency(4);
        let history = seeded_history();

        let engine = SuggestionEngine::new(&params, &config, &history, &[]);
        assert_eq!(engine.phase(), SuggestionSource::Resample);

        let engine = engine.with_last_resample(Some(history.len()));
        assert_eq!(engine.phase(), SuggestionSource::Guided);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert_eq!(engine.suggest(&mut rng).unwrap().source, SuggestionSource::Guided);

        let stale = SuggestionEngine::new(&params, &config, &history, &[])
            .with_last_resample(Some(0));
        assert_eq!(stale.phase(), SuggestionSource::Resample);
    }

    #[test]
    fn resample_skips_inputs_that_failed() {
        let params = params();
        let config = CarbsParams::new()
            .with_num_random_samples(2)
            .with_resample_frequency(4);
        let history = seeded_history();
        let front = compute_front(&history, ObjectiveDirection::Maximize, false, 0.05);
        let members: Vec<&Observation> = front.iter().flat_map(|g| &g.observations).collect();
        let survivor = members[0].input.clone();
        let failures: Vec<Observation> = members[1..]
            .iter()
            .map(|o| Observation::failure(o.input.clone(), 0.0, 0.0))
            .collect();

        let engine = SuggestionEngine::new(&params, &config, &history, &failures);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..20 {
            let s = engine.suggest(&mut rng).unwrap();
            assert_eq!(s.source, SuggestionSource::Resample);
            assert_eq!(s.suggestion, survivor);
        }

        // Every front input has failed: fall through to guided search.
        let all_failed: Vec<Observation> = members
            .iter()
            .map(|o| Observation::failure(o.input.clone(), 0.0, 0.0))
            .collect();
        let engine = SuggestionEngine::new(&params, &config, &history, &all_failed);
        assert_eq!(engine.suggest(&mut rng).unwrap().source, SuggestionSource::Guided);
    }

    #[test]
    fn guided_suggestion_is_novel_and_scored() {
        let params = params();
        let config = CarbsParams::new()
            .with_num_random_samples(2)
            .with_resample_frequency(0);
        let history = seeded_history();
        let engine = SuggestionEngine::new(&params, &config, &history, &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let s = engine.suggest(&mut rng).unwrap();
        assert_eq!(s.source, SuggestionSource::Guided);
        let prediction = s.prediction.expect("guided suggestions carry a prediction");
        assert!(prediction.cost_mean > 0.0);
        assert!(prediction.acquisition >= 0.0);
        assert!(history.iter().all(|o| o.input != s.suggestion));
    }

    #[test]
    fn guided_respects_cost_ceiling() {
        let params = params();
        let config = CarbsParams::new()
            .with_num_random_samples(2)
            .with_resample_frequency(0)
            .with_max_suggestion_cost(25.0);
        let history = seeded_history();
        let engine = SuggestionEngine::new(&params, &config, &history, &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        for _ in 0..5 {
            let s = engine.suggest(&mut rng).unwrap();
            assert!(s.prediction.unwrap().cost_mean <= 25.0);
        }
    }

    #[test]
    fn unreachable_cost_ceiling_exhausts() {
        let params = params();
        let mut config = CarbsParams::new()
            .with_num_random_samples(2)
            .with_resample_frequency(0)
            .with_max_suggestion_cost(1e-6);
        config.max_suggestion_retries = 3;
        config.candidates_per_dimension = 5;
        let history = seeded_history();
        let engine = SuggestionEngine::new(&params, &config, &history, &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        match engine.suggest(&mut rng) {
            Err(CbError::SuggestionExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn tiny_integer_space_exhausts_novelty_guard() {
        let params = vec![Param::new(
            "n",
            ParameterSpace::linear(1.0, 2.0).unwrap().integer(),
            None,
        )
        .unwrap()];
        let mut config = CarbsParams::new().with_num_random_samples(10);
        config.max_suggestion_retries = 20;

        let seen: Vec<Observation> = [1.0, 2.0]
            .iter()
            .map(|n| {
                let mut input = ParamDict::new();
                input.insert("n".to_string(), *n);
                Observation::success(input, 0.0, 1.0)
            })
            .collect();
        let engine = SuggestionEngine::new(&params, &config, &seen, &[]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            engine.suggest(&mut rng),
            Err(CbError::SuggestionExhausted { .. })
        ));
    }

    #[test]
    fn failures_count_for_novelty() {
        let params = vec![Param::new(
            "n",
            ParameterSpace::linear(1.0, 2.0).unwrap().integer(),
            None,
        )
        .unwrap()];
        let config = CarbsParams::new().with_num_random_samples(10);

        let mut input = ParamDict::new();
        input.insert("n".to_string(), 1.0);
        let failed = vec![Observation::failure(input, 0.0, 0.0)];
        let engine = SuggestionEngine::new(&params, &config, &[], &failed);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        for _ in 0..10 {
            let s = engine.suggest(&mut rng).unwrap();
            assert_eq!(s.suggestion["n"], 2.0);
        }
    }
}
