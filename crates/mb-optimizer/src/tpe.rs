//! Tree-structured Parzen Estimator suggestion strategy.
//!
//! Completed trials are split at a loss quantile into a "good" set and a
//! "bad" set. Each dimension gets a Parzen density for both sets, and the
//! candidate drawn from the good density with the highest `l(x) / g(x)`
//! ratio is suggested. Dimensions are optimized independently.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::search::{
    seeded_rng, ParameterDef, ParameterKind, ParameterSet, ParameterValue, SearchSpace,
    SearchStrategy,
};

/// Tuning knobs for [`TpeSearch`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpeConfig {
    /// Random suggestions before the model kicks in.
    pub n_startup_trials: usize,
    /// Quantile of observations treated as "good".
    pub gamma: f64,
    /// Candidates drawn from the good density per dimension.
    pub n_ei_candidates: usize,
    /// Weight of the uniform prior component.
    pub prior_weight: f64,
    /// Upper bound on the size of the good set.
    pub max_good: usize,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            n_startup_trials: 20,
            gamma: 0.25,
            n_ei_candidates: 24,
            prior_weight: 1.0,
            max_good: 25,
        }
    }
}

/// Bayesian optimization with a tree-structured Parzen estimator.
#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    config: TpeConfig,
    rng: ChaCha8Rng,
    observations: Vec<(ParameterSet, f64)>,
}

impl TpeSearch {
    pub fn new(space: SearchSpace, config: TpeConfig) -> Self {
        Self {
            space,
            config,
            rng: seeded_rng(None),
            observations: Vec::new(),
        }
    }

    pub fn with_seed(space: SearchSpace, config: TpeConfig, seed: u64) -> Self {
        Self {
            space,
            config,
            rng: seeded_rng(Some(seed)),
            observations: Vec::new(),
        }
    }

    pub fn observations(&self) -> usize {
        self.observations.len()
    }

    fn suggest_one(&mut self) -> ParameterSet {
        if self.observations.len() < self.config.n_startup_trials.max(1) {
            return self.space.sample_uniform(&mut self.rng);
        }

        let (good, bad) = split(&self.observations, &self.config);
        if bad.is_empty() {
            return self.space.sample_uniform(&mut self.rng);
        }

        let mut params = ParameterSet::new();
        for def in &self.space.parameters {
            let good_values: Vec<&ParameterValue> =
                good.iter().filter_map(|p| p.get(&def.name)).collect();
            let bad_values: Vec<&ParameterValue> =
                bad.iter().filter_map(|p| p.get(&def.name)).collect();
            let value = suggest_dimension(def, &good_values, &bad_values, &self.config, &mut self.rng);
            params.insert(def.name.clone(), value);
        }
        params
    }
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count).map(|_| self.suggest_one()).collect()
    }

    fn report(&mut self, params: &ParameterSet, loss: f64) {
        if loss.is_finite() {
            self.observations.push((params.clone(), loss));
        }
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

/// Split observations into (good, bad) by ascending loss.
fn split<'a>(
    observations: &'a [(ParameterSet, f64)],
    config: &TpeConfig,
) -> (Vec<&'a ParameterSet>, Vec<&'a ParameterSet>) {
    let mut sorted: Vec<&(ParameterSet, f64)> = observations.iter().collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let n = sorted.len() as f64;
    let n_good = ((config.gamma * n.sqrt()).ceil() as usize)
        .clamp(1, config.max_good.max(1))
        .min(sorted.len());

    let good = sorted[..n_good].iter().copied().map(|obs| &obs.0).collect();
    let bad = sorted[n_good..].iter().copied().map(|obs| &obs.0).collect();
    (good, bad)
}

fn suggest_dimension(
    def: &ParameterDef,
    good: &[&ParameterValue],
    bad: &[&ParameterValue],
    config: &TpeConfig,
    rng: &mut ChaCha8Rng,
) -> ParameterValue {
    match &def.kind {
        ParameterKind::Choice { values } => {
            let index_of = |v: &&ParameterValue| match v {
                ParameterValue::Json(j) => values.iter().position(|c| c == j),
                _ => None,
            };
            let l = Categorical::fit(values.len(), good.iter().filter_map(index_of), config.prior_weight);
            let g = Categorical::fit(values.len(), bad.iter().filter_map(index_of), config.prior_weight);

            let best = (0..config.n_ei_candidates.max(1))
                .map(|_| l.sample(rng))
                .max_by(|a, b| l.score(*a, &g).total_cmp(&l.score(*b, &g)))
                .unwrap_or(0);
            ParameterValue::Json(values[best].clone())
        }
        kind => {
            let Some(domain) = NumericDomain::of(kind) else {
                return kind.sample_uniform(rng);
            };
            let to_internal = |v: &&ParameterValue| v.as_f64().map(|x| domain.forward(x));
            let l = Parzen::fit(good.iter().filter_map(to_internal), &domain, config.prior_weight);
            let g = Parzen::fit(bad.iter().filter_map(to_internal), &domain, config.prior_weight);

            let best = (0..config.n_ei_candidates.max(1))
                .map(|_| domain.quantize(l.sample(rng, &domain)))
                .max_by(|a, b| {
                    let sa = l.log_pdf(*a) - g.log_pdf(*a);
                    let sb = l.log_pdf(*b) - g.log_pdf(*b);
                    sa.total_cmp(&sb)
                })
                .unwrap_or(domain.low);
            domain.value(best)
        }
    }
}

/// A numeric dimension mapped into the space the estimator works in.
#[derive(Debug, Clone, Copy)]
struct NumericDomain {
    low: f64,
    high: f64,
    /// Bounds in the caller's units, before any log transform.
    bounds: (f64, f64),
    log: bool,
    integer: bool,
}

impl NumericDomain {
    fn of(kind: &ParameterKind) -> Option<Self> {
        let domain = match kind {
            ParameterKind::FloatRange { low, high } => Self {
                low: *low,
                high: *high,
                bounds: (*low, *high),
                log: false,
                integer: false,
            },
            ParameterKind::LogUniform { low, high } => Self {
                low: low.ln(),
                high: high.ln(),
                bounds: (*low, *high),
                log: true,
                integer: false,
            },
            ParameterKind::IntRange { low, high } => Self {
                low: *low as f64,
                high: *high as f64,
                bounds: (*low as f64, *high as f64),
                log: false,
                integer: true,
            },
            ParameterKind::Choice { .. } => return None,
        };
        Some(domain)
    }

    fn forward(&self, x: f64) -> f64 {
        if self.log {
            x.max(f64::MIN_POSITIVE).ln()
        } else {
            x
        }
    }

    fn quantize(&self, x: f64) -> f64 {
        let x = x.clamp(self.low, self.high);
        if self.integer {
            x.round()
        } else {
            x
        }
    }

    fn value(&self, x: f64) -> ParameterValue {
        if self.integer {
            ParameterValue::Int(x.round() as i64)
        } else if self.log {
            ParameterValue::Float(x.exp().clamp(self.bounds.0, self.bounds.1))
        } else {
            ParameterValue::Float(x.clamp(self.bounds.0, self.bounds.1))
        }
    }

    fn width(&self) -> f64 {
        (self.high - self.low).max(f64::EPSILON)
    }
}

/// Adaptive Parzen estimator: one Gaussian per observation plus a wide
/// prior component centred on the domain.
#[derive(Debug, Clone)]
struct Parzen {
    mus: Vec<f64>,
    sigmas: Vec<f64>,
    weights: Vec<f64>,
}

impl Parzen {
    fn fit(points: impl Iterator<Item = f64>, domain: &NumericDomain, prior_weight: f64) -> Self {
        let width = domain.width();
        let prior_mu = 0.5 * (domain.low + domain.high);

        // (mu, weight, is_prior)
        let mut comps: Vec<(f64, f64, bool)> = points.map(|p| (p, 1.0, false)).collect();
        let n_obs = comps.len();
        comps.push((prior_mu, prior_weight, true));
        comps.sort_by(|a, b| a.0.total_cmp(&b.0));

        let min_sigma = width / (1.0 + n_obs as f64).min(100.0);
        let mut sigmas = Vec::with_capacity(comps.len());
        for i in 0..comps.len() {
            if comps[i].2 {
                sigmas.push(width);
                continue;
            }
            let left = if i > 0 { comps[i].0 - comps[i - 1].0 } else { comps[i].0 - domain.low };
            let right = if i + 1 < comps.len() {
                comps[i + 1].0 - comps[i].0
            } else {
                domain.high - comps[i].0
            };
            sigmas.push(left.max(right).clamp(min_sigma, width));
        }

        let total: f64 = comps.iter().map(|(_, w, _)| w).sum();
        Self {
            mus: comps.iter().map(|(m, _, _)| *m).collect(),
            sigmas,
            weights: comps.iter().map(|(_, w, _)| w / total).collect(),
        }
    }

    fn sample(&self, rng: &mut ChaCha8Rng, domain: &NumericDomain) -> f64 {
        let mut pick: f64 = rng.gen();
        let mut idx = self.weights.len() - 1;
        for (i, w) in self.weights.iter().enumerate() {
            if pick < *w {
                idx = i;
                break;
            }
            pick -= w;
        }

        // Rejection sampling keeps draws inside the domain.
        for _ in 0..64 {
            let x = self.mus[idx] + self.sigmas[idx] * standard_normal(rng);
            if x >= domain.low && x <= domain.high {
                return x;
            }
        }
        rng.gen_range(domain.low..=domain.high)
    }

    fn log_pdf(&self, x: f64) -> f64 {
        let terms: Vec<f64> = self
            .mus
            .iter()
            .zip(&self.sigmas)
            .zip(&self.weights)
            .map(|((mu, sigma), w)| {
                let z = (x - mu) / sigma;
                w.ln() - 0.5 * z * z - sigma.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln()
            })
            .collect();
        log_sum_exp(&terms)
    }
}

/// Smoothed categorical estimator over choice indices.
#[derive(Debug, Clone)]
struct Categorical {
    probs: Vec<f64>,
}

impl Categorical {
    fn fit(n: usize, indices: impl Iterator<Item = usize>, prior_weight: f64) -> Self {
        let mut counts = vec![prior_weight; n];
        for i in indices {
            if i < n {
                counts[i] += 1.0;
            }
        }
        let total: f64 = counts.iter().sum();
        Self {
            probs: counts.into_iter().map(|c| c / total).collect(),
        }
    }

    fn sample(&self, rng: &mut ChaCha8Rng) -> usize {
        let mut pick: f64 = rng.gen();
        for (i, p) in self.probs.iter().enumerate() {
            if pick < *p {
                return i;
            }
            pick -= p;
        }
        self.probs.len() - 1
    }

    fn score(&self, idx: usize, other: &Categorical) -> f64 {
        self.probs[idx].ln() - other.probs[idx].ln()
    }
}

/// Box-Muller draw from N(0, 1).
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> TpeConfig {
        TpeConfig {
            n_startup_trials: 5,
            ..TpeConfig::default()
        }
    }

    #[test]
    fn startup_phase_is_random() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let mut tpe = TpeSearch::with_seed(space.clone(), TpeConfig::default(), 1);
        let suggestions = tpe.suggest(10);
        assert_eq!(suggestions.len(), 10);
        assert!(suggestions.iter().all(|p| space.contains(p)));
    }

    #[test]
    fn suggestions_stay_in_domain_after_startup() {
        let space = SearchSpace::new()
            .add_log_uniform("learning_rate", 1e-3, 1.0)
            .add_int("epochs", 10, 200)
            .add_float("momentum", 0.0, 0.9)
            .add_choice(
                "class_weight",
                vec![serde_json::json!("balanced"), serde_json::json!("none")],
            );
        let mut tpe = TpeSearch::with_seed(space.clone(), fast_config(), 7);

        for round in 0..40 {
            let params = tpe.suggest(1).pop().unwrap();
            assert!(space.contains(&params), "round {round}: {params:?}");
            let loss = params["learning_rate"].as_f64().unwrap();
            tpe.report(&params, loss);
        }
        assert_eq!(tpe.observations(), 40);
    }

    #[test]
    fn concentrates_near_the_optimum() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let mut tpe = TpeSearch::with_seed(space, fast_config(), 99);

        for i in 0..30 {
            let x = i as f64 / 29.0;
            let mut params = ParameterSet::new();
            params.insert("x".to_string(), ParameterValue::Float(x));
            tpe.report(&params, (x - 0.9).powi(2));
        }

        let suggestions = tpe.suggest(50);
        let mean = suggestions
            .iter()
            .map(|p| p["x"].as_f64().unwrap())
            .sum::<f64>()
            / 50.0;
        assert!(mean > 0.7, "mean suggestion {mean} not pulled toward 0.9");
    }

    #[test]
    fn prefers_the_winning_choice() {
        let space = SearchSpace::new().add_choice(
            "mode",
            vec![serde_json::json!("good"), serde_json::json!("bad")],
        );
        let mut tpe = TpeSearch::with_seed(space, fast_config(), 5);
        for i in 0..20 {
            let (mode, loss) = if i % 2 == 0 { ("good", 0.1) } else { ("bad", 1.0) };
            let mut params = ParameterSet::new();
            params.insert("mode".to_string(), ParameterValue::Json(serde_json::json!(mode)));
            tpe.report(&params, loss);
        }
        let picks = tpe.suggest(20);
        assert!(picks.iter().all(|p| p["mode"].as_str() == Some("good")));
    }

    #[test]
    fn non_finite_losses_are_ignored() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let mut tpe = TpeSearch::with_seed(space, fast_config(), 2);
        let params = tpe.suggest(1).pop().unwrap();
        tpe.report(&params, f64::NAN);
        assert_eq!(tpe.observations(), 0);
    }
}
