//! Search space definitions and the random sampling strategy.

use mb_types::SearchExecutionError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One concrete point in the search space, keyed by parameter name.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

impl ParameterKind {
    /// Whether `value` lies inside this domain.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::FloatRange { low, high }, ParameterValue::Float(v))
            | (Self::LogUniform { low, high }, ParameterValue::Float(v)) => {
                *v >= *low && *v <= *high
            }
            (Self::IntRange { low, high }, ParameterValue::Int(v)) => *v >= *low && *v <= *high,
            (Self::Choice { values }, ParameterValue::Json(v)) => values.contains(v),
            _ => false,
        }
    }

    /// Draw one value uniformly from the domain.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Self::FloatRange { low, high } => ParameterValue::Float(rng.gen_range(*low..=*high)),
            Self::IntRange { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
            Self::LogUniform { low, high } => {
                let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            Self::Choice { values } => {
                let idx = rng.gen_range(0..values.len());
                ParameterValue::Json(values[idx].clone())
            }
        }
    }
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Json(v) => v.as_i64(),
            Self::Float(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(v) => v.as_str(),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(serde_json::Value::String(s)) => write!(f, "{s}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Whether `params` has exactly one in-domain value per dimension.
    pub fn contains(&self, params: &ParameterSet) -> bool {
        params.len() == self.parameters.len()
            && self
                .parameters
                .iter()
                .all(|p| params.get(&p.name).is_some_and(|v| p.kind.contains(v)))
    }

    /// Check that every domain is well formed and names are unique.
    pub fn validate(&self) -> Result<(), SearchExecutionError> {
        if self.parameters.is_empty() {
            return Err(SearchExecutionError::EmptySearchSpace);
        }
        let invalid = |name: &str, why: &str| SearchExecutionError::Executor {
            message: format!("invalid domain for {name}: {why}"),
        };

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(invalid(&param.name, "duplicate parameter name"));
            }
            match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    if !(low.is_finite() && high.is_finite() && low <= high) {
                        return Err(invalid(&param.name, "low must be <= high"));
                    }
                }
                ParameterKind::IntRange { low, high } => {
                    if low > high {
                        return Err(invalid(&param.name, "low must be <= high"));
                    }
                }
                ParameterKind::LogUniform { low, high } => {
                    if !(*low > 0.0 && high.is_finite() && low <= high) {
                        return Err(invalid(&param.name, "log-uniform bounds must be positive"));
                    }
                }
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return Err(invalid(&param.name, "no choices"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Sample one point uniformly across every dimension.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterSet {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.kind.sample_uniform(rng)))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
///
/// Losses are always minimized.
pub trait SearchStrategy: Send {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet>;

    /// Report a completed trial so adaptive strategies can learn.
    fn report(&mut self, _params: &ParameterSet, _loss: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self {
            space,
            rng: seeded_rng(None),
        }
    }

    pub fn with_seed(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: seeded_rng(Some(seed)),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count)
            .map(|_| self.space.sample_uniform(&mut self.rng))
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("epochs", 10, 200)
            .add_log_uniform("learning_rate", 1e-3, 1.0)
            .add_float("dropout", 0.0, 0.5)
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = sample_space();
        let mut rs = RandomSearch::with_seed(space.clone(), 11);
        let suggestions = rs.suggest(50);
        assert_eq!(suggestions.len(), 50);

        for params in &suggestions {
            assert!(space.contains(params), "out of domain: {params:?}");
            match params.get("epochs") {
                Some(ParameterValue::Int(v)) => assert!(*v >= 10 && *v <= 200),
                other => panic!("unexpected epochs value: {other:?}"),
            }
        }
    }

    #[test]
    fn seeded_random_search_is_reproducible() {
        let mut a = RandomSearch::with_seed(sample_space(), 42);
        let mut b = RandomSearch::with_seed(sample_space(), 42);
        assert_eq!(a.suggest(5), b.suggest(5));
    }

    #[test]
    fn choice_parameter_works() {
        let space = SearchSpace::new().add_choice(
            "class_weight",
            vec![serde_json::json!("balanced"), serde_json::json!("none")],
        );
        let mut rs = RandomSearch::with_seed(space, 3);
        for params in &rs.suggest(30) {
            match params.get("class_weight") {
                Some(v @ ParameterValue::Json(_)) => {
                    assert!(["balanced", "none"].contains(&v.as_str().unwrap()));
                }
                other => panic!("unexpected class_weight value: {other:?}"),
            }
        }
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let space = SearchSpace::new().add_log_uniform("lr", 1e-5, 1e-1);
        let mut rs = RandomSearch::new(space);
        for params in &rs.suggest(100) {
            let v = params["lr"].as_f64().unwrap();
            assert!((1e-5..=1e-1).contains(&v), "lr out of bounds: {v}");
        }
    }

    #[test]
    fn validate_rejects_bad_domains() {
        assert!(matches!(
            SearchSpace::new().validate(),
            Err(SearchExecutionError::EmptySearchSpace)
        ));
        assert!(SearchSpace::new().add_float("x", 1.0, 0.0).validate().is_err());
        assert!(SearchSpace::new().add_log_uniform("x", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().add_choice("x", vec![]).validate().is_err());
        assert!(SearchSpace::new()
            .add_int("x", 0, 1)
            .add_int("x", 0, 2)
            .validate()
            .is_err());
        assert!(sample_space().validate().is_ok());
    }

    #[test]
    fn parameter_values_deserialize_by_shape() {
        let int: ParameterValue = serde_json::from_str("3").unwrap();
        let float: ParameterValue = serde_json::from_str("0.5").unwrap();
        let text: ParameterValue = serde_json::from_str("\"balanced\"").unwrap();
        assert_eq!(int, ParameterValue::Int(3));
        assert_eq!(float, ParameterValue::Float(0.5));
        assert_eq!(text.as_str(), Some("balanced"));
        assert_eq!(text.to_string(), "balanced");
    }
}
