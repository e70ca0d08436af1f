//! Binary logistic regression and its evaluation metrics.

use serde::{Deserialize, Serialize};

use mb_optimizer::ParameterSet;
use mb_types::{config_error, MbResult};

const PROB_EPS: f64 = 1e-15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassWeight {
    /// Weight each class inversely to its frequency.
    Balanced,
    None,
}

/// Hyperparameters for one fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    pub learning_rate: f64,
    pub l2: f64,
    pub epochs: usize,
    pub class_weight: ClassWeight,
}

impl TrainParams {
    /// Read a suggestion produced over `Provider::search_space`.
    pub fn from_params(params: &ParameterSet) -> MbResult<Self> {
        let float = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_f64())
                .ok_or_else(|| config_error!("missing numeric parameter {}", key))
        };

        let epochs = params
            .get("epochs")
            .and_then(|v| v.as_i64())
            .filter(|e| *e > 0)
            .ok_or_else(|| config_error!("missing positive integer parameter epochs"))?;

        let class_weight = match params.get("class_weight").and_then(|v| v.as_str()) {
            Some("balanced") => ClassWeight::Balanced,
            Some("none") | None => ClassWeight::None,
            Some(other) => return Err(config_error!("unknown class_weight {}", other)),
        };

        Ok(Self {
            learning_rate: float("learning_rate")?,
            l2: float("l2")?,
            epochs: epochs as usize,
            class_weight,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticRegression {
    /// Full-batch gradient descent on the weighted, L2-penalized log loss.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &TrainParams) -> Self {
        let width = x.first().map(Vec::len).unwrap_or(0);
        let mut model = Self {
            weights: vec![0.0; width],
            bias: 0.0,
        };
        if x.is_empty() {
            return model;
        }

        let sample_weights = sample_weights(y, params.class_weight);
        let total: f64 = sample_weights.iter().sum();

        for _ in 0..params.epochs {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            for ((row, &label), &weight) in x.iter().zip(y).zip(&sample_weights) {
                let err = (model.predict_proba_row(row) - label) * weight;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in model.weights.iter_mut().zip(&grad_w) {
                *w -= params.learning_rate * (g / total + params.l2 * *w);
            }
            model.bias -= params.learning_rate * grad_b / total;
        }
        model
    }

    pub fn predict_proba_row(&self, row: &[f64]) -> f64 {
        let z: f64 = self.bias + self.weights.iter().zip(row).map(|(w, v)| w * v).sum::<f64>();
        sigmoid(z)
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_proba_row(row)).collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn sample_weights(y: &[f64], class_weight: ClassWeight) -> Vec<f64> {
    match class_weight {
        ClassWeight::None => vec![1.0; y.len()],
        ClassWeight::Balanced => {
            let n = y.len() as f64;
            let positives = y.iter().filter(|&&v| v == 1.0).count() as f64;
            let negatives = n - positives;
            let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 1.0 };
            let (wp, wn) = (weight(positives), weight(negatives));
            y.iter().map(|&v| if v == 1.0 { wp } else { wn }).collect()
        }
    }
}

/// Mean binary cross-entropy with probabilities clipped away from 0 and 1.
pub fn log_loss(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let total: f64 = y
        .iter()
        .zip(p)
        .map(|(&label, &prob)| {
            let prob = prob.clamp(PROB_EPS, 1.0 - PROB_EPS);
            -(label * prob.ln() + (1.0 - label) * (1.0 - prob).ln())
        })
        .sum();
    total / y.len() as f64
}

pub fn accuracy(y: &[f64], p: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let correct = y
        .iter()
        .zip(p)
        .filter(|&(&label, &prob)| (prob >= 0.5) == (label == 1.0))
        .count();
    correct as f64 / y.len() as f64
}

/// Area under the ROC curve via the rank-sum statistic, averaging ties.
/// Returns 0.5 when only one class is present.
pub fn roc_auc(y: &[f64], p: &[f64]) -> f64 {
    let positives = y.iter().filter(|&&v| v == 1.0).count();
    let negatives = y.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..p.len()).collect();
    order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));

    let mut ranks = vec![0.0; p.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && p[order[j + 1]] == p[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = y
        .iter()
        .zip(&ranks)
        .filter(|&(&label, _)| label == 1.0)
        .map(|(_, r)| r)
        .sum();
    let (pos, neg) = (positives as f64, negatives as f64);
    (rank_sum - pos * (pos + 1.0) / 2.0) / (pos * neg)
}
