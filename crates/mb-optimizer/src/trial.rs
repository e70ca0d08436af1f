//! Trial tracking for a single search.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::search::ParameterSet;

/// Unique search identifier.
pub type SearchId = Uuid;

/// What an objective reports back for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    /// Value being minimized.
    pub loss: f64,
    /// Extra metrics, kept for inspection only.
    pub metrics: BTreeMap<String, f64>,
}

impl TrialOutcome {
    pub fn new(loss: f64) -> Self {
        Self {
            loss,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Result of a single completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub loss: f64,
    pub metrics: BTreeMap<String, f64>,
    pub parameters: ParameterSet,
    pub duration_ms: Option<u64>,
}

/// A single trial (one parameter combination evaluated by the objective).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub search_id: SearchId,
    pub trial_number: usize,
    pub parameters: ParameterSet,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(search_id: SearchId, trial_number: usize, parameters: ParameterSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            search_id,
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Option<String>) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = worker_id;
    }

    pub fn mark_completed(&mut self, outcome: TrialOutcome, duration_ms: Option<u64>) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(TrialResult {
            trial_id: self.id,
            loss: outcome.loss,
            metrics: outcome.metrics,
            parameters: self.parameters.clone(),
            duration_ms,
        });
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// History of every trial in one search, indexed by trial number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trials {
    pub search_id: SearchId,
    trials: Vec<Trial>,
}

impl Trials {
    pub fn new() -> Self {
        Self {
            search_id: Uuid::new_v4(),
            trials: Vec::new(),
        }
    }

    /// Register a new pending trial and return its number.
    pub fn push(&mut self, parameters: ParameterSet) -> usize {
        let number = self.trials.len();
        self.trials.push(Trial::new(self.search_id, number, parameters));
        number
    }

    pub fn get(&self, trial_number: usize) -> Option<&Trial> {
        self.trials.get(trial_number)
    }

    pub fn get_mut(&mut self, trial_number: usize) -> Option<&mut Trial> {
        self.trials.get_mut(trial_number)
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter()
    }

    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }

    /// Completed trial with the lowest loss.
    pub fn best(&self) -> Option<&TrialResult> {
        self.trials
            .iter()
            .filter_map(|t| t.result.as_ref())
            .min_by(|a, b| a.loss.total_cmp(&b.loss))
    }

    /// Losses of completed trials, in trial order.
    pub fn losses(&self) -> Vec<f64> {
        self.trials
            .iter()
            .filter_map(|t| t.result.as_ref().map(|r| r.loss))
            .collect()
    }

    /// Most recent failure message, if any trial failed.
    pub fn last_error(&self) -> Option<&str> {
        self.trials
            .iter()
            .rev()
            .find_map(|t| t.error.as_deref())
    }
}

impl Default for Trials {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParameterValue;

    fn params(lr: f64) -> ParameterSet {
        let mut p = ParameterSet::new();
        p.insert("learning_rate".into(), ParameterValue::Float(lr));
        p
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = Trial::new(Uuid::new_v4(), 1, params(0.1));
        assert_eq!(trial.status, TrialStatus::Pending);

        trial.mark_running(Some("worker-0".into()));
        assert_eq!(trial.status, TrialStatus::Running);
        assert_eq!(trial.worker_id.as_deref(), Some("worker-0"));

        trial.mark_completed(TrialOutcome::new(0.42).with_metric("auc", 0.9), Some(5));
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        let result = trial.result.as_ref().unwrap();
        assert_eq!(result.loss, 0.42);
        assert_eq!(result.metrics["auc"], 0.9);
        assert_eq!(result.parameters, params(0.1));
    }

    #[test]
    fn trial_failure() {
        let mut trial = Trial::new(Uuid::new_v4(), 0, ParameterSet::new());
        trial.mark_running(None);
        trial.mark_failed("training diverged".into());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error.as_deref(), Some("training diverged"));
        assert!(trial.result.is_none());
    }

    #[test]
    fn best_is_lowest_loss() {
        let mut trials = Trials::new();
        for (lr, loss) in [(0.1, 0.5), (0.2, 0.3), (0.3, 0.8)] {
            let n = trials.push(params(lr));
            trials
                .get_mut(n)
                .unwrap()
                .mark_completed(TrialOutcome::new(loss), None);
        }
        let n = trials.push(params(0.4));
        trials.get_mut(n).unwrap().mark_failed("nan loss".into());

        let best = trials.best().unwrap();
        assert_eq!(best.loss, 0.3);
        assert_eq!(best.parameters, params(0.2));
        assert_eq!(trials.count(TrialStatus::Completed), 3);
        assert_eq!(trials.count(TrialStatus::Failed), 1);
        assert_eq!(trials.losses(), vec![0.5, 0.3, 0.8]);
        assert_eq!(trials.last_error(), Some("nan loss"));
    }

    #[test]
    fn empty_history_has_no_best() {
        let trials = Trials::new();
        assert!(trials.is_empty());
        assert!(trials.best().is_none());
    }
}
