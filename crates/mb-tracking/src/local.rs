//! File-backed tracking store.
//!
//! Everything lives in memory behind a mutex. When opened on a directory,
//! the store is written to `<root>/tracking.json` after every run
//! transition.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::records::{
    ExperimentId, ExperimentRecord, MetricRecord, RunId, RunRecord, RunStatus, PARENT_RUN_TAG,
};
use crate::tracker::{validate_experiment_name, Tracker, TrackingError, TrackingResult};
use mb_types::TrackingConfigError;

/// File name of the persisted store inside the tracking root.
pub const STORE_FILE: &str = "tracking.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    experiments: BTreeMap<ExperimentId, ExperimentRecord>,
    runs: BTreeMap<RunId, RunRecord>,
    metrics: Vec<MetricRecord>,
    /// `end_run` calls per run, including rejected ones.
    #[serde(skip)]
    close_calls: BTreeMap<RunId, usize>,
}

#[derive(Debug)]
pub struct LocalTracker {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
    active: Mutex<Option<ExperimentId>>,
}

impl LocalTracker {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StoreState::default()),
            active: Mutex::new(None),
        }
    }

    /// Open (or create) the store under `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> TrackingResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let path = root.join(STORE_FILE);

        let state = if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreState::default()
        };
        info!("Opened local tracking store at {}", path.display());

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
            active: Mutex::new(None),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self, state: &StoreState) -> TrackingResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn experiment_by_name(&self, name: &str) -> Option<ExperimentRecord> {
        self.state
            .lock()
            .experiments
            .values()
            .find(|e| e.name == name)
            .cloned()
    }

    pub fn experiment_count(&self) -> usize {
        self.state.lock().experiments.len()
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.state.lock().runs.get(run_id).cloned()
    }

    /// All runs of an experiment, oldest first.
    pub fn runs_for_experiment(&self, experiment_id: &str) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .state
            .lock()
            .runs
            .values()
            .filter(|r| r.experiment_id == experiment_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    /// Runs of an experiment that have no parent.
    pub fn top_level_runs(&self, experiment_id: &str) -> Vec<RunRecord> {
        self.runs_for_experiment(experiment_id)
            .into_iter()
            .filter(|r| !r.is_nested())
            .collect()
    }

    pub fn child_runs(&self, parent_run_id: &str) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .state
            .lock()
            .runs
            .values()
            .filter(|r| r.parent_run_id.as_deref() == Some(parent_run_id))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    /// Metrics for a run and key, ordered by step.
    pub fn metrics_for_run(&self, run_id: &str, key: &str) -> Vec<MetricRecord> {
        let mut metrics: Vec<MetricRecord> = self
            .state
            .lock()
            .metrics
            .iter()
            .filter(|m| m.run_id == run_id && m.key == key)
            .cloned()
            .collect();
        metrics.sort_by_key(|m| m.step);
        metrics
    }

    /// How many times `end_run` was called for `run_id` on this instance.
    pub fn end_run_calls(&self, run_id: &str) -> usize {
        self.state.lock().close_calls.get(run_id).copied().unwrap_or(0)
    }
}

impl Tracker for LocalTracker {
    fn set_experiment(&self, name: &str) -> TrackingResult<ExperimentId> {
        validate_experiment_name(name)?;

        let mut state = self.state.lock();
        let existing = state
            .experiments
            .values()
            .find(|e| e.name == name)
            .map(|e| e.experiment_id.clone());

        let experiment_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().simple().to_string();
                state
                    .experiments
                    .insert(id.clone(), ExperimentRecord::new(id.clone(), name));
                if let Err(e) = self.persist(&state) {
                    state.experiments.remove(&id);
                    return Err(e);
                }
                info!("Created experiment {} ({})", name, id);
                id
            }
        };
        drop(state);

        *self.active.lock() = Some(experiment_id.clone());
        Ok(experiment_id)
    }

    fn active_experiment(&self) -> Option<ExperimentId> {
        self.active.lock().clone()
    }

    fn start_run(
        &self,
        experiment_id: &str,
        parent_run_id: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> TrackingResult<RunId> {
        let mut state = self.state.lock();
        if !state.experiments.contains_key(experiment_id) {
            return Err(TrackingConfigError::ExperimentNotFound {
                experiment_id: experiment_id.to_string(),
            }
            .into());
        }
        if let Some(parent) = parent_run_id {
            if !state.runs.contains_key(parent) {
                return Err(TrackingError::RunNotFound {
                    run_id: parent.to_string(),
                });
            }
        }

        let run_id = Uuid::new_v4().simple().to_string();
        let mut run = RunRecord::new(
            run_id.clone(),
            experiment_id,
            parent_run_id.map(str::to_string),
        );
        run.tags = tags.clone();
        if let Some(parent) = parent_run_id {
            run.tags.insert(PARENT_RUN_TAG.to_string(), parent.to_string());
        }
        state.runs.insert(run_id.clone(), run);
        if let Err(e) = self.persist(&state) {
            state.runs.remove(&run_id);
            return Err(e);
        }

        debug!("Started run {} in experiment {}", run_id, experiment_id);
        Ok(run_id)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> TrackingResult<()> {
        let mut state = self.state.lock();
        let run = state.runs.get_mut(run_id).ok_or_else(|| TrackingError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        if run.status.is_terminal() {
            return Err(TrackingError::RunClosed {
                run_id: run_id.to_string(),
            });
        }
        run.params.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> TrackingResult<()> {
        let mut state = self.state.lock();
        match state.runs.get(run_id) {
            None => {
                return Err(TrackingError::RunNotFound {
                    run_id: run_id.to_string(),
                })
            }
            Some(run) if run.status.is_terminal() => {
                return Err(TrackingError::RunClosed {
                    run_id: run_id.to_string(),
                })
            }
            Some(_) => {}
        }
        state.metrics.push(MetricRecord::new(run_id, key, value, step));
        Ok(())
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> TrackingResult<()> {
        let mut state = self.state.lock();
        *state.close_calls.entry(run_id.to_string()).or_insert(0) += 1;

        let run = state.runs.get_mut(run_id).ok_or_else(|| TrackingError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        if run.status.is_terminal() {
            return Err(TrackingError::RunClosed {
                run_id: run_id.to_string(),
            });
        }
        let previous = run.clone();
        run.complete(status);
        if let Err(e) = self.persist(&state) {
            state.runs.insert(run_id.to_string(), previous);
            return Err(e);
        }

        debug!("Closed run {} as {:?}", run_id, status);
        Ok(())
    }

    fn backend(&self) -> &str {
        "local"
    }
}
