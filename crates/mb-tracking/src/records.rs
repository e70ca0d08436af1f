//! Tracking records: experiments own runs, runs own params and metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ExperimentId = String;
pub type RunId = String;

/// Tag holding the parent run id of a nested run.
pub const PARENT_RUN_TAG: &str = "mlflow.parentRunId";

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Wire name used by MLflow-compatible servers.
    pub fn as_mlflow(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl ExperimentRecord {
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// One execution tracked under an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub experiment_id: ExperimentId,
    pub parent_run_id: Option<RunId>,
    pub status: RunStatus,
    pub tags: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        parent_run_id: Option<RunId>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            parent_run_id,
            status: RunStatus::Running,
            tags: BTreeMap::new(),
            params: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_nested(&self) -> bool {
        self.parent_run_id.is_some()
    }

    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

/// A single metric observation; metrics are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub run_id: RunId,
    pub key: String,
    pub value: f64,
    pub step: u64,
    pub timestamp: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(run_id: impl Into<String>, key: impl Into<String>, value: f64, step: u64) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            value,
            step,
            timestamp: Utc::now(),
        }
    }
}
