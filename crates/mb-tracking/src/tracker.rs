//! Tracker abstraction and the scoped run guard.

use std::collections::BTreeMap;

use mb_types::{MbError, TrackingConfigError};
use tracing::{debug, warn};

use crate::records::{ExperimentId, RunId, RunStatus};

/// Errors surfaced by tracking backends.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error(transparent)]
    Config(#[from] TrackingConfigError),
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },
    #[error("run {run_id} is already closed")]
    RunClosed { run_id: String },
    #[error("tracking store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("tracking store is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("tracking request failed: {message}")]
    Http { message: String },
    #[error("tracking server returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Result alias for tracking operations.
pub type TrackingResult<T> = Result<T, TrackingError>;

impl From<TrackingError> for MbError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::Config(config) => MbError::TrackingConfig(config),
            other => MbError::Tracking(other.to_string()),
        }
    }
}

/// Core experiment-tracking interface.
///
/// Implementations must accept concurrent metric and param writes from
/// several trial workers.
pub trait Tracker: Send + Sync + std::fmt::Debug {
    /// Select the experiment called `name`, creating it if needed, and make
    /// it the active target.
    fn set_experiment(&self, name: &str) -> TrackingResult<ExperimentId>;

    /// The experiment selected by the last `set_experiment` call.
    fn active_experiment(&self) -> Option<ExperimentId>;

    /// Open a run under `experiment_id`, optionally nested under a parent.
    fn start_run(
        &self,
        experiment_id: &str,
        parent_run_id: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> TrackingResult<RunId>;

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> TrackingResult<()>;

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> TrackingResult<()>;

    /// Close a running run. Closing a run twice is an error.
    fn end_run(&self, run_id: &str, status: RunStatus) -> TrackingResult<()>;

    /// Backend name for log lines.
    fn backend(&self) -> &str;
}

/// Reject empty names and names containing control characters.
pub fn validate_experiment_name(name: &str) -> Result<(), TrackingConfigError> {
    let reason = if name.trim().is_empty() {
        Some("name is empty")
    } else if name.chars().any(char::is_control) {
        Some("name contains control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TrackingConfigError::InvalidExperimentName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// A tracking run that is closed exactly once.
///
/// Call [`ActiveRun::finish`] on the success path. If the guard is dropped
/// while still open, for example during `?` propagation or a panic, the run
/// is closed as [`RunStatus::Failed`].
#[derive(Debug)]
pub struct ActiveRun<'a> {
    tracker: &'a dyn Tracker,
    run_id: RunId,
    open: bool,
}

impl<'a> ActiveRun<'a> {
    pub fn start(
        tracker: &'a dyn Tracker,
        experiment_id: &str,
        parent_run_id: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> TrackingResult<Self> {
        let run_id = tracker.start_run(experiment_id, parent_run_id, tags)?;
        debug!("Opened run {} on {}", run_id, tracker.backend());
        Ok(Self {
            tracker,
            run_id,
            open: true,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_param(&self, key: &str, value: &str) -> TrackingResult<()> {
        self.tracker.log_param(&self.run_id, key, value)
    }

    pub fn log_metric(&self, key: &str, value: f64, step: u64) -> TrackingResult<()> {
        self.tracker.log_metric(&self.run_id, key, value, step)
    }

    /// Close the run with `status`. On error the guard stays open and the
    /// drop retries the close as failed.
    pub fn finish(mut self, status: RunStatus) -> TrackingResult<()> {
        self.tracker.end_run(&self.run_id, status)?;
        self.open = false;
        Ok(())
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.tracker.end_run(&self.run_id, RunStatus::Failed) {
            warn!("Failed to close run {}: {}", self.run_id, e);
        }
    }
}
