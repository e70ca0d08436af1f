//! # mb-tracking
//!
//! Experiment tracking for ModelBuilder.
//!
//! Experiments own runs; runs carry params, tags and step-indexed metrics and
//! may be nested under a parent run. The [`Tracker`] trait has two backends:
//! a file-backed [`LocalTracker`] and an [`MlflowTracker`] REST client.
//! [`ActiveRun`] guarantees a run is closed on every exit path.

use std::path::Path;
use std::sync::Arc;

use mb_types::RunContext;
use tracing::info;

pub mod local;
pub mod mlflow;
pub mod records;
pub mod tracker;

pub use local::LocalTracker;
pub use mlflow::MlflowTracker;
pub use records::*;
pub use tracker::*;

/// Pick a backend for `context`: MLflow when a host is set, otherwise a
/// local store under `local_root`.
pub fn connect(context: &RunContext, local_root: &Path) -> TrackingResult<Arc<dyn Tracker>> {
    let tracker: Arc<dyn Tracker> = if context.is_remote() {
        Arc::new(MlflowTracker::new(context)?)
    } else {
        Arc::new(LocalTracker::open(local_root)?)
    };
    info!(
        "Tracking to {} ({})",
        tracker.backend(),
        context.host_label()
    );
    Ok(tracker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_context_uses_the_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = connect(&RunContext::local(), dir.path()).unwrap();
        assert_eq!(tracker.backend(), "local");

        tracker.set_experiment("/exp").unwrap();
        assert!(dir.path().join(local::STORE_FILE).is_file());
    }

    #[test]
    fn remote_context_uses_mlflow() {
        let dir = tempfile::tempdir().unwrap();
        let context = RunContext::new("https://tracking.example.com", "token");
        let tracker = connect(&context, dir.path()).unwrap();
        assert_eq!(tracker.backend(), "mlflow");
    }
}
