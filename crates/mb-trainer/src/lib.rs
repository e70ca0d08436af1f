//! # mb-trainer
//!
//! The model-builder job. [`ModelBuilderTask`] selects the tracking
//! experiment, loads the configured table, prepares it with [`Provider`] and
//! runs a TPE search over [`Trainer`], a logistic-regression objective that
//! reports each trial as a nested tracking run.

pub mod model;
pub mod provider;
pub mod task;
pub mod trainer;

pub use model::{ClassWeight, LogisticRegression, TrainParams};
pub use provider::{ModelData, Provider};
pub use task::{ModelBuilderTask, TrainingSummary};
pub use trainer::Trainer;
