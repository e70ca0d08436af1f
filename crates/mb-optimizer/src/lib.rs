//! # mb-optimizer
//!
//! Hyperparameter search for ModelBuilder.
//!
//! Provides search space definitions, random and TPE suggestion strategies,
//! trial tracking, and a bounded-parallelism executor. [`fmin`] ties them
//! together: it minimizes an [`Objective`] for a fixed evaluation budget.

mod executor;
mod fmin;
mod search;
mod tpe;
mod trial;

pub use executor::{Objective, ParallelTrials};
pub use fmin::{fmin, SearchOutcome};
pub use search::{
    ParameterDef, ParameterKind, ParameterSet, ParameterValue, RandomSearch, SearchSpace,
    SearchStrategy,
};
pub use tpe::{TpeConfig, TpeSearch};
pub use trial::{SearchId, Trial, TrialOutcome, TrialResult, TrialStatus, Trials};
