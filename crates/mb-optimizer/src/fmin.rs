//! Minimize an objective over a search space.

use mb_types::SearchExecutionError;
use tracing::info;

use crate::executor::{Objective, ParallelTrials};
use crate::search::{ParameterSet, SearchSpace, SearchStrategy};
use crate::trial::{TrialStatus, Trials};

/// Best point found by [`fmin`] plus the full trial history.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best_params: ParameterSet,
    pub best_loss: f64,
    pub trials: Trials,
}

/// Run exactly `max_evals` trials of `objective` over `space`.
///
/// Individual trial failures are recorded and skipped. The search itself
/// fails only when its inputs are invalid or no trial completed.
pub fn fmin<O>(
    objective: &O,
    space: &SearchSpace,
    strategy: &mut dyn SearchStrategy,
    max_evals: usize,
    executor: &ParallelTrials,
) -> Result<SearchOutcome, SearchExecutionError>
where
    O: Objective + ?Sized,
{
    if max_evals == 0 {
        return Err(SearchExecutionError::InvalidBudget { max_evals });
    }
    space.validate()?;

    info!(
        "Starting {} search: {} trials over {} parameters, parallelism {}",
        strategy.name(),
        max_evals,
        space.len(),
        executor.parallelism()
    );

    let mut trials = Trials::new();
    executor.run(objective, strategy, max_evals, &mut trials)?;

    let completed = trials.count(TrialStatus::Completed);
    let failed = trials.count(TrialStatus::Failed);
    info!("Search finished: {} completed, {} failed", completed, failed);

    let Some(best) = trials.best() else {
        return Err(SearchExecutionError::AllTrialsFailed {
            trials: trials.len(),
            last_error: trials.last_error().unwrap_or("no trials ran").to_string(),
        });
    };

    let best_params = best.parameters.clone();
    let best_loss = best.loss;
    info!("Best loss {} with {:?}", best_loss, best_params);

    Ok(SearchOutcome {
        best_params,
        best_loss,
        trials,
    })
}
