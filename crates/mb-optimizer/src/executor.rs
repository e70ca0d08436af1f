//! Bounded-parallelism trial execution.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crossbeam_channel::unbounded;
use mb_types::{MbResult, SearchExecutionError};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::search::{ParameterSet, SearchStrategy};
use crate::trial::{TrialOutcome, Trials};

/// The function being minimized.
///
/// Called concurrently from executor threads, so implementations must be
/// `Sync`. An `Err` marks only that trial as failed.
pub trait Objective: Send + Sync {
    fn evaluate(&self, params: &ParameterSet) -> MbResult<TrialOutcome>;
}

impl<F> Objective for F
where
    F: Fn(&ParameterSet) -> MbResult<TrialOutcome> + Send + Sync,
{
    fn evaluate(&self, params: &ParameterSet) -> MbResult<TrialOutcome> {
        self(params)
    }
}

/// Runs trials on a dedicated pool, at most `parallelism` at a time.
pub struct ParallelTrials {
    parallelism: usize,
    pool: ThreadPool,
}

impl std::fmt::Debug for ParallelTrials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelTrials")
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

/// Message sent from a worker when its trial finishes.
struct Completion {
    trial_number: usize,
    worker: Option<usize>,
    elapsed_ms: u64,
    result: Result<TrialOutcome, String>,
}

impl ParallelTrials {
    pub fn new(parallelism: usize) -> Result<Self, SearchExecutionError> {
        if parallelism == 0 {
            return Err(SearchExecutionError::InvalidParallelism { parallelism });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("trial-worker-{i}"))
            .build()
            .map_err(|e| SearchExecutionError::Executor {
                message: format!("Failed to build trial pool: {}", e),
            })?;
        Ok(Self { parallelism, pool })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Evaluate `max_evals` suggestions from `strategy`, feeding every
    /// completion back into it before the next suggestion is drawn.
    ///
    /// The dispatcher runs on the calling thread; only trial bodies run on
    /// the pool.
    pub fn run<O>(
        &self,
        objective: &O,
        strategy: &mut dyn SearchStrategy,
        max_evals: usize,
        trials: &mut Trials,
    ) -> Result<(), SearchExecutionError>
    where
        O: Objective + ?Sized,
    {
        let (tx, rx) = unbounded::<Completion>();

        self.pool.in_place_scope(|scope| -> Result<(), SearchExecutionError> {
            let mut submitted = 0usize;
            let mut in_flight = 0usize;

            loop {
                while in_flight < self.parallelism && submitted < max_evals {
                    let Some(params) = strategy.suggest(1).pop() else {
                        debug!("Strategy {} exhausted after {} trials", strategy.name(), submitted);
                        submitted = max_evals;
                        break;
                    };

                    let trial_number = trials.push(params.clone());
                    if let Some(trial) = trials.get_mut(trial_number) {
                        trial.mark_running(None);
                    }
                    debug!("Dispatching trial {} with {:?}", trial_number, params);

                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let started = Instant::now();
                        let result = match catch_unwind(AssertUnwindSafe(|| objective.evaluate(&params))) {
                            Ok(Ok(outcome)) if outcome.loss.is_finite() => Ok(outcome),
                            Ok(Ok(outcome)) => Err(format!("non-finite loss {}", outcome.loss)),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(panic) => Err(panic_message(panic.as_ref())),
                        };
                        // The receiver outlives the scope, so a send cannot fail here.
                        let _ = tx.send(Completion {
                            trial_number,
                            worker: rayon::current_thread_index(),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                            result,
                        });
                    });

                    submitted += 1;
                    in_flight += 1;
                }

                if in_flight == 0 {
                    break;
                }

                let completion = rx.recv().map_err(|e| SearchExecutionError::Executor {
                    message: format!("Trial channel closed: {}", e),
                })?;
                in_flight -= 1;
                self.record(completion, strategy, trials);
            }

            Ok(())
        })
    }

    fn record(&self, completion: Completion, strategy: &mut dyn SearchStrategy, trials: &mut Trials) {
        let Some(trial) = trials.get_mut(completion.trial_number) else {
            return;
        };
        trial.worker_id = completion.worker.map(|w| format!("trial-worker-{w}"));

        match completion.result {
            Ok(outcome) => {
                debug!(
                    "Trial {} finished in {} ms with loss {}",
                    completion.trial_number, completion.elapsed_ms, outcome.loss
                );
                strategy.report(&trial.parameters, outcome.loss);
                trial.mark_completed(outcome, Some(completion.elapsed_ms));
            }
            Err(error) => {
                warn!("Trial {} failed: {}", completion.trial_number, error);
                trial.mark_failed(error);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("trial panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("trial panicked: {s}")
    } else {
        "trial panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{RandomSearch, SearchSpace};
    use mb_types::MbError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn space() -> SearchSpace {
        SearchSpace::new().add_float("x", -1.0, 1.0)
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        assert!(matches!(
            ParallelTrials::new(0),
            Err(SearchExecutionError::InvalidParallelism { parallelism: 0 })
        ));
    }

    #[test]
    fn runs_exactly_the_budget() {
        let calls = AtomicUsize::new(0);
        let objective = |p: &ParameterSet| -> MbResult<TrialOutcome> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(TrialOutcome::new(p["x"].as_f64().unwrap().powi(2)))
        };

        let executor = ParallelTrials::new(2).unwrap();
        let mut strategy = RandomSearch::with_seed(space(), 1);
        let mut trials = Trials::new();
        executor.run(&objective, &mut strategy, 7, &mut trials).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 7);
        assert_eq!(trials.len(), 7);
        assert!(trials.iter().all(|t| t.worker_id.is_some()));
    }

    #[test]
    fn never_exceeds_parallelism() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let objective = {
            let active = active.clone();
            let peak = peak.clone();
            move |_: &ParameterSet| -> MbResult<TrialOutcome> {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(TrialOutcome::new(1.0))
            }
        };

        let executor = ParallelTrials::new(2).unwrap();
        let mut strategy = RandomSearch::with_seed(space(), 2);
        let mut trials = Trials::new();
        executor.run(&objective, &mut strategy, 8, &mut trials).unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(trials.len(), 8);
    }

    #[test]
    fn failures_and_panics_are_isolated() {
        let counter = AtomicUsize::new(0);
        let objective = |_: &ParameterSet| -> MbResult<TrialOutcome> {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(MbError::Internal("bad batch".into())),
                1 => panic!("exploded"),
                2 => Ok(TrialOutcome::new(f64::NAN)),
                _ => Ok(TrialOutcome::new(0.5)),
            }
        };

        let executor = ParallelTrials::new(1).unwrap();
        let mut strategy = RandomSearch::with_seed(space(), 3);
        let mut trials = Trials::new();
        executor.run(&objective, &mut strategy, 5, &mut trials).unwrap();

        assert_eq!(trials.count(crate::TrialStatus::Failed), 3);
        assert_eq!(trials.count(crate::TrialStatus::Completed), 2);
        let errors: Vec<&str> = trials.iter().filter_map(|t| t.error.as_deref()).collect();
        assert!(errors[0].contains("bad batch"));
        assert!(errors[1].contains("exploded"));
        assert!(errors[2].contains("non-finite"));
    }
}
