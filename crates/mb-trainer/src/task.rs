//! The model-builder job: configure tracking, load the table, search.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use mb_data::{Dataset, TableReader};
use mb_optimizer::{fmin, ParallelTrials, ParameterSet, TpeConfig, TpeSearch, Trials};
use mb_tracking::{ActiveRun, ExperimentId, RunId, RunStatus, Tracker};
use mb_types::{MbResult, RunConfiguration, RunContext, TrackingConfigError};

use crate::provider::Provider;
use crate::trainer::{Trainer, HOST_TAG};

/// What one `train_model` call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub run_id: RunId,
    pub best_params: ParameterSet,
    pub best_loss: f64,
    pub trials: Trials,
}

#[derive(Debug)]
pub struct ModelBuilderTask {
    config: RunConfiguration,
    context: RunContext,
    reader: Arc<dyn TableReader>,
    tracker: Arc<dyn Tracker>,
    provider: Provider,
}

impl ModelBuilderTask {
    pub fn new(
        config: RunConfiguration,
        context: RunContext,
        reader: Arc<dyn TableReader>,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        let provider = config.seed.map(Provider::new).unwrap_or_default();
        Self {
            config,
            context,
            reader,
            tracker,
            provider,
        }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Materialize the configured input table.
    pub fn read_data(&self) -> MbResult<Dataset> {
        let input = &self.config.input;
        info!("Reading dataset from {}", self.config.table_name());
        let data = self.reader.read_table(&input.database, &input.table)?;
        info!("Loaded dataset, total size: {}", data.num_rows());
        Ok(data)
    }

    /// Make the configured experiment the active tracking target.
    pub fn setup_tracking(&self) -> MbResult<ExperimentId> {
        let experiment_id = self.tracker.set_experiment(&self.config.experiment)?;
        info!(
            "Tracking experiment {} ({}) on {}",
            self.config.experiment,
            experiment_id,
            self.tracker.backend()
        );
        Ok(experiment_id)
    }

    /// Search for the best hyperparameters inside a single tracking run.
    ///
    /// The run is closed `Finished` on success and `Failed` on any error,
    /// including a panic unwinding through this frame.
    pub fn train_model(&self, dataset: &Dataset) -> MbResult<TrainingSummary> {
        info!("Starting the model training");
        let budget = self.config.evaluation_budget()?;
        let experiment_id = self
            .tracker
            .active_experiment()
            .ok_or(TrackingConfigError::NoActiveExperiment)?;
        let model_data = self.provider.get_data(dataset, &self.config.input.target)?;
        let executor = ParallelTrials::new(self.config.parallelism)?;

        let mut tags = BTreeMap::new();
        tags.insert(HOST_TAG.to_string(), self.context.host_label().to_string());
        tags.insert("model_builder.table".to_string(), self.config.table_name());
        let run = ActiveRun::start(self.tracker.as_ref(), &experiment_id, None, &tags)?;
        let run_id = run.run_id().to_string();

        let trainer = Trainer::new(
            model_data,
            experiment_id.as_str(),
            self.context.clone(),
            self.tracker.clone(),
        )
        .with_parent(run_id.as_str());

        let space = Provider::search_space();
        let mut strategy = match self.config.seed {
            Some(seed) => TpeSearch::with_seed(space.clone(), TpeConfig::default(), seed),
            None => TpeSearch::new(space.clone(), TpeConfig::default()),
        };
        let outcome = fmin(&trainer, &space, &mut strategy, budget, &executor)?;
        info!("Best params {:?}", outcome.best_params);

        for (key, value) in &outcome.best_params {
            run.log_param(key, &value.to_string())?;
        }
        run.log_metric("best_loss", outcome.best_loss, 0)?;
        run.log_metric("trials", outcome.trials.len() as f64, 0)?;
        run.finish(RunStatus::Finished)?;
        info!("Model training finished");

        Ok(TrainingSummary {
            run_id,
            best_params: outcome.best_params,
            best_loss: outcome.best_loss,
            trials: outcome.trials,
        })
    }

    /// Run `setup_tracking`, `read_data` and `train_model` in order.
    pub fn launch(&self) -> MbResult<TrainingSummary> {
        info!("Launching model builder job");
        self.setup_tracking()?;
        let data = self.read_data()?;
        let summary = self.train_model(&data)?;
        info!("Model builder job finished");
        Ok(summary)
    }
}
