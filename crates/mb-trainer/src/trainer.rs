//! The training callback evaluated by the search.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use mb_optimizer::{Objective, ParameterSet, TrialOutcome};
use mb_tracking::{ActiveRun, RunStatus, Tracker};
use mb_types::{MbResult, RunContext};

use crate::model::{accuracy, log_loss, roc_auc, LogisticRegression, TrainParams};
use crate::provider::ModelData;

/// Tag carrying the API host a trial reported to.
pub const HOST_TAG: &str = "model_builder.host";

/// Fits one model per suggestion and reports it as a nested tracking run.
///
/// Shared by every executor thread, so it holds only read-only state.
#[derive(Debug, Clone)]
pub struct Trainer {
    data: Arc<ModelData>,
    experiment_id: String,
    parent_run_id: Option<String>,
    context: RunContext,
    tracker: Arc<dyn Tracker>,
}

impl Trainer {
    pub fn new(
        data: ModelData,
        experiment_id: impl Into<String>,
        context: RunContext,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        Self {
            data: Arc::new(data),
            experiment_id: experiment_id.into(),
            parent_run_id: None,
            context,
            tracker,
        }
    }

    /// Nest every trial run under `run_id`.
    pub fn with_parent(mut self, run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(run_id.into());
        self
    }

    pub fn train(&self, params: &ParameterSet) -> MbResult<TrialOutcome> {
        let train_params = TrainParams::from_params(params)?;

        let mut tags = BTreeMap::new();
        tags.insert(HOST_TAG.to_string(), self.context.host_label().to_string());
        let run = ActiveRun::start(
            self.tracker.as_ref(),
            &self.experiment_id,
            self.parent_run_id.as_deref(),
            &tags,
        )?;

        for (key, value) in params {
            run.log_param(key, &value.to_string())?;
        }

        let model = LogisticRegression::fit(&self.data.x_train, &self.data.y_train, &train_params);
        let probs = model.predict_proba(&self.data.x_test);
        let loss = log_loss(&self.data.y_test, &probs);
        let acc = accuracy(&self.data.y_test, &probs);
        let auc = roc_auc(&self.data.y_test, &probs);

        run.log_metric("log_loss", loss, 0)?;
        run.log_metric("accuracy", acc, 0)?;
        run.log_metric("roc_auc", auc, 0)?;
        debug!("Run {}: log_loss {:.4}, auc {:.4}", run.run_id(), loss, auc);
        run.finish(RunStatus::Finished)?;

        Ok(TrialOutcome::new(loss)
            .with_metric("accuracy", acc)
            .with_metric("roc_auc", auc))
    }
}

impl Objective for Trainer {
    fn evaluate(&self, params: &ParameterSet) -> MbResult<TrialOutcome> {
        self.train(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_optimizer::ParameterValue;
    use mb_tracking::LocalTracker;

    fn model_data() -> ModelData {
        let x_train: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64 - 3.5]).collect();
        let y_train = (0..8).map(|i| if i >= 4 { 1.0 } else { 0.0 }).collect();
        ModelData {
            feature_names: vec!["x".to_string()],
            x_train,
            y_train,
            x_test: vec![vec![-2.0], vec![2.0]],
            y_test: vec![0.0, 1.0],
        }
    }

    fn suggestion(class_weight: &str) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("learning_rate".into(), ParameterValue::Float(0.3));
        params.insert("l2".into(), ParameterValue::Float(1e-4));
        params.insert("epochs".into(), ParameterValue::Int(100));
        params.insert(
            "class_weight".into(),
            ParameterValue::Json(serde_json::json!(class_weight)),
        );
        params
    }

    #[test]
    fn each_call_writes_one_nested_run() {
        let tracker = Arc::new(LocalTracker::in_memory());
        let exp = tracker.set_experiment("/exp").unwrap();
        let parent = tracker.start_run(&exp, None, &BTreeMap::new()).unwrap();

        let trainer = Trainer::new(model_data(), &exp, RunContext::local(), tracker.clone())
            .with_parent(&parent);
        let outcome = trainer.evaluate(&suggestion("balanced")).unwrap();

        assert!(outcome.loss.is_finite());
        assert_eq!(outcome.metrics.get("roc_auc"), Some(&1.0));

        let children = tracker.child_runs(&parent);
        assert_eq!(children.len(), 1);
        let child = &children[0];
        assert_eq!(child.status, RunStatus::Finished);
        assert_eq!(child.tags.get(HOST_TAG).map(String::as_str), Some("local"));
        assert_eq!(child.params.get("class_weight").map(String::as_str), Some("balanced"));
        assert_eq!(child.params.get("epochs").map(String::as_str), Some("100"));

        let logged = tracker.metrics_for_run(&child.run_id, "log_loss");
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].value, outcome.loss);
    }

    #[test]
    fn bad_parameters_fail_before_opening_a_run() {
        let tracker = Arc::new(LocalTracker::in_memory());
        let exp = tracker.set_experiment("/exp").unwrap();
        let trainer = Trainer::new(model_data(), &exp, RunContext::local(), tracker.clone());

        let mut params = suggestion("none");
        params.remove("epochs");
        assert!(trainer.evaluate(&params).is_err());
        assert!(tracker.runs_for_experiment(&exp).is_empty());
    }

    #[test]
    fn remote_host_is_tagged() {
        let tracker = Arc::new(LocalTracker::in_memory());
        let exp = tracker.set_experiment("/exp").unwrap();
        let context = RunContext::new("https://tracking.example.com", "token");
        let trainer = Trainer::new(model_data(), &exp, context, tracker.clone());

        trainer.evaluate(&suggestion("none")).unwrap();
        let runs = tracker.runs_for_experiment(&exp);
        assert_eq!(
            runs[0].tags.get(HOST_TAG).map(String::as_str),
            Some("https://tracking.example.com")
        );
    }
}
