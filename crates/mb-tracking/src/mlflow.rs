//! Blocking client for the MLflow 2.0 REST API.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use mb_types::RunContext;
use parking_lot::Mutex;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::records::{ExperimentId, RunId, RunStatus, PARENT_RUN_TAG};
use crate::tracker::{validate_experiment_name, Tracker, TrackingError, TrackingResult};
use mb_types::TrackingConfigError;

const API_PREFIX: &str = "api/2.0/mlflow";

pub struct MlflowTracker {
    base_url: String,
    token: Option<String>,
    client: Client,
    active: Mutex<Option<ExperimentId>>,
    closed: Mutex<HashSet<RunId>>,
}

impl std::fmt::Debug for MlflowTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlflowTracker")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl MlflowTracker {
    pub fn new(context: &RunContext) -> TrackingResult<Self> {
        let host = context.host.as_deref().ok_or(TrackingError::Http {
            message: "no tracking host configured".to_string(),
        })?;
        let client = Client::builder()
            .user_agent(concat!("model-builder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackingError::Http {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url: host.trim_end_matches('/').to_string(),
            token: context.token.clone(),
            client,
            active: Mutex::new(None),
            closed: Mutex::new(HashSet::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn post(&self, path: &str, body: &Value) -> TrackingResult<Value> {
        let url = endpoint(&self.base_url, path);
        debug!("POST {}", url);
        let request = self.authorize(self.client.post(&url).json(body));
        send(request)
    }

    fn get_experiment_by_name(&self, name: &str) -> TrackingResult<Option<ExperimentId>> {
        let url = endpoint(&self.base_url, "experiments/get-by-name");
        let request = self
            .authorize(self.client.get(&url))
            .query(&[("experiment_name", name)]);

        match send(request) {
            Ok(body) => parse_experiment_id(&body).map(Some),
            Err(TrackingError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn send(request: RequestBuilder) -> TrackingResult<Value> {
    let response = request.send().map_err(|e| TrackingError::Http {
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(TrackingError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let text = response.text().map_err(|e| TrackingError::Http {
        message: e.to_string(),
    })?;
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    Ok(serde_json::from_str(&text)?)
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), API_PREFIX, path)
}

fn tags_payload(tags: &BTreeMap<String, String>) -> Value {
    Value::Array(
        tags.iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect(),
    )
}

fn missing_field(field: &str, body: &Value) -> TrackingError {
    TrackingError::Api {
        status: StatusCode::OK.as_u16(),
        body: format!("response has no {}: {}", field, body),
    }
}

fn parse_experiment_id(body: &Value) -> TrackingResult<ExperimentId> {
    body.pointer("/experiment/experiment_id")
        .or_else(|| body.get("experiment_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing_field("experiment_id", body))
}

fn parse_run_id(body: &Value) -> TrackingResult<RunId> {
    body.pointer("/run/info/run_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing_field("run_id", body))
}

impl Tracker for MlflowTracker {
    fn set_experiment(&self, name: &str) -> TrackingResult<ExperimentId> {
        validate_experiment_name(name)?;

        let lookup = || -> TrackingResult<ExperimentId> {
            match self.get_experiment_by_name(name)? {
                Some(id) => Ok(id),
                None => {
                    let body = self.post("experiments/create", &json!({ "name": name }))?;
                    let id = parse_experiment_id(&body)?;
                    info!("Created MLflow experiment {} ({})", name, id);
                    Ok(id)
                }
            }
        };
        let experiment_id = lookup().map_err(|e| match e {
            TrackingError::Api { status, body } if status == StatusCode::BAD_REQUEST.as_u16() => {
                TrackingConfigError::InvalidExperimentName {
                    name: name.to_string(),
                    reason: body,
                }
                .into()
            }
            other => other,
        })?;

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
        if experiment_id.is_empty() {
            return Err(TrackingConfigError::ExperimentNotFound {
                experiment_id: experiment_id.to_string(),
            }
            .into());
        }

        let mut tags = tags.clone();
        if let Some(parent) = parent_run_id {
            tags.insert(PARENT_RUN_TAG.to_string(), parent.to_string());
        }
        let body = self.post(
            "runs/create",
            &json!({
                "experiment_id": experiment_id,
                "start_time": Utc::now().timestamp_millis(),
                "tags": tags_payload(&tags),
            }),
        )?;
        parse_run_id(&body)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> TrackingResult<()> {
        self.post(
            "runs/log-parameter",
            &json!({ "run_id": run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: u64) -> TrackingResult<()> {
        self.post(
            "runs/log-metric",
            &json!({
                "run_id": run_id,
                "key": key,
                "value": value,
                "timestamp": Utc::now().timestamp_millis(),
                "step": step,
            }),
        )?;
        Ok(())
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> TrackingResult<()> {
        if self.closed.lock().contains(run_id) {
            return Err(TrackingError::RunClosed {
                run_id: run_id.to_string(),
            });
        }
        self.post(
            "runs/update",
            &json!({
                "run_id": run_id,
                "status": status.as_mlflow(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )?;
        // Closed only once the server accepted the update.
        self.closed.lock().insert(run_id.to_string());
        Ok(())
    }

    fn backend(&self) -> &str {
        "mlflow"
    }
}
