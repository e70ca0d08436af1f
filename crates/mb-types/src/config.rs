use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{config_error, MbResult};

/// Default evaluation budget when `max_evals` is omitted.
pub const DEFAULT_MAX_EVALS: i64 = 20;

/// Default number of concurrently evaluated trials.
pub const DEFAULT_PARALLELISM: usize = 2;

/// Default label column.
pub const DEFAULT_TARGET: &str = "Class";

/// Location of the source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    pub database: String,
    pub table: String,
    /// Label column used by the data provider.
    #[serde(default = "default_target")]
    pub target: String,
}

/// Settings for one model-building run.
///
/// Immutable once loaded; every step of the task reads from the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub input: InputConfig,

    /// Tracking experiment name, e.g. `/Shared/fraud-detection`.
    pub experiment: String,

    /// Evaluation budget. Kept signed so that negative values can be
    /// reported as a configuration error instead of a parse failure.
    #[serde(default = "default_max_evals")]
    pub max_evals: i64,

    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Seed for data shuffling and parameter sampling.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_target() -> String {
    DEFAULT_TARGET.to_string()
}

fn default_max_evals() -> i64 {
    DEFAULT_MAX_EVALS
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

impl RunConfiguration {
    pub fn new(database: &str, table: &str, experiment: &str) -> Self {
        Self {
            input: InputConfig {
                database: database.to_string(),
                table: table.to_string(),
                target: default_target(),
            },
            experiment: experiment.to_string(),
            max_evals: DEFAULT_MAX_EVALS,
            parallelism: DEFAULT_PARALLELISM,
            seed: None,
        }
    }

    pub fn with_max_evals(mut self, max_evals: i64) -> Self {
        self.max_evals = max_evals;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.input.target = target.to_string();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Load a conf file; `.yaml`/`.yml` is parsed as YAML, everything else as JSON.
    pub fn from_path<P: AsRef<Path>>(path: P) -> MbResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let conf = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw)?,
            _ => Self::from_json_str(&raw)?,
        };
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_json_str(raw: &str) -> MbResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_yaml_str(raw: &str) -> MbResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| config_error!("Invalid YAML configuration: {}", e))
    }

    /// Fully qualified table name, `database.table`.
    pub fn table_name(&self) -> String {
        format!("{}.{}", self.input.database, self.input.table)
    }

    /// The evaluation budget as a trial count.
    pub fn evaluation_budget(&self) -> MbResult<usize> {
        if self.max_evals <= 0 {
            return Err(config_error!(
                "max_evals must be positive, got {}",
                self.max_evals
            ));
        }
        usize::try_from(self.max_evals)
            .map_err(|_| config_error!("max_evals out of range: {}", self.max_evals))
    }

    pub fn validate(&self) -> MbResult<()> {
        if self.input.database.trim().is_empty() {
            return Err(config_error!("input.database must not be empty"));
        }
        if self.input.table.trim().is_empty() {
            return Err(config_error!("input.table must not be empty"));
        }
        if self.input.target.trim().is_empty() {
            return Err(config_error!("input.target must not be empty"));
        }
        if self.parallelism == 0 {
            return Err(config_error!("parallelism must be positive"));
        }
        self.evaluation_budget()?;
        Ok(())
    }
}
