use thiserror::Error;

/// Main error type for the ModelBuilder pipeline
#[derive(Error, Debug)]
pub enum MbError {
    #[error("Data access error: {0}")]
    DataAccess(#[from] DataAccessError),

    #[error("Data preparation error: {0}")]
    DataPreparation(#[from] DataPreparationError),

    #[error("Tracking configuration error: {0}")]
    TrackingConfig(#[from] TrackingConfigError),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Search execution error: {0}")]
    SearchExecution(#[from] SearchExecutionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while locating or materializing a table
#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Table not found: {database}.{table}")]
    TableNotFound { database: String, table: String },

    #[error("Invalid table location: {message}")]
    InvalidLocation { message: String },

    #[error("Failed to read {location}: {message}")]
    Unreadable { location: String, message: String },
}

/// Errors raised while turning a raw dataset into model-ready form
#[derive(Error, Debug)]
pub enum DataPreparationError {
    #[error("Missing column: {column}")]
    MissingColumn { column: String },

    #[error("Column {column} has unsupported type {data_type}")]
    UnsupportedType { column: String, data_type: String },

    #[error("Null value in column {column} at row {row}")]
    NullValue { column: String, row: usize },

    #[error("Insufficient rows: need at least {required}, got {rows}")]
    InsufficientRows { required: usize, rows: usize },

    #[error("Non-finite value in column {column} at row {row}")]
    NonFiniteValue { column: String, row: usize },

    #[error("Invalid label {value} at row {row}, expected 0 or 1")]
    InvalidLabel { value: f64, row: usize },

    #[error("No feature columns besides target {target}")]
    NoFeatures { target: String },

    #[error("Failed to convert column {column}: {message}")]
    Conversion { column: String, message: String },
}

/// Errors raised when selecting the tracking target
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingConfigError {
    #[error("Invalid experiment name {name:?}: {reason}")]
    InvalidExperimentName { name: String, reason: String },

    #[error("Experiment not found: {experiment_id}")]
    ExperimentNotFound { experiment_id: String },

    #[error("No active experiment, call set_experiment first")]
    NoActiveExperiment,
}

/// Failures surfacing from the search procedure as a whole
#[derive(Error, Debug)]
pub enum SearchExecutionError {
    #[error("Evaluation budget must be positive, got {max_evals}")]
    InvalidBudget { max_evals: usize },

    #[error("Parallelism must be positive, got {parallelism}")]
    InvalidParallelism { parallelism: usize },

    #[error("Search space has no parameters")]
    EmptySearchSpace,

    #[error("All {trials} trials failed, last error: {last_error}")]
    AllTrialsFailed { trials: usize, last_error: String },

    #[error("Trial executor failed: {message}")]
    Executor { message: String },
}

/// Result type alias for ModelBuilder operations
pub type MbResult<T> = Result<T, MbError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::MbError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataAccessError::TableNotFound {
            database: "db".to_string(),
            table: "t".to_string(),
        };
        assert_eq!(error.to_string(), "Table not found: db.t");

        let error = SearchExecutionError::AllTrialsFailed {
            trials: 3,
            last_error: "boom".to_string(),
        };
        assert!(error.to_string().contains("All 3 trials failed"));
        assert!(error.to_string().contains("boom"));
    }

    #[test]
    fn test_error_conversion() {
        let prep = DataPreparationError::MissingColumn {
            column: "Class".to_string(),
        };
        let mb_error: MbError = prep.into();

        match mb_error {
            MbError::DataPreparation(_) => (),
            _ => panic!("Expected DataPreparation error"),
        }

        let tracking: MbError = TrackingConfigError::NoActiveExperiment.into();
        assert!(matches!(tracking, MbError::TrackingConfig(_)));
    }

    #[test]
    fn test_macros() {
        let err = config_error!("max_evals must be positive, got {}", -1);
        assert!(matches!(err, MbError::Config(ref m) if m.contains("-1")));
    }
}
