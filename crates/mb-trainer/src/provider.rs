//! Turns a raw dataset into model-ready train/test matrices.

use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mb_data::Dataset;
use mb_optimizer::SearchSpace;
use mb_types::{DataPreparationError, MbResult};

/// Share of rows held out for evaluation.
pub const TEST_FRACTION: f64 = 0.2;

const DEFAULT_SPLIT_SEED: u64 = 42;

/// Standardized features and 0/1 labels split into train and test sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    pub feature_names: Vec<String>,
    pub x_train: Vec<Vec<f64>>,
    pub y_train: Vec<f64>,
    pub x_test: Vec<Vec<f64>>,
    pub y_test: Vec<f64>,
}

impl ModelData {
    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Provider {
    seed: u64,
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SPLIT_SEED,
        }
    }
}

impl Provider {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// The hyperparameter domain explored for the logistic model.
    pub fn search_space() -> SearchSpace {
        SearchSpace::new()
            .add_log_uniform("learning_rate", 1e-3, 1.0)
            .add_log_uniform("l2", 1e-6, 1e-1)
            .add_int("epochs", 10, 200)
            .add_choice("class_weight", vec!["balanced".into(), "none".into()])
    }

    /// Split `dataset` into features and the `target` label, shuffle, hold
    /// out [`TEST_FRACTION`] of the rows and standardize with train statistics.
    ///
    /// Non-numeric columns other than the target are not used as features.
    pub fn get_data(&self, dataset: &Dataset, target: &str) -> MbResult<ModelData> {
        let rows = dataset.num_rows();
        if rows < 2 {
            return Err(DataPreparationError::InsufficientRows { required: 2, rows }.into());
        }

        let target_array = dataset
            .column(target)
            .ok_or_else(|| DataPreparationError::MissingColumn {
                column: target.to_string(),
            })?;
        if !is_numeric(target_array.data_type()) {
            return Err(DataPreparationError::UnsupportedType {
                column: target.to_string(),
                data_type: target_array.data_type().to_string(),
            }
            .into());
        }
        let labels = to_f64(target, target_array)?;
        if let Some((row, value)) = labels
            .iter()
            .enumerate()
            .find(|(_, v)| **v != 0.0 && **v != 1.0)
        {
            return Err(DataPreparationError::InvalidLabel { value: *value, row }.into());
        }

        let mut feature_names = Vec::new();
        let mut columns = Vec::new();
        for field in dataset.schema().fields() {
            if field.name() == target {
                continue;
            }
            if !is_numeric(field.data_type()) {
                debug!("Skipping non-numeric column {} ({})", field.name(), field.data_type());
                continue;
            }
            let Some(array) = dataset.column(field.name()) else {
                continue;
            };
            columns.push(to_f64(field.name(), array)?);
            feature_names.push(field.name().clone());
        }
        if columns.is_empty() {
            return Err(DataPreparationError::NoFeatures {
                target: target.to_string(),
            }
            .into());
        }

        let mut order: Vec<usize> = (0..rows).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(self.seed));

        let test_rows = ((rows as f64 * TEST_FRACTION).round() as usize).clamp(1, rows - 1);
        let (test_idx, train_idx) = order.split_at(test_rows);

        let gather = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
            let x = idx
                .iter()
                .map(|&r| columns.iter().map(|c| c[r]).collect())
                .collect();
            let y = idx.iter().map(|&r| labels[r]).collect();
            (x, y)
        };
        let (mut x_train, y_train) = gather(train_idx);
        let (mut x_test, y_test) = gather(test_idx);

        let (means, stds) = column_stats(&x_train, columns.len());
        standardize(&mut x_train, &means, &stds);
        standardize(&mut x_test, &means, &stds);

        info!(
            "Prepared {} features: {} train rows, {} test rows",
            feature_names.len(),
            y_train.len(),
            y_test.len()
        );

        Ok(ModelData {
            feature_names,
            x_train,
            y_train,
            x_test,
            y_test,
        })
    }
}

fn is_numeric(data_type: &DataType) -> bool {
    data_type.is_numeric() || matches!(data_type, DataType::Boolean)
}

fn to_f64(column: &str, array: &ArrayRef) -> MbResult<Vec<f64>> {
    if array.null_count() > 0 {
        let row = (0..array.len()).find(|&i| array.is_null(i)).unwrap_or(0);
        return Err(DataPreparationError::NullValue {
            column: column.to_string(),
            row,
        }
        .into());
    }

    let casted = cast(array, &DataType::Float64).map_err(|e| DataPreparationError::Conversion {
        column: column.to_string(),
        message: e.to_string(),
    })?;
    let values = casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| DataPreparationError::Conversion {
            column: column.to_string(),
            message: "cast did not produce Float64".to_string(),
        })?;
    if let Some(row) = values.values().iter().position(|v| !v.is_finite()) {
        return Err(DataPreparationError::NonFiniteValue {
            column: column.to_string(),
            row,
        }
        .into());
    }
    Ok(values.values().to_vec())
}

fn column_stats(x: &[Vec<f64>], width: usize) -> (Vec<f64>, Vec<f64>) {
    let n = x.len().max(1) as f64;
    let mut means = vec![0.0; width];
    for row in x {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v / n;
        }
    }
    let mut stds = vec![0.0; width];
    for row in x {
        for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
            *s += (v - m).powi(2) / n;
        }
    }
    // Constant columns are only centered.
    let stds = stds
        .into_iter()
        .map(|var| if var > 0.0 { var.sqrt() } else { 1.0 })
        .collect();
    (means, stds)
}

fn standardize(x: &mut [Vec<f64>], means: &[f64], stds: &[f64]) {
    for row in x {
        for ((v, m), s) in row.iter_mut().zip(means).zip(stds) {
            *v = (*v - m) / s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BooleanArray, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use mb_types::MbError;
    use std::sync::Arc;

    fn dataset(rows: usize) -> Dataset {
        let schema = Arc::new(Schema::new(vec![
            Field::new("amount", DataType::Float64, false),
            Field::new("count", DataType::Int64, false),
            Field::new("merchant", DataType::Utf8, false),
            Field::new("Class", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from_iter_values((0..rows).map(|i| i as f64 * 10.0))),
                Arc::new(Int64Array::from_iter_values((0..rows).map(|i| (i % 3) as i64))),
                Arc::new(StringArray::from_iter_values((0..rows).map(|i| format!("m{i}")))),
                Arc::new(Int64Array::from_iter_values((0..rows).map(|i| (i % 2) as i64))),
            ],
        )
        .unwrap();
        Dataset::new("db.t", batch)
    }

    fn single_column(field: Field, array: ArrayRef) -> Dataset {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Float64, false),
            field,
        ]));
        let rows = array.len();
        let x = Arc::new(Float64Array::from_iter_values((0..rows).map(|i| i as f64)));
        Dataset::new("db.t", RecordBatch::try_new(schema, vec![x, array]).unwrap())
    }

    #[test]
    fn splits_and_standardizes() {
        let data = Provider::default().get_data(&dataset(10), "Class").unwrap();

        assert_eq!(data.feature_names, vec!["amount", "count"]);
        assert_eq!(data.y_train.len(), 8);
        assert_eq!(data.y_test.len(), 2);
        assert!(data.x_train.iter().all(|row| row.len() == 2));

        let mean: f64 = data.x_train.iter().map(|r| r[0]).sum::<f64>() / 8.0;
        assert!(mean.abs() < 1e-9);
    }

    #[test]
    fn split_is_reproducible() {
        let a = Provider::new(7).get_data(&dataset(20), "Class").unwrap();
        let b = Provider::new(7).get_data(&dataset(20), "Class").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn two_rows_keep_one_on_each_side() {
        let data = Provider::default().get_data(&dataset(2), "Class").unwrap();
        assert_eq!(data.y_train.len(), 1);
        assert_eq!(data.y_test.len(), 1);
    }

    #[test]
    fn boolean_labels_are_accepted() {
        let labels: ArrayRef = Arc::new(BooleanArray::from(vec![true, false, true, false, true]));
        let data = Provider::default()
            .get_data(&single_column(Field::new("Class", DataType::Boolean, false), labels), "Class")
            .unwrap();
        assert_eq!(data.y_train.len() + data.y_test.len(), 5);
    }

    #[test]
    fn missing_target_is_rejected() {
        assert!(matches!(
            Provider::default().get_data(&dataset(10), "label"),
            Err(MbError::DataPreparation(DataPreparationError::MissingColumn { .. }))
        ));
    }

    #[test]
    fn string_target_is_rejected() {
        assert!(matches!(
            Provider::default().get_data(&dataset(10), "merchant"),
            Err(MbError::DataPreparation(DataPreparationError::UnsupportedType { .. }))
        ));
    }

    #[test]
    fn too_few_rows_are_rejected() {
        assert!(matches!(
            Provider::default().get_data(&dataset(1), "Class"),
            Err(MbError::DataPreparation(DataPreparationError::InsufficientRows { rows: 1, .. }))
        ));
    }

    #[test]
    fn non_binary_labels_are_rejected() {
        let labels: ArrayRef = Arc::new(Int64Array::from(vec![0, 1, 2, 0]));
        let result = Provider::default()
            .get_data(&single_column(Field::new("Class", DataType::Int64, false), labels), "Class");
        assert!(matches!(
            result,
            Err(MbError::DataPreparation(DataPreparationError::InvalidLabel { row: 2, .. }))
        ));
    }

    #[test]
    fn nulls_are_rejected() {
        let labels: ArrayRef = Arc::new(Int64Array::from(vec![Some(0), None, Some(1)]));
        let result = Provider::default()
            .get_data(&single_column(Field::new("Class", DataType::Int64, true), labels), "Class");
        assert!(matches!(
            result,
            Err(MbError::DataPreparation(DataPreparationError::NullValue { row: 1, .. }))
        ));
    }

    #[test]
    fn non_finite_features_are_rejected() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("amount", DataType::Float64, false),
            Field::new("Class", DataType::Int64, false),
        ]));
        let amounts = vec![1.0, 2.0, 3.0, f64::NAN, 5.0, f64::INFINITY];
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(amounts)),
                Arc::new(Int64Array::from(vec![0, 1, 0, 1, 0, 1])),
            ],
        )
        .unwrap();

        let result = Provider::default().get_data(&Dataset::new("db.t", batch), "Class");
        match result {
            Err(MbError::DataPreparation(DataPreparationError::NonFiniteValue { column, row })) => {
                assert_eq!(column, "amount");
                assert_eq!(row, 3);
            }
            other => panic!("expected NonFiniteValue, got {other:?}"),
        }
    }

    #[test]
    fn target_only_table_has_no_features() {
        let schema = Arc::new(Schema::new(vec![Field::new("Class", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![0, 1, 0, 1]))],
        )
        .unwrap();
        assert!(matches!(
            Provider::default().get_data(&Dataset::new("db.t", batch), "Class"),
            Err(MbError::DataPreparation(DataPreparationError::NoFeatures { .. }))
        ));
    }

    #[test]
    fn search_space_has_four_dimensions() {
        let space = Provider::search_space();
        assert_eq!(space.len(), 4);
        assert!(space.validate().is_ok());
        for name in ["learning_rate", "l2", "epochs", "class_weight"] {
            assert!(space.get(name).is_some(), "missing {name}");
        }
    }
}
