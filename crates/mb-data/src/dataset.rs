use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use mb_types::{DataAccessError, MbResult};

/// A fully materialized, read-only table snapshot.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    batch: RecordBatch,
}

impl Dataset {
    pub fn new(name: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            name: name.into(),
            batch,
        }
    }

    /// Concatenate record batches that share `schema` into one dataset.
    pub fn from_batches(
        name: impl Into<String>,
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> MbResult<Self> {
        let name = name.into();
        let batch = concat_batches(&schema, batches).map_err(|e| DataAccessError::Unreadable {
            location: name.clone(),
            message: format!("Failed to combine record batches: {}", e),
        })?;
        Ok(Self { name, batch })
    }

    /// Fully qualified table name the snapshot was read from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch(values: Vec<f64>, labels: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("amount", DataType::Float64, false),
            Field::new("Class", DataType::Int64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(values)),
                Arc::new(Int64Array::from(labels)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_batches_concatenates_rows() {
        let a = batch(vec![1.0, 2.0], vec![0, 1]);
        let b = batch(vec![3.0], vec![1]);
        let ds = Dataset::from_batches("db.t", a.schema(), &[a, b]).unwrap();

        assert_eq!(ds.num_rows(), 3);
        assert_eq!(ds.num_columns(), 2);
        assert_eq!(ds.name(), "db.t");
        assert_eq!(ds.column_names(), vec!["amount", "Class"]);
        assert!(ds.column("Class").is_some());
        assert!(ds.column("missing").is_none());
    }

    #[test]
    fn empty_batch_list_yields_empty_dataset() {
        let schema = batch(vec![], vec![]).schema();
        let ds = Dataset::from_batches("db.empty", schema, &[]).unwrap();
        assert!(ds.is_empty());
    }
}
