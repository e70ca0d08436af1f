use std::fs;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use mb_types::{DataAccessError, MbResult};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::Dataset;

/// Number of CSV records sampled for schema inference.
const CSV_INFER_RECORDS: usize = 1000;

/// Anything that can materialize `database.table` into memory.
pub trait TableReader: Send + Sync + std::fmt::Debug {
    /// Read the whole table. No pagination or streaming.
    fn read_table(&self, database: &str, table: &str) -> MbResult<Dataset>;

    /// Reader name for log lines.
    fn name(&self) -> &str;
}

/// On-disk layout of a resolved table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    Parquet(PathBuf),
    Csv(PathBuf),
    /// Directory of Parquet part files, read in file-name order.
    PartitionedParquet(PathBuf),
}

/// Local warehouse directory laid out as `<root>/<database>/<table>`.
#[derive(Debug, Clone)]
pub struct Warehouse {
    root: PathBuf,
}

impl Warehouse {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locate the files backing `database.table`.
    pub fn resolve(&self, database: &str, table: &str) -> MbResult<TableSource> {
        validate_identifier("database", database)?;
        validate_identifier("table", table)?;

        let db_dir = self.root.join(database);
        let partitioned = db_dir.join(table);
        if partitioned.is_dir() {
            return Ok(TableSource::PartitionedParquet(partitioned));
        }

        let parquet = db_dir.join(format!("{}.parquet", table));
        if parquet.is_file() {
            return Ok(TableSource::Parquet(parquet));
        }

        let csv = db_dir.join(format!("{}.csv", table));
        if csv.is_file() {
            return Ok(TableSource::Csv(csv));
        }

        Err(DataAccessError::TableNotFound {
            database: database.to_string(),
            table: table.to_string(),
        }
        .into())
    }

    /// Write a record batch as `<root>/<database>/<table>.parquet`.
    pub fn write_parquet(&self, database: &str, table: &str, batch: &RecordBatch) -> MbResult<PathBuf> {
        validate_identifier("database", database)?;
        validate_identifier("table", table)?;

        let db_dir = self.root.join(database);
        fs::create_dir_all(&db_dir)?;
        let path = db_dir.join(format!("{}.parquet", table));

        let file = fs::File::create(&path)?;
        let unwritable = |e: parquet::errors::ParquetError| DataAccessError::Unreadable {
            location: path.display().to_string(),
            message: format!("Failed to write Parquet file: {}", e),
        };
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).map_err(unwritable)?;
        writer.write(batch).map_err(unwritable)?;
        writer.close().map_err(unwritable)?;

        tracing::debug!("Wrote {} rows to {}", batch.num_rows(), path.display());
        Ok(path)
    }

    fn read_parquet_file(path: &Path) -> MbResult<(SchemaRef, Vec<RecordBatch>)> {
        let file = fs::File::open(path).map_err(|e| io_unreadable(path, e))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            DataAccessError::Unreadable {
                location: path.display().to_string(),
                message: format!("Failed to create Parquet reader: {}", e),
            }
        })?;
        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| DataAccessError::Unreadable {
            location: path.display().to_string(),
            message: format!("Failed to build Parquet reader: {}", e),
        })?;

        let mut batches = Vec::new();
        for batch_result in reader {
            let batch = batch_result.map_err(|e| DataAccessError::Unreadable {
                location: path.display().to_string(),
                message: format!("Failed to read Parquet batch: {}", e),
            })?;
            batches.push(batch);
        }
        Ok((schema, batches))
    }

    fn read_partitioned(dir: &Path) -> MbResult<(SchemaRef, Vec<RecordBatch>)> {
        let mut parts = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| io_unreadable(dir, e))? {
            let path = entry.map_err(|e| io_unreadable(dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
                parts.push(path);
            }
        }
        parts.sort();

        let Some((first, rest)) = parts.split_first() else {
            return Err(DataAccessError::InvalidLocation {
                message: format!("{} contains no Parquet part files", dir.display()),
            }
            .into());
        };

        let (schema, mut batches) = Self::read_parquet_file(first)?;
        for part in rest {
            let (part_schema, part_batches) = Self::read_parquet_file(part)?;
            if part_schema.fields() != schema.fields() {
                return Err(DataAccessError::Unreadable {
                    location: part.display().to_string(),
                    message: "Part file schema differs from the first part".to_string(),
                }
                .into());
            }
            batches.extend(part_batches);
        }
        Ok((schema, batches))
    }

    fn read_csv_file(path: &Path) -> MbResult<(SchemaRef, Vec<RecordBatch>)> {
        let unreadable = |message: String| DataAccessError::Unreadable {
            location: path.display().to_string(),
            message,
        };

        let mut file = fs::File::open(path).map_err(|e| io_unreadable(path, e))?;
        let (schema, _) = Format::default()
            .with_header(true)
            .infer_schema(&mut file, Some(CSV_INFER_RECORDS))
            .map_err(|e| unreadable(format!("Failed to infer CSV schema: {}", e)))?;
        file.rewind().map_err(|e| io_unreadable(path, e))?;

        let schema = Arc::new(schema);
        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .build(file)
            .map_err(|e| unreadable(format!("Failed to build CSV reader: {}", e)))?;

        let mut batches = Vec::new();
        for batch_result in reader {
            batches.push(batch_result.map_err(|e| unreadable(format!("Failed to read CSV batch: {}", e)))?);
        }
        Ok((schema, batches))
    }
}

fn io_unreadable(path: &Path, err: std::io::Error) -> DataAccessError {
    DataAccessError::Unreadable {
        location: path.display().to_string(),
        message: err.to_string(),
    }
}

impl TableReader for Warehouse {
    fn read_table(&self, database: &str, table: &str) -> MbResult<Dataset> {
        let source = self.resolve(database, table)?;
        tracing::debug!("Resolved {}.{} to {:?}", database, table, source);

        let (schema, batches) = match &source {
            TableSource::Parquet(path) => Self::read_parquet_file(path)?,
            TableSource::Csv(path) => Self::read_csv_file(path)?,
            TableSource::PartitionedParquet(dir) => Self::read_partitioned(dir)?,
        };

        Dataset::from_batches(format!("{}.{}", database, table), schema, &batches)
    }

    fn name(&self) -> &str {
        "local-warehouse"
    }
}

fn validate_identifier(kind: &str, value: &str) -> Result<(), DataAccessError> {
    let bad = value.trim().is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_control);
    if bad {
        return Err(DataAccessError::InvalidLocation {
            message: format!("Invalid {} name: {:?}", kind, value),
        });
    }
    Ok(())
}
