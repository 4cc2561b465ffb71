//! The reusable row buffer filled by every read.
//!
//! A [`Table`] is a thin wrapper over an Arrow [`RecordBatch`]. Columns are
//! reference counted, so cloning a table, slicing it, or joining a friend's
//! columns into it never copies row data. This is what lets a primary
//! iterator present its own columns and its friends' columns as one buffer.
//!
//! Typed access to a block goes through `serde_arrow`:
//!
//! ```
//! use chunkwise::Table;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Hit { energy: f64, channel: u32 }
//!
//! let t = Table::from_rows(&[Hit { energy: 1.5, channel: 3 }])?;
//! assert_eq!(t.to_rows::<Hit>()?, vec![Hit { energy: 1.5, channel: 3 }]);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::IterError;
use anyhow::{Context, Result, bail};
use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions, new_null_array};
use arrow::compute::concat_batches;
use arrow::datatypes::{Field, FieldRef, Schema, SchemaRef};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_arrow::{from_record_batch, to_record_batch};
use std::sync::Arc;

/// Columnar block of rows.
#[derive(Clone, Debug)]
pub struct Table {
    batch: RecordBatch,
}

impl Table {
    /// An empty table with the given columns.
    #[must_use]
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            batch: RecordBatch::new_empty(schema),
        }
    }

    #[must_use]
    pub fn from_batch(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Build a table from typed rows, inferring the Arrow schema from `T`.
    ///
    /// # Errors
    /// Fails if `T` can't be traced into an Arrow schema or a row doesn't fit it.
    pub fn from_rows<T: Serialize + Deserialize<'static>>(rows: &[T]) -> Result<Self> {
        let fields: Vec<FieldRef> = Vec::<FieldRef>::from_type::<T>(TracingOptions::default())
            .context("infer Arrow schema from row type")?;
        let batch = to_record_batch(&fields, &rows).context("convert rows to RecordBatch")?;
        Ok(Self { batch })
    }

    /// Deserialize every row of the table into `T`.
    ///
    /// # Errors
    /// Fails if the columns don't match the fields of `T`.
    pub fn to_rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        from_record_batch(&self.batch).context("deserialize table rows")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    #[must_use]
    pub fn as_batch(&self) -> &RecordBatch {
        &self.batch
    }

    #[must_use]
    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    /// Drop every row past `n`. A no-op when the table is already shorter.
    pub fn truncate(&mut self, n: usize) {
        if n < self.batch.num_rows() {
            self.batch = self.batch.slice(0, n);
        }
    }

    /// Truncate to `n` rows, or grow to `n` rows by padding with nulls.
    ///
    /// # Errors
    /// Fails if the padded batch can't be assembled.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        let len = self.batch.num_rows();
        if n <= len {
            self.truncate(n);
            return Ok(());
        }
        let schema = self.batch.schema();
        let nullable: Vec<Field> = schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone().with_nullable(true))
            .collect();
        let nullable = Arc::new(Schema::new_with_metadata(nullable, schema.metadata().clone()));
        let pad: Vec<ArrayRef> = schema
            .fields()
            .iter()
            .map(|f| new_null_array(f.data_type(), n - len))
            .collect();
        let pad = RecordBatch::try_new_with_options(
            Arc::clone(&nullable),
            pad,
            &RecordBatchOptions::new().with_row_count(Some(n - len)),
        )
        .context("build null padding")?;
        let current = self
            .batch
            .clone()
            .with_schema(Arc::clone(&nullable))
            .context("relax schema nullability")?;
        self.batch = concat_batches(&nullable, [&current, &pad]).context("pad table")?;
        Ok(())
    }

    /// Append the rows of `other` (same columns) after the rows of `self`.
    ///
    /// # Errors
    /// Fails if the column layouts differ.
    pub fn append(&mut self, other: &Table) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() && self.batch.schema().fields() == other.batch.schema().fields() {
            self.batch = other.batch.clone();
            return Ok(());
        }
        let schema = self.batch.schema();
        let other = if other.batch.schema().fields() == schema.fields() {
            other.batch.clone()
        } else {
            other
                .batch
                .clone()
                .with_schema(Arc::clone(&schema))
                .with_context(|| {
                    format!(
                        "append: columns {:?} don't match {:?}",
                        other.field_names(),
                        self.field_names()
                    )
                })?
        };
        self.batch = concat_batches(&schema, [&self.batch, &other]).context("append rows")?;
        Ok(())
    }

    /// Merge the columns of a same-length table into this one. Columns of
    /// `other` replace columns of `self` with the same name.
    ///
    /// # Errors
    /// Fails with [`IterError::FriendMismatch`] when the row counts differ.
    pub fn join(&mut self, other: &Table) -> Result<()> {
        if other.len() != self.len() {
            bail!(IterError::FriendMismatch(format!(
                "can't join a table of {} rows into one of {} rows",
                other.len(),
                self.len()
            )));
        }
        let schema = self.batch.schema();
        let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
        let mut columns: Vec<ArrayRef> = self.batch.columns().to_vec();
        for (field, column) in other.batch.schema().fields().iter().zip(other.batch.columns()) {
            if let Some(pos) = fields.iter().position(|f| f.name() == field.name()) {
                fields[pos] = Arc::clone(field);
                columns[pos] = Arc::clone(column);
            } else {
                fields.push(Arc::clone(field));
                columns.push(Arc::clone(column));
            }
        }
        let joined = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
        self.batch = RecordBatch::try_new_with_options(
            joined,
            columns,
            &RecordBatchOptions::new().with_row_count(Some(self.len())),
        )
        .context("join tables")?;
        Ok(())
    }
}
