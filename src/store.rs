//! The file-reader collaborator.
//!
//! The iterator never opens files itself. Everything it needs from the
//! physical format goes through [`RowStore`]: row counts, the average row
//! size (to turn a byte budget into a row capacity), an empty buffer with the
//! right columns, and reads of a contiguous or indexed span of rows appended
//! to that buffer.
//!
//! [`MemoryStore`] keeps `(file, group)` tables in memory and is what the
//! tests and fixtures use. The Parquet-backed store lives in
//! [`crate::io::parquet`].

use crate::config::FieldMask;
use crate::io::glob::{expand_path, expand_vars};
use crate::table::Table;
use anyhow::{Context, Result, anyhow};
use arrow::array::{RecordBatch, UInt64Array};
use arrow::compute::take_record_batch;
use glob::Pattern;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rows to read from one group of one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowSpan<'a> {
    /// `count` consecutive rows starting at row `start`.
    Range { start: u64, count: u64 },
    /// Exactly these rows, ascending and in range.
    Indices(&'a [u64]),
}

impl RowSpan<'_> {
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Range { count, .. } => *count,
            Self::Indices(idx) => idx.len() as u64,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Access to the physical rows of `(group, file)` dataset elements.
pub trait RowStore: Send + Sized {
    /// Expand a file pattern (variables, `~`, globs) relative to `base_path`.
    ///
    /// # Errors
    /// Fails on malformed patterns or unreadable directories.
    fn expand(&self, pattern: &str, base_path: Option<&Path>) -> Result<Vec<PathBuf>> {
        expand_path(pattern, base_path, None)
    }

    /// Maximum number of files to keep open at a time.
    fn set_keep_open(&mut self, _n: usize) {}

    /// Total physical rows in `group` of `file`.
    ///
    /// # Errors
    /// Fails if the group can't be found.
    fn row_count(&mut self, group: &str, file: &Path) -> Result<u64>;

    /// Average size of one row in bytes.
    ///
    /// # Errors
    /// Fails if the group can't be found.
    fn row_size_bytes(&mut self, group: &str, file: &Path) -> Result<u64>;

    /// An empty buffer holding the fields of `group` allowed by `field_mask`.
    /// `capacity` is the number of rows the buffer will be asked to hold.
    ///
    /// # Errors
    /// Fails if the group can't be found.
    fn allocate_buffer(
        &mut self,
        group: &str,
        file: &Path,
        capacity: usize,
        field_mask: &FieldMask,
    ) -> Result<Table>;

    /// Append the rows in `span` to `target` (so the first row lands at
    /// `target.len()`), returning the number of rows appended.
    ///
    /// # Errors
    /// Fails on I/O errors or if the rows don't fit the buffer's columns.
    fn read_rows(
        &mut self,
        group: &str,
        file: &Path,
        span: RowSpan<'_>,
        field_mask: &FieldMask,
        target: &mut Table,
    ) -> Result<usize>;

    /// A copy of this store's configuration with no open files, for use by
    /// an independent worker.
    #[must_use]
    fn detach(&self) -> Self;
}

/// In-memory store keyed by `(file, group)`.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<(PathBuf, String), RecordBatch>,
    reads: Arc<AtomicUsize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rows of `group` in `file`.
    pub fn insert(&mut self, file: impl Into<PathBuf>, group: impl Into<String>, table: Table) {
        self.tables
            .insert((file.into(), group.into()), table.into_batch());
    }

    #[must_use]
    pub fn with(mut self, file: impl Into<PathBuf>, group: impl Into<String>, table: Table) -> Self {
        self.insert(file, group, table);
        self
    }

    /// Number of `read_rows` calls served so far, by this store and every
    /// store detached from it.
    #[must_use]
    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn batch(&self, group: &str, file: &Path) -> Result<&RecordBatch> {
        self.tables
            .get(&(file.to_path_buf(), group.to_string()))
            .ok_or_else(|| anyhow!("group '{group}' not found in {}", file.display()))
    }
}

impl RowStore for MemoryStore {
    /// Match the pattern against registered file names instead of the disk.
    fn expand(&self, pattern: &str, base_path: Option<&Path>) -> Result<Vec<PathBuf>> {
        let pattern = expand_vars(pattern, None);
        let full = match base_path {
            Some(base) => base.join(&pattern),
            None => PathBuf::from(&pattern),
        };
        let full = full.to_string_lossy();
        let matcher =
            Pattern::new(&full).with_context(|| format!("invalid glob pattern: {full}"))?;
        let mut files: Vec<PathBuf> = self
            .tables
            .keys()
            .map(|(f, _)| f)
            .filter(|f| matcher.matches_path(f))
            .cloned()
            .collect();
        files.dedup();
        Ok(files)
    }

    fn row_count(&mut self, group: &str, file: &Path) -> Result<u64> {
        Ok(self.batch(group, file)?.num_rows() as u64)
    }

    fn row_size_bytes(&mut self, group: &str, file: &Path) -> Result<u64> {
        let b = self.batch(group, file)?;
        let rows = b.num_rows().max(1);
        Ok((b.get_array_memory_size() / rows).max(1) as u64)
    }

    fn allocate_buffer(
        &mut self,
        group: &str,
        file: &Path,
        _capacity: usize,
        field_mask: &FieldMask,
    ) -> Result<Table> {
        let b = self.batch(group, file)?;
        let projected = b
            .schema()
            .project(&field_mask.project(&b.schema()))
            .context("project buffer schema")?;
        Ok(Table::empty(Arc::new(projected)))
    }

    fn read_rows(
        &mut self,
        group: &str,
        file: &Path,
        span: RowSpan<'_>,
        field_mask: &FieldMask,
        target: &mut Table,
    ) -> Result<usize> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let b = self.batch(group, file)?;
        let b = b
            .project(&field_mask.project(&b.schema()))
            .context("project columns")?;
        let rows = match span {
            RowSpan::Range { start, count } => {
                let start = usize::try_from(start)?.min(b.num_rows());
                let count = usize::try_from(count)?.min(b.num_rows() - start);
                b.slice(start, count)
            }
            RowSpan::Indices(idx) => {
                let idx = UInt64Array::from(idx.to_vec());
                take_record_batch(&b, &idx)
                    .with_context(|| format!("take rows from {}:{group}", file.display()))?
            }
        };
        let n = rows.num_rows();
        target.append(&Table::from_batch(rows))?;
        Ok(n)
    }

    fn detach(&self) -> Self {
        self.clone()
    }
}
