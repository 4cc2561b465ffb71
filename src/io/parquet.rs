//! Parquet-backed [`RowStore`].
//!
//! A file is one Parquet file. A group names the table inside it:
//!
//! - `"/"` (or `""`) is the root table, whose fields are the file's top-level columns;
//! - `"ch1"` is the top-level struct column `ch1`, whose children are the fields;
//! - `"ch1/hit"` descends further through nested struct columns.
//!
//! All groups of one file therefore share the file's row count.
//!
//! Reads push the field mask down as a [`ProjectionMask`] and the requested
//! rows down as a [`RowSelection`], so unselected rows and fields are never
//! decoded. Reader metadata for at most `keep_open` files is cached; the
//! oldest entry is evicted first.
//!
//! [`write_parquet_groups`] writes files in this layout and is what the
//! tests use to build fixtures.

use crate::config::FieldMask;
use crate::store::{RowSpan, RowStore};
use crate::table::Table;
use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{Array, ArrayRef, AsArray, RecordBatch, StructArray};
use arrow::datatypes::{DataType, Field, Fields, Schema};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder, RowSelection,
    RowSelector,
};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

struct OpenFile {
    file: File,
    meta: ArrowReaderMetadata,
}

/// Reads `(group, file)` tables out of Parquet files.
pub struct ParquetStore {
    keep_open: usize,
    batch_size: usize,
    open: VecDeque<(PathBuf, OpenFile)>,
}

impl Default for ParquetStore {
    fn default() -> Self {
        Self {
            keep_open: 10,
            batch_size: 64 * 1024,
            open: VecDeque::new(),
        }
    }
}

impl ParquetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_keep_open(mut self, keep_open: usize) -> Self {
        self.keep_open = keep_open.max(1);
        self
    }

    /// Number of files whose metadata is currently cached.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.open.len()
    }

    fn open(&mut self, path: &Path) -> Result<&OpenFile> {
        let pos = if let Some(pos) = self.open.iter().position(|(p, _)| p == path) {
            pos
        } else {
            let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
            let meta = ArrowReaderMetadata::load(&file, ArrowReaderOptions::new())
                .with_context(|| format!("read parquet metadata of {}", path.display()))?;
            while self.open.len() >= self.keep_open {
                self.open.pop_front();
            }
            self.open.push_back((path.to_path_buf(), OpenFile { file, meta }));
            self.open.len() - 1
        };
        Ok(&self.open[pos].1)
    }
}

fn group_path(group: &str) -> Vec<&str> {
    group.split('/').filter(|s| !s.is_empty()).collect()
}

/// Fields of `group` given the file's root schema.
fn group_fields(schema: &Schema, group: &str, file: &Path) -> Result<Fields> {
    let mut fields = schema.fields().clone();
    for seg in group_path(group) {
        let field = fields
            .iter()
            .find(|f| f.name() == seg)
            .ok_or_else(|| anyhow!("group '{group}' not found in {}", file.display()))?;
        match field.data_type() {
            DataType::Struct(children) => fields = children.clone(),
            other => bail!(
                "'{seg}' in {} is a {other} column, not a group",
                file.display()
            ),
        }
    }
    Ok(fields)
}

fn masked_schema(fields: &Fields, field_mask: &FieldMask) -> Schema {
    Schema::new(
        fields
            .iter()
            .filter(|f| field_mask.allows(f.name()))
            .cloned()
            .collect::<Vec<_>>(),
    )
}

/// Selectors reading `span` out of a file of `total` rows.
fn row_selection(span: RowSpan<'_>, total: usize) -> Result<RowSelection> {
    let mut selectors = Vec::new();
    let mut pos = 0usize;
    let mut push = |start: usize, end: usize, pos: &mut usize| {
        if start > *pos {
            selectors.push(RowSelector::skip(start - *pos));
        }
        if end > start {
            selectors.push(RowSelector::select(end - start));
        }
        *pos = end;
    };
    match span {
        RowSpan::Range { start, count } => {
            let start = usize::try_from(start)?.min(total);
            let end = start.saturating_add(usize::try_from(count)?).min(total);
            push(start, end, &mut pos);
        }
        RowSpan::Indices(idx) => {
            let mut run: Option<(usize, usize)> = None;
            for &i in idx {
                let i = usize::try_from(i)?;
                if i >= total {
                    break;
                }
                run = match run {
                    Some((a, b)) if i < b => Some((a, b)),
                    Some((a, b)) if i == b => Some((a, b + 1)),
                    Some((a, b)) => {
                        push(a, b, &mut pos);
                        Some((i, i + 1))
                    }
                    None => Some((i, i + 1)),
                };
            }
            if let Some((a, b)) = run {
                push(a, b, &mut pos);
            }
        }
    }
    if total > pos {
        selectors.push(RowSelector::skip(total - pos));
    }
    Ok(selectors.into())
}

/// Pull the group's table out of a batch of projected root columns.
fn extract_group(
    batch: &RecordBatch,
    group: &[&str],
    field_mask: &FieldMask,
) -> Result<RecordBatch> {
    let Some((first, rest)) = group.split_first() else {
        return Ok(batch.clone());
    };
    let mut column: ArrayRef = batch
        .column_by_name(first)
        .cloned()
        .ok_or_else(|| anyhow!("group column '{first}' missing from batch"))?;
    for seg in rest {
        let parent = column
            .as_struct_opt()
            .ok_or_else(|| anyhow!("'{seg}' parent is not a struct column"))?;
        column = parent
            .column_by_name(seg)
            .cloned()
            .ok_or_else(|| anyhow!("group column '{seg}' missing from batch"))?;
    }
    let table: &StructArray = column
        .as_struct_opt()
        .ok_or_else(|| anyhow!("group '{}' is not a struct column", group.join("/")))?;
    let table = RecordBatch::from(table.clone());
    table
        .project(&field_mask.project(&table.schema()))
        .context("project group fields")
}

impl RowStore for ParquetStore {
    fn set_keep_open(&mut self, n: usize) {
        self.keep_open = n.max(1);
        while self.open.len() > self.keep_open {
            self.open.pop_front();
        }
    }

    fn row_count(&mut self, group: &str, file: &Path) -> Result<u64> {
        let f = self.open(file)?;
        group_fields(f.meta.schema(), group, file)?;
        Ok(u64::try_from(f.meta.metadata().file_metadata().num_rows())?)
    }

    fn row_size_bytes(&mut self, group: &str, file: &Path) -> Result<u64> {
        let f = self.open(file)?;
        group_fields(f.meta.schema(), group, file)?;
        let md = f.meta.metadata();
        let rows = md.file_metadata().num_rows().max(1);
        let bytes: i64 = md.row_groups().iter().map(|rg| rg.total_byte_size()).sum();
        Ok(u64::try_from(bytes / rows)?.max(1))
    }

    fn allocate_buffer(
        &mut self,
        group: &str,
        file: &Path,
        _capacity: usize,
        field_mask: &FieldMask,
    ) -> Result<Table> {
        let f = self.open(file)?;
        let fields = group_fields(f.meta.schema(), group, file)?;
        Ok(Table::empty(Arc::new(masked_schema(&fields, field_mask))))
    }

    fn read_rows(
        &mut self,
        group: &str,
        file: &Path,
        span: RowSpan<'_>,
        field_mask: &FieldMask,
        target: &mut Table,
    ) -> Result<usize> {
        let batch_size = self.batch_size;
        let f = self.open(file)?;
        let total = usize::try_from(f.meta.metadata().file_metadata().num_rows())?;
        let schema = Arc::clone(f.meta.schema());
        group_fields(&schema, group, file)?;
        let segments = group_path(group);

        let roots: Vec<usize> = match segments.first() {
            None => field_mask.project(&schema),
            Some(first) => schema.index_of(first).map(|i| vec![i])?,
        };
        let input = f
            .file
            .try_clone()
            .with_context(|| format!("reopen {}", file.display()))?;
        let builder = ParquetRecordBatchReaderBuilder::new_with_metadata(input, f.meta.clone());
        let projection = ProjectionMask::roots(builder.parquet_schema(), roots);
        let reader = builder
            .with_projection(projection)
            .with_row_selection(row_selection(span, total)?)
            .with_batch_size(batch_size)
            .build()
            .with_context(|| format!("build reader for {}:{group}", file.display()))?;

        trace!(file = %file.display(), group, rows = span.len(), "parquet read");
        let mut n = 0;
        for batch in reader {
            let batch = batch.with_context(|| format!("decode {}:{group}", file.display()))?;
            let rows = extract_group(&batch, &segments, field_mask)?;
            n += rows.num_rows();
            target.append(&Table::from_batch(rows))?;
        }
        Ok(n)
    }

    fn detach(&self) -> Self {
        Self {
            keep_open: self.keep_open,
            batch_size: self.batch_size,
            open: VecDeque::new(),
        }
    }
}

/// Write `(group, table)` pairs into one Parquet file.
///
/// A single root group (`"/"`) is written as the file's top-level columns.
/// Otherwise each group becomes a top-level struct column; groups must be
/// single path segments and all tables must have the same number of rows.
///
/// Returns the number of rows written.
///
/// # Errors
/// Fails on mismatched row counts, nested group names, or I/O errors.
pub fn write_parquet_groups(path: impl AsRef<Path>, groups: &[(&str, &Table)]) -> Result<usize> {
    let path = path.as_ref();
    let batch = match groups {
        [(g, table)] if group_path(g).is_empty() => table.as_batch().clone(),
        _ => {
            let n_rows = groups.first().map_or(0, |(_, t)| t.len());
            let mut fields = Vec::with_capacity(groups.len());
            let mut columns: Vec<ArrayRef> = Vec::with_capacity(groups.len());
            for (g, table) in groups {
                let segments = group_path(g);
                let [name] = segments.as_slice() else {
                    bail!("can't write group '{g}': only single-segment groups are supported");
                };
                if table.len() != n_rows {
                    bail!(
                        "group '{g}' has {} rows, {n_rows} was expected",
                        table.len()
                    );
                }
                let column = StructArray::from(table.as_batch().clone());
                fields.push(Field::new(*name, column.data_type().clone(), false));
                columns.push(Arc::new(column));
            }
            RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
                .context("assemble group columns")?
        }
    };

    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let props = WriterProperties::builder().build();
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).context("create ArrowWriter")?;
    writer.write(&batch).context("write batch to parquet")?;
    writer.close().context("close ArrowWriter")?;

    Ok(batch.num_rows())
}
