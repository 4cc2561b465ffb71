//! Collecting the selected data of a whole iterator into one result.
//!
//! A [`Filter`] turns every buffered block into a [`Block`]: the block itself,
//! the rows passing a [`RowFilter`] expression, or whatever a user function
//! returns. [`ChunkIterator::query`] concatenates the per-block results in
//! block order. What "concatenate" means depends on the [`Block`] variant,
//! and every block must use the variant of the first one.

mod expr;

pub use expr::RowFilter;

use crate::error::IterError;
use crate::iterator::ChunkIterator;
use crate::mapreduce::Workers;
use crate::store::RowStore;
use crate::table::Table;
use anyhow::{Context, Result, bail};
use arrow::array::{Array, ArrayRef};
use arrow::compute::concat;
use arrow::datatypes::SchemaRef;

/// Per-block output of a filter.
#[derive(Clone, Debug)]
pub enum Block {
    /// One column of values.
    Array(ArrayRef),
    /// Several same-length columns, in a fixed order.
    Columns(Vec<ArrayRef>),
    /// Named columns.
    Table(Table),
}

impl Block {
    fn kind(&self) -> &'static str {
        match self {
            Self::Array(_) => "Array",
            Self::Columns(_) => "Columns",
            Self::Table(_) => "Table",
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Array(a) => a.len(),
            Self::Columns(cols) => cols.first().map_or(0, |c| c.len()),
            Self::Table(t) => t.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn into_table(self) -> Option<Table> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_array(self) -> Option<ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_columns(self) -> Option<Vec<ArrayRef>> {
        match self {
            Self::Columns(c) => Some(c),
            _ => None,
        }
    }

    /// Concatenate blocks of one variant, in order.
    ///
    /// # Errors
    /// Fails with [`IterError::TypeMismatch`] if the variants, column counts
    /// or column types differ.
    pub fn concat(blocks: Vec<Block>) -> Result<Option<Block>> {
        let mut blocks = blocks.into_iter();
        let Some(first) = blocks.next() else {
            return Ok(None);
        };
        let kind = first.kind();
        let mismatch = |b: &Block| {
            IterError::TypeMismatch(format!(
                "filter returned a {} block after a {kind} block",
                b.kind()
            ))
        };

        Ok(Some(match first {
            Block::Table(mut acc) => {
                for b in blocks {
                    match b {
                        Block::Table(t) => acc.append(&t).map_err(|e| {
                            IterError::TypeMismatch(format!("can't concatenate tables: {e:#}"))
                        })?,
                        other => bail!(mismatch(&other)),
                    }
                }
                Block::Table(acc)
            }
            Block::Array(a) => {
                let mut parts = vec![a];
                for b in blocks {
                    match b {
                        Block::Array(a) => parts.push(a),
                        other => bail!(mismatch(&other)),
                    }
                }
                Block::Array(concat_arrays(&parts)?)
            }
            Block::Columns(cols) => {
                let width = cols.len();
                let mut parts: Vec<Vec<ArrayRef>> = cols.into_iter().map(|c| vec![c]).collect();
                for b in blocks {
                    match b {
                        Block::Columns(cols) if cols.len() == width => {
                            for (part, c) in parts.iter_mut().zip(cols) {
                                part.push(c);
                            }
                        }
                        Block::Columns(cols) => bail!(IterError::TypeMismatch(format!(
                            "filter returned {} columns after {width}",
                            cols.len()
                        ))),
                        other => bail!(mismatch(&other)),
                    }
                }
                Block::Columns(
                    parts
                        .iter()
                        .map(|p| concat_arrays(p.as_slice()))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
        }))
    }
}

fn concat_arrays(parts: &[ArrayRef]) -> Result<ArrayRef> {
    let dt = parts[0].data_type();
    if let Some(other) = parts.iter().find(|p| p.data_type() != dt) {
        bail!(IterError::TypeMismatch(format!(
            "can't concatenate {} values after {dt} values",
            other.data_type()
        )));
    }
    let refs: Vec<&dyn Array> = parts.iter().map(AsRef::as_ref).collect();
    concat(&refs).context("concatenate arrays")
}

/// User function producing a [`Block`] from a buffered block.
pub type BlockFn<S> = Box<dyn Fn(&Table, &ChunkIterator<S>) -> Result<Block> + Send + Sync>;

/// What to keep from every block.
pub enum Filter<S: RowStore> {
    /// Every buffered row.
    All,
    /// Rows passing a [`RowFilter`] expression.
    Expr(String),
    /// The output of a user function.
    Fn(BlockFn<S>),
}

impl<S: RowStore> Default for Filter<S> {
    fn default() -> Self {
        Self::All
    }
}

impl<S: RowStore> Filter<S> {
    pub fn func(f: impl Fn(&Table, &ChunkIterator<S>) -> Result<Block> + Send + Sync + 'static) -> Self {
        Self::Fn(Box::new(f))
    }

    pub(crate) fn prepare(self) -> Result<Prepared<S>> {
        Ok(match self {
            Self::All => Prepared::All,
            Self::Expr(src) => Prepared::Expr(RowFilter::parse(&src)?),
            Self::Fn(f) => Prepared::Fn(f),
        })
    }
}

impl<S: RowStore> From<&str> for Filter<S> {
    fn from(expr: &str) -> Self {
        Self::Expr(expr.to_string())
    }
}

impl<S: RowStore> From<String> for Filter<S> {
    fn from(expr: String) -> Self {
        Self::Expr(expr)
    }
}

impl<S: RowStore> From<RowFilter> for Filter<S> {
    fn from(expr: RowFilter) -> Self {
        Self::Expr(expr.source().to_string())
    }
}

pub(crate) enum Prepared<S: RowStore> {
    All,
    Expr(RowFilter),
    Fn(BlockFn<S>),
}

impl<S: RowStore> Prepared<S> {
    pub(crate) fn apply(&self, block: &Table, it: &ChunkIterator<S>) -> Result<Block> {
        match self {
            Self::All => Ok(Block::Table(block.clone())),
            Self::Expr(filter) => filter.apply(block).map(Block::Table),
            Self::Fn(f) => f(block, it),
        }
    }
}

impl<S: RowStore> ChunkIterator<S> {
    /// Concatenate the filtered output of every block.
    ///
    /// With no blocks the result is an empty [`Block::Table`] with the
    /// buffer's columns.
    ///
    /// # Errors
    /// Fails with [`IterError::TypeMismatch`] when blocks can't be
    /// concatenated, with [`IterError::InvalidArgument`] on a malformed
    /// expression, or on store errors.
    pub fn query(
        &mut self,
        filter: impl Into<Filter<S>>,
        workers: impl Into<Workers>,
    ) -> Result<Block> {
        let filter = filter.into().prepare()?;
        let schema: SchemaRef = self.buffer().schema();
        let blocks = self.try_map(|block, it| filter.apply(block, it), workers)?;
        Ok(Block::concat(blocks)?.unwrap_or_else(|| Block::Table(Table::empty(schema))))
    }
}
