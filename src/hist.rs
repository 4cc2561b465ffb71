//! Histogramming the selected data of an iterator.
//!
//! [`ChunkIterator::hist`] runs a [`Filter`] over every block and fills the
//! values into a [`Histogram`]. Shards fill their own zeroed copy; the copies
//! are added together and then added into the histogram passed in, so a
//! histogram can collect several iterators in turn.
//!
//! How a block's values reach the axes depends on its variant:
//!
//! - [`Block::Array`] fills a one-dimensional histogram;
//! - [`Block::Columns`] fills one column per axis, in axis order;
//! - [`Block::Table`] fills the columns named by `keys`, or else the columns
//!   named like the axes, or else (unnamed axes only) all columns in order.
//!
//! ```no_run
//! use chunkwise::{Axis, ChunkIterator, Filter, Hist, ParquetStore, Workers};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut it = ChunkIterator::builder(ParquetStore::new())
//!     .file("run*.parquet")
//!     .groups("hit")
//!     .build()?;
//! let h = Hist::new(vec![Axis::regular(100, 0.0, 3000.0).with_name("energy")]);
//! let h = it.hist(h, "channel == 3", Workers::auto(), None)?;
//! println!("{} counts", h.total());
//! # Ok(())
//! # }
//! ```

use crate::error::IterError;
use crate::iterator::ChunkIterator;
use crate::mapreduce::{Accumulate, Workers};
use crate::query::{Block, Filter};
use crate::store::RowStore;
use anyhow::{Context, Result, bail};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use serde::{Deserialize, Serialize};

/// A fillable, addable histogram.
pub trait Histogram: Clone + Send + Sync + 'static {
    fn ndim(&self) -> usize;

    /// Name of each axis, if it has one.
    fn axis_names(&self) -> Vec<Option<String>>;

    /// Fill one entry per row; `columns` holds one slice per axis.
    ///
    /// # Errors
    /// Fails if the number of columns is not `ndim()` or their lengths differ.
    fn fill(&mut self, columns: &[&[f64]]) -> Result<()>;

    /// Add the contents of a histogram with the same binning.
    ///
    /// # Errors
    /// Fails if the binning differs.
    fn add(&mut self, other: &Self) -> Result<()>;

    /// A copy with every bin set to zero.
    #[must_use]
    fn zeroed(&self) -> Self;
}

/// Regularly binned axis over `[lo, hi)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: Option<String>,
    pub bins: usize,
    pub lo: f64,
    pub hi: f64,
}

impl Axis {
    #[must_use]
    pub fn regular(bins: usize, lo: f64, hi: f64) -> Self {
        Self {
            name: None,
            bins,
            lo,
            hi,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bin of `v`; `None` if out of range or NaN.
    #[must_use]
    pub fn index(&self, v: f64) -> Option<usize> {
        if self.bins == 0 || !(v >= self.lo && v < self.hi) {
            return None;
        }
        let i = ((v - self.lo) / (self.hi - self.lo) * self.bins as f64) as usize;
        Some(i.min(self.bins - 1))
    }

    #[must_use]
    pub fn edges(&self) -> Vec<f64> {
        let width = (self.hi - self.lo) / self.bins as f64;
        (0..=self.bins).map(|i| self.lo + width * i as f64).collect()
    }
}

/// Dense histogram of counts over regular axes. Values outside an axis are
/// dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hist {
    axes: Vec<Axis>,
    counts: Vec<f64>,
}

impl Hist {
    #[must_use]
    pub fn new(axes: Vec<Axis>) -> Self {
        let n = axes.iter().map(|a| a.bins).product();
        Self {
            axes,
            counts: vec![0.0; n],
        }
    }

    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Counts in row-major order (last axis fastest).
    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Count of the bin at one index per axis.
    #[must_use]
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        self.flat(index).map(|i| self.counts[i])
    }

    fn flat(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.axes.len() {
            return None;
        }
        let mut flat = 0;
        for (i, axis) in index.iter().zip(&self.axes) {
            if *i >= axis.bins {
                return None;
            }
            flat = flat * axis.bins + i;
        }
        Some(flat)
    }
}

impl From<Vec<Axis>> for Hist {
    fn from(axes: Vec<Axis>) -> Self {
        Self::new(axes)
    }
}

impl Histogram for Hist {
    fn ndim(&self) -> usize {
        self.axes.len()
    }

    fn axis_names(&self) -> Vec<Option<String>> {
        self.axes.iter().map(|a| a.name.clone()).collect()
    }

    fn fill(&mut self, columns: &[&[f64]]) -> Result<()> {
        if columns.len() != self.axes.len() {
            bail!(IterError::TypeMismatch(format!(
                "{} columns for a {}-dimensional histogram",
                columns.len(),
                self.axes.len()
            )));
        }
        let rows = columns.first().map_or(0, |c| c.len());
        if columns.iter().any(|c| c.len() != rows) {
            bail!(IterError::TypeMismatch("histogram columns differ in length".into()));
        }
        let mut index = vec![0; self.axes.len()];
        'rows: for row in 0..rows {
            for (d, (axis, col)) in self.axes.iter().zip(columns).enumerate() {
                match axis.index(col[row]) {
                    Some(i) => index[d] = i,
                    None => continue 'rows,
                }
            }
            if let Some(i) = self.flat(&index) {
                self.counts[i] += 1.0;
            }
        }
        Ok(())
    }

    fn add(&mut self, other: &Self) -> Result<()> {
        if self.axes != other.axes {
            bail!(IterError::TypeMismatch("can't add histograms with different axes".into()));
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }

    fn zeroed(&self) -> Self {
        Self::new(self.axes.clone())
    }
}

/// Values of a numeric array as `f64`; nulls become NaN and are dropped by
/// the axes.
fn values(array: &ArrayRef) -> Result<Vec<f64>> {
    let dt = array.data_type();
    if !(dt.is_numeric() || *dt == DataType::Boolean) {
        bail!(IterError::TypeMismatch(format!(
            "can't histogram {dt} values"
        )));
    }
    let floats = cast(array, &DataType::Float64).context("cast histogram values")?;
    Ok(floats
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn fill_block<H: Histogram>(h: &mut H, block: Block, keys: Option<&[String]>) -> Result<()> {
    let columns: Vec<ArrayRef> = match block {
        Block::Array(a) => vec![a],
        Block::Columns(cols) => cols,
        Block::Table(t) => {
            let names: Option<Vec<String>> = match keys {
                Some(keys) => Some(keys.to_vec()),
                None => h.axis_names().into_iter().collect(),
            };
            match names {
                Some(names) => names
                    .iter()
                    .map(|n| {
                        t.column(n).cloned().ok_or_else(|| {
                            IterError::TypeMismatch(format!("no field '{n}' to histogram")).into()
                        })
                    })
                    .collect::<Result<_>>()?,
                None => t.as_batch().columns().to_vec(),
            }
        }
    };
    if columns.len() != h.ndim() {
        bail!(IterError::TypeMismatch(format!(
            "{} columns for a {}-dimensional histogram",
            columns.len(),
            h.ndim()
        )));
    }
    let values = columns.iter().map(values).collect::<Result<Vec<_>>>()?;
    let slices: Vec<&[f64]> = values.iter().map(Vec::as_slice).collect();
    h.fill(&slices)
}

impl<S: RowStore> ChunkIterator<S> {
    /// Fill the output of `filter` over every block into `target` and
    /// return it.
    ///
    /// `keys` names the table columns to fill, one per axis, when they are
    /// not named like the axes.
    ///
    /// # Errors
    /// Fails with [`IterError::TypeMismatch`] when a block can't be filled
    /// (non-numeric values, wrong number of columns, missing fields), or on
    /// store errors.
    pub fn hist<H: Histogram>(
        &mut self,
        mut target: H,
        filter: impl Into<Filter<S>>,
        workers: impl Into<Workers>,
        keys: Option<&[&str]>,
    ) -> Result<H> {
        let filter = filter.into().prepare()?;
        let keys: Option<Vec<String>> = keys.map(|k| k.iter().map(ToString::to_string).collect());
        let acc = Accumulate::fold_into(
            target.zeroed(),
            move |h: &mut H, block: Block| fill_block(h, block, keys.as_deref()),
            |h: &mut H, other: H| h.add(&other),
        );
        if let Some(filled) = self.try_accumulate(|block, it| filter.apply(block, it), acc, workers)? {
            target.add(&filled)?;
        }
        Ok(target)
    }
}
