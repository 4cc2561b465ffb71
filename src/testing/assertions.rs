//! Reading columns back out of blocks for comparison.

use crate::iterator::ChunkIterator;
use crate::store::RowStore;
use crate::table::Table;
use anyhow::{Context, Result, anyhow};
use arrow::array::AsArray;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, UInt64Type};

/// Values of column `name` cast to `u64`.
///
/// # Errors
/// Fails if the column is missing or not castable.
pub fn column_u64(table: &Table, name: &str) -> Result<Vec<u64>> {
    let col = table
        .column(name)
        .ok_or_else(|| anyhow!("no column '{name}' in {:?}", table.field_names()))?;
    let col = cast(col, &DataType::UInt64).with_context(|| format!("cast '{name}' to u64"))?;
    Ok(col.as_primitive::<UInt64Type>().values().to_vec())
}

/// Values of column `name` cast to `f64`.
///
/// # Errors
/// Fails if the column is missing or not castable.
pub fn column_f64(table: &Table, name: &str) -> Result<Vec<f64>> {
    let col = table
        .column(name)
        .ok_or_else(|| anyhow!("no column '{name}' in {:?}", table.field_names()))?;
    let col = cast(col, &DataType::Float64).with_context(|| format!("cast '{name}' to f64"))?;
    Ok(col.as_primitive::<Float64Type>().values().to_vec())
}

/// Column `name` of every block of `it`, concatenated.
///
/// # Errors
/// Fails on read errors or if the column is missing.
pub fn collect_u64<S: RowStore>(it: &mut ChunkIterator<S>, name: &str) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    for block in it.blocks() {
        out.extend(column_u64(&block?, name)?);
    }
    Ok(out)
}

/// Sizes of every block of `it`, in order.
///
/// # Errors
/// Fails on read errors.
pub fn block_sizes<S: RowStore>(it: &mut ChunkIterator<S>) -> Result<Vec<usize>> {
    it.blocks().map(|b| b.map(|t| t.len())).collect()
}

/// Assert that column `name` of `table` holds `expected`.
///
/// # Panics
///
/// Panics if the column is missing or differs.
pub fn assert_column_eq(table: &Table, name: &str, expected: &[u64]) {
    let actual = column_u64(table, name)
        .unwrap_or_else(|e| panic!("column '{name}' unreadable: {e:#}"));
    assert_eq!(
        actual, expected,
        "Column '{name}' mismatch:\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );
}
