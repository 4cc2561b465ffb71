//! Pre-built datasets for tests and examples.

use crate::store::MemoryStore;
use crate::table::Table;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Row of the primary fixture tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position over the whole dataset, starting at 0.
    pub idx: u64,
    pub energy: f64,
    pub channel: u32,
}

/// Row of the friend fixture tables; `tag` mirrors `Event::idx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aux {
    pub tag: u64,
    pub weight: f64,
}

/// `n` events numbered from `start`. Energy is `10 * idx`, channel is `idx % 4`.
#[must_use]
pub fn events(start: u64, n: usize) -> Vec<Event> {
    (start..start + n as u64)
        .map(|idx| Event {
            idx,
            energy: idx as f64 * 10.0,
            channel: (idx % 4) as u32,
        })
        .collect()
}

/// # Errors
/// Fails if the rows can't be converted to Arrow.
pub fn event_table(start: u64, n: usize) -> Result<Table> {
    Table::from_rows(&events(start, n))
}

/// `n` friend rows numbered from `start`, weight `idx / 2`.
///
/// # Errors
/// Fails if the rows can't be converted to Arrow.
pub fn aux_table(start: u64, n: usize) -> Result<Table> {
    let rows: Vec<Aux> = (start..start + n as u64)
        .map(|tag| Aux {
            tag,
            weight: tag as f64 / 2.0,
        })
        .collect();
    Table::from_rows(&rows)
}

/// One event table per `(file, rows)`, all under `group`, numbered
/// continuously across files.
///
/// # Errors
/// Fails if the rows can't be converted to Arrow.
pub fn event_store(files: &[(&str, usize)], group: &str) -> Result<MemoryStore> {
    let mut store = MemoryStore::new();
    let mut start = 0;
    for (file, rows) in files {
        store.insert(*file, group, event_table(start, *rows)?);
        start += *rows as u64;
    }
    Ok(store)
}

/// `f1.pq` with 5 events and `f2.pq` with 7 events, group `evt`.
///
/// # Errors
/// Fails if the rows can't be converted to Arrow.
pub fn two_file_store() -> Result<MemoryStore> {
    event_store(&[("f1.pq", 5), ("f2.pq", 7)], "evt")
}

/// [`two_file_store`] plus friend tables with the same row counts in
/// `g1.pq` and `g2.pq`, group `aux`.
///
/// # Errors
/// Fails if the rows can't be converted to Arrow.
pub fn two_file_store_with_friend() -> Result<MemoryStore> {
    Ok(two_file_store()?
        .with("g1.pq", "aux", aux_table(0, 5)?)
        .with("g2.pq", "aux", aux_table(5, 7)?))
}

/// Write one Parquet file per entry of `sizes` into `dir`, each holding
/// consecutive events in every group of `groups`, and return their paths.
///
/// # Errors
/// Fails on I/O errors.
#[cfg(feature = "io-parquet")]
pub fn write_event_files(
    dir: &std::path::Path,
    sizes: &[usize],
    groups: &[&str],
) -> Result<Vec<std::path::PathBuf>> {
    use crate::io::parquet::write_parquet_groups;

    let mut paths = Vec::with_capacity(sizes.len());
    let mut start = 0;
    for (i, n) in sizes.iter().enumerate() {
        let path = dir.join(format!("run{i:03}.parquet"));
        let table = event_table(start, *n)?;
        let tables: Vec<(&str, &Table)> = groups.iter().map(|g| (*g, &table)).collect();
        write_parquet_groups(&path, &tables)?;
        paths.push(path);
        start += *n as u64;
    }
    Ok(paths)
}

/// [`write_event_files`] into a fresh temporary directory, which is removed
/// when the returned guard is dropped.
///
/// # Errors
/// Fails on I/O errors.
#[cfg(feature = "io-parquet")]
pub fn temp_event_files(
    sizes: &[usize],
    groups: &[&str],
) -> Result<(tempfile::TempDir, Vec<std::path::PathBuf>)> {
    let dir = tempfile::tempdir()?;
    let paths = write_event_files(dir.path(), sizes, groups)?;
    Ok((dir, paths))
}
