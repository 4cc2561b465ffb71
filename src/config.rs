//! Construction-time configuration.
//!
//! Everything needed to describe an iterator declaratively lives here:
//! which groups to read from each file, the field projection, the buffer
//! capacity and the row selection. [`IterConfig`] bundles all of it into a
//! serde-friendly struct so an iterator can be described in a JSON file:
//!
//! ```json
//! {
//!   "files": ["$DATA/run*.parquet"],
//!   "groups": ["ch1/hit", "ch2/hit"],
//!   "entry_mask": [[true, false, true], [false, false, true]],
//!   "field_mask": {"energy": true, "timestamp": true},
//!   "buffer_len": "10*MB",
//!   "file_cache": 4
//! }
//! ```

use crate::error::IterError;
use crate::iterator::ChunkIterator;
use crate::selection::{EntryList, EntryMask};
use crate::store::RowStore;
use anyhow::{Context, Result, bail};
use arrow::datatypes::Schema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Buffer capacity, either in rows or as a byte budget.
///
/// A byte budget is turned into rows with the average row size of the first
/// dataset element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BufferLenRepr", into = "BufferLenRepr")]
pub enum BufferLen {
    Rows(usize),
    Bytes(u64),
}

impl Default for BufferLen {
    fn default() -> Self {
        Self::Bytes(100 * 1000 * 1000)
    }
}

impl BufferLen {
    /// Row capacity given the average size of a row in bytes. Never zero.
    #[must_use]
    pub fn rows(self, row_size_bytes: u64) -> usize {
        match self {
            Self::Rows(n) => n,
            Self::Bytes(b) => {
                let rows = b / row_size_bytes.max(1);
                usize::try_from(rows).unwrap_or(usize::MAX).max(1)
            }
        }
    }
}

impl From<usize> for BufferLen {
    fn from(rows: usize) -> Self {
        Self::Rows(rows)
    }
}

fn unit_factor(unit: &str) -> Option<u64> {
    let f = match unit {
        "B" => 1,
        "kB" | "KB" => 1000,
        "MB" => 1000_u64.pow(2),
        "GB" => 1000_u64.pow(3),
        "TB" => 1000_u64.pow(4),
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        _ => return None,
    };
    Some(f)
}

impl FromStr for BufferLen {
    type Err = anyhow::Error;

    /// Accepts a plain row count (`"5000"`) or a byte budget such as
    /// `"100*MB"`, `"1.5 GiB"` or `"512kB"`.
    fn from_str(s: &str) -> Result<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*\*?\s*([A-Za-z]+)?\s*$").expect("static regex")
        });
        let Some(caps) = re.captures(s) else {
            bail!(IterError::Config(format!("can't parse buffer_len {s:?}")));
        };
        let number = &caps[1];
        match caps.get(2) {
            None => {
                let rows = number.parse::<usize>().map_err(|_| {
                    IterError::Config(format!("buffer_len row count must be an integer, got {s:?}"))
                })?;
                Ok(Self::Rows(rows))
            }
            Some(unit) => {
                let factor = unit_factor(unit.as_str()).ok_or_else(|| {
                    IterError::Config(format!("unknown unit {:?} in buffer_len", unit.as_str()))
                })?;
                let value: f64 = number.parse().context("parse buffer_len magnitude")?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
                let bytes = (value * factor as f64) as u64;
                Ok(Self::Bytes(bytes))
            }
        }
    }
}

impl fmt::Display for BufferLen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(n) => write!(f, "{n}"),
            Self::Bytes(b) => write!(f, "{b}*B"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BufferLenRepr {
    Rows(usize),
    Text(String),
}

impl TryFrom<BufferLenRepr> for BufferLen {
    type Error = anyhow::Error;
    fn try_from(r: BufferLenRepr) -> Result<Self> {
        match r {
            BufferLenRepr::Rows(n) => Ok(Self::Rows(n)),
            BufferLenRepr::Text(s) => s.parse(),
        }
    }
}

impl From<BufferLen> for BufferLenRepr {
    fn from(b: BufferLen) -> Self {
        match b {
            BufferLen::Rows(n) => Self::Rows(n),
            BufferLen::Bytes(_) => Self::Text(b.to_string()),
        }
    }
}

/// Which fields of a group are materialized in the buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldMaskRepr")]
pub enum FieldMask {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl FieldMask {
    pub fn include<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::Include(names.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, T>(names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::Exclude(names.into_iter().map(Into::into).collect())
    }

    /// Build from a `{field: keep}` map. If any field is marked `true`, only
    /// the `true` fields are read; otherwise the `false` fields are skipped.
    #[must_use]
    pub fn from_map(map: &BTreeMap<String, bool>) -> Self {
        if map.is_empty() {
            return Self::All;
        }
        if map.values().any(|&keep| keep) {
            Self::Include(map.iter().filter(|(_, k)| **k).map(|(n, _)| n.clone()).collect())
        } else {
            Self::Exclude(map.keys().cloned().collect())
        }
    }

    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Include(names) => names.iter().any(|n| n == name),
            Self::Exclude(names) => !names.iter().any(|n| n == name),
        }
    }

    /// Indices of the fields of `schema` this mask keeps, in schema order.
    #[must_use]
    pub fn project(&self, schema: &Schema) -> Vec<usize> {
        schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| self.allows(f.name()))
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldMaskRepr {
    Names(Vec<String>),
    Map(BTreeMap<String, bool>),
}

impl From<FieldMaskRepr> for FieldMask {
    fn from(r: FieldMaskRepr) -> Self {
        match r {
            FieldMaskRepr::Names(names) => Self::Include(names),
            FieldMaskRepr::Map(map) => Self::from_map(&map),
        }
    }
}

/// Groups to read: the same list for every file, or one list per file pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Groups {
    One(String),
    Same(Vec<String>),
    PerFile(Vec<Vec<String>>),
}

impl Groups {
    /// Group lists matched one-to-one with `n_files` file patterns.
    ///
    /// # Errors
    /// Fails with [`IterError::Config`] if a per-file list doesn't match the
    /// number of file patterns or a group list is empty.
    pub fn per_file(&self, n_files: usize) -> Result<Vec<Vec<String>>> {
        let lists = match self {
            Self::One(g) => vec![vec![g.clone()]; n_files],
            Self::Same(gs) => vec![gs.clone(); n_files],
            Self::PerFile(lists) => {
                if lists.len() != n_files {
                    bail!(IterError::Config(format!(
                        "files and groups must have same length ({n_files} files, {} group lists)",
                        lists.len()
                    )));
                }
                lists.clone()
            }
        };
        if lists.iter().any(Vec::is_empty) {
            bail!(IterError::Config("group must be a string or appropriate list".into()));
        }
        Ok(lists)
    }
}

impl From<&str> for Groups {
    fn from(g: &str) -> Self {
        Self::One(g.to_string())
    }
}

impl From<String> for Groups {
    fn from(g: String) -> Self {
        Self::One(g)
    }
}

impl From<Vec<&str>> for Groups {
    fn from(gs: Vec<&str>) -> Self {
        Self::Same(gs.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Groups {
    fn from(gs: [&str; N]) -> Self {
        Self::Same(gs.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for Groups {
    fn from(gs: Vec<String>) -> Self {
        Self::Same(gs)
    }
}

impl From<Vec<Vec<&str>>> for Groups {
    fn from(lists: Vec<Vec<&str>>) -> Self {
        Self::PerFile(
            lists
                .into_iter()
                .map(|l| l.into_iter().map(String::from).collect())
                .collect(),
        )
    }
}

/// One file pattern or many.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Files {
    One(String),
    Many(Vec<String>),
}

impl Files {
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(f) => vec![f],
            Self::Many(fs) => fs,
        }
    }
}

fn default_file_cache() -> usize {
    10
}

/// Declarative description of a [`ChunkIterator`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IterConfig {
    pub files: Files,
    pub groups: Groups,
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub entry_list: Option<EntryList>,
    #[serde(default)]
    pub entry_mask: Option<EntryMask>,
    #[serde(default)]
    pub i_start: u64,
    #[serde(default)]
    pub n_entries: Option<u64>,
    #[serde(default)]
    pub field_mask: FieldMask,
    #[serde(default)]
    pub buffer_len: BufferLen,
    #[serde(default = "default_file_cache")]
    pub file_cache: usize,
    /// Precomputed cumulative row counts, one per dataset element. Not checked.
    #[serde(default)]
    pub file_map: Option<Vec<u64>>,
}

impl IterConfig {
    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    /// Fails if the file can't be read or doesn't describe a valid configuration.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse iterator config {}", path.display()))
    }

    /// Build the iterator described by this configuration on top of `store`.
    ///
    /// # Errors
    /// See [`crate::iterator::ChunkIteratorBuilder::build`].
    pub fn build<S: RowStore>(self, store: S) -> Result<ChunkIterator<S>> {
        let mut b = ChunkIterator::builder(store)
            .files(self.files.into_vec())
            .groups(self.groups)
            .i_start(self.i_start)
            .field_mask(self.field_mask)
            .buffer_len(self.buffer_len)
            .file_cache(self.file_cache);
        if let Some(base) = self.base_path {
            b = b.base_path(base);
        }
        if let Some(list) = self.entry_list {
            b = b.entry_list(list);
        }
        if let Some(mask) = self.entry_mask {
            b = b.entry_mask(mask);
        }
        if let Some(n) = self.n_entries {
            b = b.n_entries(n);
        }
        if let Some(map) = self.file_map {
            b = b.file_map(map);
        }
        b.build()
    }
}
