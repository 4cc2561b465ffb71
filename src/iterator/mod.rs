//! Block-wise iteration over many files and groups.
//!
//! A [`ChunkIterator`] flattens a list of files, and a list of groups inside
//! each file, into one sequence of dataset elements. Their rows, minus any
//! rows left out by a selection, form a single logical entry space `0..len`.
//! The iterator reads that space one block at a time into a reusable
//! [`Table`] buffer; a block may span several dataset elements.
//!
//! ```no_run
//! use chunkwise::{ChunkIterator, ParquetStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut it = ChunkIterator::builder(ParquetStore::new())
//!     .files(["data/run*.parquet"])
//!     .groups(["ch1/hit", "ch2/hit"])
//!     .entry_mask(vec![true, false, true, true])
//!     .buffer_len("10*MB".parse::<chunkwise::BufferLen>()?)
//!     .build()?;
//!
//! while let Some(block) = it.next_block()? {
//!     println!("{} rows starting at entry {}", block.len(), it.current_i_entry());
//! }
//!
//! // Random access: the block of up to 100 entries starting at entry 1000
//! let block = it.read(1000, Some(100))?;
//! # let _ = block;
//! # Ok(())
//! # }
//! ```
//!
//! The buffer is overwritten by every read; clone the [`Table`] (cheap, the
//! columns are shared) to keep a block around.
//!
//! Row counts are only asked of the store when an entry past the already
//! known files is needed, so opening an iterator over thousands of files is
//! cheap, and random access near the start never touches the later files.

mod friend;
mod position;
mod workers;

use crate::config::{BufferLen, FieldMask, Groups};
use crate::error::IterError;
use crate::index::CumulativeMap;
use crate::selection::{EntryList, EntryMask, SelectionState};
use crate::store::{RowSpan, RowStore};
use crate::table::Table;
use anyhow::{Result, anyhow, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Iterator over blocks of entries of a multi-file dataset.
pub struct ChunkIterator<S: RowStore> {
    pub(crate) store: S,
    pub(crate) files: Vec<PathBuf>,
    pub(crate) groups: Vec<String>,
    /// Cumulative physical rows per dataset element.
    pub(crate) file_map: CumulativeMap,
    /// Cumulative selected entries per dataset element.
    pub(crate) entry_map: CumulativeMap,
    pub(crate) selection: SelectionState,
    pub(crate) field_mask: FieldMask,
    pub(crate) buffer_len: usize,
    pub(crate) buffer: Table,
    /// Own buffer joined with the friends' buffers; `None` without friends.
    pub(crate) view: Option<Table>,
    pub(crate) friends: Vec<ChunkIterator<S>>,
    pub(crate) i_start: u64,
    pub(crate) n_entries: Option<u64>,
    pub(crate) current_i_entry: u64,
    pub(crate) next_i_entry: u64,
}

impl<S: RowStore> ChunkIterator<S> {
    pub fn builder(store: S) -> ChunkIteratorBuilder<S> {
        ChunkIteratorBuilder::new(store)
    }

    /// The buffer filled by the last read, including friend columns.
    #[must_use]
    pub fn buffer(&self) -> &Table {
        self.view.as_ref().unwrap_or(&self.buffer)
    }

    /// Maximum number of entries a single read returns.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Logical entry of the first row currently in the buffer.
    #[must_use]
    pub fn current_i_entry(&self) -> u64 {
        self.current_i_entry
    }

    /// Files of the dataset elements, one per element.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Groups of the dataset elements, one per element.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    #[must_use]
    pub fn field_mask(&self) -> &FieldMask {
        &self.field_mask
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of logical entries. Resolves the row count of every file.
    ///
    /// # Errors
    /// Fails if a row count can't be read.
    pub fn len(&mut self) -> Result<u64> {
        match self.files.len() {
            0 => Ok(0),
            n => self.file_cumentries(n - 1),
        }
    }

    /// # Errors
    /// Fails if a row count can't be read.
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Cumulative physical rows through dataset element `i`.
    pub(crate) fn file_cumlen(&mut self, i: usize) -> Result<u64> {
        if let Some(v) = self.file_map.get(i) {
            return Ok(v);
        }
        let first = self.file_map.resolved_len();
        let mut total = self.file_map.last_resolved();
        for j in first..=i {
            total += self.store.row_count(&self.groups[j], &self.files[j])?;
            self.file_map.push_resolved(j, total);
        }
        debug!(from = first, through = i, rows = total, "resolved file lengths");
        Ok(total)
    }

    /// Physical rows before dataset element `i`.
    pub(crate) fn file_start(&mut self, i: usize) -> Result<u64> {
        match i {
            0 => Ok(0),
            _ => self.file_cumlen(i - 1),
        }
    }

    /// Cumulative selected entries through dataset element `i`.
    pub(crate) fn file_cumentries(&mut self, i: usize) -> Result<u64> {
        if let Some(v) = self.entry_map.get(i) {
            return Ok(v);
        }
        let mut n = self.entry_map.last_resolved();
        for j in self.entry_map.resolved_len()..=i {
            let fcl = self.file_cumlen(j)?;
            match self.file_entry_list(j)? {
                None => n = fcl,
                Some(list) => {
                    let file_len = fcl - self.file_start(j)?;
                    let valid = list.partition_point(|&e| e < file_len);
                    if valid < list.len() {
                        warn!(
                            file = %self.files[j].display(),
                            group = %self.groups[j],
                            dropped = list.len() - valid,
                            "found entries out of range for file"
                        );
                    }
                    n += valid as u64;
                }
            }
            self.entry_map.push_resolved(j, n);
        }
        Ok(n)
    }

    /// Selected entries before dataset element `i`.
    pub(crate) fn entries_start(&mut self, i: usize) -> Result<u64> {
        match i {
            0 => Ok(0),
            _ => self.file_cumentries(i - 1),
        }
    }

    /// Sorted local rows selected in dataset element `i`, or `None` if every
    /// row is selected. Derived from the global list on first use.
    ///
    /// # Errors
    /// Fails with [`IterError::InvalidArgument`] if `i` is not a dataset
    /// element, or if a row count can't be read.
    pub fn file_entry_list(&mut self, i: usize) -> Result<Option<Arc<[u64]>>> {
        if i >= self.files.len() {
            return Err(IterError::InvalidArgument(format!(
                "dataset element {i} out of range for {} elements",
                self.files.len()
            ))
            .into());
        }
        let Some(local) = &self.selection.local else {
            return Ok(None);
        };
        if let Some(list) = &local[i] {
            return Ok(Some(Arc::clone(list)));
        }

        let global = self
            .selection
            .global
            .clone()
            .ok_or_else(|| anyhow!("selection has no global entry list to derive from"))?;
        let f_start = self.file_start(i)?;
        let f_end = self.file_cumlen(i)?;
        let lo = usize::try_from(self.entries_start(i)?)?.min(global.len());
        let hi = global.partition_point(|&e| e < f_end).max(lo);
        if i + 1 == self.files.len() && hi < global.len() {
            warn!(
                dropped = global.len() - hi,
                last = global[global.len() - 1],
                rows = f_end,
                "found entries past the end of the dataset"
            );
        }
        let list: Arc<[u64]> = global[lo..hi].iter().map(|e| e - f_start).collect();

        if let Some(local) = self.selection.local.as_mut() {
            local[i] = Some(Arc::clone(&list));
        }
        Ok(Some(list))
    }

    /// Sorted selected entries over the whole dataset's physical rows, or
    /// `None` if every row is selected. Built from the per-file lists if it
    /// wasn't supplied.
    ///
    /// # Errors
    /// Fails if a row count can't be read.
    pub fn global_entry_list(&mut self) -> Result<Option<Arc<[u64]>>> {
        if !self.selection.is_selected() {
            return Ok(None);
        }
        if let Some(global) = &self.selection.global {
            return Ok(Some(Arc::clone(global)));
        }
        let mut out = Vec::with_capacity(usize::try_from(self.len()?)?);
        for i in 0..self.files.len() {
            let valid = usize::try_from(self.file_cumentries(i)? - self.entries_start(i)?)?;
            let f_start = self.file_start(i)?;
            if let Some(list) = self.file_entry_list(i)? {
                out.extend(list[..valid].iter().map(|e| e + f_start));
            }
        }
        let global: Arc<[u64]> = out.into();
        self.selection.global = Some(Arc::clone(&global));
        Ok(Some(global))
    }

    /// Dataset element holding logical entry `i_entry`, if any.
    pub(crate) fn locate(&mut self, i_entry: u64) -> Result<Option<usize>> {
        let mut i = self.entry_map.search(i_entry);
        if i < self.entry_map.resolved_len() {
            return Ok(Some(i));
        }
        while i < self.files.len() {
            if i_entry < self.file_cumentries(i)? {
                return Ok(Some(i));
            }
            i += 1;
        }
        Ok(None)
    }

    /// Read up to `n_entries` entries (default: `buffer_len`) starting at
    /// logical entry `i_entry`. Friends are read at the same entry.
    ///
    /// A buffer shorter than requested means the end of the dataset was
    /// reached.
    ///
    /// # Errors
    /// Fails with [`IterError::InvalidArgument`] if `n_entries` exceeds the
    /// buffer length, or on store errors.
    pub fn read(&mut self, i_entry: u64, n_entries: Option<usize>) -> Result<&Table> {
        self.fill(i_entry, n_entries)?;
        Ok(self.buffer())
    }

    pub(crate) fn fill(&mut self, i_entry: u64, n_entries: Option<usize>) -> Result<()> {
        self.buffer.truncate(0);
        self.view = None;

        let n = match n_entries {
            None => self.buffer_len,
            Some(n) if n > self.buffer_len => bail!(IterError::InvalidArgument(format!(
                "n_entries ({n}) cannot be larger than buffer_len ({})",
                self.buffer_len
            ))),
            Some(n) => n,
        };

        let first = if n == 0 { None } else { self.locate(i_entry)? };
        if let Some(mut i_file) = first {
            let mut local = i_entry - self.entries_start(i_file)?;
            while self.buffer.len() < n && i_file < self.files.len() {
                let selected = self.file_cumentries(i_file)? - self.entries_start(i_file)?;
                let available = selected.saturating_sub(local);
                if available > 0 {
                    let count = available.min((n - self.buffer.len()) as u64);
                    let entries = self.file_entry_list(i_file)?;
                    let span = match &entries {
                        None => RowSpan::Range {
                            start: local,
                            count,
                        },
                        Some(list) => {
                            let lo = usize::try_from(local)?;
                            let hi = usize::try_from(local + count)?;
                            RowSpan::Indices(&list[lo..hi])
                        }
                    };
                    trace!(
                        file = %self.files[i_file].display(),
                        group = %self.groups[i_file],
                        rows = count,
                        "read span"
                    );
                    self.store.read_rows(
                        &self.groups[i_file],
                        &self.files[i_file],
                        span,
                        &self.field_mask,
                        &mut self.buffer,
                    )?;
                }
                i_file += 1;
                local = 0;
            }
        }

        self.current_i_entry = i_entry;
        for friend in &mut self.friends {
            friend.fill(i_entry, Some(n))?;
        }
        self.refresh_view()
    }

    /// Reset the cursor to the start of the bounded window.
    pub fn rewind(&mut self) {
        self.current_i_entry = 0;
        self.next_i_entry = self.i_start;
    }

    /// Read the next block, or `None` once the dataset (or the `n_entries`
    /// bound) is exhausted.
    ///
    /// # Errors
    /// Fails on store errors.
    pub fn next_block(&mut self) -> Result<Option<&Table>> {
        let n = match self.n_entries {
            Some(bound) => {
                let remaining = bound
                    .saturating_add(self.i_start)
                    .saturating_sub(self.next_i_entry);
                usize::try_from(remaining)
                    .unwrap_or(usize::MAX)
                    .min(self.buffer_len)
            }
            None => self.buffer_len,
        };
        if n == 0 {
            return Ok(None);
        }
        self.fill(self.next_i_entry, Some(n))?;
        let len = self.buffer.len();
        if len == 0 {
            return Ok(None);
        }
        self.next_i_entry = self.current_i_entry + len as u64;
        Ok(Some(self.buffer()))
    }

    /// Iterate over the blocks of the bounded window from the start.
    ///
    /// Each item is a clone of the buffer, which shares its columns with it.
    pub fn blocks(&mut self) -> Blocks<'_, S> {
        self.rewind();
        Blocks { it: self }
    }
}

/// Iterator returned by [`ChunkIterator::blocks`].
pub struct Blocks<'a, S: RowStore> {
    it: &'a mut ChunkIterator<S>,
}

impl<S: RowStore> Iterator for Blocks<'_, S> {
    type Item = Result<Table>;

    fn next(&mut self) -> Option<Self::Item> {
        self.it.next_block().map(|b| b.cloned()).transpose()
    }
}

/// Builder for [`ChunkIterator`]. All arguments are validated by
/// [`build`](ChunkIteratorBuilder::build).
pub struct ChunkIteratorBuilder<S: RowStore> {
    store: S,
    files: Vec<String>,
    groups: Option<Groups>,
    base_path: Option<PathBuf>,
    entry_list: Option<EntryList>,
    entry_mask: Option<EntryMask>,
    i_start: u64,
    n_entries: Option<u64>,
    field_mask: FieldMask,
    buffer_len: BufferLen,
    file_cache: Option<usize>,
    file_map: Option<Vec<u64>>,
    friend: Option<ChunkIterator<S>>,
}

impl<S: RowStore> ChunkIteratorBuilder<S> {
    fn new(store: S) -> Self {
        Self {
            store,
            files: Vec::new(),
            groups: None,
            base_path: None,
            entry_list: None,
            entry_mask: None,
            i_start: 0,
            n_entries: None,
            field_mask: FieldMask::All,
            buffer_len: BufferLen::default(),
            file_cache: None,
            file_map: None,
            friend: None,
        }
    }

    /// File patterns; may contain variables and wildcards.
    #[must_use]
    pub fn files<I, T>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Groups to read: one for all files, a list for all files, or one list
    /// per file pattern.
    #[must_use]
    pub fn groups(mut self, groups: impl Into<Groups>) -> Self {
        self.groups = Some(groups.into());
        self
    }

    #[must_use]
    pub fn base_path(mut self, base: impl AsRef<Path>) -> Self {
        self.base_path = Some(base.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn entry_list(mut self, list: impl Into<EntryList>) -> Self {
        self.entry_list = Some(list.into());
        self
    }

    #[must_use]
    pub fn entry_mask(mut self, mask: impl Into<EntryMask>) -> Self {
        self.entry_mask = Some(mask.into());
        self
    }

    /// First entry of sequential iteration.
    #[must_use]
    pub fn i_start(mut self, i_start: u64) -> Self {
        self.i_start = i_start;
        self
    }

    /// Number of entries to read before sequential iteration stops.
    #[must_use]
    pub fn n_entries(mut self, n: u64) -> Self {
        self.n_entries = Some(n);
        self
    }

    #[must_use]
    pub fn field_mask(mut self, mask: FieldMask) -> Self {
        self.field_mask = mask;
        self
    }

    #[must_use]
    pub fn buffer_len(mut self, len: impl Into<BufferLen>) -> Self {
        self.buffer_len = len.into();
        self
    }

    /// Maximum number of files the store keeps open.
    #[must_use]
    pub fn file_cache(mut self, n: usize) -> Self {
        self.file_cache = Some(n);
        self
    }

    /// Cumulative physical row counts, one per dataset element. Skips the
    /// row-count probing; no check is made that the values are right.
    #[must_use]
    pub fn file_map(mut self, map: Vec<u64>) -> Self {
        self.file_map = Some(map);
        self
    }

    /// An iterator over a parallel dataset read in lockstep with this one.
    #[must_use]
    pub fn friend(mut self, friend: ChunkIterator<S>) -> Self {
        self.friend = Some(friend);
        self
    }

    /// Expand the files, flatten files and groups into dataset elements,
    /// resolve the buffer length and allocate the buffer.
    ///
    /// # Errors
    /// Fails with [`IterError::Config`] on inconsistent arguments,
    /// [`IterError::NoFiles`] when no file matches, or on store errors.
    pub fn build(self) -> Result<ChunkIterator<S>> {
        let Self {
            mut store,
            files: patterns,
            groups,
            base_path,
            entry_list,
            entry_mask,
            i_start,
            n_entries,
            field_mask,
            buffer_len,
            file_cache,
            file_map,
            friend,
        } = self;

        if entry_list.is_some() && entry_mask.is_some() {
            bail!(IterError::Config(
                "entry_list and entry_mask arguments are mutually exclusive".into()
            ));
        }
        let groups = groups.ok_or_else(|| IterError::Config("no groups given".into()))?;
        let group_lists = groups.per_file(patterns.len())?;

        let mut files = Vec::new();
        let mut flat_groups = Vec::new();
        for (pattern, groups) in patterns.iter().zip(&group_lists) {
            for f in store.expand(pattern, base_path.as_deref())? {
                for g in groups {
                    files.push(f.clone());
                    flat_groups.push(g.clone());
                }
            }
        }
        if files.is_empty() {
            bail!(IterError::NoFiles(format!("{patterns:?}")));
        }

        if let Some(n) = file_cache {
            store.set_keep_open(n);
        }

        let file_map = match file_map {
            Some(map) if map.len() != files.len() => bail!(IterError::Config(format!(
                "file_map has {} entries for {} dataset elements",
                map.len(),
                files.len()
            ))),
            Some(map) => CumulativeMap::from_values(map),
            None => CumulativeMap::unresolved(files.len()),
        };

        let (f0, g0) = (&files[0], &flat_groups[0]);
        let buffer_len = match buffer_len {
            BufferLen::Rows(0) => bail!(IterError::Config("buffer_len must be positive".into())),
            BufferLen::Rows(n) => n,
            bytes @ BufferLen::Bytes(_) => bytes.rows(store.row_size_bytes(g0, f0)?),
        };
        let buffer = store.allocate_buffer(g0, f0, buffer_len, &field_mask)?;
        let selection = SelectionState::new(entry_list, entry_mask, files.len())?;

        debug!(
            elements = files.len(),
            buffer_len,
            selected = selection.is_selected(),
            "built chunk iterator"
        );

        let n_files = files.len();
        let mut it = ChunkIterator {
            store,
            files,
            groups: flat_groups,
            file_map,
            entry_map: CumulativeMap::unresolved(n_files),
            selection,
            field_mask,
            buffer_len,
            buffer,
            view: None,
            friends: Vec::new(),
            i_start,
            n_entries,
            current_i_entry: 0,
            next_i_entry: i_start,
        };
        if it.file_map.resolved_len() == 0 {
            it.file_cumlen(0)?;
        }
        if let Some(friend) = friend {
            it.add_friend(friend)?;
        }
        Ok(it)
    }
}
