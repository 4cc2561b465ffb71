//! Splitting an iterator into independent shards for parallel work.

use super::ChunkIterator;
use crate::error::IterError;
use crate::store::RowStore;
use crate::table::Table;
use anyhow::{Result, bail};
use std::ops::Range;
use tracing::debug;

impl<S: RowStore> ChunkIterator<S> {
    /// Split into `n` iterators over contiguous runs of dataset elements.
    ///
    /// Shard `k` gets elements `k * len / n .. (k + 1) * len / n`, so shards
    /// hold similar numbers of files, not of rows. Iterating the shards in
    /// order visits exactly the entries this iterator visits, `i_start` and
    /// `n_entries` included. Friends are split the same way and attached to
    /// the matching shard.
    ///
    /// Each shard owns a detached store and an empty buffer; none of them
    /// shares mutable state with `self` or with each other. The cursor of
    /// `self` is left untouched.
    ///
    /// # Errors
    /// Fails with [`IterError::InvalidArgument`] when `n` is zero, or on store
    /// errors while resolving selections.
    pub fn generate_workers(&mut self, n: usize) -> Result<Vec<ChunkIterator<S>>> {
        if n == 0 {
            bail!(IterError::InvalidArgument("worker count must be positive".into()));
        }
        let n_files = self.files.len();
        let bounds: Vec<usize> = (0..=n).map(|k| k * n_files / n).collect();

        if self.selection.is_selected() {
            for i in 0..n_files {
                self.file_entry_list(i)?;
            }
        }
        let windows = if self.bounded() {
            Some(self.shard_windows(&bounds)?)
        } else {
            None
        };

        let mut friend_shards = Vec::with_capacity(self.friends.len());
        for f in &mut self.friends {
            friend_shards.push(f.generate_workers(n)?.into_iter());
        }

        let mut shards = Vec::with_capacity(n);
        for (k, w) in bounds.windows(2).enumerate() {
            let (a, b) = (w[0], w[1]);
            let mut shard = self.shard(a..b);
            if let Some(windows) = &windows {
                let (i_start, n_entries) = windows[k];
                shard.i_start = i_start;
                shard.next_i_entry = i_start;
                shard.n_entries = Some(n_entries);
            }
            for friends in &mut friend_shards {
                if let Some(f) = friends.next() {
                    shard.add_friend(f)?;
                }
            }
            shards.push(shard);
        }

        debug!(workers = n, elements = n_files, "partitioned iterator");
        Ok(shards)
    }

    fn bounded(&self) -> bool {
        self.i_start > 0 || self.n_entries.is_some()
    }

    /// `(i_start, n_entries)` of each shard, in the shard's own entry space.
    fn shard_windows(&mut self, bounds: &[usize]) -> Result<Vec<(u64, u64)>> {
        let start = self.i_start;
        let end = self.n_entries.map_or(u64::MAX, |n| start.saturating_add(n));
        let mut out = Vec::with_capacity(bounds.len().saturating_sub(1));
        for w in bounds.windows(2) {
            let lo = self.entries_start(w[0])?;
            let hi = self.entries_start(w[1])?;
            let s = start.clamp(lo, hi);
            let e = end.clamp(s, hi);
            out.push((s - lo, e - s));
        }
        Ok(out)
    }

    /// Copy of the declarative state restricted to `range`, with resolved
    /// cumulative counts rebased to start at zero.
    fn shard(&self, range: Range<usize>) -> ChunkIterator<S> {
        let a = range.start;
        let mut file_map = self.file_map.slice(range.clone());
        let mut entry_map = self.entry_map.slice(range.clone());
        if a > 0 {
            if let Some(base) = self.file_map.get(a - 1) {
                file_map.rebase(base);
            }
            if let Some(base) = self.entry_map.get(a - 1) {
                entry_map.rebase(base);
            }
        }
        ChunkIterator {
            store: self.store.detach(),
            files: self.files[range.clone()].to_vec(),
            groups: self.groups[range.clone()].to_vec(),
            file_map,
            entry_map,
            selection: self.selection.slice(range),
            field_mask: self.field_mask.clone(),
            buffer_len: self.buffer_len,
            buffer: Table::empty(self.buffer.schema()),
            view: None,
            friends: Vec::new(),
            i_start: 0,
            n_entries: None,
            current_i_entry: 0,
            next_i_entry: 0,
        }
    }
}
