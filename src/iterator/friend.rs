//! Friend iterators: parallel datasets read in lockstep with a primary.
//!
//! A friend covers the same logical entries as its primary but holds other
//! columns (for example a second processing tier of the same events). After
//! every read the primary's visible buffer is its own columns joined with
//! each friend's columns, in attachment order.

use super::ChunkIterator;
use crate::config::FieldMask;
use crate::error::IterError;
use crate::store::RowStore;
use crate::table::Table;
use anyhow::{Result, bail};
use std::sync::Arc;
use tracing::debug;

impl<S: RowStore> ChunkIterator<S> {
    /// Attach `friend`. Friends already attached to it are attached too,
    /// after it. Every buffer is limited to the smallest `buffer_len` in the
    /// group, and the friend is read at the current entry right away.
    ///
    /// # Errors
    /// Fails with [`IterError::FriendMismatch`] if the friend can't supply as
    /// many rows as are currently buffered, or on store errors.
    pub fn add_friend(&mut self, mut friend: ChunkIterator<S>) -> Result<()> {
        let nested = std::mem::take(&mut friend.friends);
        friend.view = None;

        let start = self.friends.len();
        self.friends.push(friend);
        self.friends.extend(nested);

        let buffer_len = self
            .friends
            .iter()
            .map(|f| f.buffer_len)
            .fold(self.buffer_len, usize::min);
        self.buffer_len = buffer_len;
        self.buffer.truncate(buffer_len);
        let n = self.buffer.len();
        for f in &mut self.friends {
            f.buffer_len = buffer_len;
            f.buffer.truncate(buffer_len);
        }
        for f in &mut self.friends[start..] {
            f.fill(self.current_i_entry, Some(n))?;
        }

        debug!(friends = self.friends.len(), buffer_len, "attached friend");
        self.refresh_view()
    }

    /// Friends in attachment order.
    #[must_use]
    pub fn friends(&self) -> &[ChunkIterator<S>] {
        &self.friends
    }

    /// Friends in attachment order. Reading a friend directly leaves it out
    /// of step with this iterator until the next read here.
    pub fn friends_mut(&mut self) -> &mut [ChunkIterator<S>] {
        &mut self.friends
    }

    /// Replace the field mask of this iterator and every friend. Buffers are
    /// reallocated with the new columns and left empty until the next read.
    ///
    /// # Errors
    /// Fails on store errors.
    pub fn reset_field_mask(&mut self, mask: FieldMask) -> Result<()> {
        for f in &mut self.friends {
            f.reset_field_mask(mask.clone())?;
        }
        self.buffer = match (self.groups.first(), self.files.first()) {
            (Some(group), Some(file)) => {
                self.store
                    .allocate_buffer(group, file, self.buffer_len, &mask)?
            }
            // An empty shard has nothing to allocate from.
            _ => {
                let schema = self.buffer.schema();
                Table::empty(Arc::new(schema.project(&mask.project(&schema))?))
            }
        };
        self.field_mask = mask;
        self.refresh_view()
    }

    pub(crate) fn refresh_view(&mut self) -> Result<()> {
        if self.friends.is_empty() {
            self.view = None;
            return Ok(());
        }
        let mut view = self.buffer.clone();
        for f in &self.friends {
            if f.buffer.len() != view.len() {
                bail!(IterError::FriendMismatch(format!(
                    "friend over {} returned {} rows at entry {}, expected {}",
                    f.files
                        .first()
                        .map_or_else(String::new, |p| p.display().to_string()),
                    f.buffer.len(),
                    self.current_i_entry,
                    view.len()
                )));
            }
            view.join(&f.buffer)?;
        }
        self.view = Some(view);
        Ok(())
    }
}
