//! Where the rows in the buffer came from.
//!
//! Each accessor returns one value per buffered row, in buffer order.

use super::ChunkIterator;
use crate::store::RowStore;
use anyhow::Result;
use std::ops::Range;
use std::path::Path;

impl<S: RowStore> ChunkIterator<S> {
    /// Dataset elements covered by the buffer, with the range of selected
    /// entries (positions in the element's entry space) taken from each.
    fn current_spans(&mut self) -> Result<Vec<(usize, Range<u64>)>> {
        let mut remaining = self.buffer.len() as u64;
        let mut spans = Vec::new();
        if remaining == 0 {
            return Ok(spans);
        }
        let Some(mut i_file) = self.locate(self.current_i_entry)? else {
            return Ok(spans);
        };
        let mut local = self.current_i_entry - self.entries_start(i_file)?;
        while remaining > 0 && i_file < self.files.len() {
            let selected = self.file_cumentries(i_file)? - self.entries_start(i_file)?;
            let n = selected.saturating_sub(local).min(remaining);
            if n > 0 {
                spans.push((i_file, local..local + n));
            }
            remaining -= n;
            i_file += 1;
            local = 0;
        }
        Ok(spans)
    }

    /// Local row number, within its dataset element, of every buffered row.
    ///
    /// # Errors
    /// Fails if a row count can't be read.
    pub fn current_local_entries(&mut self) -> Result<Vec<u64>> {
        let mut out = Vec::with_capacity(self.buffer.len());
        for (i, r) in self.current_spans()? {
            match self.file_entry_list(i)? {
                None => out.extend(r),
                Some(list) => {
                    out.extend_from_slice(&list[usize::try_from(r.start)?..usize::try_from(r.end)?]);
                }
            }
        }
        Ok(out)
    }

    /// Physical row number over the whole dataset of every buffered row.
    ///
    /// # Errors
    /// Fails if a row count can't be read.
    pub fn current_global_entries(&mut self) -> Result<Vec<u64>> {
        let mut out = Vec::with_capacity(self.buffer.len());
        for (i, r) in self.current_spans()? {
            let offset = self.file_start(i)?;
            match self.file_entry_list(i)? {
                None => out.extend(r.map(|e| e + offset)),
                Some(list) => out.extend(
                    list[usize::try_from(r.start)?..usize::try_from(r.end)?]
                        .iter()
                        .map(|e| e + offset),
                ),
            }
        }
        Ok(out)
    }

    /// File of every buffered row.
    ///
    /// # Errors
    /// Fails if a row count can't be read.
    pub fn current_files(&mut self) -> Result<Vec<&Path>> {
        let spans = self.current_spans()?;
        Ok(spans
            .into_iter()
            .flat_map(|(i, r)| std::iter::repeat_n(self.files[i].as_path(), span_len(&r)))
            .collect())
    }

    /// Group of every buffered row.
    ///
    /// # Errors
    /// Fails if a row count can't be read.
    pub fn current_groups(&mut self) -> Result<Vec<&str>> {
        let spans = self.current_spans()?;
        Ok(spans
            .into_iter()
            .flat_map(|(i, r)| std::iter::repeat_n(self.groups[i].as_str(), span_len(&r)))
            .collect())
    }
}

fn span_len(r: &Range<u64>) -> usize {
    usize::try_from(r.end - r.start).unwrap_or(usize::MAX)
}
