//! Row selection: which physical rows become logical entries.
//!
//! A selection is supplied either as a list of entry numbers or as a boolean
//! mask, each in a global form (over the concatenated physical rows of the
//! whole dataset) or a per-file form (one list/mask per dataset element).
//! Masks are turned into lists of their `true` positions at construction.
//!
//! Internally the state keeps two views of the same selection: the sorted
//! global list and one sorted local list per dataset element. Whichever one
//! was supplied is authoritative; the other is derived lazily by the iterator
//! (it needs the cumulative row counts for that) and cached here.

use crate::error::IterError;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Entry numbers to read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryList {
    /// Entry numbers over the whole dataset's physical rows.
    Global(Vec<u64>),
    /// Local row numbers, one list per dataset element.
    PerFile(Vec<Vec<u64>>),
}

impl From<Vec<u64>> for EntryList {
    fn from(v: Vec<u64>) -> Self {
        Self::Global(v)
    }
}

impl From<Vec<Vec<u64>>> for EntryList {
    fn from(v: Vec<Vec<u64>>) -> Self {
        Self::PerFile(v)
    }
}

/// Boolean mask of entries to read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryMask {
    Global(Vec<bool>),
    PerFile(Vec<Vec<bool>>),
}

impl From<Vec<bool>> for EntryMask {
    fn from(v: Vec<bool>) -> Self {
        Self::Global(v)
    }
}

impl From<Vec<Vec<bool>>> for EntryMask {
    fn from(v: Vec<Vec<bool>>) -> Self {
        Self::PerFile(v)
    }
}

fn nonzero(mask: &[bool]) -> Vec<u64> {
    mask.iter()
        .enumerate()
        .filter(|(_, keep)| **keep)
        .map(|(i, _)| i as u64)
        .collect()
}

/// Strictly ascending: repeated entries are selected once.
fn sorted(mut v: Vec<u64>) -> Arc<[u64]> {
    v.sort_unstable();
    v.dedup();
    v.into()
}

/// Cached selection for one iterator.
#[derive(Clone, Debug, Default)]
pub(crate) struct SelectionState {
    /// `None` when every row is selected. Otherwise one slot per dataset
    /// element; an empty slot is derived from `global` on first use.
    pub(crate) local: Option<Vec<Option<Arc<[u64]>>>>,
    pub(crate) global: Option<Arc<[u64]>>,
}

impl SelectionState {
    /// Validate and normalize construction input for `n_files` dataset elements.
    pub(crate) fn new(
        list: Option<EntryList>,
        mask: Option<EntryMask>,
        n_files: usize,
    ) -> Result<Self> {
        let per_file = |lists: Vec<Vec<u64>>| -> Result<Self> {
            if lists.len() > n_files {
                bail!(IterError::Config(format!(
                    "per-file selection has {} lists but the dataset has {n_files} elements",
                    lists.len()
                )));
            }
            let empty: Arc<[u64]> = Arc::from(Vec::new());
            let mut local = vec![Some(Arc::clone(&empty)); n_files];
            for (slot, l) in local.iter_mut().zip(lists) {
                *slot = Some(sorted(l));
            }
            Ok(Self {
                local: Some(local),
                global: None,
            })
        };
        let global = |entries: Vec<u64>| Self {
            local: Some(vec![None; n_files]),
            global: Some(sorted(entries)),
        };

        match (list, mask) {
            (Some(_), Some(_)) => bail!(IterError::Config(
                "entry_list and entry_mask arguments are mutually exclusive".into()
            )),
            (None, None) => Ok(Self::default()),
            (Some(EntryList::Global(v)), None) => Ok(global(v)),
            (Some(EntryList::PerFile(ls)), None) => per_file(ls),
            (None, Some(EntryMask::Global(m))) => Ok(global(nonzero(&m))),
            (None, Some(EntryMask::PerFile(ms))) => {
                per_file(ms.iter().map(|m| nonzero(m)).collect())
            }
        }
    }

    pub(crate) fn is_selected(&self) -> bool {
        self.local.is_some()
    }

    /// Restrict to a contiguous range of dataset elements. Local lists in
    /// the range must already be materialized; the global list is dropped
    /// and rebuilt lazily from them.
    pub(crate) fn slice(&self, range: Range<usize>) -> Self {
        Self {
            local: self.local.as_ref().map(|l| l[range].to_vec()),
            global: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_and_mask_are_exclusive() {
        let err = SelectionState::new(
            Some(EntryList::Global(vec![1])),
            Some(EntryMask::Global(vec![true])),
            2,
        )
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<IterError>(), Some(IterError::Config(_))));
    }

    #[test]
    fn masks_become_sorted_lists() {
        let s = SelectionState::new(None, Some(EntryMask::Global(vec![false, true, true])), 2)
            .unwrap();
        assert_eq!(s.global.as_deref(), Some(&[1u64, 2][..]));
        assert!(s.local.as_ref().unwrap().iter().all(Option::is_none));

        let s = SelectionState::new(
            Some(EntryList::PerFile(vec![vec![3, 1]])),
            None,
            2,
        )
        .unwrap();
        let local = s.local.unwrap();
        assert_eq!(local[0].as_deref(), Some(&[1u64, 3][..]));
        assert_eq!(local[1].as_deref(), Some(&[][..]));
        assert!(s.global.is_none());
    }

    #[test]
    fn too_many_per_file_lists() {
        let err = SelectionState::new(Some(EntryList::PerFile(vec![vec![], vec![], vec![]])), None, 2)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<IterError>(), Some(IterError::Config(_))));
    }
}
