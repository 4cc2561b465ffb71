//! Lazily resolved cumulative counts over dataset elements.
//!
//! The iterator keeps two of these: cumulative physical rows and cumulative
//! selected entries. Values are resolved strictly left to right, so the
//! resolved part is always a prefix; `resolved` is the watermark marking
//! its end. Resolved values are non-decreasing and never recomputed.

use std::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CumulativeMap {
    values: Vec<Option<u64>>,
    resolved: usize,
}

impl CumulativeMap {
    /// A map of `n` unresolved elements.
    #[must_use]
    pub fn unresolved(n: usize) -> Self {
        Self {
            values: vec![None; n],
            resolved: 0,
        }
    }

    /// A fully resolved map.
    #[must_use]
    pub fn from_values(values: Vec<u64>) -> Self {
        let resolved = values.len();
        Self {
            values: values.into_iter().map(Some).collect(),
            resolved,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of resolved elements; they are exactly `0..resolved_len()`.
    #[must_use]
    pub fn resolved_len(&self) -> usize {
        self.resolved
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<u64> {
        self.values.get(i).copied().flatten()
    }

    /// Value of the last resolved element, or 0 if nothing is resolved.
    #[must_use]
    pub fn last_resolved(&self) -> u64 {
        self.resolved
            .checked_sub(1)
            .and_then(|i| self.get(i))
            .unwrap_or(0)
    }

    /// Resolve element `i`, which must be the first unresolved one.
    pub fn push_resolved(&mut self, i: usize, value: u64) {
        debug_assert_eq!(i, self.resolved, "cumulative counts resolve left to right");
        debug_assert!(value >= self.last_resolved());
        self.values[i] = Some(value);
        self.resolved = i + 1;
    }

    /// Index of the first resolved element whose value is greater than
    /// `entry`, or `resolved_len()` if there is none.
    #[must_use]
    pub fn search(&self, entry: u64) -> usize {
        self.values[..self.resolved].partition_point(|v| v.is_some_and(|v| v <= entry))
    }

    /// Copy of a contiguous range of elements.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> Self {
        let start = range.start;
        let values = self.values[range].to_vec();
        let resolved = self.resolved.saturating_sub(start).min(values.len());
        Self { values, resolved }
    }

    /// Subtract `offset` from every resolved value.
    pub fn rebase(&mut self, offset: u64) {
        for v in self.values[..self.resolved].iter_mut().flatten() {
            *v -= offset;
        }
    }
}
