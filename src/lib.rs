//! # chunkwise
//!
//! **Chunked, random-access iteration** over a dataset spread across many
//! files and many named groups inside each file.
//!
//! A [`ChunkIterator`] flattens its files and groups into one ordered list of
//! *dataset elements* and presents their rows as a single entry space
//! `0..len`. Rows can be left out by a selection (a list of entries or a
//! boolean mask) and columns by a [`FieldMask`]. Data is read one block at a
//! time into a reusable Arrow-backed [`Table`].
//!
//! ## Key Features
//!
//! - **Lazy indexing** - files are asked for their row counts only when an
//!   entry inside or past them is needed
//! - **Four selection modes** - none, global entry list, per-file entry lists,
//!   per-file or global boolean masks
//! - **Random access** - [`read`](ChunkIterator::read) any block at any entry
//! - **Friends** - read parallel datasets in lockstep and see their columns
//!   side by side
//! - **Parallel map/reduce** - [`map`](ChunkIterator::map),
//!   [`accumulate`](ChunkIterator::accumulate), [`query`](ChunkIterator::query)
//!   and [`hist`](ChunkIterator::hist) over rayon, with results merged in a
//!   fixed order so parallel and sequential runs agree
//! - **Pluggable storage** - anything implementing [`RowStore`]; Parquet and
//!   in-memory stores are included
//!
//! ## Quick Start
//!
//! ```no_run
//! use chunkwise::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let mut it = ChunkIterator::builder(ParquetStore::new())
//!     .files(["run*.parquet"])
//!     .base_path("$DATA_DIR/p03")
//!     .groups(["ch1", "ch2"])
//!     .field_mask(FieldMask::include(["energy", "timestamp"]))
//!     .buffer_len("10*MB".parse::<BufferLen>()?)
//!     .build()?;
//!
//! println!("{} entries", it.len()?);
//!
//! // Sequential
//! while let Some(block) = it.next_block()? {
//!     let _ = block.column("energy");
//! }
//!
//! // Parallel, in block order
//! let sizes = it.map(|block, _| block.len(), Workers::Count(8))?;
//! # let _ = sizes;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration files
//!
//! The same arguments can come from JSON through [`IterConfig`]:
//!
//! ```json
//! {
//!   "files": ["run*.parquet"],
//!   "groups": ["ch1", "ch2"],
//!   "entry_mask": [true, false, true],
//!   "field_mask": {"energy": true, "timestamp": true},
//!   "buffer_len": "100*MB"
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`iterator`] - `ChunkIterator`: indexing, reads, friends, partitioning
//! - [`mapreduce`] - `map` and `accumulate` over blocks, sequential or parallel
//! - [`query`] - collecting filtered blocks, row-filter expressions
//! - [`hist`] - filling histograms from blocks
//! - [`store`] - the `RowStore` trait and the in-memory store
//! - [`io`] - path expansion and the Parquet store
//! - [`config`] - buffer lengths, field masks, group lists, JSON configuration
//! - [`testing`] - fixtures and assertions

pub mod config;
pub mod error;
pub mod hist;
pub mod index;
pub mod io;
pub mod iterator;
pub mod mapreduce;
pub mod query;
pub mod selection;
pub mod store;
pub mod table;
pub mod testing;

pub use config::{BufferLen, FieldMask, Files, Groups, IterConfig};
pub use error::IterError;
pub use hist::{Axis, Hist, Histogram};
pub use iterator::{Blocks, ChunkIterator, ChunkIteratorBuilder};
pub use mapreduce::{Accumulate, Workers};
pub use query::{Block, BlockFn, Filter, RowFilter};
pub use selection::{EntryList, EntryMask};
pub use store::{MemoryStore, RowSpan, RowStore};
pub use table::Table;

#[cfg(feature = "io-parquet")]
pub use io::parquet::{ParquetStore, write_parquet_groups};
