//! Fixtures and assertions for testing code built on chunked iteration.
//!
//! - **Fixtures**: small event tables, in-memory multi-file datasets, and
//!   (with `io-parquet`) the same datasets written as Parquet files
//! - **Assertions**: pull a column out of a block or a whole iterator and
//!   compare it
//!
//! # Quick Start
//!
//! ```
//! use chunkwise::{BufferLen, ChunkIterator};
//! use chunkwise::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! // 5 rows in f1.pq and 7 in f2.pq, group "evt", idx 0..12
//! let mut it = ChunkIterator::builder(two_file_store()?)
//!     .files(["f1.pq", "f2.pq"])
//!     .groups("evt")
//!     .buffer_len(BufferLen::Rows(4))
//!     .build()?;
//!
//! assert_eq!(collect_u64(&mut it, "idx")?, (0..12).collect::<Vec<u64>>());
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
