//! Fatal error kinds raised by the iterator and its map/reduce helpers.
//!
//! Every public function in this crate returns [`anyhow::Result`]. The fatal
//! conditions listed here are carried inside that error and can be recovered
//! with [`anyhow::Error::downcast_ref`]:
//!
//! ```
//! use chunkwise::IterError;
//!
//! let err = anyhow::Error::new(IterError::InvalidArgument("n_entries".into()));
//! assert!(matches!(err.downcast_ref::<IterError>(), Some(IterError::InvalidArgument(_))));
//! ```
//!
//! I/O failures from the store (missing files, undecodable Parquet) are plain
//! `anyhow` errors with context attached.

use thiserror::Error;

/// Fatal iterator errors.
#[derive(Debug, Error)]
pub enum IterError {
    /// Malformed or inconsistent construction arguments.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The file arguments expanded to nothing.
    #[error("can't open any files from {0}")]
    NoFiles(String),

    /// A call argument is out of its allowed range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A block produced by a user function can't be combined or binned.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A friend iterator fell out of step with its primary.
    #[error("friend mismatch: {0}")]
    FriendMismatch(String),
}
