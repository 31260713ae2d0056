//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("block {0} does not exist")]
    BlockNotFound(crate::storage::disk::PageId),

    #[error("invalid block size {0}: offsets within a block must fit in 16 bits")]
    InvalidBlockSize(usize),

    #[error("buffer length {got} does not match the block size {expected}")]
    BufferSizeMismatch { got: usize, expected: usize },

    #[error("page cache is full: every frame is pinned")]
    CacheFull,

    #[error("page {0} is still pinned")]
    PagePinned(crate::storage::disk::PageId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
