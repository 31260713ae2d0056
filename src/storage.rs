pub mod buffer;
pub mod disk;
pub mod error;

pub use buffer::{PageCache, PageReadGuard, PageWriteGuard};
pub use disk::{BlockFile, PageId, DEFAULT_BLOCK_SIZE};
pub use error::{StorageError, StorageResult};
