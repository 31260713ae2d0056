pub mod block_file;

pub use block_file::{BlockFile, PageId, DEFAULT_BLOCK_SIZE, MIN_BLOCK_SIZE};
