use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Default block size. Any size works as long as in-block offsets fit in
/// 16 bits; the leaf layer reads the actual size off the buffer it gets.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Smallest block that can hold a leaf header and one slot.
pub const MIN_BLOCK_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// File-backed block store. Blocks are fixed-size and addressed by
/// `PageId`; freed blocks are recycled through an in-memory free list.
pub struct BlockFile {
    file: File,
    block_size: usize,
    free_list: Vec<PageId>,
}

impl BlockFile {
    pub fn create(path: &Path, block_size: usize) -> StorageResult<Self> {
        Self::check_block_size(block_size)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            block_size,
            free_list: Vec::new(),
        })
    }

    pub fn open(path: &Path, block_size: usize) -> StorageResult<Self> {
        Self::check_block_size(block_size)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            block_size,
            free_list: Vec::new(),
        })
    }

    fn check_block_size(block_size: usize) -> StorageResult<()> {
        if block_size < MIN_BLOCK_SIZE || block_size > u16::MAX as usize {
            return Err(StorageError::InvalidBlockSize(block_size));
        }
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn read_block(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        if buf.len() != self.block_size {
            return Err(StorageError::BufferSizeMismatch {
                got: buf.len(),
                expected: self.block_size,
            });
        }

        let offset = self.block_offset(page_id);
        if offset >= self.file.metadata()?.len() {
            return Err(StorageError::BlockNotFound(page_id));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_block(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        if data.len() != self.block_size {
            return Err(StorageError::BufferSizeMismatch {
                got: data.len(),
                expected: self.block_size,
            });
        }

        let offset = self.block_offset(page_id);
        if offset >= self.file.metadata()?.len() {
            self.file.set_len(offset + self.block_size as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Hand out a fresh block, recycling a freed one when available.
    pub fn allocate_block(&mut self) -> StorageResult<PageId> {
        if let Some(page_id) = self.free_list.pop() {
            debug!(page = page_id.0, "reusing freed block");
            return Ok(page_id);
        }

        let page_id = PageId(self.num_blocks()?);
        self.file
            .set_len((page_id.0 as u64 + 1) * self.block_size as u64)?;
        debug!(page = page_id.0, "allocated block");
        Ok(page_id)
    }

    /// Return a block to the free list. The tree driver calls this for a
    /// leaf it emptied through a merge.
    pub fn free_block(&mut self, page_id: PageId) {
        debug!(page = page_id.0, "freed block");
        self.free_list.push(page_id);
    }

    pub fn num_blocks(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.block_size as u64) as u32)
    }

    pub fn sync(&self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn block_offset(&self, page_id: PageId) -> u64 {
        page_id.0 as u64 * self.block_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_read_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let mut file = BlockFile::create(&dir.path().join("test.db"), 64)?;

        let page_id = file.allocate_block()?;
        let data = vec![0xAB; 64];
        file.write_block(page_id, &data)?;

        let mut buf = vec![0u8; 64];
        file.read_block(page_id, &mut buf)?;
        assert_eq!(buf, data);
        Ok(())
    }

    #[test]
    fn test_read_missing_block_fails() -> Result<()> {
        let dir = tempdir()?;
        let mut file = BlockFile::create(&dir.path().join("test.db"), 64)?;

        let mut buf = vec![0u8; 64];
        let err = file.read_block(PageId(3), &mut buf).unwrap_err();
        assert!(matches!(err, StorageError::BlockNotFound(PageId(3))));
        Ok(())
    }

    #[test]
    fn test_buffer_size_must_match() -> Result<()> {
        let dir = tempdir()?;
        let mut file = BlockFile::create(&dir.path().join("test.db"), 64)?;
        let page_id = file.allocate_block()?;

        let mut short = vec![0u8; 32];
        assert!(matches!(
            file.read_block(page_id, &mut short),
            Err(StorageError::BufferSizeMismatch { got: 32, expected: 64 })
        ));
        assert!(matches!(
            file.write_block(page_id, &short),
            Err(StorageError::BufferSizeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_block_sizes_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        assert!(matches!(
            BlockFile::create(&path, 16),
            Err(StorageError::InvalidBlockSize(16))
        ));
        assert!(matches!(
            BlockFile::create(&path, 1 << 17),
            Err(StorageError::InvalidBlockSize(_))
        ));
    }

    #[test]
    fn test_allocate_recycles_freed_blocks() -> Result<()> {
        let dir = tempdir()?;
        let mut file = BlockFile::create(&dir.path().join("test.db"), 64)?;

        let a = file.allocate_block()?;
        let b = file.allocate_block()?;
        assert_ne!(a, b);

        file.free_block(a);
        assert_eq!(file.allocate_block()?, a);
        assert_eq!(file.allocate_block()?, PageId(2));
        Ok(())
    }

    #[test]
    fn test_open_existing_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");

        {
            let mut file = BlockFile::create(&path, 64)?;
            let page_id = file.allocate_block()?;
            file.write_block(page_id, &vec![0x5A; 64])?;
            file.sync()?;
        }

        let mut file = BlockFile::open(&path, 64)?;
        assert_eq!(file.num_blocks()?, 1);
        let mut buf = vec![0u8; 64];
        file.read_block(PageId(0), &mut buf)?;
        assert_eq!(buf, vec![0x5A; 64]);
        Ok(())
    }
}
