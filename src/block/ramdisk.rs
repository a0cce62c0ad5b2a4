//! 内存块设备

use super::device::{BlockDevice, BlockKey};
use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// 内存块设备
///
/// 只服务单个设备号，块号范围为 `0..total_blocks`。
/// 记录物理读写次数，便于观察缓存命中情况。
pub struct RamDisk {
    dev: u32,
    block_size: usize,
    total_blocks: u32,
    storage: Mutex<Vec<u8>>,
    reads: AtomicU64,
    writes: AtomicU64,
    flushes: AtomicU64,
}

impl RamDisk {
    /// 创建全零的内存设备
    pub fn new(dev: u32, block_size: usize, total_blocks: u32) -> Self {
        Self {
            dev,
            block_size,
            total_blocks,
            storage: Mutex::new(alloc::vec![0u8; block_size * total_blocks as usize]),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// 设备号
    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// 总块数
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// 物理读取次数
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// 物理写入次数
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// `flush` 调用次数
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// 绕过缓存直接填充一个块（用于准备测试数据或镜像）
    pub fn fill_block(&self, blockno: u32, data: &[u8]) -> Result<()> {
        let range = self.range(BlockKey::new(self.dev, blockno))?;
        let mut storage = self.storage.lock();
        let dst = &mut storage[range];
        let len = data.len().min(dst.len());
        dst[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    /// 绕过缓存直接读取一个块的副本
    pub fn snapshot_block(&self, blockno: u32) -> Result<Vec<u8>> {
        let range = self.range(BlockKey::new(self.dev, blockno))?;
        Ok(self.storage.lock()[range].to_vec())
    }

    fn range(&self, key: BlockKey) -> Result<core::ops::Range<usize>> {
        if key.dev != self.dev {
            return Err(Error::new(ErrorKind::InvalidInput, "Unknown device number"));
        }
        if key.blockno >= self.total_blocks {
            return Err(Error::new(ErrorKind::InvalidInput, "Block number out of range"));
        }
        let start = key.blockno as usize * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()> {
        let range = self.range(key)?;
        if buf.len() < self.block_size {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer too small for block"));
        }
        buf[..self.block_size].copy_from_slice(&self.storage.lock()[range]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()> {
        let range = self.range(key)?;
        if buf.len() < self.block_size {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer too small for block"));
        }
        self.storage.lock()[range].copy_from_slice(&buf[..self.block_size]);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
