//! 块缓存配置

use crate::consts::{BSIZE, NBUCKET, NBUF};
use crate::error::{Error, ErrorKind, Result};

/// 块缓存配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// 缓冲池大小（块数），初始化后固定
    pub nbuf: usize,
    /// 哈希桶数量
    pub nbucket: usize,
    /// 块大小（字节），必须与设备一致
    pub block_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            nbuf: NBUF,
            nbucket: NBUCKET,
            block_size: BSIZE,
        }
    }
}

impl CacheConfig {
    /// 指定缓冲池大小和桶数，块大小取默认值
    pub const fn new(nbuf: usize, nbucket: usize) -> Self {
        Self {
            nbuf,
            nbucket,
            block_size: BSIZE,
        }
    }

    /// 替换块大小
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// 校验配置
    ///
    /// `device_block_size` 为设备报告的块大小。
    pub fn validate(&self, device_block_size: usize) -> Result<()> {
        if self.nbuf == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Buffer pool must not be empty"));
        }
        if self.nbucket == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Bucket count must not be zero"));
        }
        if self.block_size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "Block size must not be zero"));
        }
        if self.block_size != device_block_size {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Cache block size does not match device block size",
            ));
        }
        Ok(())
    }
}
