//! 块缓存常量定义

/// 默认缓存块数量
pub const NBUF: usize = 30;

/// 默认哈希桶数量
///
/// 取素数，使连续块号均匀落到各个桶里。
pub const NBUCKET: usize = 13;

/// 默认块大小（字节）
pub const BSIZE: usize = 1024;
