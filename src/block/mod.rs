//! 块设备抽象
//!
//! block/device.rs 定义缓存键和缓存所依赖的设备接口，
//! block/ramdisk.rs 提供一个内存实现。

mod device;
mod ramdisk;

pub use device::{BlockDevice, BlockKey};
pub use ramdisk::RamDisk;
