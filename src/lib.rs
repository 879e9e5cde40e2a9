//! blkio_core: 块 I/O 核心
//!
//! 这是一个早期 Unix 风格的块 I/O 子系统，包括：
//! - **缓冲区缓存**：固定数量的块大小槽位，哈希索引 + 空闲环（近似 LRU）+ 引用计数
//! - **设备分派**：按主设备号把读写交给驱动
//! - **硬盘驱动**：电梯排序的请求队列、中断驱动的逐扇区传输、出错重试
//!
//! # 示例
//!
//! ```rust,ignore
//! use blkio_core::{
//!     BufferCache, CacheConfig, DeviceTable, HardDisk, HdConfig, IrqThread, MemDisk,
//!     SimController, consts::MAJOR_HD, mkdev,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> blkio_core::Result<()> {
//!     let config = HdConfig::default();
//!     let disks = config
//!         .drives
//!         .iter()
//!         .map(|geo| (*geo, MemDisk::new(geo.total_sectors() as u64)))
//!         .collect();
//!     let ctrl = Arc::new(SimController::new(disks));
//!     let hd = Arc::new(HardDisk::new(&config, ctrl.clone())?);
//!     let _irq = IrqThread::spawn(ctrl, hd.clone())?;
//!
//!     let mut devices = DeviceTable::new();
//!     devices.register(MAJOR_HD, hd)?;
//!     let cache = BufferCache::new(&CacheConfig::default(), devices)?;
//!
//!     // 读取块
//!     let dev = mkdev(MAJOR_HD, 0);
//!     if let Some(handle) = cache.read(dev, 1) {
//!         cache.with_data(handle, |data| println!("{:02x}", data[0]));
//!         cache.release(handle);
//!     }
//!     cache.sync_all();
//!     Ok(())
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`config`] - 运行时配置
//! - [`cache`] - 缓冲区缓存
//! - [`block`] - 设备分派、存储介质、字节范围读写
//! - [`hd`] - 硬盘驱动与控制器模拟器

#![deny(unsafe_code)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 运行时配置
pub mod config;

/// 睡眠/唤醒原语
pub mod sync;

/// 缓冲区缓存
pub mod cache;

/// 块设备层
pub mod block;

/// 硬盘驱动
pub mod hd;

#[cfg(test)]
mod test_util;

#[cfg(test)]
mod tests;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 配置
pub use config::{CacheConfig, HdConfig};

// 缓存
pub use cache::{Buffer, BufferCache, BufferFlags, BufferHandle, BufferId, CacheStats};

// 块设备
pub use block::{
    block_read, block_write, major, minor, mkdev, Block, BlockDevice, BlockDriver, Command,
    DevId, DeviceTable, MemDisk,
};

// 硬盘
pub use hd::{DiskController, DriveGeometry, HardDisk, IrqThread, Partition, SimController};

// 等待队列
pub use sync::WaitQueue;
