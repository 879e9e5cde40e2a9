//! 缓冲区缓存
//!
//! 固定数量的块大小槽位，按 `(dev, block)` 缓存磁盘块。
//!
//! # 主要组件
//!
//! - [`Buffer`] - 单个槽位：数据、状态标志和等待队列
//! - [`BufferCache`] - 缓存管理器：哈希索引、空闲环、引用计数
//! - [`BufferFlags`] - 槽位状态标志
//! - [`CacheStats`] - 缓存统计信息
//!
//! # 使用示例
//!
//! ```rust,ignore
//! use blkio_core::cache::BufferCache;
//!
//! let handle = cache.read(dev, 100).ok_or(io_error)?;
//! cache.with_data_mut(handle, |data| data[0] = 42);
//! cache.release(handle);
//!
//! // 写回所有脏块
//! cache.sync_all();
//! ```
//!
//! # 不变量
//!
//! - 每个 `(dev, block)` 最多对应一个槽位；
//! - 设备号非 0 的槽位恰好在一条哈希链上，设备号为 0 的槽位不在任何链上；
//! - 所有槽位都在空闲环上（正在被回收的那一刻除外），引用计数为 0 的
//!   槽位才能被回收；
//! - 持有者调用 `release` 前槽位不会被重新标记。

mod block_cache;
mod buffer;
mod list;

pub use block_cache::{BufferCache, BufferHandle, CacheStats};
pub use buffer::{Buffer, BufferFlags, BufferId};
