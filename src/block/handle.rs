//! 块句柄 - RAII 风格的块访问

use super::DevId;
use crate::cache::{BufferCache, BufferHandle};
use crate::error::{Error, ErrorKind, Result};

/// 块句柄
///
/// 持有缓存中一个槽位的引用，丢弃时自动释放：
/// - 获取时从缓存取得槽位，`read` 还会保证数据有效
/// - 持有期间槽位不会被回收或重新标记
/// - `with_data_mut` 自动标记为脏，脏块在回收或 `sync` 时写回
///
/// # 示例
///
/// ```rust,ignore
/// // 读取块
/// let block = Block::read(&cache, ROOT_DEV, 1)?;
/// block.with_data(|data| {
///     println!("First byte: {:02x}", data[0]);
/// });
///
/// // 新块（不从磁盘读取）
/// let block = Block::get(&cache, ROOT_DEV, 10);
/// block.with_data_mut(|data| data.fill(0xFF));
/// ```
pub struct Block<'a> {
    cache: &'a BufferCache,
    handle: Option<BufferHandle>,
}

impl<'a> Block<'a> {
    /// 取得块，不保证数据有效
    pub fn get(cache: &'a BufferCache, dev: DevId, block: u32) -> Self {
        Self {
            cache,
            handle: Some(cache.acquire(dev, block)),
        }
    }

    /// 取得块并保证数据有效
    ///
    /// 重试耗尽后返回 `ErrorKind::Io`。
    pub fn read(cache: &'a BufferCache, dev: DevId, block: u32) -> Result<Self> {
        let handle = cache
            .read(dev, block)
            .ok_or(Error::new(ErrorKind::Io, "block unreadable"))?;
        Ok(Self {
            cache,
            handle: Some(handle),
        })
    }

    fn handle(&self) -> BufferHandle {
        match self.handle {
            Some(handle) => handle,
            None => unreachable!("block used after release"),
        }
    }

    /// 设备号
    pub fn dev(&self) -> DevId {
        self.handle().dev()
    }

    /// 块号
    pub fn block_no(&self) -> u32 {
        self.handle().block()
    }

    /// 数据是否有效
    pub fn is_uptodate(&self) -> bool {
        self.cache.buffer(self.handle()).is_uptodate()
    }

    /// 是否为脏块
    pub fn is_dirty(&self) -> bool {
        self.cache.buffer(self.handle()).is_dirty()
    }

    /// 只读访问数据
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.cache.with_data(self.handle(), f)
    }

    /// 修改数据并标记为脏
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.cache.with_data_mut(self.handle(), f)
    }

    /// 显式释放
    pub fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            self.cache.release(handle);
        }
    }
}

impl Drop for Block<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cache.release(handle);
        }
    }
}
