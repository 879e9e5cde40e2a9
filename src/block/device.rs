//! 存储介质抽象
//!
//! [`BlockDevice`] 是控制器背后的"盘片"：按扇区寻址的字节存储。
//! 硬盘模拟器（[`SimController`](crate::hd::SimController)）通过它读写数据，
//! 换用其他后端时只需实现这个 trait。

use crate::consts::SECTOR_SIZE;
use crate::error::{Error, ErrorKind, Result};

/// 存储介质接口
///
/// # 示例
///
/// ```rust,ignore
/// use blkio_core::{BlockDevice, Result};
///
/// struct MyDisk {
///     // ...
/// }
///
/// impl BlockDevice for MyDisk {
///     fn total_sectors(&self) -> u64 {
///         4096
///     }
///
///     fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * 512)
///     }
///
///     fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         Ok(count as usize * 512)
///     }
/// }
/// ```
pub trait BlockDevice: Send {
    /// 总扇区数
    fn total_sectors(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号（从 0 开始）
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * SECTOR_SIZE）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号（从 0 开始）
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * SECTOR_SIZE）
    ///
    /// # 返回
    ///
    /// 成功返回实际写入的字节数
    fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;
}

/// 内存盘
#[derive(Debug, Clone)]
pub struct MemDisk {
    storage: Vec<u8>,
}

impl MemDisk {
    /// 创建全零的内存盘
    pub fn new(total_sectors: u64) -> Self {
        Self {
            storage: vec![0u8; total_sectors as usize * SECTOR_SIZE],
        }
    }

    /// 整个镜像
    pub fn image(&self) -> &[u8] {
        &self.storage
    }

    /// 整个镜像（可写）
    pub fn image_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    fn range(&self, lba: u64, count: u32, buf_len: usize) -> Result<core::ops::Range<usize>> {
        let start = lba as usize * SECTOR_SIZE;
        let len = count as usize * SECTOR_SIZE;
        if buf_len < len {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer too small for sectors",
            ));
        }
        if start + len > self.storage.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "sector out of range"));
        }
        Ok(start..start + len)
    }
}

impl BlockDevice for MemDisk {
    fn total_sectors(&self) -> u64 {
        (self.storage.len() / SECTOR_SIZE) as u64
    }

    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let range = self.range(lba, count, buf.len())?;
        let len = range.len();
        buf[..len].copy_from_slice(&self.storage[range]);
        Ok(len)
    }

    fn write_sectors(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        let range = self.range(lba, count, buf.len())?;
        let len = range.len();
        self.storage[range].copy_from_slice(&buf[..len]);
        Ok(len)
    }
}
