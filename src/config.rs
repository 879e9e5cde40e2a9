//! 运行时配置

use crate::cache::Buffer;
use crate::consts::{
    BLOCK_SIZE, DEFAULT_BUFFER_MEMORY, DEFAULT_HD_CYLINDERS, DEFAULT_HD_HEADS, DEFAULT_HD_LZONE,
    DEFAULT_HD_SECTORS, DEFAULT_HD_WPCOM, MAX_HD, NR_HASH, NR_REQUEST,
};
use crate::error::{Error, ErrorKind, Result};
use crate::hd::DriveGeometry;

/// 缓冲区缓存配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// 槽位数，启动后不再变化
    pub nr_buffers: usize,
    /// 哈希桶数
    pub nr_hash: usize,
}

impl CacheConfig {
    /// 用一段预留内存能容纳的槽位数构造
    ///
    /// 每个槽位占一块数据加一个槽位头。
    pub fn from_region(bytes: usize) -> Self {
        let per_slot = BLOCK_SIZE + core::mem::size_of::<Buffer>();
        Self {
            nr_buffers: bytes / per_slot,
            nr_hash: NR_HASH,
        }
    }

    /// 检查配置
    pub fn validate(&self) -> Result<()> {
        if self.nr_buffers == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "cache needs at least one buffer"));
        }
        if self.nr_hash == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "cache needs at least one hash bucket"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_region(DEFAULT_BUFFER_MEMORY)
    }
}

/// 硬盘驱动配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdConfig {
    /// 每个驱动器的几何参数
    pub drives: Vec<DriveGeometry>,
    /// 请求槽位数
    pub nr_request: usize,
}

impl HdConfig {
    /// 检查配置
    pub fn validate(&self) -> Result<()> {
        if self.drives.is_empty() || self.drives.len() > MAX_HD {
            return Err(Error::new(ErrorKind::InvalidInput, "unsupported number of drives"));
        }
        for geo in &self.drives {
            if geo.heads == 0 || geo.heads > 16 {
                return Err(Error::new(ErrorKind::InvalidInput, "drive heads must be 1..=16"));
            }
            if geo.sectors == 0 {
                return Err(Error::new(ErrorKind::InvalidInput, "drive needs at least one sector per track"));
            }
            if geo.cylinders == 0 {
                return Err(Error::new(ErrorKind::InvalidInput, "drive needs at least one cylinder"));
            }
        }
        if self.nr_request == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "request pool cannot be empty"));
        }
        Ok(())
    }
}

impl Default for HdConfig {
    fn default() -> Self {
        let geo = DriveGeometry {
            heads: DEFAULT_HD_HEADS,
            sectors: DEFAULT_HD_SECTORS,
            cylinders: DEFAULT_HD_CYLINDERS,
            wpcom: DEFAULT_HD_WPCOM,
            lzone: DEFAULT_HD_LZONE,
            ctl: 0,
        };
        Self {
            drives: vec![geo; 2],
            nr_request: NR_REQUEST,
        }
    }
}
