//! 常量定义
//!
//! 这个模块包含块 I/O 核心的所有编译期常量，包括：
//! - 块与扇区大小
//! - 缓冲区缓存与请求池的容量上限
//! - 主设备号分配
//! - 硬盘控制器寄存器协议

//=============================================================================
// 基础常量
//=============================================================================

/// 扇区大小（字节）
pub const SECTOR_SIZE: usize = 512;

/// 块大小（字节），一个块恰好两个扇区
pub const BLOCK_SIZE: usize = 1024;

/// 每块扇区数
pub const SECTORS_PER_BLOCK: u32 = (BLOCK_SIZE / SECTOR_SIZE) as u32;

//=============================================================================
// 缓冲区缓存
//=============================================================================

/// 哈希桶数量
pub const NR_HASH: usize = 307;

/// 默认保留给缓冲区的内存（1 MiB）
pub const DEFAULT_BUFFER_MEMORY: usize = 0x10_0000;

//=============================================================================
// 设备号
//=============================================================================

/// 块设备分派表大小
pub const NR_BLK_DEV: usize = 7;

/// 无设备
pub const MAJOR_NODEV: u8 = 0;

/// 内存设备（保留）
pub const MAJOR_MEM: u8 = 1;

/// 软盘（保留）
pub const MAJOR_FD: u8 = 2;

/// 硬盘
pub const MAJOR_HD: u8 = 3;

/// 串口终端（保留）
pub const MAJOR_TTYX: u8 = 4;

/// 控制终端（保留）
pub const MAJOR_TTY: u8 = 5;

/// 打印机（保留）
pub const MAJOR_LP: u8 = 6;

/// 启动时的根设备（第一块硬盘的第 6 个次设备）
pub const ROOT_DEV: u16 = 0x306;

//=============================================================================
// 硬盘驱动
//=============================================================================

/// 单个请求连续出错的最大重试次数
pub const MAX_ERRORS: u32 = 5;

/// 支持的最大硬盘数
pub const MAX_HD: usize = 2;

/// 每块硬盘占用的次设备号数（整盘 + 4 个主分区）
pub const MINORS_PER_HD: usize = 5;

/// 请求池大小
pub const NR_REQUEST: usize = 32;

/// 等待控制器就绪的轮询次数
pub const READY_RETRIES: u32 = 1000;

/// 写命令发出后等待 DRQ 的轮询次数
pub const DRQ_RETRIES: u32 = 3000;

/// 分区表在 0 号扇区中的偏移
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

/// 分区表项大小
pub const PARTITION_ENTRY_SIZE: usize = 16;

/// 默认硬盘参数：磁头数
pub const DEFAULT_HD_HEADS: u8 = 5;

/// 默认硬盘参数：每磁道扇区数
pub const DEFAULT_HD_SECTORS: u8 = 17;

/// 默认硬盘参数：柱面数
pub const DEFAULT_HD_CYLINDERS: u16 = 980;

/// 默认硬盘参数：写预补偿柱面
pub const DEFAULT_HD_WPCOM: u16 = 300;

/// 默认硬盘参数：磁头着陆区
pub const DEFAULT_HD_LZONE: u16 = 980;
