//! 硬盘控制器寄存器协议
//!
//! 任务文件（task file）按端口顺序排列：
//!
//! | 偏移 | 内容 |
//! |------|------|
//! | 0 | 写预补偿柱面 / 4 |
//! | 1 | 扇区数 |
//! | 2 | 起始扇区（从 1 开始） |
//! | 3 | 柱面低 8 位 |
//! | 4 | 柱面高 8 位 |
//! | 5 | `0xA0 | drive << 4 | head` |
//! | 6 | 命令 |

use crate::error::{Error, ErrorKind, Result};
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

bitflags! {
    /// 状态寄存器
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// 上一条命令出错，详见错误寄存器
        const ERR   = 0x01;
        /// 索引脉冲
        const INDEX = 0x02;
        /// 已纠正的 ECC 错误
        const ECC   = 0x04;
        /// 数据请求：可以读写数据端口
        const DRQ   = 0x08;
        /// 寻道完成
        const SEEK  = 0x10;
        /// 写故障
        const WRERR = 0x20;
        /// 驱动器就绪
        const READY = 0x40;
        /// 控制器忙
        const BUSY  = 0x80;
    }
}

impl Status {
    /// 命令是否成功完成
    pub fn is_ok_result(self) -> bool {
        let mask = Self::BUSY | Self::READY | Self::WRERR | Self::SEEK | Self::ERR;
        self & mask == Self::READY | Self::SEEK
    }

    /// 控制器能否接收命令（就绪且不忙）
    pub fn is_ready(self) -> bool {
        self & (Self::BUSY | Self::READY) == Self::READY
    }
}

/// 控制器命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HdCommand {
    /// 磁头复位到 0 柱面
    Restore = 0x10,
    /// 读扇区
    Read = 0x20,
    /// 写扇区
    Write = 0x30,
    /// 校验扇区
    Verify = 0x40,
    /// 格式化磁道
    Format = 0x50,
    /// 初始化
    Init = 0x60,
    /// 寻道
    Seek = 0x70,
    /// 自诊断
    Diagnose = 0x90,
    /// 设置驱动器参数
    Specify = 0x91,
}

impl TryFrom<u8> for HdCommand {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x10 => Self::Restore,
            0x20 => Self::Read,
            0x30 => Self::Write,
            0x40 => Self::Verify,
            0x50 => Self::Format,
            0x60 => Self::Init,
            0x70 => Self::Seek,
            0x90 => Self::Diagnose,
            0x91 => Self::Specify,
            _ => return Err(Error::new(ErrorKind::InvalidInput, "unknown hd-command")),
        })
    }
}

/// 一次命令写入的寄存器内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFile {
    /// 写预补偿柱面 / 4
    pub precomp: u8,
    /// 扇区数
    pub nsect: u8,
    /// 起始扇区（从 1 开始）
    pub sector: u8,
    /// 柱面
    pub cylinder: u16,
    /// 驱动器号
    pub drive: u8,
    /// 磁头号
    pub head: u8,
    /// 命令
    pub command: HdCommand,
}

impl TaskFile {
    /// 按端口顺序编码
    pub fn registers(&self) -> [u8; 7] {
        let mut regs = [0u8; 7];
        regs[0] = self.precomp;
        regs[1] = self.nsect;
        regs[2] = self.sector;
        LittleEndian::write_u16(&mut regs[3..5], self.cylinder);
        regs[5] = 0xA0 | (self.drive << 4) | self.head;
        regs[6] = self.command as u8;
        regs
    }

    /// 从端口内容解码
    pub fn from_registers(regs: &[u8; 7]) -> Result<Self> {
        Ok(Self {
            precomp: regs[0],
            nsect: regs[1],
            sector: regs[2],
            cylinder: LittleEndian::read_u16(&regs[3..5]),
            drive: (regs[5] >> 4) & 1,
            head: regs[5] & 0x0f,
            command: HdCommand::try_from(regs[6])?,
        })
    }
}

/// 硬盘控制器
///
/// 对应 I/O 端口上的一组寄存器，加上一条中断线：每条命令、每个传完的
/// 扇区都会在稍后触发一次中断，由中断上下文调用
/// [`HardDisk::interrupt`](super::HardDisk::interrupt)。实现者不得在这些
/// 方法里同步调用中断处理。
pub trait DiskController: Send + Sync {
    /// 读状态寄存器
    fn status(&self) -> Status;

    /// 读错误寄存器
    fn error(&self) -> u8;

    /// 写控制字节和任务文件，最后一个字节启动命令
    fn command(&self, ctl: u8, regs: &[u8; 7]);

    /// 复位控制器
    fn reset(&self);

    /// 从数据端口读一个扇区
    fn read_data(&self, buf: &mut [u8]);

    /// 向数据端口写一个扇区
    fn write_data(&self, buf: &[u8]);
}
