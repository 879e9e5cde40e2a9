//! 驱动器几何参数与分区表

use crate::consts::{PARTITION_ENTRY_SIZE, PARTITION_TABLE_OFFSET, SECTOR_SIZE};
use crate::error::{Error, ErrorKind, Result};
use byteorder::{ByteOrder, LittleEndian};

/// 驱动器参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveGeometry {
    /// 磁头数
    pub heads: u8,
    /// 每磁道扇区数
    pub sectors: u8,
    /// 柱面数
    pub cylinders: u16,
    /// 写预补偿起始柱面
    pub wpcom: u16,
    /// 停靠柱面
    pub lzone: u16,
    /// 控制字节
    pub ctl: u8,
}

impl DriveGeometry {
    /// 整盘扇区数
    pub fn total_sectors(&self) -> u32 {
        self.heads as u32 * self.sectors as u32 * self.cylinders as u32
    }

    /// 线性扇区号 → CHS
    pub fn chs(&self, lba: u32) -> Chs {
        let sectors = self.sectors as u32;
        let heads = self.heads as u32;
        let track = lba / sectors;
        Chs {
            cylinder: (track / heads) as u16,
            head: (track % heads) as u8,
            sector: (lba % sectors) as u8 + 1,
        }
    }

    /// CHS → 线性扇区号
    pub fn lba(&self, chs: Chs) -> u32 {
        (chs.cylinder as u32 * self.heads as u32 + chs.head as u32) * self.sectors as u32
            + chs.sector as u32
            - 1
    }
}

/// 柱面/磁头/扇区地址，扇区从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    /// 柱面
    pub cylinder: u16,
    /// 磁头
    pub head: u8,
    /// 扇区（从 1 开始）
    pub sector: u8,
}

/// 分区：起始扇区和长度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Partition {
    /// 起始扇区
    pub start_sect: u32,
    /// 扇区数
    pub nr_sects: u32,
}

impl Partition {
    /// 解析第 0 扇区中的 4 个主分区表项
    ///
    /// 要求 510/511 字节为 `0x55 0xAA`。
    pub fn parse_table(sector: &[u8]) -> Result<[Partition; 4]> {
        if sector.len() < SECTOR_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "partition sector too short"));
        }
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(Error::new(ErrorKind::Corrupted, "Bad partition table"));
        }

        let mut table = [Partition::default(); 4];
        for (i, part) in table.iter_mut().enumerate() {
            let entry = &sector[PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE..];
            *part = Partition {
                start_sect: LittleEndian::read_u32(&entry[8..12]),
                nr_sects: LittleEndian::read_u32(&entry[12..16]),
            };
        }
        Ok(table)
    }

    /// 把分区表写进第 0 扇区（含签名），其余字节不动
    pub fn write_table(table: &[Partition], sector: &mut [u8]) {
        for (i, part) in table.iter().take(4).enumerate() {
            let entry = &mut sector[PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE..];
            LittleEndian::write_u32(&mut entry[8..12], part.start_sect);
            LittleEndian::write_u32(&mut entry[12..16], part.nr_sects);
        }
        sector[510] = 0x55;
        sector[511] = 0xAA;
    }
}
