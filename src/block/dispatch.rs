//! 块设备分派表
//!
//! 主设备号 → 驱动入口。表在初始化时填好，交给缓存后只读。
//! 越界或未实现的主设备号说明缓冲区身份已损坏或设备表配置错误，
//! 在这一层无法恢复，直接停机。

use crate::cache::Buffer;
use crate::consts::NR_BLK_DEV;
use crate::error::{Error, ErrorKind, Result};
use std::sync::Arc;

/// 设备号：高 8 位主设备号，低 8 位次设备号；0 表示无设备
pub type DevId = u16;

/// 主设备号
pub const fn major(dev: DevId) -> u8 {
    (dev >> 8) as u8
}

/// 次设备号
pub const fn minor(dev: DevId) -> u8 {
    (dev & 0xff) as u8
}

/// 组合设备号
pub const fn mkdev(major: u8, minor: u8) -> DevId {
    ((major as DevId) << 8) | minor as DevId
}

/// 读写方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 磁盘 → 缓冲区
    Read,
    /// 缓冲区 → 磁盘
    Write,
}

/// 块设备驱动
///
/// `buf` 到达时已经由调用者加锁（[`Buffer::start_io`]）。`rw_block` 是同步的：
/// 返回前必须用 [`Buffer::end_io`] 报告结果并解锁，块号越界时也一样。
/// 调用者通过 `UPTODATE`/`DIRTY` 判断结果。
pub trait BlockDriver: Send + Sync {
    /// 对 `buf` 发起一次整块传输
    fn rw_block(&self, cmd: Command, minor: u8, block: u32, buf: &Arc<Buffer>);
}

/// 块设备分派表
pub struct DeviceTable {
    drivers: [Option<Arc<dyn BlockDriver>>; NR_BLK_DEV],
}

impl core::fmt::Debug for DeviceTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let wired: Vec<usize> = self
            .drivers
            .iter()
            .enumerate()
            .filter_map(|(major, drv)| drv.as_ref().map(|_| major))
            .collect();
        f.debug_struct("DeviceTable").field("wired", &wired).finish()
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTable {
    /// 空表，所有槽位未实现
    pub fn new() -> Self {
        Self {
            drivers: Default::default(),
        }
    }

    /// 注册驱动
    pub fn register(&mut self, major: u8, driver: Arc<dyn BlockDriver>) -> Result<()> {
        let slot = self
            .drivers
            .get_mut(major as usize)
            .ok_or(Error::new(ErrorKind::InvalidInput, "major number out of range"))?;
        if major == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "major 0 means no device"));
        }
        if slot.is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists, "major number already wired"));
        }
        *slot = Some(driver);
        log::debug!("[BLKDEV] major {} wired", major);
        Ok(())
    }

    /// 查表
    ///
    /// # Panics
    ///
    /// 主设备号越界或对应槽位未实现。
    pub fn dispatch(&self, major: u8) -> &Arc<dyn BlockDriver> {
        match self.drivers.get(major as usize).and_then(Option::as_ref) {
            Some(driver) => driver,
            None => {
                log::error!("[BLKDEV] no driver for major {}", major);
                panic!("Trying to read nonexistent block-device");
            }
        }
    }

    /// 对缓冲区发起读写（`ll_rw_block`）
    pub fn ll_rw_block(&self, cmd: Command, dev: DevId, block: u32, buf: &Arc<Buffer>) {
        self.dispatch(major(dev)).rw_block(cmd, minor(dev), block, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{MAJOR_FD, MAJOR_HD, ROOT_DEV};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Command, u8, u32)>>,
    }

    impl BlockDriver for Recorder {
        fn rw_block(&self, cmd: Command, minor: u8, block: u32, _buf: &Arc<Buffer>) {
            self.calls.lock().unwrap().push((cmd, minor, block));
        }
    }

    #[test]
    fn test_device_numbers() {
        assert_eq!(major(ROOT_DEV), 3);
        assert_eq!(minor(ROOT_DEV), 6);
        assert_eq!(mkdev(3, 6), ROOT_DEV);
    }

    #[test]
    fn test_dispatch_routes_by_major() {
        let recorder = Arc::new(Recorder::default());
        let mut table = DeviceTable::new();
        table.register(MAJOR_HD, recorder.clone()).unwrap();

        let buf = Arc::new(Buffer::new(0));
        table.ll_rw_block(Command::Write, mkdev(MAJOR_HD, 1), 42, &buf);

        assert_eq!(*recorder.calls.lock().unwrap(), vec![(Command::Write, 1, 42)]);
    }

    #[test]
    fn test_register_rejects_bad_slots() {
        let mut table = DeviceTable::new();
        let drv: Arc<dyn BlockDriver> = Arc::new(Recorder::default());

        assert_eq!(
            table.register(NR_BLK_DEV as u8, drv.clone()).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(table.register(0, drv.clone()).unwrap_err().kind(), ErrorKind::InvalidInput);
        table.register(MAJOR_HD, drv.clone()).unwrap();
        assert_eq!(
            table.register(MAJOR_HD, drv).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
    }

    #[test]
    #[should_panic(expected = "Trying to read nonexistent block-device")]
    fn test_unwired_major_is_fatal() {
        let table = DeviceTable::new();
        table.dispatch(MAJOR_FD);
    }

    #[test]
    #[should_panic(expected = "Trying to read nonexistent block-device")]
    fn test_out_of_range_major_is_fatal() {
        let table = DeviceTable::new();
        table.dispatch(200);
    }
}
