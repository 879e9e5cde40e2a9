//! 单元测试共用的同步内存驱动

use crate::block::{BlockDevice, BlockDriver, Command, DeviceTable, MemDisk};
use crate::cache::{Buffer, BufferCache};
use crate::config::CacheConfig;
use crate::consts::{BLOCK_SIZE, MAJOR_HD, SECTORS_PER_BLOCK};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// 拷贝后立即解锁
pub(crate) struct MemDriver {
    pub(crate) disk: Mutex<MemDisk>,
    pub(crate) bad_blocks: Mutex<HashSet<u32>>,
    pub(crate) log: Mutex<Vec<(Command, u32)>>,
}

impl MemDriver {
    pub(crate) fn new(blocks: u64) -> Arc<Self> {
        Arc::new(Self {
            disk: Mutex::new(MemDisk::new(blocks * SECTORS_PER_BLOCK as u64)),
            bad_blocks: Mutex::new(HashSet::new()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn block(&self, block: u32) -> Vec<u8> {
        let mut data = vec![0u8; BLOCK_SIZE];
        self.disk
            .lock()
            .unwrap()
            .read_sectors(block as u64 * 2, 2, &mut data)
            .unwrap();
        data
    }

    pub(crate) fn writes_to(&self, block: u32) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|&&entry| entry == (Command::Write, block))
            .count()
    }
}

impl BlockDriver for MemDriver {
    fn rw_block(&self, cmd: Command, _minor: u8, block: u32, buf: &Arc<Buffer>) {
        self.log.lock().unwrap().push((cmd, block));
        if self.bad_blocks.lock().unwrap().contains(&block) {
            buf.end_io(cmd, false);
            return;
        }
        let lba = block as u64 * 2;
        let mut disk = self.disk.lock().unwrap();
        let ok = buf.with_block(|data| match cmd {
            Command::Read => disk.read_sectors(lba, 2, data).is_ok(),
            Command::Write => disk.write_sectors(lba, 2, data).is_ok(),
        });
        buf.end_io(cmd, ok);
    }
}

/// 挂在主设备号 3 上的内存缓存，盘上 64 块
pub(crate) fn mem_cache(nr_buffers: usize) -> (BufferCache, Arc<MemDriver>) {
    let driver = MemDriver::new(64);
    let mut devices = DeviceTable::new();
    devices.register(MAJOR_HD, driver.clone()).unwrap();
    let config = CacheConfig {
        nr_buffers,
        ..CacheConfig::default()
    };
    (BufferCache::new(&config, devices).unwrap(), driver)
}
