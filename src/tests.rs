//! 整个栈的端到端测试：缓存 → 分派 → 硬盘驱动 → 模拟控制器

use crate::block::{block_read, block_write, mkdev, DevId, DeviceTable, MemDisk};
use crate::cache::BufferCache;
use crate::config::{CacheConfig, HdConfig};
use crate::consts::{BLOCK_SIZE, MAJOR_HD, MAX_ERRORS, NR_REQUEST, SECTOR_SIZE};
use crate::error::ErrorKind;
use crate::hd::{DriveGeometry, HardDisk, HdCommand, IrqThread, Partition, SimController};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 每柱面 64 扇区 = 32 块：块 320/960/1600 分别在柱面 10/30/50
const GEOMETRY: DriveGeometry = DriveGeometry {
    heads: 4,
    sectors: 16,
    cylinders: 64,
    wpcom: 32,
    lzone: 64,
    ctl: 0,
};

const DEV: DevId = mkdev(MAJOR_HD, 0);

struct Rig {
    cache: Arc<BufferCache>,
    hd: Arc<HardDisk>,
    ctrl: Arc<SimController<MemDisk>>,
    _irq: IrqThread<MemDisk>,
}

fn rig_with(nr_buffers: usize, nr_request: usize, disk: MemDisk) -> Rig {
    let config = HdConfig {
        drives: vec![GEOMETRY],
        nr_request,
    };
    let ctrl = Arc::new(SimController::new(vec![(GEOMETRY, disk)]));
    let hd = Arc::new(HardDisk::new(&config, ctrl.clone()).unwrap());
    let irq = IrqThread::spawn(ctrl.clone(), hd.clone()).unwrap();

    let mut devices = DeviceTable::new();
    devices.register(MAJOR_HD, hd.clone()).unwrap();
    let cache_config = CacheConfig {
        nr_buffers,
        ..CacheConfig::default()
    };
    Rig {
        cache: Arc::new(BufferCache::new(&cache_config, devices).unwrap()),
        hd,
        ctrl,
        _irq: irq,
    }
}

fn rig(nr_buffers: usize) -> Rig {
    rig_with(
        nr_buffers,
        NR_REQUEST,
        MemDisk::new(GEOMETRY.total_sectors() as u64),
    )
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

fn disk_block(rig: &Rig, block: u32) -> Vec<u8> {
    let start = block as usize * BLOCK_SIZE;
    rig.ctrl
        .with_disk(0, |disk| disk.image()[start..start + BLOCK_SIZE].to_vec())
}

fn commands_at(rig: &Rig, command: HdCommand, cylinder: u16) -> usize {
    rig.ctrl
        .commands()
        .iter()
        .filter(|task| task.command == command && task.cylinder == cylinder)
        .count()
}

/// 在后台读一个块，返回读到的第一个字节
fn spawn_read(rig: &Rig, block: u32) -> thread::JoinHandle<Option<u8>> {
    let cache = rig.cache.clone();
    thread::spawn(move || {
        let handle = cache.read(DEV, block)?;
        let first = cache.with_data(handle, |data| data[0]);
        cache.release(handle);
        Some(first)
    })
}

#[test]
fn test_elevator_serves_by_cylinder() {
    let rig = rig(8);
    rig.ctrl.hold_irqs();

    // 0 在处理中，之后依次到达柱面 50、10、30
    let mut readers = Vec::new();
    for (i, block) in [0u32, 1600, 320, 960].into_iter().enumerate() {
        readers.push(spawn_read(&rig, block));
        wait_until("request queued", || rig.hd.queued() == i + 1);
    }
    rig.ctrl.release_irqs();

    for reader in readers {
        assert!(reader.join().unwrap().is_some());
    }
    let cylinders: Vec<u16> = rig
        .ctrl
        .commands()
        .iter()
        .filter(|task| task.command == HdCommand::Read)
        .map(|task| task.cylinder)
        .collect();
    assert_eq!(cylinders, vec![0, 10, 30, 50]);
    assert_eq!(rig.hd.queued(), 0);
}

#[test]
fn test_failure_escalation() {
    let rig = rig(8);
    rig.ctrl.inject_fault(HdCommand::Read, 50, usize::MAX);
    rig.ctrl.with_disk(0, |disk| disk.image_mut()[320 * BLOCK_SIZE] = 0x3C);

    rig.ctrl.hold_irqs();
    let bad = spawn_read(&rig, 1600);
    wait_until("bad request queued", || rig.hd.queued() == 1);
    let good = spawn_read(&rig, 320);
    wait_until("good request queued", || rig.hd.queued() == 2);
    rig.ctrl.release_irqs();

    assert_eq!(bad.join().unwrap(), None);
    assert_eq!(good.join().unwrap(), Some(0x3C));

    // 第一次加上 MAX_ERRORS 次重试
    assert_eq!(commands_at(&rig, HdCommand::Read, 50), MAX_ERRORS as usize + 1);
    assert_eq!(rig.ctrl.resets(), MAX_ERRORS as usize + 1);
    assert_eq!(commands_at(&rig, HdCommand::Read, 10), 1);

    // 失败的缓冲区已经释放，数据无效
    let h = rig.cache.acquire(DEV, 1600);
    assert!(!rig.cache.buffer(h).is_uptodate());
    assert!(!rig.cache.buffer(h).is_locked());
    assert_eq!(rig.cache.ref_count(h), 1);
    rig.cache.release(h);
    rig.cache.verify();
}

#[test]
fn test_transient_write_fault_is_retried() {
    let rig = rig(2);
    // 块 64 在柱面 2
    rig.ctrl.inject_fault(HdCommand::Write, 2, 2);

    let h = rig.cache.acquire(DEV, 64);
    rig.cache.overwrite(h, &[0x5Au8; BLOCK_SIZE]);
    rig.cache.release(h);
    assert_eq!(rig.cache.sync_all(), 1);

    assert_eq!(commands_at(&rig, HdCommand::Write, 2), 3);
    assert_eq!(rig.ctrl.resets(), 2);
    assert!(disk_block(&rig, 64).iter().all(|&b| b == 0x5A));
    assert!(!rig.cache.buffer(h).is_dirty());
}

#[test]
fn test_pool_of_four_flushes_before_reuse() {
    let rig = rig(4);
    let cache = &rig.cache;
    let pattern: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i * 7 % 256) as u8).collect();

    let h = cache.read(DEV, 7).unwrap();
    cache.with_data_mut(h, |data| data.copy_from_slice(&pattern));
    cache.release(h);
    assert!(disk_block(&rig, 7).iter().all(|&b| b == 0));

    for block in [100, 200, 300, 400] {
        let other = cache.acquire(DEV, block);
        cache.release(other);
    }

    assert_eq!(cache.find(DEV, 7), None);
    assert_eq!(disk_block(&rig, 7), pattern);

    let h = cache.read(DEV, 7).unwrap();
    assert!(cache.buffer(h).is_uptodate());
    cache.with_data(h, |data| assert_eq!(data, &pattern[..]));
    cache.release(h);
    cache.verify();
}

#[test]
fn test_pool_of_one_dirty_propagation() {
    let rig = rig(1);
    let cache = &rig.cache;

    let a = cache.read(DEV, 5).unwrap();
    cache.with_data_mut(a, |data| data.fill(0xAA));
    cache.release(a);

    let b = cache.read(DEV, 6).unwrap();
    assert_eq!(b.id(), a.id());
    cache.with_data_mut(b, |data| data.fill(0xBB));
    cache.release(b);
    cache.sync_all();

    assert!(disk_block(&rig, 5).iter().all(|&x| x == 0xAA));
    assert!(disk_block(&rig, 6).iter().all(|&x| x == 0xBB));

    let a = cache.read(DEV, 5).unwrap();
    cache.with_data(a, |data| assert!(data.iter().all(|&x| x == 0xAA)));
    cache.release(a);
    assert!(cache.stats().writebacks >= 2);
}

#[test]
fn test_round_trip_through_eviction() {
    let rig = rig(2);
    let cache = &rig.cache;
    let data: Vec<u8> = (0..3000u32).map(|i| (i * 31 % 253) as u8).collect();

    let mut pos = 1500;
    assert_eq!(block_write(cache, DEV, &mut pos, &data).unwrap(), data.len());

    // 把写过的块全部挤出去
    for block in 100..104 {
        let h = cache.read(DEV, block).unwrap();
        cache.release(h);
    }
    for block in 1..5 {
        assert_eq!(cache.find(DEV, block), None);
    }

    let mut back = vec![0u8; data.len()];
    let mut pos = 1500;
    assert_eq!(block_read(cache, DEV, &mut pos, &mut back).unwrap(), data.len());
    assert_eq!(back, data);
}

#[test]
fn test_concurrent_callers_keep_keys_unique() {
    let rig = rig(3);

    let workers: Vec<_> = (0..4u32)
        .map(|t| {
            let cache = rig.cache.clone();
            thread::spawn(move || {
                for i in 0..40u32 {
                    let block = 32 * ((i + t) % 6);
                    let h = cache.read(DEV, block).unwrap();
                    assert_eq!(cache.find(DEV, block), Some(h.id()));
                    cache.with_data_mut(h, |data| data[1] = (block / 32) as u8);
                    cache.release(h);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    rig.cache.verify();
    rig.cache.sync_all();
    for n in 0..6u32 {
        assert_eq!(disk_block(&rig, 32 * n)[1], n as u8);
    }
}

#[test]
fn test_concurrent_reads_of_one_block_issue_one_command() {
    let rig = rig(4);
    rig.ctrl.with_disk(0, |disk| disk.image_mut()[320 * BLOCK_SIZE] = 0x42);
    rig.ctrl.hold_irqs();

    let readers: Vec<_> = (0..3).map(|_| spawn_read(&rig, 320)).collect();
    wait_until("read issued", || rig.ctrl.commands().len() == 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(rig.hd.queued(), 1);
    rig.ctrl.release_irqs();

    for reader in readers {
        assert_eq!(reader.join().unwrap(), Some(0x42));
    }
    assert_eq!(commands_at(&rig, HdCommand::Read, 10), 1);
    rig.cache.verify();
}

#[test]
fn test_block_cached_during_eviction_write_back() {
    let rig = rig(2);
    let cache = &rig.cache;

    // 槽位 0 存着脏块 5，槽位 1 存着干净的块 6，空闲环头部是槽位 0
    let dirty = cache.acquire(DEV, 5);
    cache.overwrite(dirty, &[0x55u8; BLOCK_SIZE]);
    cache.release(dirty);
    let clean = cache.acquire(DEV, 6);
    cache.release(clean);
    assert_eq!((dirty.id(), clean.id()), (0, 1));

    rig.ctrl.hold_irqs();
    let evictor = {
        let cache = rig.cache.clone();
        thread::spawn(move || {
            let handle = cache.acquire(DEV, 9);
            cache.release(handle);
            handle
        })
    };
    // 块 5 的写回挂在队列里，回收它的调用者在睡眠
    wait_until("write-back queued", || rig.hd.queued() == 1);

    // 与此同时另一个调用者拿走干净的槽位，先建好块 9
    let winner = cache.acquire(DEV, 9);
    assert_eq!(winner.id(), clean.id());
    cache.release(winner);
    rig.ctrl.release_irqs();

    let loser = evictor.join().unwrap();
    assert_eq!(loser.id(), winner.id());
    assert_eq!(cache.stats().races, 1);
    assert_eq!(cache.find(DEV, 9), Some(clean.id()));
    assert_eq!(cache.find(DEV, 5), None);
    assert!(disk_block(&rig, 5).iter().all(|&b| b == 0x55));
    cache.verify();
}

#[test]
fn test_request_pool_exhaustion_blocks() {
    let rig = rig_with(4, 1, MemDisk::new(GEOMETRY.total_sectors() as u64));
    rig.ctrl.hold_irqs();

    let first = spawn_read(&rig, 320);
    wait_until("first request issued", || rig.ctrl.commands().len() == 1);
    let second = spawn_read(&rig, 960);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(rig.hd.queued(), 1);
    assert_eq!(rig.ctrl.commands().len(), 1);

    rig.ctrl.release_irqs();
    assert!(first.join().unwrap().is_some());
    assert!(second.join().unwrap().is_some());
    assert_eq!(commands_at(&rig, HdCommand::Read, 30), 1);
}

#[test]
fn test_out_of_range_block_not_issued() {
    let rig = rig(2);
    // 整盘 4096 扇区 = 2048 块
    assert!(rig.cache.read(DEV, 2048).is_none());
    assert!(rig.cache.read(mkdev(MAJOR_HD, 7), 0).is_none());
    assert!(rig.ctrl.commands().is_empty());

    let last = rig.cache.read(DEV, 2047).unwrap();
    rig.cache.release(last);
    assert_eq!(commands_at(&rig, HdCommand::Read, 63), 1);
}

fn partitioned_disk() -> MemDisk {
    let mut disk = MemDisk::new(GEOMETRY.total_sectors() as u64);
    let table = [
        Partition {
            start_sect: 64,
            nr_sects: 1024,
        },
        Partition {
            start_sect: 1088,
            nr_sects: 3008,
        },
        Partition::default(),
        Partition::default(),
    ];
    Partition::write_table(&table, &mut disk.image_mut()[..SECTOR_SIZE]);
    // 分区 1 的第 3 块
    disk.image_mut()[(64 + 6) * SECTOR_SIZE] = 0xD1;
    disk
}

#[test]
fn test_setup_reads_partition_table() {
    let rig = rig_with(4, NR_REQUEST, partitioned_disk());
    assert_eq!(rig.hd.partition(1), Some(Partition::default()));

    rig.hd.setup().unwrap();
    assert_eq!(
        rig.hd.partition(1),
        Some(Partition {
            start_sect: 64,
            nr_sects: 1024
        })
    );
    assert_eq!(rig.hd.partition(2).unwrap().nr_sects, 3008);
    assert_eq!(rig.hd.partition(0).unwrap().nr_sects, 4096);
    // 分区表读的是 CHS (0, 0, 1)
    let first = rig.ctrl.commands()[0];
    assert_eq!((first.cylinder, first.head, first.sector), (0, 0, 1));

    let part1 = mkdev(MAJOR_HD, 1);
    let h = rig.cache.read(part1, 3).unwrap();
    rig.cache.with_data(h, |data| assert_eq!(data[0], 0xD1));
    rig.cache.release(h);
    // 分区 1 只有 512 块
    assert!(rig.cache.read(part1, 512).is_none());

    let err = rig.hd.setup().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_setup_rejects_bad_signature() {
    let rig = rig(2);
    let err = rig.hd.setup().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupted);
}

#[test]
fn test_setup_unreadable_table() {
    let rig = rig(2);
    rig.ctrl.inject_fault(HdCommand::Read, 0, usize::MAX);
    let err = rig.hd.setup().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
#[should_panic(expected = "Unexpected HD interrupt")]
fn test_unexpected_interrupt_is_fatal() {
    let ctrl = Arc::new(SimController::new(vec![(GEOMETRY, MemDisk::new(64))]));
    let config = HdConfig {
        drives: vec![GEOMETRY],
        nr_request: 4,
    };
    let hd = HardDisk::new(&config, ctrl).unwrap();
    hd.interrupt();
}

