//! 缓冲区缓存
//!
//! 固定数量的槽位，在启动时一次性创建，之后只会被"重新标记"。
//!
//! # 竞争处理
//!
//! 任何可能睡眠的地方（等待解锁、等待空闲槽位、写回脏块）醒来后都要
//! 重新检查：睡眠期间槽位可能已被别人重新标记，或者别人已经为同一个
//! `(dev, block)` 建好了缓存。`acquire` 在写回脏块之后的复查保证了
//! 任意时刻每个 `(dev, block)` 最多只有一个槽位。

use super::buffer::{Buffer, BufferFlags, BufferId};
use super::list::{FreeRing, HashChains};
use crate::block::{Command, DevId, DeviceTable};
use crate::config::CacheConfig;
use crate::consts::BLOCK_SIZE;
use crate::error::Result;
use crate::sync::{lock, WaitQueue};
use std::sync::{Arc, Mutex};

/// 持有中的缓冲区
///
/// 每次 `acquire`/`read`/`lookup` 成功都对应一个句柄，必须且只能
/// [`release`](BufferCache::release) 一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    id: BufferId,
    dev: DevId,
    block: u32,
}

impl BufferHandle {
    /// 槽位 ID
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// 设备号
    pub fn dev(&self) -> DevId {
        self.dev
    }

    /// 块号
    pub fn block(&self) -> u32 {
        self.block
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// 哈希查找次数
    pub lookups: u64,
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 槽位被重新标记的次数
    pub reuses: u64,
    /// 发起的读请求数
    pub reads: u64,
    /// 发起的写回请求数
    pub writebacks: u64,
    /// 因没有空闲槽位而睡眠的次数
    pub sleeps: u64,
    /// 写回期间被别人抢先建好缓存的次数
    pub races: u64,
}

impl CacheStats {
    /// 命中率
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotMeta {
    dev: DevId,
    block: u32,
    count: u32,
}

struct CacheState {
    meta: Vec<SlotMeta>,
    hash: HashChains,
    free: FreeRing,
    stats: CacheStats,
}

impl CacheState {
    fn find(&self, dev: DevId, block: u32) -> Option<BufferId> {
        self.hash.find(dev, block, |id| {
            self.meta[id].dev == dev && self.meta[id].block == block
        })
    }
}

/// 缓冲区缓存
pub struct BufferCache {
    slots: Vec<Arc<Buffer>>,
    state: Mutex<CacheState>,
    /// 等待空闲槽位
    buffer_wait: WaitQueue,
    devices: DeviceTable,
}

impl core::fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("BufferCache")
            .field("nr_buffers", &self.slots.len())
            .field("free_ring", &state.free.len())
            .field("stats", &state.stats)
            .field("devices", &self.devices)
            .finish()
    }
}

impl BufferCache {
    /// 创建缓存
    ///
    /// 所有槽位初始都在空闲环上，设备号为 0，不在任何哈希链中。
    pub fn new(config: &CacheConfig, devices: DeviceTable) -> Result<Self> {
        config.validate()?;
        let count = config.nr_buffers;
        log::info!(
            "[BCACHE] {} buffers = {} bytes, {} hash buckets",
            count,
            count * BLOCK_SIZE,
            config.nr_hash
        );
        Ok(Self {
            slots: (0..count).map(|id| Arc::new(Buffer::new(id))).collect(),
            state: Mutex::new(CacheState {
                meta: vec![SlotMeta::default(); count],
                hash: HashChains::new(config.nr_hash, count),
                free: FreeRing::new(count),
                stats: CacheStats::default(),
            }),
            buffer_wait: WaitQueue::new(),
            devices,
        })
    }

    /// 槽位数
    pub fn nr_buffers(&self) -> usize {
        self.slots.len()
    }

    /// 句柄对应的槽位
    pub fn buffer(&self, handle: BufferHandle) -> &Arc<Buffer> {
        &self.slots[handle.id]
    }

    /// 分派表
    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    /// 统计信息快照
    pub fn stats(&self) -> CacheStats {
        lock(&self.state).stats.clone()
    }

    /// 当前引用计数
    pub fn ref_count(&self, handle: BufferHandle) -> u32 {
        lock(&self.state).meta[handle.id].count
    }

    /// 只查哈希链，不加引用、不睡眠
    pub fn find(&self, dev: DevId, block: u32) -> Option<BufferId> {
        lock(&self.state).find(dev, block)
    }

    /// 查找已缓存的块并加引用
    ///
    /// 等待其解锁后复查身份：睡眠期间槽位可能已被重新标记，此时放掉
    /// 引用重新查找。
    pub fn lookup(&self, dev: DevId, block: u32) -> Option<BufferHandle> {
        lock(&self.state).stats.lookups += 1;
        loop {
            let id = {
                let mut state = lock(&self.state);
                let id = state.find(dev, block)?;
                state.meta[id].count += 1;
                id
            };

            self.slots[id].wait_on_buffer();

            let mut state = lock(&self.state);
            let meta = state.meta[id];
            if meta.dev == dev && meta.block == block {
                state.stats.hits += 1;
                log::trace!("[BCACHE] hit dev={:#x} block={} -> buffer {}", dev, block, id);
                return Some(BufferHandle { id, dev, block });
            }
            drop(state);
            log::debug!("[BCACHE] buffer {} relabelled while waiting, retry", id);
            self.release_id(id);
        }
    }

    /// 取得 `(dev, block)` 的缓冲区，必要时回收一个空闲槽位
    ///
    /// 返回的槽位引用计数已加一，数据不一定有效（见 [`read`](Self::read)）。
    /// 可能睡眠：等待槽位解锁、等待空闲槽位、写回被回收槽位的旧内容。
    ///
    /// # Panics
    ///
    /// `dev == 0`。
    pub fn acquire(&self, dev: DevId, block: u32) -> BufferHandle {
        if dev == 0 {
            log::error!("[BCACHE] acquire on device 0, block {}", block);
            panic!("getblk: no device");
        }

        loop {
            if let Some(handle) = self.lookup(dev, block) {
                return handle;
            }

            let Some(id) = self.claim_free_slot() else {
                continue;
            };
            let buf = &self.slots[id];

            // 旧内容写回后才能改身份，写回可能睡眠
            if buf.is_dirty() {
                let old = lock(&self.state).meta[id];
                log::debug!(
                    "[BCACHE] buffer {} dirty (dev={:#x} block={}), syncing before reuse",
                    id,
                    old.dev,
                    old.block
                );
                self.sync_dev(old.dev);
                if buf.is_dirty() {
                    log::warn!(
                        "[BCACHE] write-back of dev={:#x} block={} failed, dropping it",
                        old.dev,
                        old.block
                    );
                }
            }
            buf.wait_on_buffer();

            let mut state = lock(&self.state);
            state.meta[id].dev = dev;
            state.meta[id].block = block;
            buf.reset_contents();

            // 睡眠期间别人可能已经建好了同一个块
            if state.find(dev, block).is_some() {
                state.stats.races += 1;
                state.meta[id] = SlotMeta::default();
                state.free.push_back(id);
                drop(state);
                log::debug!("[BCACHE] lost race for dev={:#x} block={}, retry", dev, block);
                self.buffer_wait.wake_up();
                continue;
            }

            state.stats.misses += 1;
            state.hash.insert(id, dev, block);
            state.free.push_back(id);
            log::debug!("[BCACHE] buffer {} now dev={:#x} block={}", id, dev, block);
            return BufferHandle { id, dev, block };
        }
    }

    /// 从空闲环头部开始找第一个引用计数为 0 的槽位并摘下
    ///
    /// 返回 `None` 表示睡眠过，调用者需要从头再来。
    fn claim_free_slot(&self) -> Option<BufferId> {
        let mut state = lock(&self.state);
        let candidate = state.free.iter().find(|&id| state.meta[id].count == 0);

        let Some(id) = candidate else {
            state.stats.sleeps += 1;
            log::warn!("[BCACHE] Sleeping on free buffer ..");
            drop(self.buffer_wait.sleep_on(state));
            log::debug!("[BCACHE] woken up for free buffer");
            return None;
        };

        // 可能有写回在进行，等一次再复查
        if self.slots[id].is_locked() {
            drop(state);
            self.slots[id].wait_on_buffer();
            state = lock(&self.state);
            if state.meta[id].count != 0 || !state.free.contains(id) {
                return None;
            }
        }

        let old = state.meta[id];
        state.meta[id].count = 1;
        if old.dev != 0 {
            state.hash.remove(id, old.dev, old.block);
        }
        state.free.remove(id);
        state.stats.reuses += 1;
        Some(id)
    }

    /// 释放引用
    ///
    /// 等待解锁后计数减一；计数归零的槽位移到空闲环尾部。
    ///
    /// # Panics
    ///
    /// 引用计数已经为 0。
    pub fn release(&self, handle: BufferHandle) {
        self.release_id(handle.id);
    }

    fn release_id(&self, id: BufferId) {
        self.slots[id].wait_on_buffer();

        let mut state = lock(&self.state);
        if state.meta[id].count == 0 {
            drop(state);
            log::error!("[BCACHE] buffer {} released with zero count", id);
            panic!("Trying to free free buffer");
        }
        state.meta[id].count -= 1;
        if state.meta[id].count == 0 && state.free.contains(id) {
            state.free.remove(id);
            state.free.push_back(id);
        }
        drop(state);
        self.buffer_wait.wake_up();
    }

    /// 读取块
    ///
    /// 数据无效时发起读请求并等待完成。重试耗尽后内部释放缓冲区并返回
    /// `None`。
    pub fn read(&self, dev: DevId, block: u32) -> Option<BufferHandle> {
        let handle = self.acquire(dev, block);
        let buf = &self.slots[handle.id];
        if buf.start_io(Command::Read) {
            self.rw_slot(Command::Read, handle.id);
        }
        if buf.is_uptodate() {
            return Some(handle);
        }
        log::warn!("[BCACHE] read dev={:#x} block={} failed", dev, block);
        self.release(handle);
        None
    }

    /// 写回某个设备的所有脏块，返回发起的写请求数
    pub fn sync_dev(&self, dev: DevId) -> usize {
        let written = (0..self.slots.len())
            .filter(|&id| lock(&self.state).meta[id].dev == dev)
            .filter(|&id| self.write_back(id))
            .count();
        log::debug!("[BCACHE] sync_dev {:#x}: {} blocks written", dev, written);
        written
    }

    /// 写回所有脏块，返回发起的写请求数
    pub fn sync_all(&self) -> usize {
        let written = (0..self.slots.len()).filter(|&id| self.write_back(id)).count();
        log::debug!("[BCACHE] sync: {} blocks written", written);
        written
    }

    fn write_back(&self, id: BufferId) -> bool {
        if !self.slots[id].start_io(Command::Write) {
            return false;
        }
        self.rw_slot(Command::Write, id);
        true
    }

    /// 按槽位当前身份发起同步读写，槽位已由 `start_io` 加锁
    fn rw_slot(&self, cmd: Command, id: BufferId) {
        let meta = {
            let mut state = lock(&self.state);
            match cmd {
                Command::Read => state.stats.reads += 1,
                Command::Write => state.stats.writebacks += 1,
            }
            state.meta[id]
        };
        self.devices
            .ll_rw_block(cmd, meta.dev, meta.block, &self.slots[id]);
    }

    /// 只读访问数据（等待解锁）
    ///
    /// 闭包执行期间持有槽位锁，不要在里面调用缓存操作。
    pub fn with_data<R>(&self, handle: BufferHandle, f: impl FnOnce(&[u8]) -> R) -> R {
        self.debug_check_held(handle);
        let state = self.slots[handle.id].wait_unlocked();
        f(&state.data)
    }

    /// 修改数据并标记为脏（等待解锁）
    ///
    /// 闭包执行期间持有槽位锁，不要在里面调用缓存操作。
    pub fn with_data_mut<R>(&self, handle: BufferHandle, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.debug_check_held(handle);
        let mut state = self.slots[handle.id].wait_unlocked();
        let result = f(&mut state.data);
        state.flags.insert(BufferFlags::DIRTY);
        result
    }

    /// 整块覆盖：数据视为有效且为脏，不需要先从磁盘读入
    ///
    /// # Panics
    ///
    /// `src` 的长度不等于 `BLOCK_SIZE`。
    pub fn overwrite(&self, handle: BufferHandle, src: &[u8]) {
        assert_eq!(src.len(), BLOCK_SIZE, "overwrite takes exactly one block");
        self.debug_check_held(handle);
        let mut state = self.slots[handle.id].wait_unlocked();
        state.data.copy_from_slice(src);
        state.flags.insert(BufferFlags::DIRTY | BufferFlags::UPTODATE);
    }

    /// 标记为脏
    pub fn mark_dirty(&self, handle: BufferHandle) {
        self.with_data_mut(handle, |_| ());
    }

    fn debug_check_held(&self, handle: BufferHandle) {
        if cfg!(debug_assertions) {
            let meta = lock(&self.state).meta[handle.id];
            assert!(
                meta.count > 0 && meta.dev == handle.dev && meta.block == handle.block,
                "stale buffer handle {:?}",
                handle
            );
        }
    }

    /// 检查全部结构不变量，违反时 panic
    ///
    /// 只应在没有进行中的 `acquire` 时调用：正被回收的槽位暂时不在任何结构里。
    pub fn verify(&self) {
        let state = lock(&self.state);
        let mut seen = std::collections::HashSet::new();

        for (id, meta) in state.meta.iter().enumerate() {
            assert!(
                state.free.contains(id),
                "buffer {} missing from free list",
                id
            );
            assert_eq!(
                state.hash.contains(id),
                meta.dev != 0,
                "buffer {} hash membership disagrees with dev {:#x}",
                id,
                meta.dev
            );
            if meta.dev != 0 {
                assert!(
                    seen.insert((meta.dev, meta.block)),
                    "duplicate buffer for dev={:#x} block={}",
                    meta.dev,
                    meta.block
                );
            }
        }

        assert_eq!(state.free.iter().count(), state.free.len());
        assert_eq!(state.free.len(), state.meta.len());

        for bucket in 0..state.hash.nr_buckets() {
            for id in state.hash.chain(bucket) {
                let meta = state.meta[id];
                assert_eq!(
                    state.hash.bucket_of(meta.dev, meta.block),
                    bucket,
                    "buffer {} chained in wrong bucket",
                    id
                );
            }
        }
    }

    /// 空闲环从头到尾的顺序（测试用）
    #[cfg(test)]
    pub(crate) fn free_order(&self) -> Vec<BufferId> {
        lock(&self.state).free.iter().collect()
    }
}
