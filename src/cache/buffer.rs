//! 缓存块结构
//!
//! [`Buffer`] 是一个缓存槽位：一块 `BLOCK_SIZE` 字节的数据、状态标志和一个
//! 等待解锁的队列。槽位的身份（设备号、块号、引用计数、链表位置）由
//! [`BufferCache`](super::BufferCache) 在自己的锁里管理，这里只保存
//! 驱动程序也需要触碰的部分，所以磁盘驱动只依赖本类型，而不依赖缓存本身。
//!
//! # 锁顺序
//!
//! 缓存元数据锁 → 槽位锁；请求队列锁 → 槽位锁。持有槽位锁时绝不获取
//! 其他锁。

use crate::block::Command;
use crate::consts::{BLOCK_SIZE, SECTOR_SIZE};
use crate::sync::{lock, WaitQueue};
use bitflags::bitflags;
use std::sync::{Mutex, MutexGuard};

/// 缓存块 ID，即槽位在缓存数组中的下标
pub type BufferId = usize;

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferFlags: u8 {
        /// 硬件 I/O 进行中，数据不可读写
        const LOCKED   = 0x01;
        /// 数据与磁盘内容不一致
        const DIRTY    = 0x02;
        /// 数据已成功从磁盘载入
        const UPTODATE = 0x04;
    }
}

/// 槽位中受锁保护的部分
pub(crate) struct BufferState {
    pub(crate) flags: BufferFlags,
    pub(crate) data: Box<[u8]>,
}

/// 缓存块
pub struct Buffer {
    id: BufferId,
    state: Mutex<BufferState>,
    wait: WaitQueue,
}

impl core::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("flags", &self.flags())
            .finish()
    }
}

impl Buffer {
    /// 创建新的空槽位
    pub(crate) fn new(id: BufferId) -> Self {
        Self {
            id,
            state: Mutex::new(BufferState {
                flags: BufferFlags::empty(),
                data: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            }),
            wait: WaitQueue::new(),
        }
    }

    /// 槽位 ID
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// 当前标志的快照
    pub fn flags(&self) -> BufferFlags {
        lock(&self.state).flags
    }

    /// 是否有 I/O 进行中
    pub fn is_locked(&self) -> bool {
        self.flags().contains(BufferFlags::LOCKED)
    }

    /// 是否为脏块
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(BufferFlags::DIRTY)
    }

    /// 数据是否有效
    pub fn is_uptodate(&self) -> bool {
        self.flags().contains(BufferFlags::UPTODATE)
    }

    /// 等待 I/O 完成，返回已解锁的槽位状态
    pub(crate) fn wait_unlocked(&self) -> MutexGuard<'_, BufferState> {
        self.wait
            .sleep_while(lock(&self.state), |s| s.flags.contains(BufferFlags::LOCKED))
    }

    /// 等待 I/O 完成
    pub fn wait_on_buffer(&self) {
        drop(self.wait_unlocked());
    }

    /// 重新标记前清除 `DIRTY` 和 `UPTODATE`
    pub(crate) fn reset_contents(&self) {
        lock(&self.state)
            .flags
            .remove(BufferFlags::DIRTY | BufferFlags::UPTODATE);
    }

    // ===== 驱动接口 =====

    /// 等待解锁后加锁
    pub fn lock_buffer(&self) {
        self.wait_unlocked().flags.insert(BufferFlags::LOCKED);
    }

    /// 为一次传输加锁
    ///
    /// 等待解锁、判断这次传输是否仍有必要、加锁在同一把槽位锁下完成：
    /// 读只在数据无效时进行，写只在数据为脏时进行。不再需要时返回 `false`，
    /// 槽位保持未加锁。
    pub fn start_io(&self, cmd: Command) -> bool {
        let mut state = self.wait_unlocked();
        let needed = match cmd {
            Command::Read => !state.flags.contains(BufferFlags::UPTODATE),
            Command::Write => state.flags.contains(BufferFlags::DIRTY),
        };
        if needed {
            state.flags.insert(BufferFlags::LOCKED);
        }
        needed
    }

    /// 标记 I/O 结束并唤醒等待者
    pub fn unlock_buffer(&self) {
        let mut state = lock(&self.state);
        Self::unlock_locked(self.id, &mut state);
        self.wait.wake_up();
    }

    fn unlock_locked(id: BufferId, state: &mut BufferState) {
        if !state.flags.contains(BufferFlags::LOCKED) {
            log::warn!("[BCACHE] free buffer {} being unlocked", id);
        }
        state.flags.remove(BufferFlags::LOCKED);
    }

    /// 结束一次传输
    ///
    /// 成功时数据与磁盘一致：置 `UPTODATE`、清 `DIRTY`。读失败时 `UPTODATE`
    /// 清零；写失败保留 `DIRTY`，数据仍然只在内存里。
    pub fn end_io(&self, cmd: Command, ok: bool) {
        let mut state = lock(&self.state);
        if ok {
            state.flags.insert(BufferFlags::UPTODATE);
            state.flags.remove(BufferFlags::DIRTY);
        } else if cmd == Command::Read {
            state.flags.remove(BufferFlags::UPTODATE);
        }
        Self::unlock_locked(self.id, &mut state);
        self.wait.wake_up();
    }

    /// 访问第 `index` 个扇区（只在 I/O 进行中由驱动调用）
    pub fn with_sector<R>(&self, index: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = lock(&self.state);
        debug_assert!(state.flags.contains(BufferFlags::LOCKED));
        let start = index * SECTOR_SIZE;
        f(&mut state.data[start..start + SECTOR_SIZE])
    }

    /// 访问整块数据（只在 I/O 进行中由驱动调用）
    pub fn with_block<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut state = lock(&self.state);
        debug_assert!(state.flags.contains(BufferFlags::LOCKED));
        f(&mut state.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_buffer_creation() {
        let buf = Buffer::new(3);
        assert_eq!(buf.id(), 3);
        assert_eq!(buf.flags(), BufferFlags::empty());
        assert!(!buf.is_locked());
        assert!(!buf.is_uptodate());
    }

    #[test]
    fn test_end_io_read_success() {
        let buf = Buffer::new(0);
        buf.lock_buffer();
        buf.with_sector(1, |s| s.fill(0x5A));
        buf.end_io(Command::Read, true);

        assert!(buf.is_uptodate());
        assert!(!buf.is_locked());
        let state = buf.wait_unlocked();
        assert_eq!(state.data[SECTOR_SIZE], 0x5A);
        assert_eq!(state.data[0], 0);
    }

    #[test]
    fn test_end_io_failures() {
        let buf = Buffer::new(0);
        lock(&buf.state).flags = BufferFlags::UPTODATE | BufferFlags::DIRTY;

        buf.lock_buffer();
        buf.end_io(Command::Write, false);
        assert!(buf.is_dirty());
        assert!(buf.is_uptodate());

        buf.lock_buffer();
        buf.end_io(Command::Read, false);
        assert!(!buf.is_uptodate());
        assert!(!buf.is_locked());
    }

    #[test]
    fn test_start_io_only_when_needed() {
        let buf = Buffer::new(0);
        assert!(!buf.start_io(Command::Write));
        assert!(!buf.is_locked());

        assert!(buf.start_io(Command::Read));
        assert!(buf.is_locked());
        buf.end_io(Command::Read, true);
        assert!(!buf.start_io(Command::Read));

        lock(&buf.state).flags.insert(BufferFlags::DIRTY);
        assert!(buf.start_io(Command::Write));
        buf.end_io(Command::Write, true);
        assert!(!buf.is_dirty());
        assert!(!buf.start_io(Command::Write));
    }

    #[test]
    fn test_start_io_rechecks_after_waiting() {
        let buf = Arc::new(Buffer::new(0));
        assert!(buf.start_io(Command::Read));

        // 等到第一次读完成时数据已经有效，第二次读不再发起
        let second = {
            let buf = buf.clone();
            thread::spawn(move || buf.start_io(Command::Read))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        buf.end_io(Command::Read, true);

        assert!(!second.join().unwrap());
        assert!(!buf.is_locked());
    }

    #[test]
    fn test_waiter_woken_by_unlock() {
        let buf = Arc::new(Buffer::new(0));
        buf.lock_buffer();

        let waiter = {
            let buf = buf.clone();
            thread::spawn(move || {
                buf.wait_on_buffer();
                buf.is_uptodate()
            })
        };

        buf.end_io(Command::Read, true);
        assert!(waiter.join().unwrap());
    }
}
