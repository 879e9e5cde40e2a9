//! 睡眠/唤醒原语
//!
//! 调用者在 [`WaitQueue`] 上挂起，等待某个条件（缓冲区解锁、出现空闲槽位、
//! 出现空闲请求）成立；中断路径只负责改状态并 [`WaitQueue::wake_up`]，
//! 自己从不睡眠。
//!
//! 每个等待队列都与保护其条件的那把 `Mutex` 配对使用：检查条件和挂起
//! 在同一把锁下原子完成，因此不会丢失唤醒。

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// 获取锁，忽略中毒
///
/// 持锁线程 panic 只会发生在不变量被破坏时，此时整个系统已经停机，
/// 剩下的线程只需要能继续拿到数据。
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 等待队列
#[derive(Debug, Default)]
pub struct WaitQueue {
    cond: Condvar,
}

impl WaitQueue {
    /// 创建空的等待队列
    pub const fn new() -> Self {
        Self {
            cond: Condvar::new(),
        }
    }

    /// 释放 `guard` 并挂起，被唤醒后重新持锁返回
    ///
    /// 可能出现伪唤醒，调用者必须在循环里重新检查条件。
    pub fn sleep_on<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// 挂起直到 `condition` 返回 `false`
    pub fn sleep_while<'a, T, F>(&self, guard: MutexGuard<'a, T>, condition: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        self.cond
            .wait_while(guard, condition)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 唤醒所有等待者
    pub fn wake_up(&self) {
        self.cond.notify_all();
    }
}
