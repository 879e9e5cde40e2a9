//! 请求池与电梯队列
//!
//! 固定数量的请求槽位，按下标串成单链表。链表头是正在交给控制器的请求，
//! 在它完成或被放弃之前不会被移动；新请求从链表头开始向后找插入位置。

use crate::block::Command;
use crate::cache::Buffer;
use std::sync::Arc;

/// 一个整块传输请求
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) drive: u8,
    /// 剩余扇区数
    pub(crate) nsector: u32,
    /// 起始扇区（从 1 开始）
    pub(crate) sector: u8,
    pub(crate) head: u8,
    pub(crate) cyl: u16,
    pub(crate) cmd: Command,
    /// 连续失败次数
    pub(crate) errors: u32,
    pub(crate) buf: Arc<Buffer>,
}

/// 排序键：驱动器、柱面、磁头、扇区
type SeekKey = (u8, u16, u8, u8);

impl Request {
    fn key(&self) -> SeekKey {
        (self.drive, self.cyl, self.head, self.sector)
    }
}

#[derive(Debug, Default)]
struct Slot {
    req: Option<Request>,
    key: SeekKey,
    next: Option<usize>,
}

/// 请求队列
#[derive(Debug)]
pub(crate) struct RequestQueue {
    slots: Vec<Slot>,
    /// 正在处理的请求
    current: Option<usize>,
}

impl RequestQueue {
    pub(crate) fn new(nr_request: usize) -> Self {
        Self {
            slots: (0..nr_request).map(|_| Slot::default()).collect(),
            current: None,
        }
    }

    /// 找一个空闲槽位
    pub(crate) fn alloc(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.req.is_none())
    }

    /// 排队中的请求数（含正在处理的）
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.req.is_some()).count()
    }

    /// 把 `req` 放进空闲槽位 `idx` 并按电梯顺序插入
    ///
    /// 在第一个满足以下条件的 `tmp` 之后插入：`req` 排在 `tmp.next` 之前，
    /// 并且 `tmp` 排在 `req` 之前或者 `tmp` 与 `tmp.next` 之间是一次回绕。
    /// 找不到时追加到末尾。
    pub(crate) fn add(&mut self, idx: usize, req: Request) {
        if req.nsector != 2 {
            log::error!("[HD] request with {} sectors", req.nsector);
            panic!("nsector!=2 not implemented");
        }
        debug_assert!(self.slots[idx].req.is_none());

        let key = req.key();
        self.slots[idx] = Slot {
            req: Some(req),
            key,
            next: None,
        };

        let Some(mut tmp) = self.current else {
            self.current = Some(idx);
            return;
        };
        while let Some(next) = self.slots[tmp].next {
            let (t, n) = (self.slots[tmp].key, self.slots[next].key);
            if (t < key || t >= n) && key < n {
                break;
            }
            tmp = next;
        }
        self.slots[idx].next = self.slots[tmp].next;
        self.slots[tmp].next = Some(idx);
        log::debug!("[HD] request {} queued after {} (key {:?})", idx, tmp, key);
    }

    pub(crate) fn current(&self) -> Option<&Request> {
        let idx = self.current?;
        self.slots[idx].req.as_ref()
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Request> {
        let idx = self.current?;
        self.slots[idx].req.as_mut()
    }

    /// 摘下当前请求，链表前进一格
    pub(crate) fn retire_current(&mut self) -> Option<Request> {
        let idx = self.current?;
        let slot = core::mem::take(&mut self.slots[idx]);
        self.current = slot.next;
        slot.req
    }

    /// 从当前请求开始的排队顺序
    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<SeekKey> {
        let mut keys = Vec::new();
        let mut cursor = self.current;
        while let Some(idx) = cursor {
            keys.push(self.slots[idx].key);
            cursor = self.slots[idx].next;
        }
        keys
    }
}
