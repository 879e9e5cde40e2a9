//! 基于下标的侵入式链表
//!
//! 槽位从不单独分配或释放，只在两种结构之间移动：
//!
//! - [`FreeRing`]：循环双向链表，头部是最久未用的槽位，尾部是最近释放的，
//!   同时充当近似 LRU 的驱逐环；
//! - [`HashChains`]：按 `(dev ^ block) % nr_hash` 分桶的双向链表，只包含
//!   `dev != 0` 的槽位。
//!
//! 链接用 `Option<BufferId>` 表示，"槽位属于哪个结构" 就是 "哪个结构里有
//! 它的链接"，出错时在摘链的那一刻就能发现。

use super::buffer::BufferId;
use crate::block::DevId;

#[derive(Debug, Clone, Copy, Default)]
struct RingLink {
    prev: Option<BufferId>,
    next: Option<BufferId>,
}

/// 空闲环
#[derive(Debug)]
pub(crate) struct FreeRing {
    head: Option<BufferId>,
    links: Vec<RingLink>,
    len: usize,
}

impl FreeRing {
    /// 创建包含全部 `count` 个槽位的环，顺序为 0..count
    pub(crate) fn new(count: usize) -> Self {
        let links = (0..count)
            .map(|i| RingLink {
                prev: Some((i + count - 1) % count),
                next: Some((i + 1) % count),
            })
            .collect();
        Self {
            head: if count == 0 { None } else { Some(0) },
            links,
            len: count,
        }
    }

    #[cfg(test)]
    pub(crate) fn head(&self) -> Option<BufferId> {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn contains(&self, id: BufferId) -> bool {
        self.links[id].next.is_some()
    }

    /// 环上 `id` 的后继
    #[cfg(test)]
    pub(crate) fn next(&self, id: BufferId) -> Option<BufferId> {
        self.links[id].next
    }

    /// 插入到环尾（头结点之前）
    pub(crate) fn push_back(&mut self, id: BufferId) {
        if self.contains(id) {
            log::error!("[BCACHE] buffer {} already on free list", id);
            panic!("Free block list corrupted");
        }
        match self.head {
            None => {
                self.links[id] = RingLink {
                    prev: Some(id),
                    next: Some(id),
                };
                self.head = Some(id);
            }
            Some(head) => {
                let tail = self.links[head].prev.unwrap_or(head);
                self.links[id] = RingLink {
                    prev: Some(tail),
                    next: Some(head),
                };
                self.links[tail].next = Some(id);
                self.links[head].prev = Some(id);
            }
        }
        self.len += 1;
    }

    /// 从环中摘下
    pub(crate) fn remove(&mut self, id: BufferId) {
        let (prev, next) = match self.links[id] {
            RingLink {
                prev: Some(prev),
                next: Some(next),
            } => (prev, next),
            _ => {
                log::error!("[BCACHE] buffer {} is not on free list", id);
                panic!("Free block list corrupted");
            }
        };

        self.links[id] = RingLink::default();
        self.len -= 1;

        if self.len == 0 {
            self.head = None;
            return;
        }
        self.links[prev].next = Some(next);
        self.links[next].prev = Some(prev);
        if self.head == Some(id) {
            self.head = Some(next);
        }
    }

    /// 从头部开始绕环一圈
    pub(crate) fn iter(&self) -> impl Iterator<Item = BufferId> + '_ {
        let mut cursor = self.head;
        let mut remaining = self.len;
        core::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let id = cursor?;
            remaining -= 1;
            cursor = self.links[id].next;
            Some(id)
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChainLink {
    prev: Option<BufferId>,
    next: Option<BufferId>,
    linked: bool,
}

/// 哈希链
#[derive(Debug)]
pub(crate) struct HashChains {
    buckets: Vec<Option<BufferId>>,
    links: Vec<ChainLink>,
}

impl HashChains {
    pub(crate) fn new(nr_hash: usize, count: usize) -> Self {
        Self {
            buckets: vec![None; nr_hash],
            links: vec![ChainLink::default(); count],
        }
    }

    /// 桶号：`(dev ^ block) % nr_hash`
    pub(crate) fn bucket_of(&self, dev: DevId, block: u32) -> usize {
        ((dev as u32) ^ block) as usize % self.buckets.len()
    }

    pub(crate) fn contains(&self, id: BufferId) -> bool {
        self.links[id].linked
    }

    /// 插入到 `(dev, block)` 所在链的头部
    pub(crate) fn insert(&mut self, id: BufferId, dev: DevId, block: u32) {
        debug_assert!(!self.links[id].linked);
        let bucket = self.bucket_of(dev, block);
        let old_head = self.buckets[bucket];
        self.links[id] = ChainLink {
            prev: None,
            next: old_head,
            linked: true,
        };
        if let Some(old) = old_head {
            self.links[old].prev = Some(id);
        }
        self.buckets[bucket] = Some(id);
    }

    /// 从 `(dev, block)` 所在链中摘下；不在链上时什么也不做
    pub(crate) fn remove(&mut self, id: BufferId, dev: DevId, block: u32) {
        let link = self.links[id];
        if !link.linked {
            return;
        }
        if let Some(next) = link.next {
            self.links[next].prev = link.prev;
        }
        match link.prev {
            Some(prev) => self.links[prev].next = link.next,
            None => {
                let bucket = self.bucket_of(dev, block);
                self.buckets[bucket] = link.next;
            }
        }
        self.links[id] = ChainLink::default();
    }

    /// 沿 `(dev, block)` 所在链查找第一个满足 `matches` 的槽位
    pub(crate) fn find(
        &self,
        dev: DevId,
        block: u32,
        mut matches: impl FnMut(BufferId) -> bool,
    ) -> Option<BufferId> {
        self.chain(self.bucket_of(dev, block)).find(|&id| matches(id))
    }

    /// 遍历某个桶
    pub(crate) fn chain(&self, bucket: usize) -> impl Iterator<Item = BufferId> + '_ {
        let mut cursor = self.buckets[bucket];
        core::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.links[id].next;
            Some(id)
        })
    }

    pub(crate) fn nr_buckets(&self) -> usize {
        self.buckets.len()
    }
}
