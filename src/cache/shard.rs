//! 哈希分桶
//!
//! 每个分桶是一串槽位记录，按插入顺序排列，由一把 `spin::Mutex` 保护。
//! 槽位记录携带缓存块的全部可变元数据，因此“修改元数据必须持有所属分桶锁”
//! 由类型系统保证：拿不到分桶的 guard 就摸不到记录。

use super::buffer::BufferId;
use crate::block::BlockKey;
use alloc::vec::Vec;

/// 槽位记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Slot {
    /// 缓冲池下标
    pub id: BufferId,
    /// 当前绑定的块，从未绑定过时为 `None`
    pub key: Option<BlockKey>,
    /// 活跃持有者数量（查找成功未释放 + pin）
    pub refcnt: u32,
    /// 引用计数降到 0 时的时钟值，越小越旧
    pub last_release: u64,
}

impl Slot {
    pub fn new(id: BufferId) -> Self {
        Self {
            id,
            key: None,
            refcnt: 0,
            last_release: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.refcnt == 0
    }
}

/// 哈希分桶
#[derive(Debug, Default)]
pub(crate) struct Shard {
    slots: Vec<Slot>,
}

impl Shard {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    /// 查找 `key`，命中则引用计数加一
    pub fn get(&mut self, key: BlockKey) -> Option<BufferId> {
        let slot = self.slots.iter_mut().find(|s| s.key == Some(key))?;
        slot.refcnt += 1;
        Some(slot.id)
    }

    pub fn find(&self, key: BlockKey) -> Option<&Slot> {
        self.slots.iter().find(|s| s.key == Some(key))
    }

    pub fn slot_mut(&mut self, id: BufferId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    /// 本分桶内最旧的空闲槽位：`(位置, 时间戳)`
    ///
    /// 时间戳相同时取链上靠前的一个。
    pub fn oldest_idle(&self) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        for (pos, slot) in self.slots.iter().enumerate() {
            if !slot.is_idle() {
                continue;
            }
            match best {
                Some((_, stamp)) if stamp <= slot.last_release => {}
                _ => best = Some((pos, slot.last_release)),
            }
        }
        best
    }

    pub fn position(&self, id: BufferId) -> Option<usize> {
        self.slots.iter().position(|s| s.id == id)
    }

    pub fn slot_at(&self, pos: usize) -> &Slot {
        &self.slots[pos]
    }

    pub fn slot_at_mut(&mut self, pos: usize) -> &mut Slot {
        &mut self.slots[pos]
    }

    /// 从链上摘下 `pos` 处的槽位
    pub fn unlink(&mut self, pos: usize) -> Slot {
        self.slots.remove(pos)
    }

    /// 挂到链尾，返回新位置
    pub fn link(&mut self, slot: Slot) -> usize {
        self.slots.push(slot);
        self.slots.len() - 1
    }

    #[cfg(test)]
    pub fn ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.slots.iter().map(|s| s.id)
    }
}
