//! 分桶块缓存实现
//!
//! # 结构
//!
//! ```text
//! struct BufferCache {
//!     bufs: [Buffer; nbuf],            // 固定缓冲池：内容锁 + 标志 + 数据
//!     shards: [Mutex<Shard>; nbucket], // 槽位记录：块号、引用计数、释放时间戳
//!     evict_lock: Mutex<()>,           // 驱逐协调锁，只在未命中时获取
//! }
//! ```
//!
//! # 加锁顺序
//!
//! - 命中路径只持有一把分桶锁，且在等待内容锁之前释放
//! - 未命中时先释放分桶锁，再取驱逐协调锁
//! - 驱逐路径按桶下标升序获取分桶锁，任何时刻最多持有两把
//! - 内容锁永远不在持有任何自旋锁时获取

use super::buffer::{Buffer, BufferId, CacheFlags};
use super::clock::{MonotonicTicks, TickSource};
use super::config::CacheConfig;
use super::handle::{BufGuard, BufPin};
use super::shard::{Shard, Slot};
use crate::block::{BlockDevice, BlockKey};
use crate::error::{Error, ErrorKind, Result};
use crate::sync::{DefaultSleepLock, SleepLock};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 总访问次数
    pub total_accesses: u64,
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 驱逐次数（重新绑定一个曾经绑定过的缓存块）
    pub evictions: u64,
    /// 跨桶迁移次数
    pub migrations: u64,
    /// 设备读取次数
    pub device_reads: u64,
    /// 设备写入次数
    pub device_writes: u64,
}

impl CacheStats {
    /// 计算命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    total_accesses: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    migrations: AtomicU64,
    device_reads: AtomicU64,
    device_writes: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            total_accesses: self.total_accesses.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            migrations: self.migrations.load(Ordering::Relaxed),
            device_reads: self.device_reads.load(Ordering::Relaxed),
            device_writes: self.device_writes.load(Ordering::Relaxed),
        }
    }
}

/// 驱逐候选：持有所在分桶的锁
struct Victim<'a> {
    shard: usize,
    guard: MutexGuard<'a, Shard>,
    pos: usize,
    stamp: u64,
}

/// 分桶块缓存
///
/// 固定大小的缓冲池，既是设备读缓存，也是同一磁盘块在多个线程之间的
/// 同步点：同一时刻一个块最多对应一个缓存块，一个缓存块最多被一个线程加锁。
///
/// 接口：
/// - 用 [`bread`](Self::bread) 取得某个磁盘块的已加锁缓存块
/// - 修改数据后用 [`bwrite`](Self::bwrite) 写回设备
/// - 用完后 [`brelse`](Self::brelse)（或直接丢弃句柄）
/// - 需要跨多次加锁保持驻留时用 [`bpin`](Self::bpin) / [`bunpin`](Self::bunpin)
///
/// 缓存块不要持有太久：同一个块的其它使用者都在等它。
pub struct BufferCache<D, L = DefaultSleepLock> {
    device: D,
    bufs: Box<[Buffer<L>]>,
    shards: Box<[Mutex<Shard>]>,
    evict_lock: Mutex<()>,
    clock: Box<dyn TickSource>,
    block_size: usize,
    stats: StatCounters,
    /// 驱逐路径放掉源桶锁、重新按序加锁之前调用，参数是受害者原来绑定的块
    #[cfg(test)]
    relock_hook: Option<Box<dyn Fn(&BufferCache<D, L>, Option<BlockKey>) + Send + Sync>>,
}

impl<D: BlockDevice, L: SleepLock> BufferCache<D, L> {
    /// 创建块缓存，使用默认时钟
    ///
    /// # 示例
    ///
    /// ```rust,ignore
    /// let cache: BufferCache<_> = BufferCache::new(disk, CacheConfig::default())?;
    /// ```
    pub fn new(device: D, config: CacheConfig) -> Result<Self> {
        Self::with_clock(device, config, Box::new(MonotonicTicks::new()))
    }

    /// 创建块缓存，释放时间戳取自 `clock`
    ///
    /// 所有缓存块初始都挂在 0 号桶上，未绑定任何块。
    pub fn with_clock(device: D, config: CacheConfig, clock: Box<dyn TickSource>) -> Result<Self> {
        config.validate(device.block_size())?;

        let bufs: Vec<Buffer<L>> = (0..config.nbuf)
            .map(|_| Buffer::new(config.block_size))
            .collect();

        let mut first = Shard::with_capacity(config.nbuf);
        for id in 0..config.nbuf {
            first.link(Slot::new(id));
        }
        let mut shards = Vec::with_capacity(config.nbucket);
        shards.push(Mutex::new(first));
        shards.extend((1..config.nbucket).map(|_| Mutex::new(Shard::default())));

        log::debug!(
            "[BCACHE] init: {} buffers x {} bytes, {} buckets",
            config.nbuf,
            config.block_size,
            config.nbucket
        );

        Ok(Self {
            device,
            bufs: bufs.into_boxed_slice(),
            shards: shards.into_boxed_slice(),
            evict_lock: Mutex::new(()),
            clock,
            block_size: config.block_size,
            stats: StatCounters::default(),
            #[cfg(test)]
            relock_hook: None,
        })
    }

    /// 块号所属的桶
    pub fn shard_of(&self, blockno: u32) -> usize {
        blockno as usize % self.shards.len()
    }

    /// 读取块，返回已加锁且数据有效的缓存块
    ///
    /// 数据无效时从设备读入；同一个块的并发读者在内容锁上排队，
    /// 只有第一个真正访问设备。
    ///
    /// # 错误
    ///
    /// 设备读取失败时返回设备的错误，缓存块在返回前已释放（仍为无效）。
    ///
    /// # Panics
    ///
    /// 缓冲池中没有引用计数为 0 的缓存块时 panic（`bget: no buffers`）。
    pub fn bread(&self, dev: u32, blockno: u32) -> Result<BufGuard<'_, D, L>> {
        let key = BlockKey::new(dev, blockno);
        let mut buf = self.bget(key);
        if !buf.is_valid() {
            StatCounters::bump(&self.stats.device_reads);
            self.device
                .read_block(key, buf.payload_mut())
                .map_err(|e| {
                    log::warn!("[BCACHE] read {} failed: {}", key, e);
                    e
                })?;
            buf.buffer().mark_valid();
        }
        Ok(buf)
    }

    /// 把缓存块数据同步写回设备
    ///
    /// 写入后调用设备的 `flush`，返回时数据已落盘。
    ///
    /// # Panics
    ///
    /// 调用线程未持有内容锁，或句柄来自另一个缓存时 panic。
    /// 持有者检查依赖 [`SleepLock::holding`]：使用 [`SpinWaitLock`](crate::sync::SpinWaitLock)
    /// 时它只能判断锁是否被占用，无法识别被其它线程持有的情况。
    pub fn bwrite(&self, buf: &BufGuard<'_, D, L>) -> Result<()> {
        if !buf.belongs_to(self) || !buf.buffer().lock.holding() {
            panic!("bwrite");
        }
        if self.device.is_read_only() {
            return Err(Error::new(ErrorKind::PermissionDenied, "Device is read-only"));
        }

        StatCounters::bump(&self.stats.device_writes);
        self.device.write_block(buf.key(), buf.data())?;
        self.device.flush()?;
        buf.buffer().mark_clean();
        log::trace!("[BCACHE] bwrite {}", buf.key());
        Ok(())
    }

    /// 释放缓存块
    ///
    /// 释放内容锁；引用计数降到 0 时记录释放时间，缓存块变为可驱逐。
    pub fn brelse(&self, buf: BufGuard<'_, D, L>) {
        if !buf.belongs_to(self) {
            panic!("brelse");
        }
        drop(buf);
    }

    /// 增加引用计数，使缓存块在释放后仍然驻留
    pub fn bpin(&self, buf: &BufGuard<'_, D, L>) -> BufPin {
        if !buf.belongs_to(self) {
            panic!("bpin");
        }
        let (id, key) = (buf.id(), buf.key());
        let n = self.shard_of(key.blockno);
        let mut shard = self.shards[n].lock();
        match shard.slot_mut(id) {
            Some(slot) => slot.refcnt += 1,
            None => panic!("bpin: buffer {} missing from bucket {}", id, n),
        }
        BufPin {
            id,
            key,
            owner: self.addr(),
        }
    }

    /// 归还 pin
    ///
    /// # Panics
    ///
    /// pin 来自另一个缓存时 panic。
    pub fn bunpin(&self, pin: BufPin) {
        if pin.owner != self.addr() {
            panic!("bunpin");
        }
        self.put(pin.id, pin.key, "bunpin");
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// 已缓存块的引用计数，未缓存返回 `None`
    pub fn refcnt_of(&self, dev: u32, blockno: u32) -> Option<u32> {
        let key = BlockKey::new(dev, blockno);
        let shard = self.shards[self.shard_of(blockno)].lock();
        shard.find(key).map(|slot| slot.refcnt)
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// 缓冲池大小
    pub fn capacity(&self) -> usize {
        self.bufs.len()
    }

    /// 桶数量
    pub fn nbucket(&self) -> usize {
        self.shards.len()
    }

    /// 块大小
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 获取底层设备的引用
    pub fn device(&self) -> &D {
        &self.device
    }

    pub(crate) fn buffer(&self, id: BufferId) -> &Buffer<L> {
        &self.bufs[id]
    }

    /// 查找或分配缓存块，返回时已持有内容锁
    fn bget(&self, key: BlockKey) -> BufGuard<'_, D, L> {
        StatCounters::bump(&self.stats.total_accesses);
        let n = self.shard_of(key.blockno);

        // 分桶锁在这条语句结束时释放
        let hit = self.shards[n].lock().get(key);
        if let Some(id) = hit {
            StatCounters::bump(&self.stats.hits);
            log::trace!("[BCACHE] bget {} HIT buffer {}", key, id);
            return self.lock_buffer(id, key);
        }

        let evict = self.evict_lock.lock();

        // 释放分桶锁到拿到协调锁之间，别的线程可能已经装入了同一个块
        let hit = self.shards[n].lock().get(key);
        if let Some(id) = hit {
            drop(evict);
            StatCounters::bump(&self.stats.hits);
            log::trace!("[BCACHE] bget {} HIT buffer {} after recheck", key, id);
            return self.lock_buffer(id, key);
        }

        StatCounters::bump(&self.stats.misses);
        let id = self.recycle(key, n);
        drop(evict);
        self.lock_buffer(id, key)
    }

    fn lock_buffer(&self, id: BufferId, key: BlockKey) -> BufGuard<'_, D, L> {
        self.bufs[id].lock.acquire();
        BufGuard::new(self, id, key)
    }

    /// 挑选最旧的空闲缓存块，迁入 `n` 号桶并绑定到 `key`
    ///
    /// 调用者持有驱逐协调锁。
    fn recycle(&self, key: BlockKey, n: usize) -> BufferId {
        loop {
            let Some(victim) = self.select_victim() else {
                log::error!(
                    "[BCACHE] bget {}: all {} buffers are referenced",
                    key,
                    self.bufs.len()
                );
                panic!("bget: no buffers");
            };
            let Victim {
                shard: v,
                guard: mut src,
                pos,
                stamp,
            } = victim;

            if v == n {
                let slot = src.slot_at_mut(pos);
                self.rebind(slot, key);
                return slot.id;
            }

            if v < n {
                let mut dst = self.shards[n].lock();
                return self.migrate(&mut src, &mut dst, pos, key, v, n);
            }

            // 目标桶下标更小：放掉源桶，按升序重新加锁，再确认候选没被人拿走
            let id = src.slot_at(pos).id;
            #[cfg(test)]
            let old_key = src.slot_at(pos).key;
            drop(src);
            #[cfg(test)]
            if let Some(hook) = &self.relock_hook {
                hook(self, old_key);
            }
            let mut dst = self.shards[n].lock();
            let mut src = self.shards[v].lock();
            match src.position(id) {
                Some(pos)
                    if src.slot_at(pos).is_idle() && src.slot_at(pos).last_release == stamp =>
                {
                    return self.migrate(&mut src, &mut dst, pos, key, v, n);
                }
                _ => {
                    log::debug!(
                        "[BCACHE] victim buffer {} was referenced again, rescanning",
                        id
                    );
                }
            }
        }
    }

    /// 跨桶扫描，找引用计数为 0 且释放时间戳最小的槽位
    ///
    /// 按桶下标升序逐个加锁；只保留当前最优候选所在桶的锁，其余立即释放。
    /// 时间戳相同时保留先扫描到的候选。
    fn select_victim(&self) -> Option<Victim<'_>> {
        let mut best: Option<Victim<'_>> = None;
        for (i, shard) in self.shards.iter().enumerate() {
            let guard = shard.lock();
            let Some((pos, stamp)) = guard.oldest_idle() else {
                continue;
            };
            if best.as_ref().map_or(true, |b| stamp < b.stamp) {
                best = Some(Victim {
                    shard: i,
                    guard,
                    pos,
                    stamp,
                });
            }
        }
        best
    }

    fn migrate(
        &self,
        src: &mut Shard,
        dst: &mut Shard,
        pos: usize,
        key: BlockKey,
        from: usize,
        to: usize,
    ) -> BufferId {
        let slot = src.unlink(pos);
        let pos = dst.link(slot);
        let slot = dst.slot_at_mut(pos);
        self.rebind(slot, key);
        StatCounters::bump(&self.stats.migrations);
        log::debug!("[BCACHE] buffer {} moved from bucket {} to {}", slot.id, from, to);
        slot.id
    }

    /// 把空闲槽位绑定到新块，引用计数置 1，数据置为无效
    fn rebind(&self, slot: &mut Slot, key: BlockKey) {
        let old_flags = self.bufs[slot.id].reset();
        if let Some(old) = slot.key {
            StatCounters::bump(&self.stats.evictions);
            if old_flags.contains(CacheFlags::DIRTY) {
                log::warn!(
                    "[BCACHE] evicting dirty buffer {} ({}) for {}",
                    slot.id,
                    old,
                    key
                );
            } else {
                log::debug!("[BCACHE] evicting buffer {} ({}) for {}", slot.id, old, key);
            }
        } else {
            log::debug!("[BCACHE] assigning fresh buffer {} to {}", slot.id, key);
        }
        slot.key = Some(key);
        slot.refcnt = 1;
    }

    /// 句柄丢弃时调用：释放内容锁并减少引用计数
    pub(crate) fn release_locked(&self, id: BufferId, key: BlockKey) {
        let buf = &self.bufs[id];
        if !buf.lock.holding() {
            panic!("brelse");
        }
        buf.lock.release();
        self.put(id, key, "brelse");
    }

    /// 在所属分桶锁下减少引用计数，降到 0 时记录释放时间
    fn put(&self, id: BufferId, key: BlockKey, op: &str) {
        let n = self.shard_of(key.blockno);
        let mut shard = self.shards[n].lock();
        let Some(slot) = shard.slot_mut(id) else {
            panic!("{}: buffer {} missing from bucket {}", op, id, n);
        };
        if slot.refcnt == 0 {
            panic!("{}: refcnt underflow on buffer {}", op, id);
        }
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            slot.last_release = self.clock.ticks();
        }
    }

    #[cfg(test)]
    fn shard_ids(&self) -> Vec<Vec<BufferId>> {
        self.shards
            .iter()
            .map(|s| s.lock().ids().collect())
            .collect()
    }
}

impl<D, L> core::fmt::Debug for BufferCache<D, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferCache")
            .field("capacity", &self.bufs.len())
            .field("nbucket", &self.shards.len())
            .field("block_size", &self.block_size)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RamDisk;
    use crate::sync::StdSleepLock;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;

    const DEV: u32 = 1;
    const BLOCK_SIZE: usize = 64;

    type TestCache<D = RamDisk> = BufferCache<D, StdSleepLock>;

    /// 每个块的前 4 字节是自己的块号
    fn labelled_disk(total_blocks: u32) -> RamDisk {
        let disk = RamDisk::new(DEV, BLOCK_SIZE, total_blocks);
        for b in 0..total_blocks {
            disk.fill_block(b, &b.to_le_bytes()).unwrap();
        }
        disk
    }

    fn cache(nbuf: usize, nbucket: usize) -> TestCache {
        let config = CacheConfig::new(nbuf, nbucket).with_block_size(BLOCK_SIZE);
        BufferCache::new(labelled_disk(64), config).unwrap()
    }

    fn label(data: &[u8]) -> u32 {
        u32::from_le_bytes([data[0], data[1], data[2], data[3]])
    }

    /// 每个缓存块恰好挂在一个桶上
    fn assert_every_buffer_once(cache: &TestCache) {
        let mut ids: Vec<BufferId> = cache.shard_ids().into_iter().flatten().collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..cache.capacity()).collect::<Vec<_>>());
    }

    struct FixedTicks(u64);

    impl TickSource for FixedTicks {
        fn ticks(&self) -> u64 {
            self.0
        }
    }

    struct FlakyDisk {
        inner: RamDisk,
        fail_reads: AtomicBool,
    }

    impl BlockDevice for FlakyDisk {
        fn block_size(&self) -> usize {
            self.inner.block_size()
        }

        fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::Io, "injected read failure"));
            }
            self.inner.read_block(key, buf)
        }

        fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()> {
            self.inner.write_block(key, buf)
        }
    }

    struct ReadOnlyDisk(RamDisk);

    impl BlockDevice for ReadOnlyDisk {
        fn block_size(&self) -> usize {
            self.0.block_size()
        }

        fn read_block(&self, key: BlockKey, buf: &mut [u8]) -> Result<()> {
            self.0.read_block(key, buf)
        }

        fn write_block(&self, key: BlockKey, buf: &[u8]) -> Result<()> {
            self.0.write_block(key, buf)
        }

        fn is_read_only(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_cache_creation() {
        let cache = cache(4, 3);
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.nbucket(), 3);
        assert_eq!(cache.block_size(), BLOCK_SIZE);
        assert_eq!(cache.shard_ids(), alloc::vec![alloc::vec![0, 1, 2, 3], alloc::vec![], alloc::vec![]]);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_block_size_mismatch_rejected() {
        let config = CacheConfig::new(4, 2).with_block_size(128);
        let err = TestCache::new(labelled_disk(4), config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_shard_of_is_modulo() {
        let cache = cache(4, 3);
        assert_eq!(cache.shard_of(0), 0);
        assert_eq!(cache.shard_of(4), 1);
        assert_eq!(cache.shard_of(11), 2);
    }

    #[test]
    fn test_bread_reads_device_once() {
        let cache = cache(4, 2);

        let buf = cache.bread(DEV, 7).unwrap();
        assert!(buf.is_valid());
        assert_eq!(buf.key(), BlockKey::new(DEV, 7));
        assert_eq!(label(buf.data()), 7);
        assert_eq!(cache.refcnt_of(DEV, 7), Some(1));
        cache.brelse(buf);
        assert_eq!(cache.refcnt_of(DEV, 7), Some(0));

        let buf = cache.bread(DEV, 7).unwrap();
        assert_eq!(label(buf.data()), 7);
        drop(buf);

        assert_eq!(cache.device().read_count(), 1);
        let stats = cache.stats();
        assert_eq!(stats.total_accesses, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.device_reads, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_same_block_on_other_device_is_distinct() {
        let config = CacheConfig::new(4, 2).with_block_size(BLOCK_SIZE);
        let disk = RamDisk::new(DEV, BLOCK_SIZE, 8);
        let cache: TestCache = BufferCache::new(disk, config).unwrap();

        let a = cache.bread(DEV, 3).unwrap();
        cache.brelse(a);
        assert_eq!(cache.refcnt_of(DEV + 1, 3), None);
        assert!(cache.bread(DEV + 1, 3).is_err());
        assert_eq!(cache.refcnt_of(DEV, 3), Some(0));
    }

    #[test]
    fn test_evicts_oldest_release() {
        let cache = cache(4, 2);

        let held: Vec<_> = (10..14).map(|b| cache.bread(DEV, b).unwrap()).collect();
        for buf in held {
            cache.brelse(buf);
        }
        assert_eq!(cache.device().read_count(), 4);

        let buf = cache.bread(DEV, 14).unwrap();
        assert_eq!(label(buf.data()), 14);
        cache.brelse(buf);

        assert_eq!(cache.refcnt_of(DEV, 10), None);
        for b in 11..14 {
            let buf = cache.bread(DEV, b).unwrap();
            assert_eq!(label(buf.data()), b);
            cache.brelse(buf);
        }
        assert_eq!(cache.device().read_count(), 5);
        assert_eq!(cache.stats().evictions, 1);
        assert_every_buffer_once(&cache);
    }

    #[test]
    fn test_release_order_decides_victim() {
        let cache = cache(4, 2);

        let mut held: Vec<_> = (10..14).map(|b| cache.bread(DEV, b).unwrap()).collect();
        while let Some(buf) = held.pop() {
            cache.brelse(buf);
        }

        // 13 最先释放
        drop(cache.bread(DEV, 14).unwrap());
        assert_eq!(cache.refcnt_of(DEV, 13), None);
        for b in 10..13 {
            assert_eq!(cache.refcnt_of(DEV, b), Some(0));
        }
    }

    #[test]
    fn test_tie_break_follows_scan_order() {
        let config = CacheConfig::new(4, 2).with_block_size(BLOCK_SIZE);
        let cache: TestCache =
            BufferCache::with_clock(labelled_disk(64), config, Box::new(FixedTicks(7))).unwrap();

        let mut held: Vec<_> = (10..14).map(|b| cache.bread(DEV, b).unwrap()).collect();
        while let Some(buf) = held.pop() {
            cache.brelse(buf);
        }

        // 时间戳全部相同：取 0 号桶链上第一个，即 10
        drop(cache.bread(DEV, 14).unwrap());
        assert_eq!(cache.refcnt_of(DEV, 10), None);
        for b in 11..14 {
            assert_eq!(cache.refcnt_of(DEV, b), Some(0));
        }
    }

    #[test]
    fn test_migration_to_lower_bucket() {
        let cache = cache(2, 2);

        let odd = cache.bread(DEV, 11).unwrap();
        let even = cache.bread(DEV, 10).unwrap();
        let (odd_id, even_id) = (odd.id(), even.id());
        assert_eq!(cache.shard_ids(), alloc::vec![alloc::vec![even_id], alloc::vec![odd_id]]);
        cache.brelse(odd);
        cache.brelse(even);

        // 11 更旧，在 1 号桶；12 的目标是 0 号桶
        let buf = cache.bread(DEV, 12).unwrap();
        assert_eq!(buf.id(), odd_id);
        assert_eq!(label(buf.data()), 12);
        cache.brelse(buf);

        assert_eq!(cache.shard_ids(), alloc::vec![alloc::vec![even_id, odd_id], alloc::vec![]]);
        assert_eq!(cache.refcnt_of(DEV, 11), None);
        assert_eq!(cache.refcnt_of(DEV, 10), Some(0));
    }

    #[test]
    fn test_referenced_buffer_never_evicted() {
        let cache = cache(2, 1);

        let keep = cache.bread(DEV, 1).unwrap();
        for b in 2..6 {
            let buf = cache.bread(DEV, b).unwrap();
            assert_ne!(buf.id(), keep.id());
            cache.brelse(buf);
        }
        assert_eq!(label(keep.data()), 1);
        assert_eq!(cache.refcnt_of(DEV, 1), Some(1));
    }

    #[test]
    fn test_pin_keeps_buffer_resident() {
        let cache = cache(2, 1);

        let buf = cache.bread(DEV, 1).unwrap();
        let pin = cache.bpin(&buf);
        assert_eq!(pin.key(), BlockKey::new(DEV, 1));
        assert_eq!(cache.refcnt_of(DEV, 1), Some(2));
        cache.brelse(buf);
        assert_eq!(cache.refcnt_of(DEV, 1), Some(1));

        drop(cache.bread(DEV, 2).unwrap());
        // 1 最旧但被 pin，只能驱逐 2
        drop(cache.bread(DEV, 3).unwrap());
        assert_eq!(cache.refcnt_of(DEV, 1), Some(1));
        assert_eq!(cache.refcnt_of(DEV, 2), None);

        cache.bunpin(pin);
        assert_eq!(cache.refcnt_of(DEV, 1), Some(0));

        // unpin 记录了新的释放时间，比 3 新，所以先走的是 3
        drop(cache.bread(DEV, 4).unwrap());
        assert_eq!(cache.refcnt_of(DEV, 3), None);
        assert_eq!(cache.refcnt_of(DEV, 1), Some(0));
    }

    #[test]
    #[should_panic(expected = "bunpin")]
    fn test_bunpin_foreign_pin_is_fatal() {
        let a = cache(2, 1);
        let b = cache(2, 1);

        let buf = a.bread(DEV, 1).unwrap();
        let pin = a.bpin(&buf);
        a.brelse(buf);

        let held = b.bread(DEV, 1).unwrap();
        b.bunpin(pin);
        drop(held);
    }

    #[test]
    fn test_victim_referenced_during_relock_is_skipped() {
        let mut cache = cache(3, 2);

        let odd = cache.bread(DEV, 11).unwrap();
        let even = cache.bread(DEV, 10).unwrap();
        let other = cache.bread(DEV, 12).unwrap();
        let (odd_id, even_id, other_id) = (odd.id(), even.id(), other.id());
        // 释放顺序 11, 10, 12：11 最旧，挂在 1 号桶
        cache.brelse(odd);
        cache.brelse(even);
        cache.brelse(other);

        // 源桶锁放开的窗口里，另一个使用者命中 11 并 pin 住它
        let fired = Arc::new(AtomicBool::new(false));
        let pinned = Arc::new(std::sync::Mutex::new(None));
        {
            let fired = fired.clone();
            let pinned = pinned.clone();
            cache.relock_hook = Some(Box::new(move |cache: &TestCache, old_key: Option<BlockKey>| {
                if fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                let old_key = old_key.unwrap();
                let buf = cache.bread(old_key.dev, old_key.blockno).unwrap();
                *pinned.lock().unwrap() = Some(cache.bpin(&buf));
                cache.brelse(buf);
            }));
        }

        // 14 的目标是 0 号桶
        let buf = cache.bread(DEV, 14).unwrap();
        assert!(fired.load(Ordering::SeqCst));
        assert_ne!(buf.id(), odd_id);
        assert_eq!(buf.id(), even_id);
        assert_eq!(label(buf.data()), 14);
        cache.brelse(buf);

        assert_eq!(cache.refcnt_of(DEV, 11), Some(1));
        assert_eq!(cache.refcnt_of(DEV, 10), None);
        assert_eq!(cache.refcnt_of(DEV, 12), Some(0));
        assert_eq!(cache.refcnt_of(DEV, 14), Some(0));
        assert_eq!(
            cache.shard_ids(),
            alloc::vec![alloc::vec![even_id, other_id], alloc::vec![odd_id]]
        );
        assert_every_buffer_once(&cache);

        let pin = pinned.lock().unwrap().take().unwrap();
        assert_eq!(pin.id(), odd_id);
        cache.bunpin(pin);
        assert_eq!(cache.refcnt_of(DEV, 11), Some(0));
    }

    #[test]
    fn test_bwrite_flushes_device() {
        let cache = cache(2, 1);

        let mut buf = cache.bread(DEV, 2).unwrap();
        buf.data_mut()[0] = 7;
        cache.bwrite(&buf).unwrap();
        assert_eq!(cache.device().write_count(), 1);
        assert_eq!(cache.device().flush_count(), 1);
        cache.brelse(buf);

        assert_eq!(cache.device().snapshot_block(2).unwrap()[0], 7);
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn test_all_pinned_is_fatal() {
        let cache = cache(3, 2);

        let mut pins = Vec::new();
        for b in 0..3 {
            let buf = cache.bread(DEV, b).unwrap();
            pins.push(cache.bpin(&buf));
            cache.brelse(buf);
        }

        let _ = cache.bread(DEV, 50);
    }

    #[test]
    fn test_flush_survives_eviction() {
        let cache = cache(2, 2);

        let mut buf = cache.bread(DEV, 5).unwrap();
        buf.data_mut().fill(0xAB);
        assert!(buf.is_dirty());
        cache.bwrite(&buf).unwrap();
        assert!(!buf.is_dirty());
        cache.brelse(buf);

        for b in 20..24 {
            drop(cache.bread(DEV, b).unwrap());
        }
        assert_eq!(cache.refcnt_of(DEV, 5), None);

        let reads = cache.device().read_count();
        let buf = cache.bread(DEV, 5).unwrap();
        assert!(buf.data().iter().all(|&b| b == 0xAB));
        assert_eq!(cache.device().read_count(), reads + 1);
        assert_eq!(cache.stats().device_writes, 1);
    }

    #[test]
    fn test_unflushed_changes_lost_on_eviction() {
        let cache = cache(1, 1);

        let mut buf = cache.bread(DEV, 5).unwrap();
        buf.data_mut()[0] = 0xFF;
        cache.brelse(buf);

        drop(cache.bread(DEV, 6).unwrap());
        let buf = cache.bread(DEV, 5).unwrap();
        assert_eq!(label(buf.data()), 5);
    }

    #[test]
    fn test_bwrite_read_only_device() {
        let config = CacheConfig::new(2, 1).with_block_size(BLOCK_SIZE);
        let cache: TestCache<ReadOnlyDisk> =
            BufferCache::new(ReadOnlyDisk(labelled_disk(4)), config).unwrap();

        let mut buf = cache.bread(DEV, 1).unwrap();
        buf.data_mut()[0] = 9;
        let err = cache.bwrite(&buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(buf.is_dirty());
        assert_eq!(cache.device().0.write_count(), 0);
    }

    #[test]
    #[should_panic(expected = "bwrite")]
    fn test_bwrite_foreign_buffer_is_fatal() {
        let a = cache(2, 1);
        let b = cache(2, 1);

        let buf = a.bread(DEV, 1).unwrap();
        let _ = b.bwrite(&buf);
    }

    #[test]
    fn test_read_error_releases_buffer() {
        let config = CacheConfig::new(2, 1).with_block_size(BLOCK_SIZE);
        let disk = FlakyDisk {
            inner: labelled_disk(8),
            fail_reads: AtomicBool::new(true),
        };
        let cache: TestCache<FlakyDisk> = BufferCache::new(disk, config).unwrap();

        let err = cache.bread(DEV, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(cache.refcnt_of(DEV, 3), Some(0));

        cache.device().fail_reads.store(false, Ordering::SeqCst);
        let buf = cache.bread(DEV, 3).unwrap();
        assert!(buf.is_valid());
        assert_eq!(label(buf.data()), 3);
        assert_eq!(cache.stats().device_reads, 2);
    }

    #[test]
    fn test_concurrent_bread_same_block_reads_once() {
        let cache = cache(4, 2);
        let start = Barrier::new(2);

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    start.wait();
                    let buf = cache.bread(DEV, 9).unwrap();
                    assert!(buf.is_valid());
                    assert_eq!(label(buf.data()), 9);
                    cache.brelse(buf);
                });
            }
        });

        assert_eq!(cache.device().read_count(), 1);
        assert_eq!(cache.refcnt_of(DEV, 9), Some(0));
        assert_every_buffer_once(&cache);
    }

    #[test]
    fn test_waiter_counted_while_holder_has_lock() {
        let cache = cache(4, 2);
        let first = cache.bread(DEV, 9).unwrap();

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let buf = cache.bread(DEV, 9).unwrap();
                assert!(buf.is_valid());
                assert_eq!(label(buf.data()), 9);
                buf.id()
            });

            // 第二个线程已经计入引用计数，正在内容锁上等待
            while cache.refcnt_of(DEV, 9) != Some(2) {
                thread::yield_now();
            }
            let id = first.id();
            cache.brelse(first);
            assert_eq!(waiter.join().unwrap(), id);
        });

        assert_eq!(cache.device().read_count(), 1);
        assert_eq!(cache.refcnt_of(DEV, 9), Some(0));
    }

    #[test]
    fn test_concurrent_mixed_workload() {
        let cache = cache(4, 3);

        thread::scope(|s| {
            for t in 0..4u32 {
                let cache = &cache;
                s.spawn(move || {
                    for i in 0..200u32 {
                        let b = (t * 7 + i * 3) % 12;
                        let buf = cache.bread(DEV, b).unwrap();
                        assert_eq!(buf.blockno(), b);
                        assert_eq!(label(buf.data()), b);
                        cache.brelse(buf);
                    }
                });
            }
        });

        assert_every_buffer_once(&cache);
        for b in 0..12 {
            assert!(matches!(cache.refcnt_of(DEV, b), None | Some(0)));
        }
        let stats = cache.stats();
        assert_eq!(stats.total_accesses, 800);
        assert_eq!(stats.hits + stats.misses, 800);
        assert_eq!(stats.device_reads, stats.misses);
    }

    #[test]
    fn test_concurrent_writers_serialize_on_content_lock() {
        let cache = cache(2, 2);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..50 {
                        let mut buf = cache.bread(DEV, 33).unwrap();
                        let data = buf.data_mut();
                        let n = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
                        data[8..12].copy_from_slice(&(n + 1).to_le_bytes());
                        cache.brelse(buf);
                    }
                });
            }
        });

        let buf = cache.bread(DEV, 33).unwrap();
        let data = buf.data();
        assert_eq!(u32::from_le_bytes([data[8], data[9], data[10], data[11]]), 200);
    }
}
