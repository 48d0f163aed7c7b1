//! 扇区缓存层: 在内存中缓存磁盘扇区的数据, 避免频繁读写磁盘
//!
//! 物理磁盘一次只能处理一个请求, 每次请求都要在 [`SynchDisk`] 上排队并睡眠等待中断,
//! 因此常见的手段是将最近访问过的扇区留在内存中的缓冲区 [`CacheSlot`] 里,
//! 后续对这些扇区的大部分访问就可以在内存中完成了.
//!
//! 缓存是全相联的, 槽位数量固定为 [`DISK_CACHE_SIZE`]:
//! - 读未命中时, 选一个空闲槽位, 没有空闲槽位则选最近最少使用 (LRU) 的槽位,
//!   时间戳相同时选下标最小的; 被替换的槽位如果是脏的, 先写回磁盘.
//! - 写采用写回 (write-back) 策略: 只修改缓存并标记为脏, 替换或 [`CachedDisk::write_all_back`] 时才落盘.
//!   写未命中时不需要先从磁盘读入 (整扇区写).
//!
//! 整个缓存由一把读写锁保护. 命中时只持有读锁, 此时刷新时间戳本身也是一次写,
//! 我们用原子变量完成这次刷新, 因此最近使用时间只是近似的.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use log::trace;
use spin::Mutex;

use super::{BlockDevice, ReadWriteLock, SynchDisk, DISK_CACHE_SIZE, SECTOR_SIZE};

struct SlotState {
    /// 缓冲区, 恰好为一个扇区
    data: [u8; SECTOR_SIZE],
    /// 记录了这个缓冲区来自于磁盘中的哪个扇区
    sector: usize,
    in_use: bool,
    /// 载入内存之后是否被修改过
    dirty: bool,
}

/// Cached sector inside memory
struct CacheSlot {
    state: Mutex<SlotState>,
    /// 最近一次访问的逻辑时间
    stamp: AtomicU64,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                data: [0u8; SECTOR_SIZE],
                sector: 0,
                in_use: false,
                dirty: false,
            }),
            stamp: AtomicU64::new(0),
        }
    }
}

pub struct CachedDisk {
    disk: SynchDisk,
    slots: Vec<CacheSlot>,
    lock: ReadWriteLock,
    /// 逻辑时钟, 每次访问加一
    clock: AtomicU64,
}

impl CachedDisk {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            disk: SynchDisk::new(device),
            slots: (0..DISK_CACHE_SIZE).map(|_| CacheSlot::new()).collect(),
            lock: ReadWriteLock::new(),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn touch(&self, index: usize) {
        self.slots[index]
            .stamp
            .store(self.tick(), Ordering::Relaxed);
    }

    fn lookup(&self, sector: usize) -> Option<usize> {
        self.slots.iter().position(|slot| {
            let state = slot.state.lock();
            state.in_use && state.sector == sector
        })
    }

    /// 为一个未命中的扇区挑选槽位, 调用者必须持有写锁.
    /// 先找空闲槽位, 否则按 LRU 替换, 被替换的脏槽位先写回磁盘.
    fn victim(&self) -> usize {
        if let Some(free) = self.slots.iter().position(|slot| !slot.state.lock().in_use) {
            return free;
        }
        let index = self
            .slots
            .iter()
            .enumerate()
            // min_by_key 在相等时保留第一个, 即下标最小的槽位
            .min_by_key(|(_, slot)| slot.stamp.load(Ordering::Relaxed))
            .map(|(index, _)| index)
            .unwrap_or(0);
        let mut state = self.slots[index].state.lock();
        trace!("cache: evict sector {} from slot {}", state.sector, index);
        if state.dirty {
            self.disk.write_sector(state.sector, &state.data);
            state.dirty = false;
        }
        state.in_use = false;
        index
    }

    /// 读取一个扇区到 buf
    pub fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "Not a complete sector");
        {
            let _read = self.lock.read();
            if let Some(index) = self.lookup(sector) {
                trace!("cache: read hit sector {}", sector);
                buf.copy_from_slice(&self.slots[index].state.lock().data);
                self.touch(index);
                return;
            }
        }
        let _write = self.lock.write();
        // 释放读锁与获取写锁之间, 其他线程可能已经载入了这个扇区
        if let Some(index) = self.lookup(sector) {
            buf.copy_from_slice(&self.slots[index].state.lock().data);
            self.touch(index);
            return;
        }
        trace!("cache: read miss sector {}", sector);
        let index = self.victim();
        {
            let mut state = self.slots[index].state.lock();
            self.disk.read_sector(sector, &mut state.data);
            state.sector = sector;
            state.in_use = true;
            state.dirty = false;
            buf.copy_from_slice(&state.data);
        }
        self.touch(index);
    }

    /// 将 buf 写入一个扇区的缓存, 标记为脏
    pub fn write_sector(&self, sector: usize, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE, "Not a complete sector");
        let _write = self.lock.write();
        let index = match self.lookup(sector) {
            Some(index) => {
                trace!("cache: write hit sector {}", sector);
                index
            }
            None => {
                trace!("cache: write miss sector {}", sector);
                self.victim()
            }
        };
        {
            let mut state = self.slots[index].state.lock();
            state.data.copy_from_slice(buf);
            state.sector = sector;
            state.in_use = true;
            state.dirty = true;
        }
        self.touch(index);
    }

    /// 将所有脏扇区写回磁盘, 槽位仍然保留在缓存中
    pub fn write_all_back(&self) {
        let _write = self.lock.write();
        for slot in self.slots.iter() {
            let mut state = slot.state.lock();
            if state.in_use && state.dirty {
                self.disk.write_sector(state.sector, &state.data);
                state.dirty = false;
            }
        }
    }

    /// 底层的同步磁盘, 可用于查看物理读写次数
    pub fn synch_disk(&self) -> &SynchDisk {
        &self.disk
    }

    pub fn cached_sectors(&self) -> Vec<usize> {
        let _read = self.lock.read();
        self.slots
            .iter()
            .filter_map(|slot| {
                let state = slot.state.lock();
                state.in_use.then_some(state.sector)
            })
            .collect()
    }
}

impl Drop for CachedDisk {
    /// 缓存被卸载时, 所有脏扇区都要写回磁盘
    fn drop(&mut self) {
        self.write_all_back();
    }
}
