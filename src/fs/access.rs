//! 访问控制表: 记录每个文件当前被多少个线程打开, 并为每个文件提供一把读写锁
//!
//! 表项以文件头扇区为键, 在第一次打开时惰性创建.
//! 打开计数回到 0 后表项仍然保留, 再次打开时复用同一把读写锁.

use std::{collections::BTreeMap, sync::Arc};

use log::trace;
use spin::Mutex;

use super::ReadWriteLock;

/// 一个文件的访问控制表项
struct AccessEntry {
    open_count: Mutex<usize>,
    rw_lock: ReadWriteLock,
}

impl AccessEntry {
    fn new() -> Self {
        Self {
            open_count: Mutex::new(0),
            rw_lock: ReadWriteLock::new(),
        }
    }

    fn open_count(&self) -> usize {
        *self.open_count.lock()
    }
}

#[derive(Default)]
pub struct AccessRegistry {
    entries: Mutex<BTreeMap<u32, Arc<AccessEntry>>>,
}

impl AccessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 表项必须已经存在, 否则说明调用者没有先打开文件
    fn entry(&self, sector: u32) -> Arc<AccessEntry> {
        match self.entries.lock().get(&sector) {
            Some(entry) => Arc::clone(entry),
            None => panic!("sector {} has no access entry", sector),
        }
    }

    /// 打开计数加一, 持有表锁完成 "查找或创建"
    pub fn register_open(&self, sector: u32) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(sector)
            .or_insert_with(|| Arc::new(AccessEntry::new()));
        let mut count = entry.open_count.lock();
        *count += 1;
        trace!("access: open sector {}, count {}", sector, *count);
    }

    /// 打开计数减一, 关闭次数多于打开次数是调用者的错误
    pub fn register_close(&self, sector: u32) {
        let entry = self.entry(sector);
        let mut count = entry.open_count.lock();
        assert!(*count > 0, "sector {} closed more times than opened", sector);
        *count -= 1;
        trace!("access: close sector {}, count {}", sector, *count);
    }

    pub fn before_read(&self, sector: u32) {
        self.entry(sector).rw_lock.before_read();
    }

    pub fn after_read(&self, sector: u32) {
        self.entry(sector).rw_lock.after_read();
    }

    pub fn before_write(&self, sector: u32) {
        self.entry(sector).rw_lock.before_write();
    }

    pub fn after_write(&self, sector: u32) {
        self.entry(sector).rw_lock.after_write();
    }

    /// 文件当前是否被某个线程打开
    pub fn is_in_use(&self, sector: u32) -> bool {
        self.entries
            .lock()
            .get(&sector)
            .is_some_and(|entry| entry.open_count() > 0)
    }

    pub fn open_count(&self, sector: u32) -> usize {
        self.entries
            .lock()
            .get(&sector)
            .map_or(0, |entry| entry.open_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn open_close_counts() {
        let registry = AccessRegistry::new();
        assert!(!registry.is_in_use(4));
        registry.register_open(4);
        registry.register_open(4);
        assert_eq!(registry.open_count(4), 2);
        registry.register_close(4);
        assert!(registry.is_in_use(4));
        registry.register_close(4);
        assert!(!registry.is_in_use(4));
        // 表项被保留, 可以再次打开
        registry.register_open(4);
        assert_eq!(registry.open_count(4), 1);
    }

    #[test]
    #[should_panic(expected = "closed more times than opened")]
    fn close_without_open_is_fatal() {
        let registry = AccessRegistry::new();
        registry.register_open(8);
        registry.register_close(8);
        registry.register_close(8);
    }

    #[test]
    #[should_panic(expected = "has no access entry")]
    fn locking_an_unknown_sector_is_fatal() {
        AccessRegistry::new().before_read(3);
    }

    #[test]
    fn writer_excludes_readers_of_the_same_file_only() {
        let registry = Arc::new(AccessRegistry::new());
        registry.register_open(10);
        registry.register_open(11);
        registry.before_write(10);

        let reading = Arc::new(AtomicBool::new(false));
        let handle = {
            let registry = Arc::clone(&registry);
            let reading = Arc::clone(&reading);
            thread::spawn(move || {
                // 另一个文件不受影响
                registry.before_read(11);
                registry.after_read(11);
                registry.before_read(10);
                reading.store(true, Ordering::SeqCst);
                registry.after_read(10);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!reading.load(Ordering::SeqCst));
        registry.after_write(10);
        handle.join().unwrap();
        assert!(reading.load(Ordering::SeqCst));
    }
}
