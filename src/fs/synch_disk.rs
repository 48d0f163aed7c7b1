//! 同步磁盘: 在中断驱动的 [`Disk`] 之上提供阻塞式的读写接口
//!
//! 发起请求的线程在信号量上睡眠, 直到磁盘的完成中断将其唤醒.
//! 物理磁盘一次只能处理一个请求, 因此用一把互斥锁保证同一时刻只有一个请求在进行.

use std::sync::Arc;

use spin::Mutex;

use super::{BlockDevice, Disk, DiskStats, Semaphore};

pub struct SynchDisk {
    disk: Disk,
    /// 完成中断到来时 V 一次
    semaphore: Arc<Semaphore>,
    /// 同一时刻只允许一个磁盘请求
    lock: Mutex<()>,
}

impl SynchDisk {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let semaphore = Arc::new(Semaphore::new(0));
        let done = Arc::clone(&semaphore);
        Self {
            disk: Disk::new(device, Arc::new(move || done.v())),
            semaphore,
            lock: Mutex::new(()),
        }
    }

    /// 将一个扇区读入 buf, 数据到达之后才返回
    pub fn read_sector(&self, sector: usize, buf: &mut [u8]) {
        let _guard = self.lock.lock();
        self.disk.read_request(sector, buf);
        // 等待完成中断
        self.semaphore.p();
    }

    /// 将 buf 写入一个扇区, 数据落盘之后才返回
    pub fn write_sector(&self, sector: usize, buf: &[u8]) {
        let _guard = self.lock.lock();
        self.disk.write_request(sector, buf);
        self.semaphore.p();
    }

    pub fn stats(&self) -> DiskStats {
        self.disk.stats()
    }
}
