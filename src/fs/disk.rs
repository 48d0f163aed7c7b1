//! 中断驱动的物理磁盘
//!
//! 真实的磁盘是一个异步设备: 发起请求后立刻返回, 数据传输完成时再通过中断通知内核.
//! [`Disk`] 在一个 [`BlockDevice`] 之上模拟这种行为:
//! 请求在发起时完成数据拷贝, 然后向中断线程投递一个完成事件,
//! 由中断线程调用构造时注册的中断处理函数.
//! 磁盘一次只能处理一个请求, 同时存在两个未完成的请求说明上层没有做好互斥.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::trace;
use spin::Mutex;

use super::{BlockDevice, NUM_SECTORS, SECTOR_SIZE};

/// 磁盘完成中断的处理函数
pub type RequestDone = Arc<dyn Fn() + Send + Sync>;

/// Physical transfer counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    pub reads: usize,
    pub writes: usize,
}

pub struct Disk {
    device: Arc<dyn BlockDevice>,
    /// 是否有一个请求尚未收到完成中断
    active: Arc<AtomicBool>,
    interrupts: Mutex<Option<Sender<()>>>,
    handler_thread: Mutex<Option<JoinHandle<()>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl Disk {
    pub fn new(device: Arc<dyn BlockDevice>, on_done: RequestDone) -> Self {
        let (sender, receiver) = mpsc::channel::<()>();
        let active = Arc::new(AtomicBool::new(false));
        let handler_active = Arc::clone(&active);
        let handler_thread = thread::spawn(move || {
            // 发送端被丢弃时 recv 返回 Err, 中断线程随之退出
            while receiver.recv().is_ok() {
                handler_active.store(false, Ordering::Release);
                on_done();
            }
        });
        Self {
            device,
            active,
            interrupts: Mutex::new(Some(sender)),
            handler_thread: Mutex::new(Some(handler_thread)),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn start_request(&self, sector: usize, len: usize) {
        assert!(sector < NUM_SECTORS, "sector {} out of range", sector);
        assert_eq!(len, SECTOR_SIZE, "Not a complete sector");
        let was_active = self.active.swap(true, Ordering::AcqRel);
        assert!(!was_active, "only one disk request may be in flight");
    }

    fn raise_interrupt(&self) {
        if let Some(sender) = self.interrupts.lock().as_ref() {
            // 中断线程只会在 Disk 被 drop 时退出, 此时不会再有请求
            let _ = sender.send(());
        }
    }

    /// 发起读请求, 数据传输完成后会触发一次完成中断
    pub fn read_request(&self, sector: usize, buf: &mut [u8]) {
        self.start_request(sector, buf.len());
        trace!("disk: read sector {}", sector);
        self.device.read_block(sector, buf);
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.raise_interrupt();
    }

    /// 发起写请求, 数据传输完成后会触发一次完成中断
    pub fn write_request(&self, sector: usize, buf: &[u8]) {
        self.start_request(sector, buf.len());
        trace!("disk: write sector {}", sector);
        self.device.write_block(sector, buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.raise_interrupt();
    }

    pub fn stats(&self) -> DiskStats {
        DiskStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        self.interrupts.lock().take();
        if let Some(handle) = self.handler_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
