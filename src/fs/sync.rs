//! 阻塞式同步原语: 信号量, 锁, 以及先来先服务的读写锁
//!
//! 与 spin::Mutex 不同, 这里的原语在等待时让出 CPU (睡眠在条件变量上),
//! 并且按照到达顺序 (FIFO) 唤醒等待者.
//! 它们都不返回守卫 (guard), 因此可以由一个线程获取, 由另一个线程释放:
//! 读写锁的写门 (write gate) 由第一个读者获取, 却可能由最后一个读者释放.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct SemaphoreState {
    value: usize,
    /// 下一个到达的等待者领取的号码
    next_ticket: u64,
    /// 当前允许尝试获取的号码
    serving: u64,
}

/// Counting semaphore whose waiters are served strictly in arrival order.
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    wakeup: Condvar,
}

impl Semaphore {
    pub fn new(value: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                value,
                next_ticket: 0,
                serving: 0,
            }),
            wakeup: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SemaphoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the value is positive and every earlier waiter has been served, then decrement.
    pub fn p(&self) {
        let mut state = self.state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.serving != ticket || state.value == 0 {
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.value -= 1;
        state.serving += 1;
        // 下一个号码的持有者可能已经在等待了
        self.wakeup.notify_all();
    }

    /// Increment the value, waking the oldest waiter.
    pub fn v(&self) {
        let mut state = self.state();
        state.value += 1;
        self.wakeup.notify_all();
    }

    pub fn value(&self) -> usize {
        self.state().value
    }
}

/// Binary lock built on a semaphore; any thread may release it.
pub struct Lock {
    semaphore: Semaphore,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
        }
    }

    pub fn acquire(&self) {
        self.semaphore.p();
    }

    pub fn release(&self) {
        assert_eq!(self.semaphore.value(), 0, "releasing a lock that is not held");
        self.semaphore.v();
    }

    pub fn is_held(&self) -> bool {
        self.semaphore.value() == 0
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// 读写锁
///
/// 读者之间可以并发, 写者与任何读者/写者互斥.
/// 既不偏向读者也不偏向写者: 等待者的先后顺序完全由底层 [`Lock`] 的 FIFO 唤醒顺序决定.
/// 第一个读者代表整个读者组获取写门, 最后一个读者释放写门.
pub struct ReadWriteLock {
    reader_count: spin::Mutex<usize>,
    write_gate: Lock,
}

impl ReadWriteLock {
    pub fn new() -> Self {
        Self {
            reader_count: spin::Mutex::new(0),
            write_gate: Lock::new(),
        }
    }

    pub fn before_read(&self) {
        let mut readers = self.reader_count.lock();
        if *readers == 0 {
            // 持有计数锁等待写门, 之后的读者排在计数锁上
            self.write_gate.acquire();
        }
        *readers += 1;
    }

    pub fn after_read(&self) {
        let mut readers = self.reader_count.lock();
        assert!(*readers > 0, "after_read without before_read");
        *readers -= 1;
        if *readers == 0 {
            self.write_gate.release();
        }
    }

    pub fn before_write(&self) {
        self.write_gate.acquire();
    }

    pub fn after_write(&self) {
        self.write_gate.release();
    }

    pub fn readers(&self) -> usize {
        *self.reader_count.lock()
    }

    /// 在当前作用域内持有读锁
    pub fn read(&self) -> ReadGuard<'_> {
        self.before_read();
        ReadGuard { lock: self }
    }

    /// 在当前作用域内持有写锁
    pub fn write(&self) -> WriteGuard<'_> {
        self.before_write();
        WriteGuard { lock: self }
    }
}

impl Default for ReadWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReadGuard<'a> {
    lock: &'a ReadWriteLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.after_read();
    }
}

pub struct WriteGuard<'a> {
    lock: &'a ReadWriteLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.after_write();
    }
}
