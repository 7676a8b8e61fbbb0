use futures::channel::oneshot;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

/// 异步信号量：限制同时持有许可的任务数量，等待者严格按到达顺序（FIFO）获得许可。
///
/// 释放许可时若有等待者，许可直接移交给最早的等待者，`permits` 计数不变；
/// 没有等待者时才归还到 `permits`。许可以 RAII 形式持有，drop 时自动释放，
/// 因此错误路径上也不会漏掉 release。
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    capacity: usize,
}

struct SemaphoreState {
    permits: usize,
    waiting: VecDeque<oneshot::Sender<()>>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                permits,
                waiting: VecDeque::new(),
            }),
            capacity: permits,
        }
    }

    /// 初始许可数。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_permits(&self) -> usize {
        self.lock_state().permits
    }

    /// 当前排队等待许可的数量（包含已被放弃但尚未清理的等待者）。
    pub fn waiting(&self) -> usize {
        self.lock_state().waiting.len()
    }

    /// 获取许可；没有空闲许可时挂起，直到前面的持有者释放。没有超时。
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.wait_for_permit().await;
        SemaphorePermit { semaphore: self }
    }

    /// 与 `acquire` 相同，但许可持有 `Arc`，可以跨 `tokio::spawn` 移动。
    pub async fn acquire_owned(self: Arc<Self>) -> OwnedSemaphorePermit {
        self.wait_for_permit().await;
        OwnedSemaphorePermit { semaphore: self }
    }

    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        let mut state = self.lock_state();
        if state.permits > 0 {
            state.permits -= 1;
            Some(SemaphorePermit { semaphore: self })
        } else {
            None
        }
    }

    async fn wait_for_permit(&self) {
        let receiver = {
            let mut state = self.lock_state();
            if state.permits > 0 {
                state.permits -= 1;
                return;
            }
            let (sender, receiver) = oneshot::channel();
            state.waiting.push_back(sender);
            receiver
        };
        let mut waiter = Waiter {
            semaphore: self,
            receiver: Some(receiver),
        };
        waiter.granted().await;
    }

    fn release(&self) {
        let mut state = self.lock_state();
        // 已放弃的等待者 send 会失败，跳过继续找下一个。
        while let Some(waiter) = state.waiting.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.permits += 1;
        debug_assert!(state.permits <= self.capacity);
    }

    fn lock_state(&self) -> MutexGuard<'_, SemaphoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }
}

/// 排队中的 acquire。future 在获得许可前被 drop 时，负责把可能已经移交过来的许可还回去。
struct Waiter<'a> {
    semaphore: &'a Semaphore,
    receiver: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn granted(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            // sender 只会在 release 中被消费并发送，Semaphore 存活期间不会被直接丢弃
            let _ = receiver.await;
        }
        self.receiver = None;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if let Ok(Some(())) = receiver.try_recv() {
                self.semaphore.release();
            }
        }
    }
}

pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

pub struct OwnedSemaphorePermit {
    semaphore: Arc<Semaphore>,
}

impl Drop for OwnedSemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
