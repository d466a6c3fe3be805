//! Thread-safe FIFO hand-off between the acquisition thread and the processor.

use crate::errors::RigError;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Blocking FIFO queue with a permanent shutdown.
///
/// `pop` suspends until an item arrives or the queue is shut down; after
/// shutdown every `pop` returns `RigError::QueueShutdown`. An optional
/// capacity drops the oldest item when full.
pub struct FrameQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
    dropped: u64,
    shutdown: bool,
}

impl<T> FrameQueue<T> {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Queue holding at most `capacity` items, dropping the oldest on overflow.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Some(capacity.max(1)))
    }

    fn build(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.unwrap_or(8).min(1024)),
                capacity,
                dropped: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        // The guarded data stays consistent across a panic, so keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-blocking enqueue. After shutdown the item is handed back.
    pub fn push(&self, item: T) -> Result<(), (RigError, T)> {
        let mut g = self.lock();
        if g.shutdown {
            return Err((RigError::QueueShutdown, item));
        }

        if let Some(capacity) = g.capacity {
            if g.items.len() >= capacity {
                g.items.pop_front();
                g.dropped = g.dropped.saturating_add(1);
            }
        }
        g.items.push_back(item);
        self.cv.notify_one();
        Ok(())
    }

    /// Blocking dequeue.
    pub fn pop(&self) -> Result<T, RigError> {
        let mut g = self.lock();
        loop {
            if g.shutdown {
                return Err(RigError::QueueShutdown);
            }
            if let Some(item) = g.items.pop_front() {
                return Ok(item);
            }
            g = self.cv.wait(g).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Dequeue waiting at most `timeout`. `Ok(None)` on timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, RigError> {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if g.shutdown {
                return Err(RigError::QueueShutdown);
            }
            if let Some(item) = g.items.pop_front() {
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            g = ng;
        }
    }

    pub fn try_pop(&self) -> Result<Option<T>, RigError> {
        let mut g = self.lock();
        if g.shutdown {
            return Err(RigError::QueueShutdown);
        }
        Ok(g.items.pop_front())
    }

    /// Wake every waiter and refuse all further traffic.
    pub fn shutdown(&self) {
        let mut g = self.lock();
        g.shutdown = true;
        self.cv.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Remove whatever is still queued, e.g. to release frames after shutdown.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = FrameQueue::new();
        for i in 0..5 {
            q.push(i).unwrap();
        }
        let out: Vec<i32> = (0..5).map(|_| q.pop().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let q = Arc::new(FrameQueue::new());
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.push(42u32).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_shutdown_releases_waiters() {
        let q: Arc<FrameQueue<u32>> = Arc::new(FrameQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || q.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        q.shutdown();
        for w in waiters {
            assert!(matches!(w.join().unwrap(), Err(RigError::QueueShutdown)));
        }
    }

    #[test]
    fn test_push_after_shutdown_returns_item() {
        let q = FrameQueue::new();
        q.push(1).unwrap();
        q.shutdown();
        match q.push(2) {
            Err((RigError::QueueShutdown, item)) => assert_eq!(item, 2),
            other => panic!("unexpected push result: {:?}", other.map_err(|(e, _)| e)),
        }
        assert!(q.pop().is_err());
        assert_eq!(q.drain(), vec![1]);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let q = FrameQueue::with_capacity(2);
        for i in 0..4 {
            q.push(i).unwrap();
        }
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.pop().unwrap(), 2);
        assert_eq!(q.pop().unwrap(), 3);
    }

    #[test]
    fn test_pop_timeout_expires() {
        let q: FrameQueue<u8> = FrameQueue::new();
        assert!(q.pop_timeout(Duration::from_millis(10)).unwrap().is_none());
        assert!(q.try_pop().unwrap().is_none());
    }
}
