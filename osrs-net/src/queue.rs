//! Blocking, lock-protected double-ended queue shared between the I/O thread and the application.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Thread-safe deque. Every insert wakes one thread blocked in [`TsQueue::wait`].
#[derive(Debug)]
pub struct TsQueue<T> {
    items: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub fn push_back(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_one();
    }

    pub fn push_front(&self, item: T) {
        self.items.lock().push_front(item);
        self.ready.notify_one();
    }

    pub fn pop_front(&self) -> Result<T, QueueError> {
        self.items.lock().pop_front().ok_or(QueueError::Empty)
    }

    pub fn pop_back(&self) -> Result<T, QueueError> {
        self.items.lock().pop_back().ok_or(QueueError::Empty)
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn count(&self) -> usize {
        self.items.lock().len()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Block until the queue holds at least one item.
    pub fn wait(&self) {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.ready.wait(&mut items);
        }
    }

    /// Like [`TsQueue::wait`] but gives up after `timeout`. Returns whether an item is queued.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.ready.wait_until(&mut items, deadline).timed_out() {
                return !items.is_empty();
            }
        }
        true
    }
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> TsQueue<T> {
    /// Copy of the item at the front, left in place.
    pub fn front(&self) -> Result<T, QueueError> {
        self.items.lock().front().cloned().ok_or(QueueError::Empty)
    }

    /// Copy of the item at the back, left in place.
    pub fn back(&self) -> Result<T, QueueError> {
        self.items.lock().back().cloned().ok_or(QueueError::Empty)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_back_pop_front_is_fifo() {
        let q = TsQueue::new();
        for i in [1, 2, 3] {
            q.push_back(i);
        }
        assert_eq!(q.count(), 3);
        let out: Vec<i32> = (0..3).map(|_| q.pop_front().unwrap()).collect();
        assert_eq!(out, vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn push_front_pop_front_is_lifo() {
        let q = TsQueue::new();
        for i in [1, 2, 3] {
            q.push_front(i);
        }
        assert_eq!(q.pop_front().unwrap(), 3);
        assert_eq!(q.pop_back().unwrap(), 1);
        assert_eq!(q.pop_front().unwrap(), 2);
    }

    #[test]
    fn peek_does_not_remove() {
        let q = TsQueue::new();
        q.push_back("a");
        q.push_back("b");
        assert_eq!(q.front().unwrap(), "a");
        assert_eq!(q.back().unwrap(), "b");
        assert_eq!(q.count(), 2);
    }

    #[test]
    fn empty_queue_errors() {
        let q: TsQueue<u8> = TsQueue::new();
        assert_eq!(q.pop_front(), Err(QueueError::Empty));
        assert_eq!(q.pop_back(), Err(QueueError::Empty));
        assert_eq!(q.front(), Err(QueueError::Empty));
        assert_eq!(q.back(), Err(QueueError::Empty));
    }

    #[test]
    fn clear_drops_everything() {
        let q = TsQueue::new();
        q.push_back(1);
        q.push_back(2);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn wait_wakes_on_push_from_other_thread() {
        let q = Arc::new(TsQueue::new());
        let waiter = {
            let q = q.clone();
            thread::spawn(move || {
                q.wait();
                q.pop_front().unwrap()
            })
        };
        thread::sleep(Duration::from_millis(50));
        q.push_back(5u32);
        assert_eq!(waiter.join().unwrap(), 5);
    }

    #[test]
    fn wait_returns_immediately_when_not_empty() {
        let q = TsQueue::new();
        q.push_back(1);
        q.wait();
        assert!(q.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_timeout_expires_on_empty_queue() {
        let q: TsQueue<u8> = TsQueue::new();
        let start = Instant::now();
        assert!(!q.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
