//! The inbound frame buffer: bounded, and on overflow drops the oldest
//! entry rather than blocking the reader task (spec.md §4.2 stream loop,
//! and the "buffer-full drop policy" design note).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

pub struct DropOldestChannel<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    pub dropped_total: AtomicU64,
}

impl<T> DropOldestChannel<T> {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped_total: AtomicU64::new(0),
        })
    }

    pub async fn push(&self, item: T) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(item);
        drop(queue);
        self.notify.notify_one();
    }

    pub async fn recv(&self) -> T {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(item) = queue.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_it() {
        let channel = DropOldestChannel::new(2);
        channel.push(1).await;
        channel.push(2).await;
        channel.push(3).await;

        assert_eq!(channel.recv().await, 2);
        assert_eq!(channel.recv().await, 3);
        assert_eq!(channel.dropped_total(), 1);
    }
}
