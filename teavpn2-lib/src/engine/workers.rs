#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

/// Round-robin handoff to a fixed set of workers. Each worker owns one
/// receiver; a session stays with the worker it was handed to for its
/// whole lifetime.
pub struct WorkerPool<T> {
    txs: Vec<mpsc::Sender<T>>,
    next: AtomicUsize,
}

impl<T> WorkerPool<T> {
    /// Create `n` handoff channels. The caller spawns one worker task
    /// per returned receiver.
    pub fn new(n: usize, depth: usize) -> (Self, Vec<mpsc::Receiver<T>>) {
        let mut txs = Vec::with_capacity(n);
        let mut rxs = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = mpsc::channel(depth);
            txs.push(tx);
            rxs.push(rx);
        }
        (
            Self {
                txs,
                next: AtomicUsize::new(0),
            },
            rxs,
        )
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Hand an item to the next worker in line. Returns false when that
    /// worker is gone.
    pub async fn dispatch(&self, item: T) -> bool {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.txs.len();
        self.txs[i].send(item).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_is_round_robin() {
        let (pool, mut rxs) = WorkerPool::new(3, 4);
        for item in 0..6 {
            assert!(pool.dispatch(item).await);
        }
        for (i, rx) in rxs.iter_mut().enumerate() {
            assert_eq!(rx.recv().await, Some(i));
            assert_eq!(rx.recv().await, Some(i + 3));
        }
    }

    #[tokio::test]
    async fn dispatch_fails_when_worker_is_gone() {
        let (pool, rxs) = WorkerPool::<u32>::new(1, 1);
        drop(rxs);
        assert!(!pool.dispatch(7).await);
    }
}
