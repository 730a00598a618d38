#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::Notify;

/// Outbound frames a session could not yet write.
pub const DEFAULT_QUEUE_CAP: usize = 16;

/// Bounded per-session outbound queue. When the writer cannot keep up
/// the oldest frame is evicted, so liveness traffic keeps flowing while
/// stale tunneled frames age out.
#[derive(Debug)]
pub struct SendQueue {
    inner: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    cap: usize,
}

impl SendQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            notify: Notify::new(),
            cap,
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a frame. Returns true when an older frame was dropped to
    /// make room.
    pub fn push(&self, frame: Bytes) -> bool {
        let dropped = {
            let mut q = self.queue();
            let dropped = if q.len() >= self.cap {
                q.pop_front();
                true
            } else {
                false
            };
            q.push_back(frame);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue().pop_front()
    }

    /// Wait until a frame is available and take it.
    pub async fn pop(&self) -> Bytes {
        loop {
            // Register interest before the emptiness check so a push in
            // between cannot be missed.
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return frame;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn clear(&self) {
        self.queue().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let q = SendQueue::new(2);
        assert!(!q.push(Bytes::from_static(b"a")));
        assert!(!q.push(Bytes::from_static(b"b")));
        assert!(q.push(Bytes::from_static(b"c")));
        assert_eq!(q.try_pop().as_deref(), Some(b"b".as_ref()));
        assert_eq!(q.try_pop().as_deref(), Some(b"c".as_ref()));
        assert_eq!(q.try_pop(), None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let q = std::sync::Arc::new(SendQueue::new(4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::task::yield_now().await;
        q.push(Bytes::from_static(b"x"));
        let got = waiter.await.expect("pop task");
        assert_eq!(&got[..], b"x");
    }
}
