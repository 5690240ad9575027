//! Bounded "latest value wins" queue between a transport callback and a
//! subscription task.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Result of [`LatestQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Stored without displacing anything.
    Queued,
    /// Stored after dropping the oldest pending item.
    Displaced,
    /// The queue is closed; the item was discarded.
    Closed,
}

struct Slots<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Single-consumer queue holding at most `depth` items.  When full, a push
/// drops the oldest item.
pub struct LatestQueue<T> {
    slots: Mutex<Slots<T>>,
    ready: Notify,
    depth: usize,
}

impl<T> LatestQueue<T> {
    /// `depth` is raised to 1 if zero.
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(depth),
                closed: false,
            }),
            ready: Notify::new(),
            depth,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never blocks.
    pub fn push(&self, item: T) -> Push {
        let outcome = {
            let mut slots = self.slots();
            if slots.closed {
                return Push::Closed;
            }
            let displaced = if slots.items.len() >= self.depth {
                slots.items.pop_front();
                true
            } else {
                false
            };
            slots.items.push_back(item);
            if displaced { Push::Displaced } else { Push::Queued }
        };
        self.ready.notify_one();
        outcome
    }

    /// Wait for the next item.  Returns `None` once the queue is closed,
    /// even if items are still pending.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let ready = self.ready.notified();
            {
                let mut slots = self.slots();
                if slots.closed {
                    return None;
                }
                if let Some(item) = slots.items.pop_front() {
                    return Some(item);
                }
            }
            ready.await;
        }
    }

    /// Discard pending items and wake the consumer.
    pub fn close(&self) {
        {
            let mut slots = self.slots();
            slots.closed = true;
            slots.items.clear();
        }
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.slots().closed
    }

    pub fn len(&self) -> usize {
        self.slots().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn full_queue_drops_oldest() {
        let queue = LatestQueue::new(2);
        assert_eq!(queue.push(1), Push::Queued);
        assert_eq!(queue.push(2), Push::Queued);
        assert_eq!(queue.push(3), Push::Displaced);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn zero_depth_behaves_as_one() {
        let queue = LatestQueue::new(0);
        queue.push("a");
        assert_eq!(queue.push("b"), Push::Displaced);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn pop_returns_items_in_order() {
        let queue = LatestQueue::new(4);
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(LatestQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(7u8);
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(7));
    }

    #[tokio::test]
    async fn close_wakes_consumer_and_rejects_pushes() {
        let queue = Arc::new(LatestQueue::<u8>::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, None);
        assert_eq!(queue.push(1), Push::Closed);
        assert!(queue.is_closed());
    }
}
