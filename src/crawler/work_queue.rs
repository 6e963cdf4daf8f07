//! Joinable work queue shared by traversal workers
//!
//! A plain channel cannot express "the traversal is finished": an empty
//! queue is not enough, because a worker may be about to re-enqueue
//! subdirectories of the item it holds. The queue therefore counts in-flight
//! items; [`WorkQueue::join`] returns only once nothing is pending and no
//! worker holds an item.
//!
//! Invariant for workers: when retrying an item, `push` the replacement
//! before calling `task_done`, so the queue never looks drained while work
//! remains.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Work queue with in-flight tracking and explicit cancellation
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    item_added: Notify,
    maybe_done: Notify,
}

struct Inner<T> {
    items: VecDeque<T>,
    in_flight: usize,
    closed: bool,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                in_flight: 0,
                closed: false,
            }),
            item_added: Notify::new(),
            maybe_done: Notify::new(),
        }
    }

    /// Enqueues an item; items pushed after `close` are dropped
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.items.push_back(item);
        }
        self.item_added.notify_one();
    }

    /// Dequeues one item, waiting up to `timeout`
    ///
    /// Returns None on timeout or once the queue is closed. A returned item
    /// counts as in-flight until the caller invokes [`WorkQueue::task_done`].
    pub async fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.item_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(item) = inner.items.pop_front() {
                    inner.in_flight += 1;
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Marks one previously popped item as finished
    pub fn task_done(&self) {
        let done = {
            let mut inner = self.inner.lock().unwrap();
            debug_assert!(inner.in_flight > 0, "task_done without a popped item");
            inner.in_flight = inner.in_flight.saturating_sub(1);
            inner.in_flight == 0 && inner.items.is_empty()
        };
        if done {
            self.maybe_done.notify_waiters();
        }
    }

    /// Waits until no items are pending and none are held by a worker
    pub async fn join(&self) {
        loop {
            let notified = self.maybe_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().unwrap();
                if inner.items.is_empty() && inner.in_flight == 0 {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue: discards pending items and releases blocked `pop` calls
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.items.clear();
        }
        self.item_added.notify_waiters();
        self.maybe_done.notify_waiters();
    }

    /// True when nothing is pending and nothing is in flight
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.items.is_empty() && inner.in_flight == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_push_pop() {
        let queue = WorkQueue::new();
        queue.push("a");
        assert_eq!(queue.pop(Duration::from_millis(10)).await, Some("a"));
        assert!(!queue.is_idle()); // still in flight
        queue.task_done();
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        assert_eq!(queue.pop(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(42);
        assert_eq!(popper.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_join_waits_for_in_flight_requeue() {
        let queue = Arc::new(WorkQueue::new());
        queue.push(1);

        let worker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let item = queue.pop(Duration::from_secs(1)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                if item == 1 {
                    // Requeue before task_done, as the traversal workers do.
                    queue.push(2);
                }
                queue.task_done();

                let item = queue.pop(Duration::from_secs(1)).await.unwrap();
                assert_eq!(item, 2);
                queue.task_done();
            })
        };

        queue.join().await;
        assert!(queue.is_idle());
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_blocked_pop() {
        let queue: Arc<WorkQueue<i32>> = Arc::new(WorkQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert_eq!(popper.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_after_close_is_dropped() {
        let queue = WorkQueue::new();
        queue.close();
        queue.push("late");
        assert_eq!(queue.pop(Duration::from_millis(10)).await, None);
    }
}
