//! Keyed Work Queue
//!
//! Distributes events to a pool of workers while guaranteeing that:
//! - at most one worker holds a given key at a time
//! - events for one key are handed out in the order they were pushed
//! - no event is dropped; events pushed while a key is held wait their turn
//!
//! A key is "scheduled" from the moment its first event is pushed until a
//! worker finds its backlog empty. While scheduled it sits either in the
//! ready channel or with exactly one worker.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

/// Queue of events grouped by key
pub struct KeyedWorkQueue<K, E> {
    /// Backlog per scheduled key
    backlog: Mutex<HashMap<K, VecDeque<E>>>,
    ready_tx: mpsc::UnboundedSender<K>,
    ready_rx: AsyncMutex<mpsc::UnboundedReceiver<K>>,
    /// Signalled whenever the last scheduled key is released
    idle: Notify,
    /// Signalled on every push
    pushed: Notify,
}

impl<K, E> KeyedWorkQueue<K, E>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Self {
            backlog: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx: AsyncMutex::new(ready_rx),
            idle: Notify::new(),
            pushed: Notify::new(),
        }
    }

    /// Push an event for `key`
    pub fn push(&self, key: K, event: E) {
        let mut backlog = self.backlog.lock();
        match backlog.get_mut(&key) {
            Some(events) => events.push_back(event),
            None => {
                backlog.insert(key.clone(), VecDeque::from([event]));
                // The receiver lives as long as the queue
                let _ = self.ready_tx.send(key);
            }
        }
        drop(backlog);
        self.pushed.notify_waiters();
    }

    /// Wait for a key with pending events; the caller then owns the key
    /// until [`pop`](Self::pop) returns `None` for it
    pub async fn next_key(&self) -> Option<K> {
        self.ready_rx.lock().await.recv().await
    }

    /// Take the next event for an owned key, releasing the key when its
    /// backlog is empty
    pub fn pop(&self, key: &K) -> Option<E> {
        let mut backlog = self.backlog.lock();
        let event = backlog.get_mut(key).and_then(|events| events.pop_front());
        if event.is_none() {
            backlog.remove(key);
            if backlog.is_empty() {
                self.idle.notify_waiters();
            }
        }
        event
    }

    /// Whether any event still waiting for `key` matches `predicate`
    pub fn has_pending(&self, key: &K, predicate: impl Fn(&E) -> bool) -> bool {
        self.backlog
            .lock()
            .get(key)
            .map(|events| events.iter().any(predicate))
            .unwrap_or(false)
    }

    /// Wait until an event matching `predicate` is queued for `key`
    pub async fn wait_pending(&self, key: &K, predicate: impl Fn(&E) -> bool) {
        loop {
            let pushed = self.pushed.notified();
            if self.has_pending(key, &predicate) {
                return;
            }
            pushed.await;
        }
    }

    /// Whether `key` is scheduled
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.backlog.lock().contains_key(key)
    }

    /// Number of events waiting across all keys
    pub fn pending_events(&self) -> usize {
        self.backlog.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.backlog.lock().is_empty()
    }

    /// Wait until no key is scheduled
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl<K, E> Default for KeyedWorkQueue<K, E>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_per_key() {
        let queue: KeyedWorkQueue<&str, u32> = KeyedWorkQueue::new();
        queue.push("a", 1);
        queue.push("b", 10);
        queue.push("a", 2);
        queue.push("a", 3);

        let key = queue.next_key().await.unwrap();
        assert_eq!(key, "a");
        assert_eq!(queue.pop(&key), Some(1));
        assert_eq!(queue.pop(&key), Some(2));

        // Pushed while held: no second ready signal, appended to the backlog
        queue.push("a", 4);
        assert_eq!(queue.pop(&key), Some(3));
        assert_eq!(queue.pop(&key), Some(4));
        assert_eq!(queue.pop(&key), None);
        assert!(!queue.is_scheduled(&"a"));

        let key = queue.next_key().await.unwrap();
        assert_eq!(key, "b");
        assert_eq!(queue.pop(&key), Some(10));
        assert_eq!(queue.pop(&key), None);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_has_pending() {
        let queue: KeyedWorkQueue<&str, &str> = KeyedWorkQueue::new();
        queue.push("claim", "add");
        queue.push("claim", "delete");

        let key = queue.next_key().await.unwrap();
        assert_eq!(queue.pop(&key), Some("add"));
        assert!(queue.has_pending(&key, |e| *e == "delete"));
        assert!(!queue.has_pending(&"other", |_| true));
        assert_eq!(queue.pending_events(), 1);
    }

    #[tokio::test]
    async fn test_wait_pending_wakes_on_matching_push() {
        let queue: Arc<KeyedWorkQueue<&str, &str>> = Arc::new(KeyedWorkQueue::new());
        queue.push("claim", "add");
        let key = queue.next_key().await.unwrap();
        assert_eq!(queue.pop(&key), Some("add"));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_pending(&"claim", |e| *e == "delete").await })
        };
        tokio::task::yield_now().await;

        // Unrelated pushes do not complete the wait
        queue.push("claim", "update");
        queue.push("other", "delete");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.push("claim", "delete");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_pending did not wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_pending_returns_for_already_queued_event() {
        let queue: KeyedWorkQueue<&str, &str> = KeyedWorkQueue::new();
        queue.push("claim", "delete");
        tokio::time::timeout(Duration::from_millis(100), queue.wait_pending(&"claim", |e| *e == "delete"))
            .await
            .expect("queued event not seen");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_never_share_a_key() {
        let queue: Arc<KeyedWorkQueue<u32, u32>> = Arc::new(KeyedWorkQueue::new());
        let in_flight: Arc<Vec<AtomicUsize>> = Arc::new((0..4).map(|_| AtomicUsize::new(0)).collect());
        let max_seen = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));
        let order: Arc<Mutex<HashMap<u32, Vec<u32>>>> = Arc::new(Mutex::new(HashMap::new()));

        for seq in 0..200u32 {
            queue.push(seq % 4, seq);
        }

        let mut workers = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            let processed = processed.clone();
            let order = order.clone();
            workers.push(tokio::spawn(async move {
                while processed.load(Ordering::SeqCst) < 200 {
                    let key = match tokio::time::timeout(Duration::from_millis(50), queue.next_key()).await {
                        Ok(Some(key)) => key,
                        _ => continue,
                    };
                    while let Some(seq) = queue.pop(&key) {
                        let now = in_flight[key as usize].fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        order.lock().entry(key).or_default().push(seq);
                        in_flight[key as usize].fetch_sub(1, Ordering::SeqCst);
                        processed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }

        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        let order = order.lock();
        for (key, seqs) in order.iter() {
            let expected: Vec<u32> = (0..200).filter(|s| s % 4 == *key).collect();
            assert_eq!(seqs, &expected);
        }
        queue.wait_idle().await;
    }
}
