//! Shared queue of outstanding piece work.
//!
//! The only structure popped from and pushed to by several workers at once.
//! Backed by a bounded channel so every queued item is handed to exactly one
//! consumer; closing wakes all waiting consumers.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};

use super::piece_download::PieceWork;

/// Multi-producer multi-consumer queue of `PieceWork`.
///
/// Capacity is the total piece count: an item is either queued, held by one
/// worker or delivered, so a push never waits for space.
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<PieceWork>,
    receiver: Arc<Mutex<mpsc::Receiver<PieceWork>>>,
    closed: watch::Receiver<bool>,
    close_signal: Arc<watch::Sender<bool>>,
}

impl WorkQueue {
    /// Creates an empty queue holding up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (close_signal, closed) = watch::channel(false);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            closed,
            close_signal: Arc::new(close_signal),
        }
    }

    /// Adds an item. Returns false if the queue is closed and the item dropped.
    pub async fn push(&self, work: PieceWork) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sender.send(work).await.is_ok()
    }

    /// Puts back an item whose attempt failed.
    pub async fn requeue(&self, work: PieceWork) -> bool {
        tracing::trace!("Requeueing piece {}", work.index);
        self.push(work).await
    }

    /// Waits for the next item; `None` once the queue is closed.
    pub async fn pop(&self) -> Option<PieceWork> {
        let mut closed = self.closed.clone();
        if *closed.borrow() {
            return None;
        }

        tokio::select! {
            work = async { self.receiver.lock().await.recv().await } => work,
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => None,
        }
    }

    /// Closes the queue and releases every waiting consumer.
    pub fn close(&self) {
        self.close_signal.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio::task::JoinSet;

    use super::*;
    use crate::torrent::PieceIndex;

    fn work(index: u32) -> PieceWork {
        PieceWork {
            index: PieceIndex::new(index),
            hash: [0u8; 20],
            length: 16,
        }
    }

    #[tokio::test]
    async fn test_push_then_pop() {
        let queue = WorkQueue::new(2);
        assert!(queue.push(work(0)).await);
        assert!(queue.push(work(1)).await);

        let mut seen = vec![
            queue.pop().await.unwrap().index.as_u32(),
            queue.pop().await.unwrap().index.as_u32(),
        ];
        seen.sort();
        assert_eq!(seen, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_close_releases_waiting_consumers() {
        let queue = WorkQueue::new(4);

        let mut consumers = JoinSet::new();
        for _ in 0..3 {
            let queue = queue.clone();
            consumers.spawn(async move { queue.pop().await });
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        while let Some(popped) = consumers.join_next().await {
            assert!(popped.unwrap().is_none());
        }
        assert!(!queue.push(work(0)).await);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requeue_conserves_work() {
        const PIECES: u32 = 200;
        let queue = WorkQueue::new(PIECES as usize);
        for index in 0..PIECES {
            assert!(queue.push(work(index)).await);
        }

        let retried = Arc::new(std::sync::Mutex::new(HashSet::new()));
        let (results, mut delivered) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for _ in 0..8 {
            let queue = queue.clone();
            let retried = Arc::clone(&retried);
            let results = results.clone();
            workers.spawn(async move {
                while let Some(item) = queue.pop().await {
                    let first_try = retried.lock().unwrap().insert(item.index);
                    if first_try && item.index.as_u32() % 3 == 0 {
                        queue.requeue(item).await;
                        tokio::task::yield_now().await;
                        continue;
                    }
                    let _ = results.send(item.index);
                }
            });
        }
        drop(results);

        let mut seen = HashSet::new();
        for _ in 0..PIECES {
            let index = delivered.recv().await.unwrap();
            assert!(seen.insert(index), "piece {index} delivered twice");
        }
        queue.close();

        while let Some(joined) = workers.join_next().await {
            joined.unwrap();
        }
        assert_eq!(seen.len(), PIECES as usize);
        assert!(delivered.try_recv().is_err());
    }
}
