// src/queue.rs
//! Bounded hand-off queues with a drop-newest overflow policy.
//!
//! Producers never wait for capacity: when the queue is full the item being
//! offered is discarded and counted, and everything already queued is kept.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of offering an item to a [`BoundedSender`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Queue full, item discarded. Carries the running drop total.
    Dropped(u64),
    /// All receivers are gone.
    Closed,
}

/// Producer half of a bounded queue.
///
/// Clones share the same drop counter. The queue closes once every
/// `BoundedSender` has been dropped; receivers then drain what is left and
/// observe disconnection.
#[derive(Debug)]
pub struct BoundedSender<T> {
    tx: flume::Sender<T>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
            dropped: Arc::clone(&self.dropped),
        }
    }
}

/// Create a bounded queue that drops new items when full.
pub fn bounded<T>(capacity: usize, dropped: Arc<AtomicU64>) -> (BoundedSender<T>, flume::Receiver<T>) {
    let (tx, rx) = flume::bounded(capacity);
    (
        BoundedSender {
            tx,
            capacity,
            dropped,
        },
        rx,
    )
}

impl<T> BoundedSender<T> {
    /// Non-blocking enqueue.
    pub fn offer(&self, item: T) -> Offer {
        match self.tx.try_send(item) {
            Ok(()) => Offer::Accepted,
            Err(flume::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                Offer::Dropped(total)
            }
            Err(flume::TrySendError::Disconnected(_)) => Offer::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// True for the first drop and every `every`-th after it.
pub fn should_log_drop(total: u64, every: u64) -> bool {
    total == 1 || (every > 0 && total % every == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_newest() {
        let counter = Arc::new(AtomicU64::new(0));
        let (tx, rx) = bounded::<u32>(3, counter.clone());

        let outcomes: Vec<Offer> = (0..5).map(|i| tx.offer(i)).collect();

        assert_eq!(
            outcomes,
            vec![
                Offer::Accepted,
                Offer::Accepted,
                Offer::Accepted,
                Offer::Dropped(1),
                Offer::Dropped(2)
            ]
        );
        assert_eq!(counter.load(Ordering::Relaxed), 2);

        // Older items survive, in order
        let kept: Vec<u32> = rx.drain().collect();
        assert_eq!(kept, vec![0, 1, 2]);
    }

    #[test]
    fn test_n_plus_k_without_consumers() {
        let n = 100;
        let k = 37;
        let (tx, rx) = bounded::<usize>(n, Arc::new(AtomicU64::new(0)));

        let accepted = (0..n + k)
            .filter(|i| tx.offer(*i) == Offer::Accepted)
            .count();

        assert_eq!(accepted, n);
        assert_eq!(tx.dropped(), k as u64);
        assert_eq!(tx.len(), n);
        assert_eq!(rx.len(), n);
    }

    #[test]
    fn test_clones_share_counter() {
        let (tx, _rx) = bounded::<u8>(1, Arc::new(AtomicU64::new(0)));
        let tx2 = tx.clone();

        assert_eq!(tx.offer(1), Offer::Accepted);
        assert_eq!(tx2.offer(2), Offer::Dropped(1));
        assert_eq!(tx.offer(3), Offer::Dropped(2));
        assert_eq!(tx.dropped(), 2);
    }

    #[test]
    fn test_closed_when_receiver_dropped() {
        let (tx, rx) = bounded::<u8>(4, Arc::new(AtomicU64::new(0)));
        drop(rx);

        assert_eq!(tx.offer(1), Offer::Closed);
        assert_eq!(tx.dropped(), 0);
    }

    #[tokio::test]
    async fn test_receiver_drains_after_close() {
        let (tx, rx) = bounded::<u8>(4, Arc::new(AtomicU64::new(0)));
        tx.offer(1);
        tx.offer(2);
        drop(tx);

        assert_eq!(rx.recv_async().await.unwrap(), 1);
        assert_eq!(rx.recv_async().await.unwrap(), 2);
        assert!(rx.recv_async().await.is_err());
    }

    #[test]
    fn test_should_log_drop() {
        assert!(should_log_drop(1, 1000));
        assert!(!should_log_drop(2, 1000));
        assert!(should_log_drop(1000, 1000));
        assert!(should_log_drop(2000, 1000));
        assert!(!should_log_drop(1001, 1000));
    }
}
