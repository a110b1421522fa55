//! Bounded fan-out with uniform drop-newest backpressure.
//!
//! Producers never block: emission uses `try_send`, logs on a full channel
//! and prunes receivers that have gone away. Consumers that stop reading lose
//! events beyond the channel capacity, nothing more.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::tracing::prelude::*;

/// Capacity of every subscription channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A set of bounded subscriber channels sharing one producer.
///
/// Cloning yields another handle to the same subscriber set, so consumers can
/// join while the producing task runs; the subscriber list is only touched
/// inside a short critical section.
#[derive(Debug)]
pub struct FanOut<T> {
    label: &'static str,
    senders: Arc<Mutex<Vec<mpsc::Sender<T>>>>,
}

impl<T> Clone for FanOut<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            senders: Arc::clone(&self.senders),
        }
    }
}

impl<T: Clone> FanOut<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Open a new bounded subscription. It lives until the receiver drops.
    pub fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.senders.lock().push(tx);
        rx
    }

    /// Deliver a value-copy to every live subscriber, drop-newest on a full
    /// channel, prune closed ones.
    pub fn emit(&self, item: &T) {
        self.senders.lock().retain(|tx| match tx.try_send(item.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(channel = self.label, "subscriber channel full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }

    /// Drop every subscriber channel. Receivers drain what is queued and then
    /// end.
    pub fn close(&self) {
        self.senders.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_every_subscriber_in_order() {
        let fanout: FanOut<u32> = FanOut::new("test");
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();

        fanout.emit(&1);
        fanout.emit(&2);

        assert_eq!(a.recv().await, Some(1));
        assert_eq!(a.recv().await, Some(2));
        assert_eq!(b.recv().await, Some(1));
        assert_eq!(b.recv().await, Some(2));
    }

    #[tokio::test]
    async fn overflow_drops_newest_without_blocking() {
        let fanout: FanOut<usize> = FanOut::new("test");
        let mut rx = fanout.subscribe();

        for n in 0..EVENT_CHANNEL_CAPACITY + 10 {
            fanout.emit(&n);
        }

        // The first `capacity` events survive; the overflow was discarded.
        for expected in 0..EVENT_CHANNEL_CAPACITY {
            assert_eq!(rx.recv().await, Some(expected));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_ends_subscriptions_after_drain() {
        let fanout: FanOut<u32> = FanOut::new("test");
        let mut rx = fanout.subscribe();

        fanout.emit(&1);
        fanout.close();

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let fanout: FanOut<u32> = FanOut::new("test");
        let rx = fanout.subscribe();
        let mut keep = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 2);

        drop(rx);
        fanout.emit(&7);

        assert_eq!(fanout.subscriber_count(), 1);
        assert_eq!(keep.recv().await, Some(7));
    }
}
