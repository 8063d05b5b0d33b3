//! Fan-out of queue snapshots to live viewers.
//!
//! One `tokio::sync::broadcast` channel per doctor/day queue, created on the
//! first subscription. Slow receivers skip straight to the newest snapshot;
//! nothing is replayed and publishers never wait.

use crate::models::QueueSnapshot;
use crate::observability::metrics::adjust_queue_subscribers;
use chrono::NaiveDate;
use common::types::{ClinicId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

/// Snapshots buffered per queue before receivers start lagging.
pub const CHANNEL_CAPACITY: usize = 16;

/// Identifies one doctor's queue for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub clinic_id: ClinicId,
    pub doctor_id: UserId,
    pub date: NaiveDate,
}

impl QueueKey {
    pub fn new(clinic_id: ClinicId, doctor_id: UserId, date: NaiveDate) -> Self {
        Self {
            clinic_id,
            doctor_id,
            date,
        }
    }
}

/// Registry of per-queue broadcast channels.
#[derive(Debug, Default)]
pub struct QueueBroadcaster {
    channels: Mutex<HashMap<QueueKey, broadcast::Sender<Arc<QueueSnapshot>>>>,
}

impl QueueBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a queue. `transport` labels the subscriber gauge.
    pub fn subscribe(&self, key: QueueKey, transport: &'static str) -> QueueSubscription {
        let receiver = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels
                .entry(key)
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        adjust_queue_subscribers(transport, 1.0);
        debug!(target: "clinic.queue.broadcast", ?key, transport, "Subscriber added");

        QueueSubscription {
            receiver,
            transport,
        }
    }

    /// Publish a snapshot. Returns the number of receivers reached.
    pub fn publish(&self, key: QueueKey, snapshot: QueueSnapshot) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.retain(|_, sender| sender.receiver_count() > 0);

        match channels.get(&key) {
            // Send only fails when every receiver is gone
            Some(sender) => sender.send(Arc::new(snapshot)).unwrap_or(0),
            None => 0,
        }
    }

    /// Queues with at least one live subscriber.
    #[cfg(test)]
    pub(crate) fn active_queues(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|sender| sender.receiver_count() > 0)
            .count()
    }
}

/// A live subscription to one queue.
#[derive(Debug)]
pub struct QueueSubscription {
    receiver: broadcast::Receiver<Arc<QueueSnapshot>>,
    transport: &'static str,
}

impl QueueSubscription {
    /// Wait for the next snapshot, skipping to the newest one available.
    ///
    /// Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Arc<QueueSnapshot>> {
        let mut latest = loop {
            match self.receiver.recv().await {
                Ok(snapshot) => break snapshot,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(target: "clinic.queue.broadcast", skipped, "Subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        };

        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => latest = snapshot,
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Some(latest),
            }
        }
    }
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        adjust_queue_subscribers(self.transport, -1.0);
    }
}
