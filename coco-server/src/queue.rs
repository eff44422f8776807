//! Bounded queues between the pipeline stages.

use std::fmt;

use coco_config::QueuePolicy;
use coco_telemetry::{Handle, Registry, Subsystem};
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// All consumers of a queue have stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("queue {0} is closed")]
pub struct QueueClosed(pub &'static str);

/// The sending half of a bounded inter-stage queue.
///
/// Depending on the [`QueuePolicy`], a full queue either blocks the producer or drops the item.
/// Dropped items are counted under `errors.queue.<name>.dropped`.
pub struct QueueSender<T> {
    name: &'static str,
    tx: Sender<T>,
    policy: QueuePolicy,
    dropped: Handle,
}

impl<T> QueueSender<T> {
    /// Enqueues an item according to the queue's policy.
    pub fn send(&self, item: T) -> Result<(), QueueClosed> {
        match self.policy {
            QueuePolicy::Block => self.tx.send(item).map_err(|_| QueueClosed(self.name)),
            QueuePolicy::Drop => match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.add(1);
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(QueueClosed(self.name)),
            },
        }
    }
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            policy: self.policy,
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> fmt::Debug for QueueSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSender")
            .field("name", &self.name)
            .field("len", &self.tx.len())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Creates a named, bounded queue.
pub fn queue<T>(
    name: &'static str,
    capacity: usize,
    policy: QueuePolicy,
    registry: &Registry,
) -> (QueueSender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let dropped = registry.handle(Subsystem::Errors, &format!("queue.{name}.dropped"));

    let sender = QueueSender {
        name,
        tx,
        policy,
        dropped,
    };

    (sender, rx)
}
