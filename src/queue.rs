//! Delivery queue for messages that must survive a missing client
//!
//! Lifecycle messages such as `game-opened` or `is-on-track` usually fire
//! before the UI client has connected. They are buffered here in strict
//! insertion order and drained by the active connection's drain task. The
//! queue is connection-agnostic: it outlives any number of reconnects.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::types::QueuedMessage;

/// Mutex-protected FIFO of [`QueuedMessage`]s
///
/// Neither operation blocks beyond the short critical section.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    entries: Mutex<VecDeque<QueuedMessage>>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the back.
    pub fn enqueue(&self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.push(QueuedMessage::new(name, value));
    }

    pub fn push(&self, message: QueuedMessage) {
        trace!(name = %message.name, "queueing message");
        self.lock().push_back(message);
    }

    /// Pop the oldest message, or `None` when empty.
    pub fn try_dequeue(&self) -> Option<QueuedMessage> {
        self.lock().pop_front()
    }

    /// Put a message whose delivery failed back at the front, ahead of
    /// everything enqueued since it was popped.
    pub fn requeue_front(&self, message: QueuedMessage) {
        trace!(name = %message.name, "requeueing undelivered message");
        self.lock().push_front(message);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        // A panic while holding the lock leaves the deque itself intact
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn dequeues_in_insertion_order() {
        let queue = DeliveryQueue::new();
        queue.enqueue("a", 1);
        queue.enqueue("b", 2);
        queue.enqueue("c", 3);

        let names: Vec<_> = std::iter::from_fn(|| queue.try_dequeue()).map(|m| m.name).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn requeued_message_goes_first() {
        let queue = DeliveryQueue::new();
        queue.enqueue("a", 1);
        queue.enqueue("b", 2);

        let first = queue.try_dequeue().unwrap();
        queue.enqueue("c", 3);
        queue.requeue_front(first);

        let names: Vec<_> = queue.snapshot().into_iter().map(|m| m.name).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        const COUNT: u64 = 10_000;
        let queue = Arc::new(DeliveryQueue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for i in 0..COUNT {
                    queue.enqueue("seq", i);
                }
            })
        };

        let mut received = Vec::with_capacity(COUNT as usize);
        while received.len() < COUNT as usize {
            match queue.try_dequeue() {
                Some(message) => received.push(message.value.as_u64().unwrap()),
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();

        assert!(received.windows(2).all(|w| w[0] + 1 == w[1]));
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn fifo_holds_for_any_interleaving(ops in prop::collection::vec(any::<bool>(), 0..200)) {
            // true = enqueue next sequence number, false = try to dequeue
            let queue = DeliveryQueue::new();
            let mut next = 0u64;
            let mut received = Vec::new();

            for op in ops {
                if op {
                    queue.enqueue("seq", next);
                    next += 1;
                } else if let Some(message) = queue.try_dequeue() {
                    received.push(message.value.as_u64().unwrap());
                }
            }
            while let Some(message) = queue.try_dequeue() {
                received.push(message.value.as_u64().unwrap());
            }

            prop_assert_eq!(received, (0..next).collect::<Vec<_>>());
        }
    }
}
