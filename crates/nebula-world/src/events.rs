//! Region lifecycle events and a small fan-out channel for delivering them.

use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::coords::RegionCoord;
use crate::region::RegionId;

/// Emitted by [`RegionSource`](crate::RegionSource) as regions enter and leave
/// the coordinate map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionEvent {
    /// A region was created and its worker started.
    Loaded {
        /// Region coordinate.
        coord: RegionCoord,
        /// Instance id of the region.
        id: RegionId,
    },
    /// A region was removed from the map and its worker halted.
    Unloaded {
        /// Region coordinate.
        coord: RegionCoord,
        /// Instance id of the region.
        id: RegionId,
    },
}

/// Delivers every published event to all live subscribers.
///
/// Subscribers whose receiver has been dropped are pruned on the next publish.
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E: Clone> EventBus<E> {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Sends `event` to every subscriber.
    pub fn publish(&self, event: E) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives_events() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(7u32);
        assert_eq!(a.try_recv(), Ok(7));
        assert_eq!(b.try_recv(), Ok(7));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish("x");
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Ok("x"));
    }
}
