//! Change events emitted by synced id maps.

use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

/// What a [`StringMapEvent`] does to the receiving map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringMapAction {
    /// Insert the listed entries.
    Add,
    /// Replace the whole map with the listed entries.
    Set,
    /// Remove the listed entries.
    Remove,
}

/// One diff of a synced id map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMapEvent {
    /// Registry id of the map the diff applies to.
    pub map_id: u32,
    /// Diff kind.
    pub action: StringMapAction,
    /// `(id, key)` pairs.
    pub entries: Vec<(u32, String)>,
}

impl StringMapEvent {
    /// Creates an event.
    pub fn new(map_id: u32, action: StringMapAction, entries: Vec<(u32, String)>) -> Self {
        Self {
            map_id,
            action,
            entries,
        }
    }
}

/// Fan-out of events to every attached channel.
///
/// Channels whose receiver is gone are dropped on the next publish.
#[derive(Debug, Default)]
pub struct EventListeners {
    senders: Mutex<Vec<Sender<StringMapEvent>>>,
}

impl EventListeners {
    /// Creates an empty listener set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new subscription.
    pub fn subscribe(&self) -> Receiver<StringMapEvent> {
        let (tx, rx) = unbounded();
        self.attach(tx);
        rx
    }

    /// Attaches an existing sender, e.g. one shared by many maps.
    pub fn attach(&self, tx: Sender<StringMapEvent>) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
    }

    /// Sends `event` to every listener.
    pub fn publish(&self, event: StringMapEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        match senders.len() {
            0 => {}
            1 => {
                if senders[0].send(event).is_err() {
                    senders.clear();
                }
            }
            _ => senders.retain(|tx| tx.send(event.clone()).is_ok()),
        }
    }

    /// Number of attached listeners.
    pub fn len(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_for_the_wire() {
        let event = StringMapEvent::new(
            3,
            StringMapAction::Add,
            vec![(7, "stone".into()), (8, "dirt".into())],
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"Add\""));
        let back: StringMapEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let listeners = EventListeners::new();
        let kept = listeners.subscribe();
        let dropped = listeners.subscribe();
        drop(dropped);
        assert_eq!(listeners.len(), 2);

        listeners.publish(StringMapEvent::new(0, StringMapAction::Set, Vec::new()));
        assert_eq!(listeners.len(), 1);
        assert_eq!(kept.try_iter().count(), 1);
    }
}
