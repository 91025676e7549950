//! Concurrent string interning with cross-map id conversion and change events.
//!
//! An [`IdInterner`] assigns small integer ids to string keys. Maps can be
//! linked as parent and child so ids translate between namespaces through
//! lock-free caches. [`SyncedIdInterner`] adds a change-event stream that a
//! network layer replays on remote peers, and [`SyncedMapRegistry`] resolves
//! the map ids carried by those events. Maps save to and load from RON files
//! so ids stay stable across restarts.

pub mod error;
pub mod event;
pub mod interner;
mod persist;
pub mod registry;
pub mod synced;

pub use error::InternError;
pub use event::{EventListeners, StringMapAction, StringMapEvent};
pub use interner::{IdInterner, NO_MAPPING};
pub use registry::{REGISTRATION_MAP_ID, REGISTRATION_MAP_NAME, SyncedMapRegistry};
pub use synced::SyncedIdInterner;
