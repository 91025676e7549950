//! Double-buffered world state for tick-based simulation.
//!
//! Every value lives twice: a *live* copy that only the owning worker mutates
//! during a tick, and a *stable* copy that any thread may read without locking.
//! A [`SnapshotManager`] publishes all dirty live values into their stable
//! slots once per tick, so readers always observe a whole previous-tick view
//! and never an intermediate write.

pub mod array;
pub mod cell;
pub mod error;
pub mod manager;
pub mod value;

pub use array::SnapshotArray;
pub use cell::SnapshotCell;
pub use error::SnapshotError;
pub use manager::{SnapshotKey, SnapshotManager, Snapshotable};
pub use value::SnapshotValue;
