//! Error type for id maps.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`IdInterner`](crate::IdInterner) and the synced registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InternError {
    /// Every dynamic id of the map has been handed out. The map cannot
    /// register new keys until it is cleared.
    #[error("id map '{name}' is exhausted: no ids left in [{min_id}, {max_id})")]
    Exhausted {
        /// Map name.
        name: String,
        /// First dynamic id.
        min_id: u32,
        /// One past the last dynamic id.
        max_id: u32,
    },
    /// An explicit id outside the reserved range `[0, min_id)`.
    #[error("id {id} is not reserved in map '{name}' (reserved ids are below {min_id})")]
    NotReserved {
        /// Map name.
        name: String,
        /// Rejected id.
        id: u32,
        /// First dynamic id.
        min_id: u32,
    },
    /// `min_id > max_id`, or `max_id` leaves no room for cache encoding.
    #[error("invalid id range [{min_id}, {max_id})")]
    InvalidRange {
        /// Requested first dynamic id.
        min_id: u32,
        /// Requested end of the id space.
        max_id: u32,
    },
    /// Conversion between maps that are not parent and child.
    #[error("map '{from}' is neither parent nor child of '{to}'")]
    Unrelated {
        /// Source map.
        from: String,
        /// Target map.
        to: String,
    },
    /// A map name is already registered with the registry.
    #[error("id map '{0}' already exists")]
    DuplicateMap(String),
    /// An event refers to a map id the registry does not know.
    #[error("no id map with id {0}")]
    UnknownMap(u32),
    /// A saved id map could not be read or written.
    #[error("id map file {}: {reason}", .path.display())]
    Persist {
        /// File being accessed.
        path: PathBuf,
        /// Underlying I/O or RON error.
        reason: String,
    },
}
