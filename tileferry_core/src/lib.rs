//! Contains the shared vocabulary of tileferry: tile coordinates, tiles, addressing schemes and
//! progress reporting.
//!
//! Everything in this crate is pure and free of I/O, so it can be used from the storage layer
//! (`tileferry_container`) as well as from the upload pipeline (`tileferry`) without pulling in
//! either of them.

pub mod progress;

pub mod scheme;
pub use scheme::{TileScheme, flip_y, flip_y_checked, join_key};

pub mod types;
pub use types::*;
