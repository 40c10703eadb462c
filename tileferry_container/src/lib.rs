//! Tile containers: MBTiles stores, PMTiles archives and directory trees.
//!
//! - [`MBTilesStore`] creates, opens and queries MBTiles (SQLite) files, including UTFGrids
//! - [`compaction::compact_mbtiles`] rewrites the `tiles` table of a store into deduplicated
//!   `images` and an address `map`
//! - [`directory`] imports a directory tree into a store and exports a store back to disk
//! - [`TileSource`] reads every tile of a store ([`MBTilesTileSource`]) or of a PMTiles archive
//!   ([`PMTilesTileSource`]) exactly once
//!
//! Rows are always in the TMS convention inside this crate; schemes are applied only when keys
//! or paths are formatted.

pub mod compaction;
pub mod directory;
pub mod mbtiles;
pub use mbtiles::{MBTilesStore, UtfGrid};
pub mod pmtiles;
pub use pmtiles::PMTilesTileSource;
mod source;
pub use source::{MBTilesTileSource, PAGE_SIZE, TileSource};

#[cfg(any(test, feature = "test"))]
pub mod testing;
