//! MBTiles stores and the UTFGrid records they carry.

mod grid;
mod store;

pub use grid::UtfGrid;
pub use store::MBTilesStore;
pub(crate) use store::{coord_from_row, has_table};
