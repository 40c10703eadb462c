use super::TileCoord;
use std::fmt::{self, Debug};

/// One tile: its coordinate in the canonical row convention and its raw payload.
///
/// The payload is stored exactly as found in the source; it is never recompressed.
#[derive(Clone, PartialEq, Eq)]
pub struct Tile {
	pub coord: TileCoord,
	pub data: Vec<u8>,
}

impl Tile {
	pub fn new(coord: TileCoord, data: impl Into<Vec<u8>>) -> Tile {
		Tile {
			coord,
			data: data.into(),
		}
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

impl Debug for Tile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Tile")
			.field("coord", &self.coord)
			.field("len", &self.data.len())
			.finish()
	}
}
