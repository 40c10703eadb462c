//! Three-dimensional tile coordinates in the canonical (TMS) row convention
//!
//! A [`TileCoord`] addresses one tile inside a pyramid by zoom level, column and row.
//! Rows are counted from the **bottom** of the map, which is the convention used by
//! MBTiles. Conversions to other conventions go through [`TileCoord::flipped`] or the
//! scheme functions in [`crate::scheme`].
//!
//! # Examples
//!
//! ```
//! use tileferry_core::TileCoord;
//!
//! let coord = TileCoord::new(3, 1, 2).unwrap();
//! assert_eq!(coord.flipped().row, 5);
//! assert_eq!(coord.flipped().flipped(), coord);
//! ```

use crate::scheme::flip_y;
use anyhow::{Result, ensure};
use std::fmt::{self, Debug, Display};

/// A tile coordinate with zoom level, column (x) and row (y).
#[derive(Eq, PartialEq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct TileCoord {
	/// The zoom level of the tile.
	pub zoom: u8,
	/// The column (x) of the tile.
	pub column: u32,
	/// The row (y) of the tile.
	pub row: u32,
}

impl TileCoord {
	/// Create a new `TileCoord`.
	///
	/// # Errors
	/// Returns an error if `zoom` > 31 or if `column`/`row` are outside `0..2^zoom`.
	pub fn new(zoom: u8, column: u32, row: u32) -> Result<TileCoord> {
		ensure!(zoom <= 31, "zoom ({zoom}) must be <= 31");
		let max = 2u32.pow(u32::from(zoom));
		ensure!(column < max, "column ({column}) out of bounds for zoom {zoom}");
		ensure!(row < max, "row ({row}) out of bounds for zoom {zoom}");
		Ok(TileCoord { zoom, column, row })
	}

	/// Returns the same tile with the row counted from the other edge of the map.
	#[must_use]
	pub fn flipped(&self) -> TileCoord {
		TileCoord {
			zoom: self.zoom,
			column: self.column,
			row: flip_y(self.zoom, self.row),
		}
	}

	/// Number of tiles along one axis at this zoom level.
	pub fn size(&self) -> u64 {
		1u64 << self.zoom
	}
}

impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TileCoord({}, [{}, {}])", self.zoom, self.column, self.row)
	}
}

impl Display for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_validates_bounds() {
		assert!(TileCoord::new(0, 0, 0).is_ok());
		assert!(TileCoord::new(0, 1, 0).is_err());
		assert!(TileCoord::new(2, 3, 4).is_err());
		assert!(TileCoord::new(32, 0, 0).is_err());
		assert!(TileCoord::new(31, 2u32.pow(31) - 1, 0).is_ok());
	}

	#[test]
	fn flipped_round_trips() -> Result<()> {
		let coord = TileCoord::new(4, 7, 3)?;
		assert_eq!(coord.flipped(), TileCoord::new(4, 7, 12)?);
		assert_eq!(coord.flipped().flipped(), coord);
		Ok(())
	}

	#[test]
	fn formatting() -> Result<()> {
		let coord = TileCoord::new(5, 6, 7)?;
		assert_eq!(format!("{coord:?}"), "TileCoord(5, [6, 7])");
		assert_eq!(coord.to_string(), "5/6/7");
		assert_eq!(coord.size(), 32);
		Ok(())
	}
}
