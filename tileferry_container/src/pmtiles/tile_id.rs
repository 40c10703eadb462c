//! PMTiles tile ids: the position of a tile on the Hilbert curve of its zoom level, offset by the
//! number of tiles on all lower zoom levels.
//!
//! Tile ids use the XYZ row convention (row 0 at the top).

use anyhow::{Result, bail, ensure};
use tileferry_core::TileCoord;

fn rotate(s: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
	if ry == 0 {
		if rx == 1 {
			*x = s - 1 - *x;
			*y = s - 1 - *y;
		}
		std::mem::swap(x, y);
	}
}

/// Tiles on all zoom levels below `zoom`.
fn tiles_below(zoom: u8) -> u64 {
	((1u64 << (2 * u32::from(zoom))) - 1) / 3
}

/// Hilbert tile id of an XYZ coordinate.
pub fn coord_to_tile_id(coord: &TileCoord) -> Result<u64> {
	ensure!(coord.zoom < 32, "tile zoom exceeds 64-bit limit");
	let n = 1u64 << coord.zoom;
	let (mut x, mut y) = (u64::from(coord.column), u64::from(coord.row));
	ensure!(x < n && y < n, "tile x/y outside zoom level bounds");

	let mut d = 0u64;
	let mut s = n / 2;
	while s > 0 {
		let rx = u64::from(x & s > 0);
		let ry = u64::from(y & s > 0);
		d += s * s * ((3 * rx) ^ ry);
		rotate(n, &mut x, &mut y, rx, ry);
		s /= 2;
	}
	Ok(tiles_below(coord.zoom) + d)
}

/// XYZ coordinate of a Hilbert tile id.
pub fn tile_id_to_coord(tile_id: u64) -> Result<TileCoord> {
	for zoom in 0..32u8 {
		let first = tiles_below(zoom);
		let count = 1u64 << (2 * u32::from(zoom));
		if tile_id - first < count {
			let n = 1u64 << zoom;
			let mut t = tile_id - first;
			let (mut x, mut y) = (0u64, 0u64);
			let mut s = 1u64;
			while s < n {
				let rx = (t / 2) & 1;
				let ry = (t ^ rx) & 1;
				rotate(s, &mut x, &mut y, rx, ry);
				x += s * rx;
				y += s * ry;
				t /= 4;
				s *= 2;
			}
			return TileCoord::new(zoom, x as u32, y as u32);
		}
	}
	bail!("tile zoom exceeds 64-bit limit")
}
