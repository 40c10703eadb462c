//! Lazy, single-pass tile producers.
//!
//! A [`TileSource`] hands out every tile of a container exactly once, in container order, with
//! rows in the canonical (TMS) convention. Sources are not restartable; reopen the container to
//! read it again.

use crate::{MBTilesStore, mbtiles::coord_from_row};
use anyhow::{Context, Result};
use r2d2_sqlite::rusqlite::params;
use std::{collections::VecDeque, fmt::Debug};
use tileferry_core::{Tile, TileCoord};

/// Number of rows fetched per query by [`MBTilesTileSource`].
pub const PAGE_SIZE: usize = 256;

pub trait TileSource: Debug + Send {
	/// The next tile, or `None` once the source is exhausted.
	fn next_tile(&mut self) -> Result<Option<Tile>>;

	/// Number of tiles this source is expected to produce, if known.
	fn len_hint(&self) -> Option<u64>;
}

/// Reads the `tiles` table (or view) of an MBTiles store ordered by zoom, column and row.
///
/// Pages are fetched with a keyset condition on the last coordinate seen, so no cursor is held
/// open between calls.
#[derive(Debug)]
pub struct MBTilesTileSource {
	store: MBTilesStore,
	max_zoom: Option<u8>,
	page: VecDeque<Tile>,
	last: Option<TileCoord>,
	exhausted: bool,
	total: u64,
}

impl MBTilesTileSource {
	/// Creates a source over all tiles with `zoom_level <= max_zoom` (all tiles for `None`).
	pub fn new(store: MBTilesStore, max_zoom: Option<u8>) -> Result<MBTilesTileSource> {
		let total = store.count_tiles(max_zoom)?;
		Ok(MBTilesTileSource {
			store,
			max_zoom,
			page: VecDeque::new(),
			last: None,
			exhausted: false,
			total,
		})
	}

	fn fetch_page(&mut self) -> Result<()> {
		let (zoom, column, row) = match self.last {
			Some(coord) => (i64::from(coord.zoom), i64::from(coord.column), i64::from(coord.row)),
			None => (-1, -1, -1),
		};

		let conn = self.store.conn()?;
		let mut stmt = conn.prepare_cached(
			"SELECT zoom_level, tile_column, tile_row, tile_data FROM tiles
			WHERE (zoom_level, tile_column, tile_row) > (?1, ?2, ?3) AND zoom_level <= ?4
			ORDER BY zoom_level, tile_column, tile_row LIMIT ?5",
		)?;
		let mut rows = stmt.query(params![
			zoom,
			column,
			row,
			i64::from(self.max_zoom.unwrap_or(u8::MAX)),
			PAGE_SIZE as i64
		])?;

		while let Some(row) = rows.next()? {
			let coord = coord_from_row(row.get(0)?, row.get(1)?, row.get(2)?)?;
			let data: Vec<u8> = row.get(3).with_context(|| format!("reading tile_data of {coord:?}"))?;
			self.page.push_back(Tile::new(coord, data));
		}

		if self.page.len() < PAGE_SIZE {
			self.exhausted = true;
		}
		if let Some(tile) = self.page.back() {
			self.last = Some(tile.coord);
		}
		Ok(())
	}
}

impl TileSource for MBTilesTileSource {
	fn next_tile(&mut self) -> Result<Option<Tile>> {
		if self.page.is_empty() && !self.exhausted {
			self.fetch_page()?;
		}
		Ok(self.page.pop_front())
	}

	fn len_hint(&self) -> Option<u64> {
		Some(self.total)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::compaction::compact_mbtiles;
	use assert_fs::TempDir;

	fn store_with_pyramid(dir: &TempDir, max_zoom: u8) -> Result<MBTilesStore> {
		let store = MBTilesStore::create(&dir.path().join("pyramid.mbtiles"))?;
		let mut tiles = Vec::new();
		for zoom in (0..=max_zoom).rev() {
			let size = 1u32 << zoom;
			for column in 0..size {
				for row in 0..size {
					tiles.push(Tile::new(TileCoord::new(zoom, column, row)?, vec![zoom, (column % 2) as u8]));
				}
			}
		}
		store.insert_tiles(&tiles)?;
		Ok(store)
	}

	fn drain(source: &mut dyn TileSource) -> Result<Vec<Tile>> {
		let mut tiles = Vec::new();
		while let Some(tile) = source.next_tile()? {
			tiles.push(tile);
		}
		Ok(tiles)
	}

	#[test]
	fn reads_all_tiles_in_order_across_pages() -> Result<()> {
		let dir = TempDir::new()?;
		// 1 + 4 + 16 + 64 + 256 = 341 tiles, more than one page
		let store = store_with_pyramid(&dir, 4)?;
		let mut source = MBTilesTileSource::new(store, None)?;
		assert_eq!(source.len_hint(), Some(341));

		let tiles = drain(&mut source)?;
		assert_eq!(tiles.len(), 341);
		let coords: Vec<TileCoord> = tiles.iter().map(|t| t.coord).collect();
		let mut sorted = coords.clone();
		sorted.sort();
		assert_eq!(coords, sorted);
		assert_eq!(tiles[0].coord, TileCoord::new(0, 0, 0)?);
		assert_eq!(tiles[1].data, vec![1, 0]);

		assert!(source.next_tile()?.is_none());
		Ok(())
	}

	#[test]
	fn max_zoom_limits_tiles() -> Result<()> {
		let dir = TempDir::new()?;
		let store = store_with_pyramid(&dir, 3)?;
		let mut source = MBTilesTileSource::new(store, Some(2))?;
		assert_eq!(source.len_hint(), Some(21));
		let tiles = drain(&mut source)?;
		assert_eq!(tiles.len(), 21);
		assert!(tiles.iter().all(|t| t.coord.zoom <= 2));
		Ok(())
	}

	#[test]
	fn reads_compacted_stores() -> Result<()> {
		let dir = TempDir::new()?;
		let store = store_with_pyramid(&dir, 4)?;
		let summary = compact_mbtiles(&store, 100)?;
		assert_eq!(summary.unique, 9);

		let tiles = drain(&mut MBTilesTileSource::new(store, None)?)?;
		assert_eq!(tiles.len(), 341);
		assert_eq!(tiles[340].coord, TileCoord::new(4, 15, 15)?);
		assert_eq!(tiles[340].data, vec![4, 1]);
		Ok(())
	}

	#[test]
	fn empty_store() -> Result<()> {
		let dir = TempDir::new()?;
		let store = MBTilesStore::create(&dir.path().join("empty.mbtiles"))?;
		let mut source = MBTilesTileSource::new(store, None)?;
		assert_eq!(source.len_hint(), Some(0));
		assert!(source.next_tile()?.is_none());
		Ok(())
	}
}
