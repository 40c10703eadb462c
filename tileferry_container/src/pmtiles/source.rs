//! Sequential reading of a memory-mapped PMTiles v3 archive.
//!
//! The archive is walked depth-first in directory order: leaf directories are expanded when their
//! pointer is reached, and an entry with `run_length > 1` produces one tile per covered tile id,
//! all sharing the same bytes. Rows are converted from the archive's XYZ convention to TMS.

use super::{Compression, Entry, Header, parse_entries, tile_id_to_coord};
use crate::TileSource;
use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use memmap2::Mmap;
use serde_json::Value;
use std::{fmt::Debug, fs::File, io::Read, path::Path, vec::IntoIter};
use tileferry_core::Tile;

pub struct PMTilesTileSource {
	name: String,
	mmap: Mmap,
	header: Header,
	metadata: Value,
	max_zoom: Option<u8>,
	stack: Vec<IntoIter<Entry>>,
	run: Option<(Entry, u32)>,
	depth_limit: usize,
}

impl PMTilesTileSource {
	/// Opens a PMTiles archive for reading all tiles, optionally only up to `max_zoom`.
	pub fn open(path: &Path, max_zoom: Option<u8>) -> Result<PMTilesTileSource> {
		log::debug!("open {path:?}");
		let file = File::open(path).with_context(|| format!("opening PMTiles {path:?}"))?;

		// SAFETY: the archive is only read, and it is not modified while the tool runs.
		let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping PMTiles {path:?}"))?;

		let header = Header::deserialize(&mmap).with_context(|| format!("reading header of {path:?}"))?;
		log::trace!("Header: {header:?}");

		let mut source = PMTilesTileSource {
			name: path.to_string_lossy().into_owned(),
			mmap,
			header,
			metadata: Value::Null,
			max_zoom,
			stack: Vec::new(),
			run: None,
			depth_limit: 4,
		};

		let metadata = source.read_section(source.header.metadata.offset, source.header.metadata.length)?;
		source.metadata = if metadata.is_empty() {
			Value::Object(serde_json::Map::new())
		} else {
			serde_json::from_slice(&metadata).context("parsing PMTiles metadata")?
		};

		let root = source.read_section(source.header.root_dir.offset, source.header.root_dir.length)?;
		source.stack.push(parse_entries(&root)?.into_iter());

		Ok(source)
	}

	pub fn header(&self) -> &Header {
		&self.header
	}

	/// The archive's JSON metadata.
	pub fn metadata(&self) -> &Value {
		&self.metadata
	}

	/// Reads and decompresses a section addressed relative to the start of the file.
	fn read_section(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
		let bytes = self.slice(0, offset, length)?;
		match self.header.internal_compression {
			Compression::None => Ok(bytes.to_vec()),
			Compression::Gzip => {
				let mut data = Vec::new();
				GzDecoder::new(bytes)
					.read_to_end(&mut data)
					.context("decompressing PMTiles directory")?;
				Ok(data)
			}
			other => bail!("PMTiles internal compression {other:?} is not supported"),
		}
	}

	fn slice(&self, base: u64, offset: u64, length: u64) -> Result<&[u8]> {
		let bounds = super::ByteRange::new(offset, length).bounds(base)?;
		self
			.mmap
			.get(bounds.clone())
			.with_context(|| format!("range {bounds:?} is outside of {} ({} bytes)", self.name, self.mmap.len()))
	}

	fn tile_from_run(&self, entry: &Entry, index: u32) -> Result<Option<Tile>> {
		let Some(tile_id) = entry.tile_id.checked_add(u64::from(index)) else {
			bail!("tile id of run {entry:?} overflows in {}", self.name);
		};
		let coord = tile_id_to_coord(tile_id)?.flipped();
		if self.max_zoom.is_some_and(|max_zoom| coord.zoom > max_zoom) {
			return Ok(None);
		}
		let data = self.slice(self.header.tile_data.offset, entry.range.offset, entry.range.length)?;
		Ok(Some(Tile::new(coord, data)))
	}
}

impl TileSource for PMTilesTileSource {
	fn next_tile(&mut self) -> Result<Option<Tile>> {
		loop {
			if let Some((entry, index)) = self.run {
				if index < entry.run_length {
					self.run = Some((entry, index + 1));
					match self.tile_from_run(&entry, index)? {
						Some(tile) => return Ok(Some(tile)),
						None => continue,
					}
				}
				self.run = None;
			}

			let Some(entries) = self.stack.last_mut() else {
				return Ok(None);
			};
			let Some(entry) = entries.next() else {
				self.stack.pop();
				continue;
			};

			if entry.range.length == 0 {
				continue;
			}
			if entry.is_leaf_pointer() {
				if self.stack.len() >= self.depth_limit {
					bail!("PMTiles directories of {} are nested too deeply", self.name);
				}
				let Some(offset) = self.header.leaf_dirs.offset.checked_add(entry.range.offset) else {
					bail!("leaf directory offset of {entry:?} overflows in {}", self.name);
				};
				let leaf = self.read_section(offset, entry.range.length)?;
				self.stack.push(parse_entries(&leaf)?.into_iter());
			} else {
				self.run = Some((entry, 0));
			}
		}
	}

	fn len_hint(&self) -> Option<u64> {
		Some(self.header.addressed_tiles_count)
	}
}

impl Debug for PMTilesTileSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PMTilesTileSource")
			.field("name", &self.name)
			.field("header", &self.header)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::PMTilesBuilder;
	use assert_fs::TempDir;
	use tileferry_core::TileCoord;

	fn drain(source: &mut PMTilesTileSource) -> Result<Vec<Tile>> {
		let mut tiles = Vec::new();
		while let Some(tile) = source.next_tile()? {
			tiles.push(tile);
		}
		Ok(tiles)
	}

	fn sample_builder() -> Result<PMTilesBuilder> {
		let mut builder = PMTilesBuilder::new();
		builder.metadata(serde_json::json!({"name": "sample", "format": "pbf"}));
		// tiles are given in XYZ
		builder.add_tile(TileCoord::new(0, 0, 0)?, b"world".to_vec());
		builder.add_tile(TileCoord::new(1, 0, 0)?, b"north-west".to_vec());
		builder.add_tile(TileCoord::new(1, 1, 1)?, b"south-east".to_vec());
		builder.add_tile(TileCoord::new(2, 3, 0)?, b"corner".to_vec());
		Ok(builder)
	}

	#[test]
	fn reads_all_tiles_with_tms_rows() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("sample.pmtiles");
		sample_builder()?.write(&path)?;

		let mut source = PMTilesTileSource::open(&path, None)?;
		assert_eq!(source.len_hint(), Some(4));
		assert_eq!(source.metadata()["name"], "sample");
		assert_eq!(source.header().addressed_tiles_count, 4);

		let tiles = drain(&mut source)?;
		let found: Vec<(TileCoord, &[u8])> = tiles.iter().map(|t| (t.coord, t.data.as_slice())).collect();
		assert_eq!(
			found,
			vec![
				(TileCoord::new(0, 0, 0)?, &b"world"[..]),
				(TileCoord::new(1, 0, 1)?, &b"north-west"[..]),
				(TileCoord::new(1, 1, 0)?, &b"south-east"[..]),
				(TileCoord::new(2, 3, 3)?, &b"corner"[..]),
			]
		);
		assert!(source.next_tile()?.is_none());
		Ok(())
	}

	#[test]
	fn expands_runs_and_leaf_directories() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("runs.pmtiles");

		let mut builder = PMTilesBuilder::new();
		for column in 0..4 {
			for row in 0..4 {
				builder.add_tile(TileCoord::new(2, column, row)?, b"same".to_vec());
			}
		}
		builder.add_tile(TileCoord::new(3, 0, 0)?, b"other".to_vec());
		builder.leaf_size(1).write(&path)?;

		let mut source = PMTilesTileSource::open(&path, None)?;
		assert!(source.header().leaf_dirs.length > 0);
		let tiles = drain(&mut source)?;
		assert_eq!(tiles.len(), 17);
		assert_eq!(tiles.iter().filter(|t| t.data == b"same").count(), 16);
		assert_eq!(tiles[16].coord, TileCoord::new(3, 0, 7)?);
		Ok(())
	}

	#[test]
	fn max_zoom_skips_deeper_tiles() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("sample.pmtiles");
		sample_builder()?.write(&path)?;

		let tiles = drain(&mut PMTilesTileSource::open(&path, Some(1))?)?;
		assert_eq!(tiles.len(), 3);
		assert!(tiles.iter().all(|t| t.coord.zoom <= 1));
		Ok(())
	}

	#[test]
	fn uncompressed_directories() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("plain.pmtiles");
		sample_builder()?.internal_compression(Compression::None).write(&path)?;
		assert_eq!(drain(&mut PMTilesTileSource::open(&path, None)?)?.len(), 4);
		Ok(())
	}

	#[test]
	fn rejects_broken_archives() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("broken.pmtiles");
		std::fs::write(&path, b"PMTiles\x02 not really")?;
		assert!(PMTilesTileSource::open(&path, None).is_err());
		assert!(PMTilesTileSource::open(&dir.path().join("missing.pmtiles"), None).is_err());
		Ok(())
	}

	#[test]
	fn overflowing_leaf_offset_is_an_error() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("overflow.pmtiles");
		let mut builder = PMTilesBuilder::new();
		builder.add_tile(TileCoord::new(0, 0, 0)?, b"world".to_vec());
		builder.root_entries(vec![Entry::new(0, u64::MAX - 1, 1, 0)]).write(&path)?;

		let mut source = PMTilesTileSource::open(&path, None)?;
		let error = source.next_tile().unwrap_err();
		assert!(error.to_string().contains("overflows"), "{error}");
		Ok(())
	}

	#[test]
	fn tile_ids_beyond_zoom_31_are_an_error() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("huge_id.pmtiles");
		let mut builder = PMTilesBuilder::new();
		builder.add_tile(TileCoord::new(0, 0, 0)?, b"world".to_vec());
		builder.root_entries(vec![Entry::new(u64::MAX, 0, 5, 2)]).write(&path)?;

		let mut source = PMTilesTileSource::open(&path, None)?;
		assert!(source.next_tile().is_err());
		Ok(())
	}
}
