//! Fixture builders for tests in this workspace.

use crate::pmtiles::{ByteRange, Compression, Entry, Header, coord_to_tile_id, serialize_entries};
use anyhow::Result;
use flate2::write::GzEncoder;
use serde_json::Value;
use std::{
	collections::{BTreeMap, HashMap},
	io::Write,
	path::Path,
};
use tileferry_core::TileCoord;

/// Writes small PMTiles v3 archives.
///
/// Tiles are addressed in XYZ, like in the archive. Consecutive tile ids with identical content
/// are stored as one run, and identical content is stored once.
#[derive(Debug)]
pub struct PMTilesBuilder {
	tiles: BTreeMap<u64, (TileCoord, Vec<u8>)>,
	metadata: Value,
	leaf_size: Option<usize>,
	root_entries: Option<Vec<Entry>>,
	internal_compression: Compression,
}

impl Default for PMTilesBuilder {
	fn default() -> Self {
		PMTilesBuilder::new()
	}
}

impl PMTilesBuilder {
	pub fn new() -> PMTilesBuilder {
		PMTilesBuilder {
			tiles: BTreeMap::new(),
			metadata: Value::Object(serde_json::Map::new()),
			leaf_size: None,
			root_entries: None,
			internal_compression: Compression::Gzip,
		}
	}

	pub fn metadata(&mut self, metadata: Value) -> &mut Self {
		self.metadata = metadata;
		self
	}

	pub fn add_tile(&mut self, coord: TileCoord, data: Vec<u8>) -> &mut Self {
		let tile_id = coord_to_tile_id(&coord).expect("valid tile coordinate");
		self.tiles.insert(tile_id, (coord, data));
		self
	}

	/// Moves all entries into leaf directories of at most `size` entries each.
	pub fn leaf_size(&mut self, size: usize) -> &mut Self {
		self.leaf_size = Some(size.max(1));
		self
	}

	/// Writes `entries` as the root directory instead of the entries of the added tiles. Tile data
	/// is still written, so broken archives can be assembled.
	pub fn root_entries(&mut self, entries: Vec<Entry>) -> &mut Self {
		self.root_entries = Some(entries);
		self
	}

	/// `Compression::None` or `Compression::Gzip`.
	pub fn internal_compression(&mut self, compression: Compression) -> &mut Self {
		self.internal_compression = compression;
		self
	}

	fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
		Ok(match self.internal_compression {
			Compression::Gzip => {
				let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
				encoder.write_all(data)?;
				encoder.finish()?
			}
			_ => data.to_vec(),
		})
	}

	pub fn write(&self, path: &Path) -> Result<()> {
		let mut tile_data: Vec<u8> = Vec::new();
		let mut offsets: HashMap<&[u8], ByteRange> = HashMap::new();
		let mut entries: Vec<Entry> = Vec::new();

		for (tile_id, (_, data)) in &self.tiles {
			let range = *offsets.entry(data.as_slice()).or_insert_with(|| {
				let range = ByteRange::new(tile_data.len() as u64, data.len() as u64);
				tile_data.extend_from_slice(data);
				range
			});
			match entries.last_mut() {
				Some(last) if last.range == range && last.tile_id + u64::from(last.run_length) == *tile_id => {
					last.run_length += 1;
				}
				_ => entries.push(Entry {
					tile_id: *tile_id,
					range,
					run_length: 1,
				}),
			}
		}

		let mut leaves: Vec<u8> = Vec::new();
		let root = match (&self.root_entries, self.leaf_size) {
			(Some(root_entries), _) => self.compress(&serialize_entries(root_entries)?)?,
			(None, None) => self.compress(&serialize_entries(&entries)?)?,
			(None, Some(size)) => {
				let mut root_entries = Vec::new();
				for chunk in entries.chunks(size) {
					let leaf = self.compress(&serialize_entries(chunk)?)?;
					root_entries.push(Entry::new(chunk[0].tile_id, leaves.len() as u64, leaf.len() as u64, 0));
					leaves.extend_from_slice(&leaf);
				}
				self.compress(&serialize_entries(&root_entries)?)?
			}
		};
		let metadata = self.compress(serde_json::to_string(&self.metadata)?.as_bytes())?;

		let root_dir = ByteRange::new(Header::LEN as u64, root.len() as u64);
		let metadata_range = ByteRange::new(root_dir.offset + root_dir.length, metadata.len() as u64);
		let leaf_dirs = ByteRange::new(metadata_range.offset + metadata_range.length, leaves.len() as u64);
		let tile_range = ByteRange::new(leaf_dirs.offset + leaf_dirs.length, tile_data.len() as u64);

		let zooms = self.tiles.values().map(|(coord, _)| coord.zoom);
		let header = Header {
			root_dir,
			metadata: metadata_range,
			leaf_dirs,
			tile_data: tile_range,
			addressed_tiles_count: self.tiles.len() as u64,
			tile_entries_count: entries.len() as u64,
			tile_contents_count: offsets.len() as u64,
			clustered: true,
			internal_compression: self.internal_compression,
			tile_compression: Compression::None,
			tile_type: 0,
			min_zoom: zooms.clone().min().unwrap_or(0),
			max_zoom: zooms.max().unwrap_or(0),
			min_lon_e7: -1_800_000_000,
			min_lat_e7: -850_511_287,
			max_lon_e7: 1_800_000_000,
			max_lat_e7: 850_511_287,
			center_zoom: 0,
			center_lon_e7: 0,
			center_lat_e7: 0,
		};

		let mut file = std::fs::File::create(path)?;
		file.write_all(&header.serialize()?)?;
		file.write_all(&root)?;
		file.write_all(&metadata)?;
		file.write_all(&leaves)?;
		file.write_all(&tile_data)?;
		Ok(())
	}
}
