//! Read and write MBTiles (SQLite) stores.
//!
//! An [`MBTilesStore`] owns a single-connection `r2d2` pool. Every connection is opened with
//! `synchronous=0`, `locking_mode=EXCLUSIVE` and `journal_mode=DELETE`, so a store holds the file
//! for itself until it is dropped.
//!
//! ## Schema
//! - `tiles (zoom_level, tile_column, tile_row, tile_data)`: rows in TMS order; after compaction
//!   this is a view over `map` and `images` (see [`crate::compaction`])
//! - `metadata (name, value)`
//! - `grids (zoom_level, tile_column, tile_row, grid)`: zlib-compressed UTFGrid JSON without `data`
//! - `grid_data (zoom_level, tile_column, tile_row, key_name, key_json)`
//!
//! ## Example
//! ```rust,no_run
//! use tileferry_container::MBTilesStore;
//! use tileferry_core::{Tile, TileCoord};
//! use anyhow::Result;
//! use std::path::Path;
//!
//! fn main() -> Result<()> {
//! 	let store = MBTilesStore::create(Path::new("/tmp/world.mbtiles"))?;
//! 	store.set_metadata("format", "png")?;
//! 	store.insert_tiles(&[Tile::new(TileCoord::new(0, 0, 0)?, b"tile".to_vec())])?;
//! 	store.optimize()?;
//! 	Ok(())
//! }
//! ```

use super::UtfGrid;
use anyhow::{Context, Result, ensure};
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{Connection, OptionalExtension, params, types::Value},
};
use std::{
	collections::BTreeMap,
	fmt::Debug,
	io::{Read, Write},
	path::{Path, PathBuf},
};
use tileferry_core::{Tile, TileCoord};

/// An open MBTiles file.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct MBTilesStore {
	path: PathBuf,
	pool: Pool<SqliteConnectionManager>,
}

impl MBTilesStore {
	/// Create a new MBTiles file with the full schema.
	///
	/// # Errors
	/// Returns an error if `path` already exists or the schema cannot be created.
	pub fn create(path: &Path) -> Result<MBTilesStore> {
		log::debug!("create {path:?}");
		ensure!(!path.exists(), "file {path:?} already exists");

		let store = MBTilesStore::connect(path).with_context(|| format!("creating MBTiles at {path:?}"))?;
		store
			.conn()?
			.execute_batch(
				"CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
				CREATE TABLE metadata (name TEXT, value TEXT);
				CREATE TABLE grids (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, grid BLOB);
				CREATE TABLE grid_data (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, key_name TEXT, key_json TEXT);
				CREATE UNIQUE INDEX name ON metadata (name);
				CREATE UNIQUE INDEX tile_index ON tiles (zoom_level, tile_column, tile_row);",
			)
			.context("creating MBTiles schema")?;
		Ok(store)
	}

	/// Open an existing MBTiles file.
	///
	/// # Errors
	/// Returns an error if the file does not exist or cannot be opened.
	pub fn open(path: &Path) -> Result<MBTilesStore> {
		log::debug!("open {path:?}");
		ensure!(path.exists(), "file {path:?} does not exist");
		ensure!(path.is_file(), "{path:?} is not a file");
		MBTilesStore::connect(path).with_context(|| format!("opening MBTiles at {path:?}"))
	}

	fn connect(path: &Path) -> Result<MBTilesStore> {
		let manager = SqliteConnectionManager::file(path).with_init(|conn| {
			conn.pragma_update(None, "synchronous", 0)?;
			conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| row.get::<_, String>(0))?;
			conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get::<_, String>(0))?;
			Ok(())
		});
		let pool = Pool::builder().max_size(1).build(manager)?;
		Ok(MBTilesStore {
			path: path.to_path_buf(),
			pool,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
		Ok(self.pool.get()?)
	}

	/// All `metadata` rows. Non-text values are rendered as text.
	pub fn metadata(&self) -> Result<BTreeMap<String, String>> {
		let conn = self.conn()?;
		let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
		let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Value>(1)?)))?;

		let mut metadata = BTreeMap::new();
		for row in rows {
			let (name, value) = row?;
			metadata.insert(name, value_to_string(value));
		}
		Ok(metadata)
	}

	/// Insert or replace a `metadata` entry.
	pub fn set_metadata(&self, name: &str, value: &str) -> Result<()> {
		self
			.conn()?
			.execute(
				"INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
				params![name, value],
			)
			.with_context(|| format!("setting metadata key '{name}'"))?;
		Ok(())
	}

	/// Number of tiles, optionally only those with `zoom_level <= max_zoom`.
	pub fn count_tiles(&self, max_zoom: Option<u8>) -> Result<u64> {
		let count: i64 = self.conn()?.query_row(
			"SELECT COUNT(zoom_level) FROM tiles WHERE zoom_level <= ?1",
			[i64::from(max_zoom.unwrap_or(u8::MAX))],
			|row| row.get(0),
		)?;
		Ok(count as u64)
	}

	/// Insert tiles within a single transaction.
	pub fn insert_tiles(&self, tiles: &[Tile]) -> Result<()> {
		let mut conn = self.conn()?;
		let transaction = conn.transaction()?;
		{
			let mut stmt = transaction
				.prepare_cached("INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)")?;
			for tile in tiles {
				let TileCoord { zoom, column, row } = tile.coord;
				stmt
					.execute(params![zoom, column, row, tile.data])
					.with_context(|| format!("inserting tile {:?}", tile.coord))?;
			}
		}
		transaction.commit()?;
		Ok(())
	}

	/// Whether `tiles` is the view created by compaction.
	pub fn is_compacted(&self) -> Result<bool> {
		let kind: Option<String> = self
			.conn()?
			.query_row("SELECT type FROM sqlite_master WHERE name = 'tiles'", [], |row| row.get(0))
			.optional()?;
		Ok(kind.as_deref() == Some("view"))
	}

	/// Number of UTFGrids. Stores without a `grids` table have none.
	pub fn count_grids(&self) -> Result<u64> {
		let conn = self.conn()?;
		if !has_table(&conn, "grids")? {
			return Ok(0);
		}
		let count: i64 = conn.query_row("SELECT COUNT(zoom_level) FROM grids", [], |row| row.get(0))?;
		Ok(count as u64)
	}

	/// Store a UTFGrid: the body compressed into `grids`, each data entry into `grid_data`.
	pub fn insert_grid(&self, grid: &UtfGrid) -> Result<()> {
		let TileCoord { zoom, column, row } = grid.coord;

		let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(serde_json::to_string(&grid.body)?.as_bytes())?;
		let compressed = encoder.finish()?;

		let mut conn = self.conn()?;
		let transaction = conn.transaction()?;
		transaction.execute(
			"INSERT INTO grids (zoom_level, tile_column, tile_row, grid) VALUES (?1, ?2, ?3, ?4)",
			params![zoom, column, row, compressed],
		)?;
		for (key_name, key_json) in &grid.data {
			transaction.execute(
				"INSERT INTO grid_data (zoom_level, tile_column, tile_row, key_name, key_json) VALUES (?1, ?2, ?3, ?4, ?5)",
				params![zoom, column, row, key_name, serde_json::to_string(key_json)?],
			)?;
		}
		transaction.commit()?;
		Ok(())
	}

	/// Calls `callback` for every stored UTFGrid, with its `data` joined back in.
	pub fn for_each_grid(&self, mut callback: impl FnMut(UtfGrid) -> Result<()>) -> Result<()> {
		let conn = self.conn()?;
		if !has_table(&conn, "grids")? {
			return Ok(());
		}

		let mut grids = conn.prepare("SELECT zoom_level, tile_column, tile_row, grid FROM grids")?;
		let mut keys = conn.prepare(
			"SELECT key_name, key_json FROM grid_data WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
		)?;

		let mut rows = grids.query([])?;
		while let Some(row) = rows.next()? {
			let coord = coord_from_row(row.get(0)?, row.get(1)?, row.get(2)?)?;
			let compressed: Vec<u8> = row.get(3)?;

			let mut text = String::new();
			ZlibDecoder::new(compressed.as_slice())
				.read_to_string(&mut text)
				.with_context(|| format!("decompressing grid {coord:?}"))?;
			let body: serde_json::Value =
				serde_json::from_str(&text).with_context(|| format!("parsing grid {coord:?}"))?;
			let serde_json::Value::Object(body) = body else {
				anyhow::bail!("grid {coord:?} is not a JSON object");
			};

			let mut data = BTreeMap::new();
			let mut key_rows = keys.query(params![coord.zoom, coord.column, coord.row])?;
			while let Some(key_row) = key_rows.next()? {
				let key_name: String = key_row.get(0)?;
				let key_json: String = key_row.get(1)?;
				data.insert(key_name, serde_json::from_str(&key_json)?);
			}

			callback(UtfGrid { coord, body, data })?;
		}
		Ok(())
	}

	/// `ANALYZE` and `VACUUM` the database.
	pub fn optimize(&self) -> Result<()> {
		let conn = self.conn()?;
		log::debug!("analyzing db");
		conn.execute_batch("ANALYZE;")?;
		log::debug!("cleaning db");
		conn.execute_batch("VACUUM;")?;
		Ok(())
	}
}

impl Debug for MBTilesStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesStore").field("path", &self.path).finish()
	}
}

pub(crate) fn has_table(conn: &Connection, name: &str) -> Result<bool> {
	let count: i64 = conn.query_row(
		"SELECT COUNT(*) FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
		[name],
		|row| row.get(0),
	)?;
	Ok(count > 0)
}

pub(crate) fn coord_from_row(zoom: i64, column: i64, row: i64) -> Result<TileCoord> {
	let zoom = u8::try_from(zoom).with_context(|| format!("invalid zoom_level {zoom}"))?;
	let column = u32::try_from(column).with_context(|| format!("invalid tile_column {column}"))?;
	let row = u32::try_from(row).with_context(|| format!("invalid tile_row {row}"))?;
	TileCoord::new(zoom, column, row)
}

fn value_to_string(value: Value) -> String {
	match value {
		Value::Null => String::new(),
		Value::Integer(v) => v.to_string(),
		Value::Real(v) => v.to_string(),
		Value::Text(v) => v,
		Value::Blob(v) => String::from_utf8_lossy(&v).into_owned(),
	}
}
