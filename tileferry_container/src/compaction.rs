//! Deduplicating compaction of an MBTiles `tiles` table.
//!
//! Many tile pyramids contain large numbers of byte-identical tiles (empty ocean, solid land).
//! Compaction rewrites `tiles` into
//!
//! - `images (tile_data, tile_id)`: every distinct blob exactly once, `tile_id` counting up from 1
//! - `map (zoom_level, tile_column, tile_row, tile_id)`: one row per original tile
//! - a view `tiles` joining both, so readers keep working unchanged.
//!
//! Blobs are identified by their BLAKE3 digest. Rows are processed in chunks (keyset-paginated by
//! `rowid`), each chunk in its own transaction. Digests of committed chunks are kept in the
//! `compaction_digests` table, written in the same transaction as the chunk's `images` and `map`
//! rows, so a failed chunk leaves no trace. In memory, a [`DedupIndex`] only caches the digests of
//! the current chunk, which bounds memory by the chunk size instead of the number of tiles.
//!
//! ```rust,no_run
//! use tileferry_container::{MBTilesStore, compaction::compact_mbtiles};
//! use std::path::Path;
//!
//! let store = MBTilesStore::open(Path::new("/tmp/world.mbtiles")).unwrap();
//! let summary = compact_mbtiles(&store, 256).unwrap();
//! println!("{} tiles, {} unique", summary.total, summary.unique);
//! ```

use crate::MBTilesStore;
use anyhow::{Context, Result, ensure};
use blake3::Hash;
use r2d2_sqlite::rusqlite::{OptionalExtension, Transaction, params};
use std::collections::HashMap;

/// Default number of rows per compaction chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Digest lookup for one chunk.
///
/// Digests of earlier chunks are looked up in `compaction_digests`. Only digests seen in the
/// current chunk are cached in memory, and the cache is dropped with the index at the end of the
/// chunk.
#[derive(Debug)]
pub struct DedupIndex {
	chunk: HashMap<Hash, i64>,
	next_id: i64,
}

impl DedupIndex {
	/// Starts the index of a new chunk inside `transaction`.
	pub fn begin(transaction: &Transaction<'_>) -> Result<DedupIndex> {
		let last_id: i64 = transaction.query_row(
			"SELECT COALESCE(MAX(tile_id), 0) FROM compaction_digests",
			[],
			|row| row.get(0),
		)?;
		Ok(DedupIndex {
			chunk: HashMap::new(),
			next_id: last_id + 1,
		})
	}

	/// Returns the blob id for `data` and whether it was assigned just now.
	///
	/// New ids are recorded in `compaction_digests` within `transaction`.
	pub fn resolve(&mut self, transaction: &Transaction<'_>, data: &[u8]) -> Result<(i64, bool)> {
		let digest = blake3::hash(data);
		if let Some(id) = self.chunk.get(&digest) {
			return Ok((*id, false));
		}

		let known: Option<i64> = transaction
			.prepare_cached("SELECT tile_id FROM compaction_digests WHERE digest = ?1")?
			.query_row([&digest.as_bytes()[..]], |row| row.get(0))
			.optional()?;
		if let Some(id) = known {
			self.chunk.insert(digest, id);
			return Ok((id, false));
		}

		let id = self.next_id;
		transaction
			.prepare_cached("INSERT INTO compaction_digests (tile_id, digest) VALUES (?1, ?2)")?
			.execute(params![id, &digest.as_bytes()[..]])?;
		self.next_id += 1;
		self.chunk.insert(digest, id);
		Ok((id, true))
	}

	/// Number of digests cached for the current chunk.
	pub fn len(&self) -> usize {
		self.chunk.len()
	}

	pub fn is_empty(&self) -> bool {
		self.chunk.is_empty()
	}
}

/// Counts of one compaction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionSummary {
	/// Tiles read from the original table.
	pub total: u64,
	/// Distinct blobs written to `images`.
	pub unique: u64,
	/// Tiles whose blob was already stored.
	pub duplicates: u64,
}

/// Compacts `store` in place: prepare, process all chunks, finalize.
///
/// # Errors
/// Fails if `tiles` is already a view, or on any storage error. A failing chunk is rolled back
/// before the error is returned; `tiles` is only replaced after every chunk has committed.
pub fn compact_mbtiles(store: &MBTilesStore, chunk_size: usize) -> Result<CompactionSummary> {
	ensure!(chunk_size > 0, "chunk size must be greater than zero");
	ensure!(
		!store.is_compacted()?,
		"{:?} is already compacted: 'tiles' is a view",
		store.path()
	);

	prepare(store)?;
	let summary = compact_chunks(store, chunk_size)?;
	finalize(store)?;

	log::info!(
		"compacted {} tiles into {} images ({} duplicates)",
		summary.total,
		summary.unique,
		summary.duplicates
	);
	Ok(summary)
}

/// Creates empty `images`, `map` and `compaction_digests` tables, discarding leftovers of an
/// interrupted run.
fn prepare(store: &MBTilesStore) -> Result<()> {
	log::debug!("Prepare database compression.");
	store
		.conn()?
		.execute_batch(
			"DROP TABLE IF EXISTS images;
			DROP TABLE IF EXISTS map;
			DROP TABLE IF EXISTS compaction_digests;
			CREATE TABLE compaction_digests (tile_id INTEGER PRIMARY KEY, digest BLOB NOT NULL UNIQUE);
			CREATE TABLE images (tile_data BLOB, tile_id INTEGER);
			CREATE TABLE map (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_id INTEGER);",
		)
		.context("preparing compaction tables")?;
	Ok(())
}

fn compact_chunks(store: &MBTilesStore, chunk_size: usize) -> Result<CompactionSummary> {
	log::debug!("Making database compression.");

	let total_tiles = store.count_tiles(None)?;
	let rounds = total_tiles.div_ceil(chunk_size as u64);
	log::debug!("{total_tiles} total tiles to fetch");

	let mut summary = CompactionSummary::default();
	let mut last_rowid = 0i64;
	let mut round = 0u64;

	let mut conn = store.conn()?;
	loop {
		log::debug!("{round} / {rounds} rounds done");

		// dropping an uncommitted transaction rolls the chunk back
		let transaction = conn.transaction()?;
		let chunk = compact_chunk(&transaction, last_rowid, chunk_size)
			.with_context(|| format!("compacting rows after rowid {last_rowid}"))?;
		transaction.commit().context("committing compaction chunk")?;

		let Some(chunk) = chunk else { break };
		last_rowid = chunk.last_rowid;
		summary.total += chunk.tiles;
		summary.unique += chunk.new_blobs;
		summary.duplicates += chunk.tiles - chunk.new_blobs;
		round += 1;
	}

	Ok(summary)
}

struct ChunkResult {
	last_rowid: i64,
	tiles: u64,
	new_blobs: u64,
}

/// Processes the rows following `after_rowid`. Returns `None` when there are none left.
fn compact_chunk(
	transaction: &Transaction<'_>,
	after_rowid: i64,
	chunk_size: usize,
) -> Result<Option<ChunkResult>> {
	let mut select = transaction.prepare_cached(
		"SELECT rowid, zoom_level, tile_column, tile_row, tile_data FROM tiles WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
	)?;
	let mut insert_image = transaction.prepare_cached("INSERT INTO images (tile_id, tile_data) VALUES (?1, ?2)")?;
	let mut insert_map = transaction
		.prepare_cached("INSERT INTO map (zoom_level, tile_column, tile_row, tile_id) VALUES (?1, ?2, ?3, ?4)")?;

	let mut index = DedupIndex::begin(transaction)?;
	let mut result = ChunkResult {
		last_rowid: after_rowid,
		tiles: 0,
		new_blobs: 0,
	};

	let mut rows = select.query(params![after_rowid, chunk_size as i64])?;
	while let Some(row) = rows.next()? {
		let rowid: i64 = row.get(0)?;
		let zoom: i64 = row.get(1)?;
		let column: i64 = row.get(2)?;
		let tile_row: i64 = row.get(3)?;
		let data: Vec<u8> = row.get(4)?;

		let (tile_id, is_new) = index.resolve(transaction, &data)?;
		if is_new {
			insert_image.execute(params![tile_id, data])?;
			result.new_blobs += 1;
		}
		insert_map.execute(params![zoom, column, tile_row, tile_id])?;

		result.last_rowid = rowid;
		result.tiles += 1;
	}

	Ok((result.tiles > 0).then_some(result))
}

/// Replaces the `tiles` table by a view over `map` and `images`, then vacuums.
fn finalize(store: &MBTilesStore) -> Result<()> {
	log::debug!("Finalizing database compression.");
	let mut conn = store.conn()?;

	let transaction = conn.transaction()?;
	transaction
		.execute_batch(
			"DROP TABLE tiles;
			DROP TABLE compaction_digests;
			CREATE VIEW tiles AS
				SELECT map.zoom_level AS zoom_level,
					map.tile_column AS tile_column,
					map.tile_row AS tile_row,
					images.tile_data AS tile_data
				FROM map JOIN images ON images.tile_id = map.tile_id;
			CREATE UNIQUE INDEX map_index ON map (zoom_level, tile_column, tile_row);
			CREATE UNIQUE INDEX images_id ON images (tile_id);",
		)
		.context("replacing 'tiles' by a view")?;
	transaction.commit()?;

	conn.execute_batch("VACUUM;")?;
	conn.execute_batch("ANALYZE;")?;
	Ok(())
}
