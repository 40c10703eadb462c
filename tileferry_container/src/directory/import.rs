use super::{ImportOptions, METADATA_FILE};
use crate::{
	MBTilesStore, UtfGrid,
	compaction::{CompactionSummary, DEFAULT_CHUNK_SIZE, compact_mbtiles},
};
use anyhow::{Context, Result, ensure};
use serde_json::Value;
use std::{
	fs,
	path::{Path, PathBuf},
};
use tileferry_core::{Tile, progress::ProgressLog};

/// Tiles are buffered and inserted in transactions of this many rows.
const INSERT_BATCH: usize = 256;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
	pub tiles: u64,
	pub grids: u64,
	pub compaction: Option<CompactionSummary>,
}

/// Imports a directory tree into a new MBTiles file at `mbtiles`.
///
/// # Errors
/// Fails if `mbtiles` already exists, if a directory or file name does not fit the scheme, or
/// if the scheme is `wms`.
pub fn import_directory(dir: &Path, mbtiles: &Path, options: &ImportOptions) -> Result<ImportSummary> {
	log::info!("Importing disk to MBTiles");
	log::debug!("{dir:?} --> {mbtiles:?}");
	ensure!(dir.is_dir(), "{dir:?} is not a directory");

	let store = MBTilesStore::create(mbtiles)?;
	import_metadata(&store, &dir.join(METADATA_FILE))?;

	let mut importer = Importer {
		store: &store,
		options,
		batch: Vec::with_capacity(INSERT_BATCH),
		progress: ProgressLog::new("tiles inserted", None),
		grids: 0,
	};

	for (zoom_name, zoom_path) in sub_dirs(dir)? {
		let zoom = options.scheme.parse_zoom_dir(&zoom_name)?;
		for (dir_name, dir_path) in sub_dirs(&zoom_path)? {
			for file in sorted_entries(&dir_path)? {
				importer.import_file(zoom, &dir_name, &file)?;
			}
		}
	}
	importer.flush()?;

	let summary = ImportSummary {
		tiles: importer.progress.position(),
		grids: importer.grids,
		compaction: None,
	};
	importer.progress.finish();

	let compaction = if options.compact {
		Some(compact_mbtiles(&store, DEFAULT_CHUNK_SIZE)?)
	} else {
		None
	};
	store.optimize()?;

	Ok(ImportSummary { compaction, ..summary })
}

struct Importer<'a> {
	store: &'a MBTilesStore,
	options: &'a ImportOptions,
	batch: Vec<Tile>,
	progress: ProgressLog,
	grids: u64,
}

impl Importer<'_> {
	fn import_file(&mut self, zoom: u8, dir_name: &str, path: &Path) -> Result<()> {
		let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
			log::warn!("ignoring {path:?}: file name is not valid UTF-8");
			return Ok(());
		};
		if file_name == ".DS_Store" {
			log::warn!("Your OS is MacOS, and the .DS_Store file will be ignored.");
			return Ok(());
		}
		let Some((stem, extension)) = file_name.split_once('.') else {
			log::debug!("ignoring {path:?}: no extension");
			return Ok(());
		};

		if extension == self.options.format {
			let coord = self.options.scheme.parse_tile_path(zoom, dir_name, stem)?;
			log::debug!("Read tile from Zoom (z): {}\tCol (x): {}\tRow (y): {}", coord.zoom, coord.column, coord.row);
			let data = fs::read(path).with_context(|| format!("reading tile {path:?}"))?;
			self.batch.push(Tile::new(coord, data));
			if self.batch.len() >= INSERT_BATCH {
				self.flush()?;
			}
			self.progress.inc(1);
		} else if extension == "grid.json" {
			let coord = self.options.scheme.parse_tile_path(zoom, dir_name, stem)?;
			log::debug!("Read grid from Zoom (z): {}\tCol (x): {}\tRow (y): {}", coord.zoom, coord.column, coord.row);
			let text = fs::read_to_string(path).with_context(|| format!("reading grid {path:?}"))?;
			self.store.insert_grid(&UtfGrid::parse(coord, &text)?)?;
			self.grids += 1;
		} else {
			log::debug!("ignoring {path:?}: extension is not {}", self.options.format);
		}
		Ok(())
	}

	fn flush(&mut self) -> Result<()> {
		if !self.batch.is_empty() {
			self.store.insert_tiles(&self.batch)?;
			self.batch.clear();
		}
		Ok(())
	}
}

/// Copies every entry of `metadata.json` into the store. Strings are stored as they are, other
/// values as JSON text.
fn import_metadata(store: &MBTilesStore, path: &Path) -> Result<()> {
	if !path.exists() {
		log::warn!("metadata.json not found");
		return Ok(());
	}

	let text = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
	let json: Value = serde_json::from_str(&text).with_context(|| format!("parsing {path:?}"))?;
	let Value::Object(entries) = json else {
		anyhow::bail!("{path:?} must contain a JSON object");
	};
	for (name, value) in entries {
		match value {
			Value::String(value) => store.set_metadata(&name, &value)?,
			other => store.set_metadata(&name, &other.to_string())?,
		}
	}
	log::info!("metadata from metadata.json restored");
	Ok(())
}

/// Sub-directories of `dir` as `(name, path)`, sorted by name. Hidden directories are skipped.
fn sub_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
	let mut dirs = Vec::new();
	for path in sorted_entries(dir)? {
		if !path.is_dir() {
			continue;
		}
		let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
			log::warn!("ignoring {path:?}: name is not valid UTF-8");
			continue;
		};
		if name.starts_with('.') {
			log::debug!("ignoring hidden directory {path:?}");
			continue;
		}
		dirs.push((name.to_string(), path.clone()));
	}
	Ok(dirs)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
	let mut paths = fs::read_dir(dir)
		.with_context(|| format!("reading directory {dir:?}"))?
		.map(|entry| entry.map(|e| e.path()))
		.collect::<Result<Vec<_>, _>>()?;
	paths.sort();
	Ok(paths)
}
