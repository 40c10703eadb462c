use super::{ExportOptions, LAYER_FILE, METADATA_FILE, layer_json, pretty_json};
use crate::{MBTilesStore, MBTilesTileSource, TileSource};
use anyhow::{Context, Result, ensure};
use std::{fs, path::Path};
use tileferry_core::progress::ProgressLog;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
	pub tiles: u64,
	pub grids: u64,
}

/// Writes every tile and grid of `mbtiles` into the new directory `dir`.
///
/// # Errors
/// Fails if `dir` already exists or on any I/O or storage error.
pub fn export_directory(mbtiles: &Path, dir: &Path, options: &ExportOptions) -> Result<ExportSummary> {
	log::debug!("Exporting MBTiles to disk");
	log::debug!("{mbtiles:?} --> {dir:?}");

	let store = MBTilesStore::open(mbtiles)?;
	ensure!(!dir.exists(), "directory {dir:?} already exists");
	fs::create_dir_all(dir).with_context(|| format!("creating directory {dir:?}"))?;

	let metadata = store.metadata()?;
	fs::write(dir.join(METADATA_FILE), pretty_json(&metadata)?)?;
	if let Some(layer) = layer_json(&metadata) {
		fs::write(dir.join(LAYER_FILE), layer)?;
	}

	let mut source = MBTilesTileSource::new(store.clone(), None)?;
	let progress = ProgressLog::new("tiles exported", source.len_hint());
	while let Some(tile) = source.next_tile()? {
		let path = dir.join(options.scheme.key_for(&tile.coord, &options.format));
		write_file(&path, &tile.data)?;
		progress.inc(1);
	}
	progress.finish();

	let mut grids = 0;
	let callback = options.callback.as_deref();
	store.for_each_grid(|grid| {
		let path = dir.join(options.scheme.grid_key_for(&grid.coord));
		write_file(&path, grid.to_text(callback).as_bytes())?;
		grids += 1;
		Ok(())
	})?;
	if grids > 0 {
		log::info!("{grids} grids exported");
	}

	Ok(ExportSummary {
		tiles: progress.position(),
		grids,
	})
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).with_context(|| format!("creating directory {parent:?}"))?;
	}
	fs::write(path, data).with_context(|| format!("writing {path:?}"))
}
