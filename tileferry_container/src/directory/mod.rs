//! Conversion between MBTiles stores and directory trees.
//!
//! ## Layout
//! ```text
//! <root>/metadata.json          all metadata entries
//! <root>/layer.json             {"formatter": ...}, only if the metadata has a formatter
//! <root>/<z>/<x>/<y>.<format>   tiles, laid out by the chosen TileScheme
//! <root>/<z>/<x>/<y>.grid.json  UTFGrids, optionally wrapped in a JSONP callback
//! ```
//!
//! Import understands every [`TileScheme`] except `wms`; export writes `tms`, `xyz` and `wms`
//! layouts.

mod export;
mod import;

pub use export::{ExportSummary, export_directory};
pub use import::{ImportSummary, import_directory};

use crate::MBTilesStore;
use anyhow::Result;
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tileferry_core::TileScheme;

pub const METADATA_FILE: &str = "metadata.json";
pub const LAYER_FILE: &str = "layer.json";

/// Settings for [`import_directory`].
#[derive(Clone, Debug)]
pub struct ImportOptions {
	pub scheme: TileScheme,
	/// Extension of tile files; other files are ignored.
	pub format: String,
	/// Deduplicate the imported tiles.
	pub compact: bool,
}

impl Default for ImportOptions {
	fn default() -> Self {
		ImportOptions {
			scheme: TileScheme::Tms,
			format: String::from("png"),
			compact: false,
		}
	}
}

/// Settings for [`export_directory`].
#[derive(Clone, Debug)]
pub struct ExportOptions {
	pub scheme: TileScheme,
	pub format: String,
	/// JSONP callback wrapped around exported UTFGrids.
	pub callback: Option<String>,
}

impl Default for ExportOptions {
	fn default() -> Self {
		ExportOptions {
			scheme: TileScheme::Tms,
			format: String::from("png"),
			callback: None,
		}
	}
}

/// The metadata of an MBTiles file.
pub fn mbtiles_metadata(path: &Path) -> Result<BTreeMap<String, String>> {
	MBTilesStore::open(path)?.metadata()
}

/// Content of `layer.json`, if the metadata has a `formatter`.
pub fn layer_json(metadata: &BTreeMap<String, String>) -> Option<String> {
	let formatter = metadata.get("formatter").filter(|f| !f.is_empty())?;
	Some(serde_json::json!({ "formatter": formatter }).to_string())
}

/// JSON indented by four spaces, as written to `metadata.json`.
pub fn pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
	let mut buffer = Vec::new();
	let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
	let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
	value.serialize(&mut serializer)?;
	Ok(buffer)
}
