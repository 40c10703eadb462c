//! UTFGrid interactivity tiles.
//!
//! A grid file is a JSON object `{"grid": [...], "keys": [...], "data": {...}}`, optionally
//! wrapped in a JSONP callback (`name({...});`). MBTiles stores the object without `data` in
//! `grids` and every referenced `data` entry as its own `grid_data` row.

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::LazyLock};
use tileferry_core::TileCoord;

static JSONP: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[\w\s=+,./-]+\((\{(?s:.)*\})\);?").expect("JSONP pattern is valid")
});

#[derive(Clone, Debug, PartialEq)]
pub struct UtfGrid {
	pub coord: TileCoord,
	/// The grid object without its `data` member.
	pub body: Map<String, Value>,
	pub data: BTreeMap<String, Value>,
}

impl UtfGrid {
	/// Parses the content of a `.grid.json` file.
	///
	/// Only `data` entries named by a non-empty entry of `keys` are kept.
	pub fn parse(coord: TileCoord, text: &str) -> Result<UtfGrid> {
		let json = match JSONP.captures(text) {
			Some(captures) => captures.get(1).map_or(text, |m| m.as_str()),
			None => text,
		};

		let value: Value = serde_json::from_str(json).with_context(|| format!("parsing grid {coord:?}"))?;
		let Value::Object(mut body) = value else {
			anyhow::bail!("grid {coord:?} is not a JSON object");
		};

		let mut all_data = match body.remove("data") {
			Some(Value::Object(data)) => data,
			_ => Map::new(),
		};

		let mut data = BTreeMap::new();
		let keys = body.get("keys").and_then(Value::as_array).cloned().unwrap_or_default();
		for key in keys.iter().filter_map(Value::as_str).filter(|key| !key.is_empty()) {
			match all_data.remove(key) {
				Some(value) => {
					data.insert(key.to_string(), value);
				}
				None => log::debug!("grid {coord:?} has no data for key '{key}'"),
			}
		}

		Ok(UtfGrid { coord, body, data })
	}

	/// The complete grid object with `data` joined back in.
	pub fn to_json(&self) -> Value {
		let mut object = self.body.clone();
		let data: Map<String, Value> = self.data.clone().into_iter().collect();
		object.insert("data".to_string(), Value::Object(data));
		Value::Object(object)
	}

	/// File content for export: wrapped as `callback(...);` unless the callback is absent,
	/// empty, `false` or `null`.
	pub fn to_text(&self, callback: Option<&str>) -> String {
		let json = self.to_json().to_string();
		match callback {
			None | Some("" | "false" | "null") => json,
			Some(callback) => format!("{callback}({json});"),
		}
	}
}
