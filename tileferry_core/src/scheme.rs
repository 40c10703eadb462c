//! Tile addressing schemes: how a tile coordinate becomes a path or object key, and how a
//! legacy directory layout is read back into coordinates.
//!
//! | Scheme | Key / path layout                                      | Row convention          |
//! |--------|--------------------------------------------------------|-------------------------|
//! | `tms`  | `{z}/{x}/{y}.{ext}`                                    | bottom-up (canonical)   |
//! | `xyz`  | `{z}/{x}/{y}.{ext}`                                    | top-down (flipped)      |
//! | `wms`  | `{z:02}/{x/1e6:03}/{x/1e3%1e3:03}/{x%1e3:03}/{y/1e6:03}/{y/1e3%1e3:03}/{y%1e3:03}.{ext}` | bottom-up |
//! | `ags`  | `L{z}/R{hex y}/C{hex x}.{ext}` (import only)           | top-down                |
//! | `gwc`  | `…{z:02}/…/{x}_{y}.{ext}` (import only)                | bottom-up               |
//! | `zyx`  | `{z}/{y}/{x}.{ext}` (import only)                      | top-down                |
//!
//! All functions here are pure and may be called from any number of threads.
//!
//! ```
//! use tileferry_core::{TileCoord, TileScheme};
//!
//! let coord = TileCoord::new(3, 1, 2).unwrap();
//! assert_eq!(TileScheme::Tms.key_for(&coord, "png"), "3/1/2.png");
//! assert_eq!(TileScheme::Xyz.key_for(&coord, "png"), "3/1/5.png");
//! ```

use crate::TileCoord;
use anyhow::{Context, Result, bail, ensure};
#[cfg(feature = "cli")]
use clap::ValueEnum;
use std::{fmt::Display, str::FromStr};

/// Mirrors a row index at the horizontal center of the pyramid: `(2^zoom - 1) - y`.
///
/// Applying it twice returns the original value.
///
/// # Panics
/// If `zoom > 31` or `y >= 2^zoom`. Every [`TileCoord`] satisfies both; use [`flip_y_checked`]
/// for unvalidated input.
pub fn flip_y(zoom: u8, y: u32) -> u32 {
	assert!(zoom <= 31, "zoom ({zoom}) must be <= 31");
	let max = 1u32 << zoom;
	assert!(y < max, "row ({y}) out of bounds for zoom {zoom}");
	(max - 1) - y
}

/// Like [`flip_y`], returning an error instead of panicking on out-of-range input.
pub fn flip_y_checked(zoom: u8, y: u32) -> Result<u32> {
	ensure!(zoom <= 31, "zoom ({zoom}) must be <= 31");
	ensure!(y < (1u32 << zoom), "row ({y}) out of bounds for zoom {zoom}");
	Ok(flip_y(zoom, y))
}

/// Joins a key prefix and a relative key with `/`. An empty prefix is omitted.
pub fn join_key(prefix: &str, key: &str) -> String {
	let prefix = prefix.trim_end_matches('/');
	if prefix.is_empty() {
		key.to_string()
	} else {
		format!("{prefix}/{key}")
	}
}

/// Addressing scheme of a directory layout or of remote object keys.
#[cfg_attr(feature = "cli", derive(ValueEnum))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileScheme {
	#[default]
	Tms,
	Xyz,
	Wms,
	Ags,
	Gwc,
	Zyx,
}

impl TileScheme {
	pub fn as_str(&self) -> &'static str {
		match self {
			TileScheme::Tms => "tms",
			TileScheme::Xyz => "xyz",
			TileScheme::Wms => "wms",
			TileScheme::Ags => "ags",
			TileScheme::Gwc => "gwc",
			TileScheme::Zyx => "zyx",
		}
	}

	/// Builds the relative key (or path) of a tile under this scheme.
	///
	/// `coord` is in the canonical row convention. `ags`, `gwc` and `zyx` only exist on the
	/// import side and are formatted like `tms`.
	pub fn key_for(&self, coord: &TileCoord, extension: &str) -> String {
		let TileCoord { zoom, column, row } = *coord;
		match self {
			TileScheme::Xyz => format!("{zoom}/{column}/{}.{extension}", flip_y(zoom, row)),
			TileScheme::Wms => format!(
				"{zoom:02}/{:03}/{:03}/{:03}/{:03}/{:03}/{:03}.{extension}",
				column / 1_000_000,
				(column / 1000) % 1000,
				column % 1000,
				row / 1_000_000,
				(row / 1000) % 1000,
				row % 1000,
			),
			TileScheme::Tms | TileScheme::Ags | TileScheme::Gwc | TileScheme::Zyx => {
				format!("{zoom}/{column}/{row}.{extension}")
			}
		}
	}

	/// Builds the relative path of a UTFGrid file. Grids only know `tms` and `xyz` layouts.
	pub fn grid_key_for(&self, coord: &TileCoord) -> String {
		let row = match self {
			TileScheme::Xyz => flip_y(coord.zoom, coord.row),
			_ => coord.row,
		};
		format!("{}/{}/{row}.grid.json", coord.zoom, coord.column)
	}

	/// Parses the name of a zoom-level directory.
	///
	/// Logs a warning when the name looks like it belongs to a different scheme.
	pub fn parse_zoom_dir(&self, name: &str) -> Result<u8> {
		let zoom = match self {
			TileScheme::Ags => {
				if !name.contains('L') {
					log::warn!("You appear to be using an ags scheme on an non-arcgis Server cache.");
				}
				name.replace('L', "").parse::<u8>()
			}
			TileScheme::Gwc => {
				let start = name.char_indices().rev().nth(1).map_or(0, |(i, _)| i);
				name[start..].parse::<u8>()
			}
			TileScheme::Wms => bail!("the wms scheme can only be exported, not imported"),
			_ => {
				if name.contains('L') {
					log::warn!(
						"You appear to be using a {} scheme on an arcgis Server cache. Try using --scheme=ags instead",
						self
					);
				}
				name.parse::<u8>()
			}
		};
		zoom.with_context(|| format!("invalid zoom directory name {name:?}"))
	}

	/// Reassembles a tile coordinate from the second-level directory name and the file stem
	/// (file name without extension) of an imported file.
	pub fn parse_tile_path(&self, zoom: u8, dir_name: &str, file_stem: &str) -> Result<TileCoord> {
		let parse_dec = |value: &str| -> Result<u32> {
			value
				.parse::<u32>()
				.with_context(|| format!("invalid number {value:?} in tile path"))
		};
		let parse_hex = |value: &str, marker: char| -> Result<u32> {
			let digits = value.replace(marker, "");
			u32::from_str_radix(&digits, 16).with_context(|| format!("invalid hex number {value:?} in tile path"))
		};

		let (column, row) = match self {
			TileScheme::Tms => (parse_dec(dir_name)?, parse_dec(file_stem)?),
			TileScheme::Xyz => (parse_dec(dir_name)?, flip_y_checked(zoom, parse_dec(file_stem)?)?),
			TileScheme::Zyx => (parse_dec(file_stem)?, flip_y_checked(zoom, parse_dec(dir_name)?)?),
			TileScheme::Ags => (
				parse_hex(file_stem, 'C')?,
				flip_y_checked(zoom, parse_hex(dir_name, 'R')?)?,
			),
			TileScheme::Gwc => {
				let (x, y) = file_stem
					.split_once('_')
					.with_context(|| format!("expected '<x>_<y>' as gwc file name, got {file_stem:?}"))?;
				(parse_dec(x)?, parse_dec(y)?)
			}
			TileScheme::Wms => bail!("the wms scheme can only be exported, not imported"),
		};

		TileCoord::new(zoom, column, row)
	}
}

impl Display for TileScheme {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TileScheme {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		Ok(match value.trim().to_lowercase().as_str() {
			"tms" => TileScheme::Tms,
			"xyz" => TileScheme::Xyz,
			"wms" => TileScheme::Wms,
			"ags" => TileScheme::Ags,
			"gwc" => TileScheme::Gwc,
			"zyx" => TileScheme::Zyx,
			_ => bail!("unknown tile scheme {value:?}. Expected tms, xyz, wms, ags, gwc or zyx"),
		})
	}
}
