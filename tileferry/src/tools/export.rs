use anyhow::Result;
use std::path::PathBuf;
use tileferry_container::directory::{ExportOptions, export_directory};
use tileferry_core::TileScheme;

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// MBTiles file to export
	#[arg()]
	input_file: PathBuf,

	/// directory to create; must not exist yet
	#[arg()]
	output_dir: PathBuf,

	/// layout of the output directory: tms, xyz or wms
	#[arg(long, value_enum, default_value_t = TileScheme::Tms, display_order = 1)]
	scheme: TileScheme,

	/// file extension of written tiles
	#[arg(long, default_value = "png", display_order = 1)]
	format: String,

	/// wrap UTFGrids in this JSONP callback; empty, "false" and "null" disable wrapping
	#[arg(long, display_order = 2)]
	callback: Option<String>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	eprintln!("export {:?} to {:?}", arguments.input_file, arguments.output_dir);

	let options = ExportOptions {
		scheme: arguments.scheme,
		format: arguments.format.clone(),
		callback: arguments.callback.clone(),
	};
	let summary = export_directory(&arguments.input_file, &arguments.output_dir, &options)?;
	log::info!("exported {} tiles and {} grids", summary.tiles, summary.grids);
	Ok(())
}
