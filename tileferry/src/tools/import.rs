use anyhow::Result;
use std::path::PathBuf;
use tileferry_container::directory::{ImportOptions, import_directory};
use tileferry_core::TileScheme;

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// directory with `<z>/<x>/<y>.<format>` tiles and an optional metadata.json
	#[arg()]
	input_dir: PathBuf,

	/// MBTiles file to create; must not exist yet
	#[arg()]
	output_file: PathBuf,

	/// layout of the input directory
	#[arg(long, value_enum, default_value_t = TileScheme::Tms, display_order = 1)]
	scheme: TileScheme,

	/// file extension of tiles; other files are ignored
	#[arg(long, default_value = "png", display_order = 1)]
	format: String,

	/// deduplicate identical tiles after importing
	#[arg(long, display_order = 2)]
	compact: bool,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	eprintln!("import {:?} into {:?}", arguments.input_dir, arguments.output_file);

	let options = ImportOptions {
		scheme: arguments.scheme,
		format: arguments.format.clone(),
		compact: arguments.compact,
	};
	let summary = import_directory(&arguments.input_dir, &arguments.output_file, &options)?;
	log::info!("imported {} tiles and {} grids", summary.tiles, summary.grids);
	Ok(())
}
