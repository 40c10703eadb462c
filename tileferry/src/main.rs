mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
	arg_required_else_help = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Import a directory of tiles into a new MBTiles file
	Import(tools::import::Subcommand),

	/// Export an MBTiles file into a new directory of tiles
	Export(tools::export::Subcommand),

	/// Deduplicate the tiles of an MBTiles file in place
	Compact(tools::compact::Subcommand),

	/// Print the metadata of an MBTiles file as JSON
	Metadata(tools::metadata::Subcommand),

	/// Upload an MBTiles or PMTiles file to a B2-style object store
	Upload(tools::upload::Subcommand),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	// progress and Success/Skip/Failure lines are the output of a run, so keep timestamps
	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp_secs()
		.init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	match &cli.command {
		Commands::Import(arguments) => tools::import::run(arguments),
		Commands::Export(arguments) => tools::export::run(arguments),
		Commands::Compact(arguments) => tools::compact::run(arguments),
		Commands::Metadata(arguments) => tools::metadata::run(arguments),
		Commands::Upload(arguments) => tools::upload::run(arguments),
	}
}
