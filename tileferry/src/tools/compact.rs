use anyhow::Result;
use std::path::PathBuf;
use tileferry_container::{
	MBTilesStore,
	compaction::{DEFAULT_CHUNK_SIZE, compact_mbtiles},
};

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// MBTiles file to compact in place
	#[arg()]
	file: PathBuf,

	/// number of tiles processed per transaction
	#[arg(long, value_name = "int", default_value_t = DEFAULT_CHUNK_SIZE)]
	chunk_size: usize,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	eprintln!("compact {:?}", arguments.file);

	let store = MBTilesStore::open(&arguments.file)?;
	compact_mbtiles(&store, arguments.chunk_size)?;
	Ok(())
}
