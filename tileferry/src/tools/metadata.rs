use anyhow::Result;
use std::path::PathBuf;
use tileferry_container::directory::{mbtiles_metadata, pretty_json};

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// MBTiles file
	#[arg()]
	file: PathBuf,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let metadata = mbtiles_metadata(&arguments.file)?;
	println!("{}", String::from_utf8(pretty_json(&metadata)?)?);
	Ok(())
}
