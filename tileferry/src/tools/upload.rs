use anyhow::Result;
use std::path::PathBuf;
use tileferry::upload::{
	DEFAULT_CONTENT_TYPE, DEFAULT_FAILURE_LOG, DEFAULT_MAX_PARALLELISM, DEFAULT_SUCCESS_LOG, KeyLayout, PublishOptions,
	RetryPolicy, publish_mbtiles, publish_pmtiles,
};
use tileferry_core::TileScheme;

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// *.mbtiles or *.pmtiles file to upload
	#[arg()]
	input_file: PathBuf,

	/// endpoint that hands out upload URLs and authorization tokens
	#[arg()]
	token_url: String,

	/// sent as `Authorization` header to the token endpoint
	#[arg(long, env = "TILEFERRY_ACCESS_KEY", hide_env_values = true, display_order = 1)]
	access_key: String,

	/// prefix of all object keys
	#[arg(long, default_value = "", display_order = 2)]
	prefix: String,

	/// key layout of tiles: tms, xyz or wms
	#[arg(long, value_enum, default_value_t = TileScheme::Tms, display_order = 2)]
	scheme: TileScheme,

	/// file extension of tile keys
	#[arg(long, default_value = "png", display_order = 2)]
	format: String,

	/// Content-Type of uploaded objects
	#[arg(long, default_value = DEFAULT_CONTENT_TYPE, display_order = 2)]
	content_type: String,

	/// skip tiles above this zoom level
	#[arg(long, value_name = "int", display_order = 3)]
	max_zoom: Option<u8>,

	/// maximum number of tiles uploaded at the same time
	#[arg(long, value_name = "int", default_value_t = DEFAULT_MAX_PARALLELISM, display_order = 3)]
	max_parallelism: usize,

	/// attempts per tile before it is logged as failure
	#[arg(long, value_name = "int", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..), display_order = 3)]
	max_attempts: u32,

	/// keys uploaded by an earlier run, one per line
	#[arg(long, default_value = DEFAULT_SUCCESS_LOG, display_order = 4)]
	success_log: PathBuf,

	/// keys that failed in an earlier run; if not empty, only these are uploaded
	#[arg(long, default_value = DEFAULT_FAILURE_LOG, display_order = 4)]
	failure_log: PathBuf,
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	eprintln!("upload {:?} to {:?}", arguments.input_file, arguments.token_url);

	let options = PublishOptions {
		token_url: arguments.token_url.clone(),
		access_key: arguments.access_key.clone(),
		layout: KeyLayout {
			prefix: arguments.prefix.clone(),
			scheme: arguments.scheme,
			format: arguments.format.clone(),
		},
		max_zoom: arguments.max_zoom,
		max_parallelism: arguments.max_parallelism,
		content_type: arguments.content_type.clone(),
		retry: RetryPolicy {
			max_attempts: arguments.max_attempts,
			..RetryPolicy::default()
		},
		success_log: arguments.success_log.clone(),
		failure_log: arguments.failure_log.clone(),
	};

	let is_pmtiles = arguments
		.input_file
		.extension()
		.is_some_and(|extension| extension.eq_ignore_ascii_case("pmtiles"));
	let summary = if is_pmtiles {
		publish_pmtiles(&arguments.input_file, &options).await?
	} else {
		publish_mbtiles(&arguments.input_file, &options).await?
	};

	eprintln!(
		"{} uploaded, {} failed, {} skipped",
		summary.succeeded, summary.failed, summary.skipped
	);
	Ok(())
}
