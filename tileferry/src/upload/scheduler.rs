//! Bounded-concurrency publishing of a tile stream.
//!
//! A single producer loop reads the [`TileSource`], skips keys that the [`ResumeState`] excludes,
//! and spawns one task per remaining tile. Each task holds a semaphore permit for its whole
//! lifetime, so no more than `max_parallelism` tiles are ever in flight. Completions arrive in no
//! particular order.
//!
//! A tile that exhausts its attempts is counted as failed and the run goes on. Errors returned by
//! the uploader (a rejected access key) or by the source stop the producer; tasks already in flight
//! are awaited before the error is returned.

use super::{
	DEFAULT_CONTENT_TYPE, DEFAULT_FAILURE_LOG, DEFAULT_SUCCESS_LOG, ResumeState, RetryPolicy, TileOutcome, TileUploader,
	UploadClient, UploadError,
};
use anyhow::{Context, Result};
use std::{
	path::{Path, PathBuf},
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};
use tileferry_container::{
	MBTilesStore, MBTilesTileSource, PMTilesTileSource, TileSource,
	directory::{LAYER_FILE, METADATA_FILE, layer_json, pretty_json},
};
use tileferry_core::{TileCoord, TileScheme, join_key, progress::ProgressLog};
use tokio::{sync::Semaphore, task::JoinSet};

pub const DEFAULT_MAX_PARALLELISM: usize = 275;

/// Everything a publish run needs besides the input file.
#[derive(Clone, Debug)]
pub struct PublishOptions {
	pub token_url: String,
	pub access_key: String,
	pub layout: KeyLayout,
	/// Tiles above this zoom level are not read.
	pub max_zoom: Option<u8>,
	pub max_parallelism: usize,
	pub content_type: String,
	pub retry: RetryPolicy,
	pub success_log: PathBuf,
	pub failure_log: PathBuf,
}

impl PublishOptions {
	pub fn new(token_url: &str, access_key: &str) -> PublishOptions {
		PublishOptions {
			token_url: token_url.to_string(),
			access_key: access_key.to_string(),
			layout: KeyLayout::default(),
			max_zoom: None,
			max_parallelism: DEFAULT_MAX_PARALLELISM,
			content_type: DEFAULT_CONTENT_TYPE.to_string(),
			retry: RetryPolicy::default(),
			success_log: PathBuf::from(DEFAULT_SUCCESS_LOG),
			failure_log: PathBuf::from(DEFAULT_FAILURE_LOG),
		}
	}
}

/// How tile coordinates and file names become object keys.
#[derive(Clone, Debug)]
pub struct KeyLayout {
	pub prefix: String,
	pub scheme: TileScheme,
	pub format: String,
}

impl Default for KeyLayout {
	fn default() -> Self {
		KeyLayout {
			prefix: String::new(),
			scheme: TileScheme::Tms,
			format: String::from("png"),
		}
	}
}

impl KeyLayout {
	pub fn tile_key(&self, coord: &TileCoord) -> String {
		join_key(&self.prefix, &self.scheme.key_for(coord, &self.format))
	}

	pub fn file_key(&self, name: &str) -> String {
		join_key(&self.prefix, name)
	}
}

/// Live counters of a run, shared by the producer and all tasks.
#[derive(Debug, Default)]
pub struct RunCounters {
	attempted: AtomicU64,
	succeeded: AtomicU64,
	failed: AtomicU64,
	skipped: AtomicU64,
	done: AtomicU64,
	in_flight: AtomicU64,
	peak_in_flight: AtomicU64,
}

impl RunCounters {
	fn start(&self) {
		self.attempted.fetch_add(1, Ordering::SeqCst);
		let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
	}

	/// Returns the number of tiles still in flight.
	fn finish(&self, succeeded: bool) -> u64 {
		if succeeded {
			self.succeeded.fetch_add(1, Ordering::SeqCst);
		} else {
			self.failed.fetch_add(1, Ordering::SeqCst);
		}
		self.done.fetch_add(1, Ordering::SeqCst);
		self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1
	}

	fn skip(&self) {
		self.skipped.fetch_add(1, Ordering::SeqCst);
		self.done.fetch_add(1, Ordering::SeqCst);
	}

	pub fn in_flight(&self) -> u64 {
		self.in_flight.load(Ordering::SeqCst)
	}

	pub fn summary(&self) -> RunSummary {
		RunSummary {
			attempted: self.attempted.load(Ordering::SeqCst),
			succeeded: self.succeeded.load(Ordering::SeqCst),
			failed: self.failed.load(Ordering::SeqCst),
			skipped: self.skipped.load(Ordering::SeqCst),
			done: self.done.load(Ordering::SeqCst),
			peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
		}
	}
}

/// Counters at the end of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
	pub attempted: u64,
	pub succeeded: u64,
	pub failed: u64,
	pub skipped: u64,
	pub done: u64,
	pub peak_in_flight: u64,
}

pub struct UploadScheduler<U: TileUploader + 'static> {
	uploader: Arc<U>,
	resume: Arc<ResumeState>,
	max_parallelism: usize,
	counters: Arc<RunCounters>,
}

impl<U: TileUploader + 'static> UploadScheduler<U> {
	pub fn new(uploader: Arc<U>, resume: ResumeState, max_parallelism: usize) -> Result<UploadScheduler<U>> {
		anyhow::ensure!(max_parallelism > 0, "max parallelism must be greater than zero");
		Ok(UploadScheduler {
			uploader,
			resume: Arc::new(resume),
			max_parallelism,
			counters: Arc::new(RunCounters::default()),
		})
	}

	pub fn counters(&self) -> &RunCounters {
		&self.counters
	}

	/// Uploads a single file outside of the tile counters, e.g. `metadata.json`.
	pub async fn upload_file(&self, key: &str, data: &[u8]) -> Result<Option<TileOutcome>, UploadError> {
		if !self.resume.is_eligible(key) {
			log::info!("Skip: {key}");
			return Ok(None);
		}
		self.uploader.upload_with_retry(key, data).await.map(Some)
	}

	/// Uploads every tile of `source`.
	pub async fn run(&self, source: &mut dyn TileSource, layout: &KeyLayout) -> Result<RunSummary, UploadError> {
		let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
		let progress = Arc::new(ProgressLog::new("tiles exported", source.len_hint()));
		let mut tasks: JoinSet<Result<TileOutcome, UploadError>> = JoinSet::new();
		let mut fatal: Option<UploadError> = None;

		loop {
			while let Some(joined) = tasks.try_join_next() {
				if let Err(error) = task_result(joined) {
					fatal.get_or_insert(error);
				}
			}
			if fatal.is_some() {
				break;
			}

			let tile = match source.next_tile() {
				Ok(Some(tile)) => tile,
				Ok(None) => break,
				Err(error) => {
					fatal = Some(UploadError::Storage(error.context("reading tile source")));
					break;
				}
			};

			let key = layout.tile_key(&tile.coord);
			if !self.resume.is_eligible(&key) {
				log::info!("Skip: {key}");
				self.counters.skip();
				let in_flight = self.counters.in_flight();
				progress.inc_with(1, || format!("executing {in_flight}"));
				continue;
			}

			let permit = semaphore
				.clone()
				.acquire_owned()
				.await
				.context("upload semaphore closed")?;
			self.counters.start();
			log::debug!("{} tiles executing", self.counters.in_flight());

			let uploader = self.uploader.clone();
			let counters = self.counters.clone();
			let progress = progress.clone();
			tasks.spawn(async move {
				let result = uploader.upload_with_retry(&key, &tile.data).await;
				let succeeded = matches!(result, Ok(outcome) if outcome.is_success());
				let in_flight = counters.finish(succeeded);
				progress.inc_with(1, || format!("executing {in_flight}"));
				drop(permit);
				result
			});
		}

		if fatal.is_some() {
			log::error!("stopping upload, waiting for {} tiles in flight", tasks.len());
		}
		while let Some(joined) = tasks.join_next().await {
			if let Err(error) = task_result(joined) {
				fatal.get_or_insert(error);
			}
		}
		progress.finish();

		match fatal {
			Some(error) => Err(error),
			None => Ok(self.counters.summary()),
		}
	}
}

fn task_result(
	joined: Result<Result<TileOutcome, UploadError>, tokio::task::JoinError>,
) -> Result<TileOutcome, UploadError> {
	joined.map_err(|e| UploadError::Storage(anyhow::Error::new(e).context("upload task failed")))?
}

fn scheduler_for(options: &PublishOptions) -> Result<UploadScheduler<UploadClient>> {
	let client = UploadClient::new(
		&options.token_url,
		&options.access_key,
		options.max_parallelism,
		options.retry.clone(),
	)?
	.with_content_type(&options.content_type);
	let resume = ResumeState::load(&options.success_log, &options.failure_log)?;
	UploadScheduler::new(Arc::new(client), resume, options.max_parallelism)
}

fn log_summary(summary: &RunSummary) {
	log::info!(
		"{} tiles uploaded, {} failed, {} skipped",
		summary.succeeded,
		summary.failed,
		summary.skipped
	);
}

/// Uploads `metadata.json`, `layer.json` (if the metadata has a formatter) and all tiles of an
/// MBTiles file.
///
/// # Errors
/// Stores with UTFGrids are rejected before anything is uploaded.
pub async fn publish_mbtiles(path: &Path, options: &PublishOptions) -> Result<RunSummary> {
	log::debug!("Exporting MBTiles to url");
	log::debug!("{path:?} --> {}", options.token_url);

	let store = MBTilesStore::open(path)?;
	if store.count_grids()? > 0 {
		return Err(UploadError::UnsupportedFeature("grids").into());
	}

	let scheduler = scheduler_for(options)?;
	let layout = &options.layout;

	let metadata = store.metadata()?;
	scheduler
		.upload_file(&layout.file_key(METADATA_FILE), &pretty_json(&metadata)?)
		.await?;
	if let Some(layer) = layer_json(&metadata) {
		scheduler.upload_file(&layout.file_key(LAYER_FILE), layer.as_bytes()).await?;
	}

	let mut source = MBTilesTileSource::new(store, options.max_zoom)?;
	let summary = scheduler.run(&mut source, layout).await?;
	log_summary(&summary);
	Ok(summary)
}

/// Uploads `metadata.json` and all tiles of a PMTiles archive.
pub async fn publish_pmtiles(path: &Path, options: &PublishOptions) -> Result<RunSummary> {
	log::debug!("Exporting PMTiles to url");
	log::debug!("{path:?} --> {}", options.token_url);

	let mut source = PMTilesTileSource::open(path, options.max_zoom)?;
	let scheduler = scheduler_for(options)?;
	let layout = &options.layout;

	scheduler
		.upload_file(&layout.file_key(METADATA_FILE), &pretty_json(source.metadata())?)
		.await?;

	let summary = scheduler.run(&mut source, layout).await?;
	log_summary(&summary);
	Ok(summary)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upload::test_server::{ACCESS_KEY, Behavior, MockServer};
	use assert_fs::TempDir;
	use async_trait::async_trait;
	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;
	use std::{
		collections::{HashMap, HashSet},
		time::Duration,
	};
	use tileferry_container::testing::PMTilesBuilder;
	use tileferry_core::Tile;

	/// Counts concurrent calls and answers per key.
	#[derive(Default)]
	struct FakeUploader {
		delay: Duration,
		failing: HashSet<String>,
		fatal_on: Option<String>,
		in_flight: AtomicU64,
		peak: AtomicU64,
		calls: Mutex<HashMap<String, u32>>,
	}

	#[async_trait]
	impl TileUploader for FakeUploader {
		async fn upload_with_retry(&self, key: &str, _data: &[u8]) -> Result<TileOutcome, UploadError> {
			let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
			self.peak.fetch_max(current, Ordering::SeqCst);
			*self.calls.lock().entry(key.to_string()).or_default() += 1;
			tokio::time::sleep(self.delay).await;
			self.in_flight.fetch_sub(1, Ordering::SeqCst);

			if self.fatal_on.as_deref() == Some(key) {
				return Err(UploadError::FatalAuth {
					status: 403,
					body: String::from("no"),
				});
			}
			if self.failing.contains(key) {
				return Ok(TileOutcome::Failed { attempts: 5 });
			}
			Ok(TileOutcome::Succeeded { attempts: 1 })
		}
	}

	#[derive(Debug)]
	struct VecSource(std::vec::IntoIter<Tile>, u64);

	impl VecSource {
		fn pyramid(max_zoom: u8) -> VecSource {
			let mut tiles = Vec::new();
			for zoom in 0..=max_zoom {
				for column in 0..(1u32 << zoom) {
					for row in 0..(1u32 << zoom) {
						tiles.push(Tile::new(TileCoord::new(zoom, column, row).unwrap(), vec![zoom]));
					}
				}
			}
			let len = tiles.len() as u64;
			VecSource(tiles.into_iter(), len)
		}
	}

	impl TileSource for VecSource {
		fn next_tile(&mut self) -> Result<Option<Tile>> {
			Ok(self.0.next())
		}

		fn len_hint(&self) -> Option<u64> {
			Some(self.1)
		}
	}

	fn keys(list: &[&str]) -> HashSet<String> {
		list.iter().map(|key| key.to_string()).collect()
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn never_exceeds_max_parallelism() -> Result<()> {
		let uploader = Arc::new(FakeUploader {
			delay: Duration::from_millis(5),
			..FakeUploader::default()
		});
		let scheduler = UploadScheduler::new(uploader.clone(), ResumeState::fresh(), 7)?;

		let summary = scheduler.run(&mut VecSource::pyramid(3), &KeyLayout::default()).await?;
		assert_eq!(summary.attempted, 85);
		assert_eq!(summary.succeeded, 85);
		assert_eq!(summary.done, 85);
		assert!(summary.peak_in_flight <= 7, "peak {}", summary.peak_in_flight);
		assert!(uploader.peak.load(Ordering::SeqCst) <= 7);
		assert!(uploader.peak.load(Ordering::SeqCst) > 1);
		assert_eq!(scheduler.counters().in_flight(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn failed_tiles_do_not_stop_the_run() -> Result<()> {
		let uploader = Arc::new(FakeUploader {
			failing: keys(&["1/0/0.png", "1/1/1.png"]),
			..FakeUploader::default()
		});
		let scheduler = UploadScheduler::new(uploader.clone(), ResumeState::fresh(), 3)?;

		let summary = scheduler.run(&mut VecSource::pyramid(2), &KeyLayout::default()).await?;
		assert_eq!(summary.succeeded, 19);
		assert_eq!(summary.failed, 2);
		assert_eq!(uploader.calls.lock().len(), 21);
		Ok(())
	}

	#[tokio::test]
	async fn full_run_skips_previous_successes() -> Result<()> {
		let uploader = Arc::new(FakeUploader::default());
		let resume = ResumeState::new(keys(&["tiles/0/0/0.pbf", "tiles/1/0/0.pbf"]), HashSet::new());
		let scheduler = UploadScheduler::new(uploader.clone(), resume, 4)?;
		let layout = KeyLayout {
			prefix: String::from("tiles"),
			scheme: TileScheme::Tms,
			format: String::from("pbf"),
		};

		let summary = scheduler.run(&mut VecSource::pyramid(1), &layout).await?;
		assert_eq!(summary.skipped, 2);
		assert_eq!(summary.succeeded, 3);
		assert_eq!(summary.done, 5);

		let calls = uploader.calls.lock();
		assert!(!calls.contains_key("tiles/0/0/0.pbf"));
		assert!(calls.contains_key("tiles/1/1/1.pbf"));
		Ok(())
	}

	#[tokio::test]
	async fn failures_only_uploads_previous_failures() -> Result<()> {
		let uploader = Arc::new(FakeUploader::default());
		let resume = ResumeState::new(keys(&["0/0/0.png"]), keys(&["1/1/0.png", "2/3/3.png"]));
		let scheduler = UploadScheduler::new(uploader.clone(), resume, 4)?;

		assert_eq!(scheduler.upload_file("metadata.json", b"{}").await?, None);

		let summary = scheduler.run(&mut VecSource::pyramid(2), &KeyLayout::default()).await?;
		assert_eq!(summary.succeeded, 2);
		assert_eq!(summary.skipped, 19);

		let mut called: Vec<String> = uploader.calls.lock().keys().cloned().collect();
		called.sort();
		assert_eq!(called, vec!["1/1/0.png", "2/3/3.png"]);
		Ok(())
	}

	#[tokio::test]
	async fn fatal_error_stops_the_run() -> Result<()> {
		let uploader = Arc::new(FakeUploader {
			delay: Duration::from_millis(1),
			fatal_on: Some(String::from("1/0/0.png")),
			..FakeUploader::default()
		});
		let scheduler = UploadScheduler::new(uploader.clone(), ResumeState::fresh(), 1)?;

		let result = scheduler.run(&mut VecSource::pyramid(4), &KeyLayout::default()).await;
		assert!(matches!(result, Err(UploadError::FatalAuth { status: 403, .. })));
		// one permit: the error is seen before more than one further tile is admitted
		assert!(uploader.calls.lock().len() < 5);
		assert_eq!(scheduler.counters().in_flight(), 0);
		Ok(())
	}

	#[test]
	fn rejects_zero_parallelism() {
		let uploader = Arc::new(FakeUploader::default());
		assert!(UploadScheduler::new(uploader, ResumeState::fresh(), 0).is_err());
	}

	fn options(server: &MockServer, dir: &TempDir) -> PublishOptions {
		let mut options = PublishOptions::new(&server.token_url(), ACCESS_KEY);
		options.max_parallelism = 4;
		options.retry.rate_limit_pause = Duration::from_millis(1);
		options.success_log = dir.path().join("success_urls.txt");
		options.failure_log = dir.path().join("failure_urls.txt");
		options.layout = KeyLayout {
			prefix: String::from("world/"),
			scheme: TileScheme::Xyz,
			format: String::from("pbf"),
		};
		options
	}

	#[tokio::test]
	async fn publishes_mbtiles_end_to_end() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("world.mbtiles");
		{
			let store = MBTilesStore::create(&path)?;
			store.set_metadata("name", "world")?;
			store.set_metadata("formatter", "function(o) { return o.name; }")?;
			store.insert_tiles(&[
				Tile::new(TileCoord::new(0, 0, 0)?, b"root".to_vec()),
				Tile::new(TileCoord::new(1, 0, 0)?, b"south-west".to_vec()),
				Tile::new(TileCoord::new(2, 0, 0)?, b"too deep".to_vec()),
			])?;
		}

		let server = MockServer::start(Behavior::default()).await;
		let mut options = options(&server, &dir);
		options.max_zoom = Some(1);

		let summary = publish_mbtiles(&path, &options).await?;
		assert_eq!(summary.succeeded, 2);
		assert_eq!(
			server.uploaded_keys(),
			vec!["world/0/0/0.pbf", "world/1/0/1.pbf", "world/layer.json", "world/metadata.json"]
		);

		let uploads = server.uploads();
		let metadata = uploads.iter().find(|u| u.key == "world/metadata.json").unwrap();
		assert!(String::from_utf8_lossy(&metadata.body).contains("\n    \"name\": \"world\""));
		Ok(())
	}

	#[tokio::test]
	async fn mbtiles_with_grids_are_rejected() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("grids.mbtiles");
		{
			let store = MBTilesStore::create(&path)?;
			let grid = tileferry_container::UtfGrid::parse(TileCoord::new(0, 0, 0)?, r#"{"grid": [], "keys": []}"#)?;
			store.insert_grid(&grid)?;
		}

		let server = MockServer::start(Behavior::default()).await;
		let error = publish_mbtiles(&path, &options(&server, &dir)).await.unwrap_err();
		assert!(matches!(
			error.downcast_ref::<UploadError>(),
			Some(UploadError::UnsupportedFeature("grids"))
		));
		assert!(server.uploads().is_empty());
		Ok(())
	}

	#[tokio::test]
	async fn publishes_pmtiles_and_resumes() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("world.pmtiles");
		let mut builder = PMTilesBuilder::new();
		builder.metadata(serde_json::json!({"name": "world"}));
		builder.add_tile(TileCoord::new(0, 0, 0)?, b"root".to_vec());
		builder.add_tile(TileCoord::new(1, 1, 0)?, b"north-east".to_vec());
		builder.write(&path)?;

		let server = MockServer::start(Behavior::default()).await;
		let options = options(&server, &dir);
		std::fs::write(&options.success_log, "world/metadata.json\n")?;

		let summary = publish_pmtiles(&path, &options).await?;
		assert_eq!(summary.succeeded, 2);
		// rows come back in XYZ because of the key layout
		assert_eq!(server.uploaded_keys(), vec!["world/0/0/0.pbf", "world/1/1/0.pbf"]);
		Ok(())
	}

	#[tokio::test]
	async fn rejected_access_key_aborts_publishing() -> Result<()> {
		let dir = TempDir::new()?;
		let path = dir.path().join("world.pmtiles");
		let mut builder = PMTilesBuilder::new();
		builder.add_tile(TileCoord::new(0, 0, 0)?, b"root".to_vec());
		builder.write(&path)?;

		let server = MockServer::start(Behavior::default()).await;
		let mut options = options(&server, &dir);
		options.access_key = String::from("wrong");

		let error = publish_pmtiles(&path, &options).await.unwrap_err();
		assert!(matches!(
			error.downcast_ref::<UploadError>(),
			Some(UploadError::FatalAuth { status: 403, .. })
		));
		Ok(())
	}
}
