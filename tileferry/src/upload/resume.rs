//! Which keys a run uploads, based on the logs of earlier runs.
//!
//! Both files hold one key per line. They are produced from a previous run's log, e.g.
//!
//! ```sh
//! grep -E '(Success|Skip): ' run.log | sed -E 's/.*(Success|Skip): //' > success_urls.txt
//! grep 'Failure: ' run.log | sed 's/.*Failure: //' > failure_urls.txt
//! ```

use anyhow::{Context, Result};
use std::{collections::HashSet, fs, path::Path};

pub const DEFAULT_SUCCESS_LOG: &str = "success_urls.txt";
pub const DEFAULT_FAILURE_LOG: &str = "failure_urls.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeMode {
	/// Upload everything that has not succeeded before.
	FullRun,
	/// Upload only what failed before.
	FailuresOnly,
}

/// Keys that succeeded or failed in earlier runs. Built once and never changed afterwards.
#[derive(Clone, Debug)]
pub struct ResumeState {
	succeeded: HashSet<String>,
	failed: HashSet<String>,
	mode: ResumeMode,
}

impl ResumeState {
	/// A non-empty failure list selects [`ResumeMode::FailuresOnly`].
	pub fn new(succeeded: HashSet<String>, failed: HashSet<String>) -> ResumeState {
		let mode = if failed.is_empty() {
			ResumeMode::FullRun
		} else {
			ResumeMode::FailuresOnly
		};
		ResumeState {
			succeeded,
			failed,
			mode,
		}
	}

	/// Nothing succeeded or failed before: every key is eligible.
	pub fn fresh() -> ResumeState {
		ResumeState::new(HashSet::new(), HashSet::new())
	}

	/// Reads both key files. Missing files count as empty.
	pub fn load(success_log: &Path, failure_log: &Path) -> Result<ResumeState> {
		let state = ResumeState::new(read_keys(success_log)?, read_keys(failure_log)?);
		match state.mode {
			ResumeMode::FullRun => log::info!(
				"resuming: {} keys already uploaded will be skipped",
				state.succeeded.len()
			),
			ResumeMode::FailuresOnly => log::info!(
				"resuming: only the {} keys from {failure_log:?} will be uploaded",
				state.failed.len()
			),
		}
		Ok(state)
	}

	pub fn mode(&self) -> ResumeMode {
		self.mode
	}

	/// Whether `key` should be uploaded in this run.
	pub fn is_eligible(&self, key: &str) -> bool {
		match self.mode {
			ResumeMode::FullRun => !self.succeeded.contains(key),
			ResumeMode::FailuresOnly => self.failed.contains(key),
		}
	}
}

fn read_keys(path: &Path) -> Result<HashSet<String>> {
	if !path.exists() {
		log::debug!("{path:?} not found, treating it as empty");
		return Ok(HashSet::new());
	}
	let text = fs::read_to_string(path).with_context(|| format!("reading resume log {path:?}"))?;
	Ok(text
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(String::from)
		.collect())
}
