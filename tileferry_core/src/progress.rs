//! Log-based progress reporting for long-running tile loops.
//!
//! The tools of this workspace are usually run unattended and their log is post-processed, so
//! progress is written as plain `log::info!` lines instead of a redrawn terminal bar:
//!
//! ```text
//! 1200 tiles inserted (5230 tiles/sec)
//! 300 / 1000 tiles exported
//! 300 / 1000 tiles exported (executing 275)
//! ```
//!
//! A [`ProgressLog`] is `Sync`; share it behind an `Arc` when several tasks report into it.
//!
//! # Examples
//!
//! ```rust
//! use tileferry_core::progress::ProgressLog;
//!
//! let progress = ProgressLog::new("tiles exported", Some(250));
//! for _ in 0..250 {
//! 	progress.inc(1);
//! }
//! progress.finish();
//! assert_eq!(progress.position(), 250);
//! ```

use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Instant,
};

/// Default number of items between two log lines.
pub const DEFAULT_LOG_INTERVAL: u64 = 100;

/// Counts processed items and logs a line every `interval` items.
#[derive(Debug)]
pub struct ProgressLog {
	label: String,
	total: Option<u64>,
	interval: u64,
	position: AtomicU64,
	start: Instant,
}

impl ProgressLog {
	/// Creates a progress log. With a `total` the lines read `pos / total label`, without one
	/// they read `pos label (rate tiles/sec)`.
	#[must_use]
	pub fn new(label: &str, total: Option<u64>) -> ProgressLog {
		ProgressLog {
			label: label.to_string(),
			total,
			interval: DEFAULT_LOG_INTERVAL,
			position: AtomicU64::new(0),
			start: Instant::now(),
		}
	}

	#[must_use]
	pub fn with_interval(mut self, interval: u64) -> ProgressLog {
		self.interval = interval.max(1);
		self
	}

	/// Adds `value` to the position and logs when an interval boundary was crossed.
	pub fn inc(&self, value: u64) {
		self.inc_with(value, String::new);
	}

	/// Like [`ProgressLog::inc`], appending `(detail)` to the line when one is logged.
	pub fn inc_with(&self, value: u64, detail: impl FnOnce() -> String) {
		let previous = self.position.fetch_add(value, Ordering::Relaxed);
		let current = previous.saturating_add(value);
		if previous / self.interval != current / self.interval {
			log::info!("{}", self.line(current, &detail()));
		}
	}

	pub fn position(&self) -> u64 {
		self.position.load(Ordering::Relaxed)
	}

	/// Items per second since creation.
	pub fn per_second(&self) -> f64 {
		let elapsed = self.start.elapsed().as_secs_f64();
		if elapsed > 0.0 {
			self.position() as f64 / elapsed
		} else {
			0.0
		}
	}

	/// Logs the final position.
	pub fn finish(&self) {
		log::info!("{}", self.line(self.position(), ""));
	}

	fn line(&self, position: u64, detail: &str) -> String {
		let mut line = match self.total {
			Some(total) => format!("{position} / {total} {}", self.label),
			None => format!("{position} {} ({:.0} tiles/sec)", self.label, self.per_second()),
		};
		if !detail.is_empty() {
			line.push_str(&format!(" ({detail})"));
		}
		line
	}
}
