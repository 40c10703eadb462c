//! Publishing tile containers to a B2-style object store.
//!
//! - [`ResumeState`] decides which keys a run uploads
//! - [`UploadClient`] leases tokens from a [`TokenPool`] and uploads single objects with retries
//! - [`UploadScheduler`] drives the client over a whole [`TileSource`](tileferry_container::TileSource)
//!   with bounded concurrency
//!
//! [`publish_mbtiles`] and [`publish_pmtiles`] wire these together for a file on disk.

mod client;
mod resume;
mod scheduler;
mod token;

#[cfg(test)]
mod test_server;

pub use client::{
	AttemptOutcome, DEFAULT_CONTENT_TYPE, RetryPolicy, TileOutcome, TileUploader, UploadClient, UploadError,
};
pub use resume::{DEFAULT_FAILURE_LOG, DEFAULT_SUCCESS_LOG, ResumeMode, ResumeState};
pub use scheduler::{
	DEFAULT_MAX_PARALLELISM, KeyLayout, PublishOptions, RunCounters, RunSummary, UploadScheduler, publish_mbtiles,
	publish_pmtiles,
};
pub use token::{TokenPool, UploadToken};
