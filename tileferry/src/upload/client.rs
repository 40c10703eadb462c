//! HTTP client for a B2-style object store: a token endpoint that leases upload URLs and an upload
//! endpoint that takes one object per `POST`.
//!
//! ## Token endpoint
//! `GET {token_url}` with `Authorization: {access_key}`:
//! - `200`: JSON `{"uploadUrl": ..., "authorizationToken": ...}`
//! - `429`: wait `Retry-After` seconds, then ask again
//! - `503`: wait with doubling backoff, then ask again
//! - anything else: the access key is not accepted ([`UploadError::FatalAuth`])
//!
//! ## Upload endpoint
//! `POST {uploadUrl}` with the object as body. The token goes back into the [`TokenPool`] unless the
//! endpoint answered `401` or the request never got an answer.

use super::{TokenPool, UploadToken};
use async_trait::async_trait;
use reqwest::{
	Response, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
};
use sha1::{Digest, Sha1};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONTENT_TYPE: &str = "application/x-protobuf";
const CACHE_CONTROL: &str = "public%2Cimmutable%2Cmax-age=31536000";

#[derive(Debug, Error)]
pub enum UploadError {
	/// Timeouts, rate limits, server errors and network failures.
	#[error("transient upload failure: {0}")]
	Transient(String),
	#[error("upload authorization expired")]
	AuthExpired,
	#[error("token endpoint rejected the access key ({status}): {body}")]
	FatalAuth { status: u16, body: String },
	#[error("{0} are not supported by the upload target")]
	UnsupportedFeature(&'static str),
	#[error(transparent)]
	Storage(#[from] anyhow::Error),
}

/// Result of a single `POST`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
	Success,
	AuthExpired,
	Transient(String),
}

/// Final result of uploading one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileOutcome {
	Succeeded { attempts: u32 },
	Failed { attempts: u32 },
}

impl TileOutcome {
	pub fn is_success(&self) -> bool {
		matches!(self, TileOutcome::Succeeded { .. })
	}
}

/// Delays and limits of [`UploadClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Attempts per object before it is reported as failed.
	pub max_attempts: u32,
	/// Pause after an upload was answered with `408` or `429`.
	pub rate_limit_pause: Duration,
	/// Wait after a token `429` without a usable `Retry-After` header.
	pub token_retry_after: Duration,
	/// First wait after a token `503`; doubles with every further `503`.
	pub token_backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy {
			max_attempts: 5,
			rate_limit_pause: Duration::from_secs(2),
			token_retry_after: Duration::from_secs(1),
			token_backoff: Duration::from_secs(1),
		}
	}
}

/// Uploads one object with retries.
///
/// [`UploadClient`] talks HTTP; tests of the scheduler substitute their own implementations.
#[async_trait]
pub trait TileUploader: Send + Sync {
	/// Returns `Err` only for errors that must stop the whole run.
	async fn upload_with_retry(&self, key: &str, data: &[u8]) -> Result<TileOutcome, UploadError>;
}

#[derive(Debug)]
pub struct UploadClient {
	http: reqwest::Client,
	token_url: String,
	access_key: String,
	content_type: String,
	policy: RetryPolicy,
	tokens: TokenPool,
}

impl UploadClient {
	/// Creates a client that keeps at most `max_connections` idle connections per host.
	pub fn new(
		token_url: &str,
		access_key: &str,
		max_connections: usize,
		policy: RetryPolicy,
	) -> Result<UploadClient, UploadError> {
		if policy.max_attempts == 0 {
			return Err(UploadError::Storage(anyhow::anyhow!("max attempts must be greater than zero")));
		}
		let http = reqwest::Client::builder()
			.pool_max_idle_per_host(max_connections)
			.build()
			.map_err(|e| UploadError::Storage(anyhow::Error::new(e).context("building HTTP client")))?;
		Ok(UploadClient {
			http,
			token_url: token_url.to_string(),
			access_key: access_key.to_string(),
			content_type: DEFAULT_CONTENT_TYPE.to_string(),
			policy,
			tokens: TokenPool::new(),
		})
	}

	#[must_use]
	pub fn with_content_type(mut self, content_type: &str) -> UploadClient {
		self.content_type = content_type.to_string();
		self
	}

	pub fn tokens(&self) -> &TokenPool {
		&self.tokens
	}

	/// Leases a new token, waiting out `429` and `503` answers for as long as they last.
	pub async fn acquire_token(&self) -> Result<UploadToken, UploadError> {
		let mut backoff = self.policy.token_backoff;
		loop {
			let response = self
				.http
				.get(&self.token_url)
				.header(AUTHORIZATION, &self.access_key)
				.send()
				.await
				.map_err(|e| UploadError::Transient(format!("requesting upload token: {e}")))?;

			match response.status() {
				StatusCode::OK => {
					let body = response
						.bytes()
						.await
						.map_err(|e| UploadError::Transient(format!("reading upload token: {e}")))?;
					let token: UploadToken = serde_json::from_slice(&body)
						.map_err(|e| UploadError::Transient(format!("invalid upload token response: {e}")))?;
					log::debug!("added worker {}", token.upload_url);
					return Ok(token);
				}
				StatusCode::TOO_MANY_REQUESTS => {
					let wait = retry_after(&response).unwrap_or(self.policy.token_retry_after);
					log::debug!("token endpoint is rate limited, waiting {wait:?}");
					tokio::time::sleep(wait).await;
					backoff = self.policy.token_backoff;
				}
				StatusCode::SERVICE_UNAVAILABLE => {
					log::debug!("token endpoint is unavailable, waiting {backoff:?}");
					tokio::time::sleep(backoff).await;
					backoff = backoff.saturating_mul(2);
				}
				status => {
					let body = response.text().await.unwrap_or_default();
					return Err(UploadError::FatalAuth {
						status: status.as_u16(),
						body,
					});
				}
			}
		}
	}

	/// One `POST` of `data` under `key`.
	pub async fn upload(&self, token: UploadToken, key: &str, data: &[u8]) -> AttemptOutcome {
		let sha1 = hex::encode(Sha1::digest(data));
		let result = self
			.http
			.post(&token.upload_url)
			.header(AUTHORIZATION, &token.authorization_token)
			.header("X-Bz-File-Name", key)
			.header(CONTENT_TYPE, &self.content_type)
			.header("X-Bz-Info-b2-content-encoding", "gzip")
			.header("X-Bz-Content-Sha1", sha1)
			.header("X-Bz-Info-b2-cache-control", CACHE_CONTROL)
			.body(data.to_vec())
			.send()
			.await;

		let response = match result {
			Ok(response) => response,
			Err(e) => return AttemptOutcome::Transient(format!("exception: {e}")),
		};

		let status = response.status();
		if status == StatusCode::UNAUTHORIZED {
			return AttemptOutcome::AuthExpired;
		}
		self.tokens.push(token);
		if status == StatusCode::OK {
			return AttemptOutcome::Success;
		}

		let body = response.text().await.unwrap_or_default();
		if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
			tokio::time::sleep(self.policy.rate_limit_pause).await;
		}
		AttemptOutcome::Transient(format!("{status}: {body}"))
	}
}

#[async_trait]
impl TileUploader for UploadClient {
	async fn upload_with_retry(&self, key: &str, data: &[u8]) -> Result<TileOutcome, UploadError> {
		for attempt in 1..=self.policy.max_attempts {
			let token = match self.tokens.pop() {
				Some(token) => token,
				None => match self.acquire_token().await {
					Ok(token) => token,
					Err(UploadError::Transient(message)) => {
						log::error!("Attempt {attempt} exception uploading file {key}: {message}");
						continue;
					}
					Err(error) => return Err(error),
				},
			};

			match self.upload(token, key, data).await {
				AttemptOutcome::Success => {
					log::info!("Success: {key}");
					return Ok(TileOutcome::Succeeded { attempts: attempt });
				}
				AttemptOutcome::AuthExpired => log::error!("Attempt {attempt} failure: {key}: authorization expired"),
				AttemptOutcome::Transient(message) => log::error!("Attempt {attempt} failure: {key}: {message}"),
			}
		}

		log::error!("Failure: {key}");
		Ok(TileOutcome::Failed {
			attempts: self.policy.max_attempts,
		})
	}
}

fn retry_after(response: &Response) -> Option<Duration> {
	let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
	value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
