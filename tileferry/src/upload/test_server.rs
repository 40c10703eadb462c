//! In-process token and upload endpoints for tests, bound to `127.0.0.1:0`.

use axum::{
	Router,
	body::Bytes,
	extract::State,
	http::{HeaderMap, StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use parking_lot::Mutex;
use std::{
	collections::VecDeque,
	sync::{
		Arc,
		atomic::{AtomicU32, AtomicUsize, Ordering},
	},
	time::Duration,
};

pub const ACCESS_KEY: &str = "test-access-key";

#[derive(Clone, Debug)]
pub struct RecordedUpload {
	pub key: String,
	pub authorization: String,
	pub sha1: String,
	pub content_type: String,
	pub headers: HeaderMap,
	pub body: Vec<u8>,
}

/// Scripted answers. Once a script is used up, tokens are granted and uploads get
/// `upload_default`.
#[derive(Debug)]
pub struct Behavior {
	pub token_responses: VecDeque<(u16, Option<&'static str>)>,
	pub upload_responses: VecDeque<u16>,
	pub upload_default: u16,
	pub upload_delay: Duration,
}

impl Default for Behavior {
	fn default() -> Self {
		Behavior {
			token_responses: VecDeque::new(),
			upload_responses: VecDeque::new(),
			upload_default: 200,
			upload_delay: Duration::ZERO,
		}
	}
}

struct MockState {
	base: String,
	behavior: Mutex<Behavior>,
	token_requests: AtomicU32,
	uploads: Mutex<Vec<RecordedUpload>>,
	in_flight: AtomicUsize,
	peak_in_flight: AtomicUsize,
}

pub struct MockServer {
	state: Arc<MockState>,
}

impl MockServer {
	pub async fn start(behavior: Behavior) -> MockServer {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let base = format!("http://{}", listener.local_addr().unwrap());

		let state = Arc::new(MockState {
			base,
			behavior: Mutex::new(behavior),
			token_requests: AtomicU32::new(0),
			uploads: Mutex::new(Vec::new()),
			in_flight: AtomicUsize::new(0),
			peak_in_flight: AtomicUsize::new(0),
		});

		let router = Router::new()
			.route("/token", get(token))
			.route("/upload", post(upload))
			.with_state(state.clone());
		tokio::spawn(async move {
			axum::serve(listener, router.into_make_service()).await.unwrap();
		});

		MockServer { state }
	}

	pub fn token_url(&self) -> String {
		format!("{}/token", self.state.base)
	}

	pub fn token_requests(&self) -> u32 {
		self.state.token_requests.load(Ordering::SeqCst)
	}

	pub fn uploads(&self) -> Vec<RecordedUpload> {
		self.state.uploads.lock().clone()
	}

	pub fn uploaded_keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.uploads().into_iter().map(|upload| upload.key).collect();
		keys.sort();
		keys
	}

	pub fn peak_in_flight(&self) -> usize {
		self.state.peak_in_flight.load(Ordering::SeqCst)
	}
}

async fn token(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
	let number = state.token_requests.fetch_add(1, Ordering::SeqCst) + 1;

	if header_str(&headers, header::AUTHORIZATION.as_str()) != ACCESS_KEY {
		return (StatusCode::FORBIDDEN, "bad access key").into_response();
	}

	let scripted = state.behavior.lock().token_responses.pop_front();
	if let Some((status, retry_after)) = scripted {
		let status = StatusCode::from_u16(status).unwrap();
		if status != StatusCode::OK {
			let mut response = (status, "try again").into_response();
			if let Some(seconds) = retry_after {
				response.headers_mut().insert(header::RETRY_AFTER, seconds.parse().unwrap());
			}
			return response;
		}
	}

	let body = serde_json::json!({
		"uploadUrl": format!("{}/upload", state.base),
		"authorizationToken": format!("token-{number}"),
	});
	([(header::CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

async fn upload(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
	let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
	state.peak_in_flight.fetch_max(current, Ordering::SeqCst);

	state.uploads.lock().push(RecordedUpload {
		key: header_str(&headers, "x-bz-file-name"),
		authorization: header_str(&headers, header::AUTHORIZATION.as_str()),
		sha1: header_str(&headers, "x-bz-content-sha1"),
		content_type: header_str(&headers, header::CONTENT_TYPE.as_str()),
		headers: headers.clone(),
		body: body.to_vec(),
	});

	let (status, delay) = {
		let mut behavior = state.behavior.lock();
		let status = behavior.upload_responses.pop_front().unwrap_or(behavior.upload_default);
		(status, behavior.upload_delay)
	};
	if !delay.is_zero() {
		tokio::time::sleep(delay).await;
	}

	state.in_flight.fetch_sub(1, Ordering::SeqCst);
	(StatusCode::from_u16(status).unwrap(), format!("status {status}")).into_response()
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
	headers
		.get(name)
		.and_then(|value| value.to_str().ok())
		.unwrap_or_default()
		.to_string()
}
