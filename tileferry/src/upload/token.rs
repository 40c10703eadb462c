use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt::Debug;

/// Upload authorization handed out by the token endpoint.
///
/// A token stays usable until an upload with it is answered with `401`.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadToken {
	pub upload_url: String,
	pub authorization_token: String,
}

impl Debug for UploadToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UploadToken")
			.field("upload_url", &self.upload_url)
			.finish_non_exhaustive()
	}
}

/// Idle tokens shared by all upload tasks. The most recently returned token is handed out first.
#[derive(Debug, Default)]
pub struct TokenPool {
	tokens: Mutex<Vec<UploadToken>>,
}

impl TokenPool {
	pub fn new() -> TokenPool {
		TokenPool::default()
	}

	pub fn pop(&self) -> Option<UploadToken> {
		self.tokens.lock().pop()
	}

	pub fn push(&self, token: UploadToken) {
		self.tokens.lock().push(token);
	}

	pub fn len(&self) -> usize {
		self.tokens.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.tokens.lock().is_empty()
	}
}
