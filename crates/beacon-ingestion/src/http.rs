// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP ingestion against the `/logs` endpoint.

use async_trait::async_trait;
use beacon_common_http::{new_client_with_timeout, RETRY_AFTER_MS_HEADER};
use reqwest::{Client, Url};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{IngestionError, Result};
use crate::ingestion::{Ingestion, IngestionRequest, IngestionResponse};

pub const DEFAULT_BASE_URL: &str = "https://in.beacon.dev";
pub const LOGS_PATH: &str = "/logs?api-version=1.0.0";
pub const APP_SECRET_HEADER: &str = "App-Secret";
pub const INSTALL_ID_HEADER: &str = "Install-ID";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters of a secret left visible in logs.
const VISIBLE_SECRET_CHARS: usize = 8;

pub struct HttpIngestion {
	client: Client,
	base_url: String,
	closed: AtomicBool,
}

impl HttpIngestion {
	pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
		let base_url = base_url.into();
		Url::parse(&base_url).map_err(|e| IngestionError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
		let client = new_client_with_timeout(timeout)?;
		Ok(Self::with_client(client, base_url))
	}

	pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
		Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			closed: AtomicBool::new(false),
		}
	}

	pub fn logs_url(&self) -> String {
		format!("{}{LOGS_PATH}", self.base_url)
	}
}

#[async_trait]
impl Ingestion for HttpIngestion {
	async fn send(&self, request: &IngestionRequest) -> Result<IngestionResponse> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(IngestionError::Cancelled);
		}

		let url = self.logs_url();
		debug!(
			url = %url,
			count = request.logs.len(),
			app_secret = %hide_secret(&request.app_secret),
			install_id = %request.install_id,
			"sending logs"
		);

		let response = self
			.client
			.post(&url)
			.header(APP_SECRET_HEADER, &request.app_secret)
			.header(INSTALL_ID_HEADER, request.install_id.to_string())
			.json(&request.logs)
			.send()
			.await?;

		let status = response.status();
		let retry_after = response
			.headers()
			.get(RETRY_AFTER_MS_HEADER)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.trim().parse::<u64>().ok())
			.map(Duration::from_millis);
		let body = response.text().await.unwrap_or_default();

		if status.is_success() {
			debug!(status = status.as_u16(), "logs accepted");
			return Ok(IngestionResponse {
				status: status.as_u16(),
				body,
			});
		}

		warn!(status = status.as_u16(), body = %body, "ingestion rejected logs");
		Err(IngestionError::Http {
			status: status.as_u16(),
			body,
			retry_after,
		})
	}

	async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}

	async fn reopen(&self) {
		self.closed.store(false, Ordering::SeqCst);
	}
}

/// Masks all but the last few characters of a secret.
pub fn hide_secret(secret: &str) -> String {
	let chars: Vec<char> = secret.chars().collect();
	let hidden = chars.len().saturating_sub(VISIBLE_SECRET_CHARS);
	std::iter::repeat('*')
		.take(hidden)
		.chain(chars[hidden..].iter().copied())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::request;
	use wiremock::matchers::{body_partial_json, header, method, path, query_param};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn ingestion(server: &MockServer) -> HttpIngestion {
		HttpIngestion::new(server.uri(), Duration::from_secs(5)).unwrap()
	}

	#[tokio::test]
	async fn test_posts_logs_with_headers() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/logs"))
			.and(query_param("api-version", "1.0.0"))
			.and(header(APP_SECRET_HEADER, "test-secret"))
			.and(header(INSTALL_ID_HEADER, "00000000-0000-0000-0000-000000000000"))
			.and(body_partial_json(serde_json::json!({"logs": [{"type": "event"}]})))
			.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
			.expect(1)
			.mount(&server)
			.await;

		let response = ingestion(&server).send(&request(1)).await.unwrap();
		assert_eq!(response.status, 200);
		assert_eq!(response.body, "ok");
	}

	#[tokio::test]
	async fn test_server_error_carries_retry_after() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(
				ResponseTemplate::new(503)
					.insert_header(RETRY_AFTER_MS_HEADER, "2500")
					.set_body_string("busy"),
			)
			.mount(&server)
			.await;

		let err = ingestion(&server).send(&request(1)).await.unwrap_err();
		match err {
			IngestionError::Http {
				status,
				body,
				retry_after,
			} => {
				assert_eq!(status, 503);
				assert_eq!(body, "busy");
				assert_eq!(retry_after, Some(Duration::from_millis(2500)));
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_bad_request_is_terminal() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(400))
			.mount(&server)
			.await;

		let err = ingestion(&server).send(&request(1)).await.unwrap_err();
		assert!(!err.is_recoverable());
	}

	#[tokio::test]
	async fn test_unreachable_server_is_recoverable() {
		let server = MockServer::start().await;
		let uri = server.uri();
		drop(server);

		let err = HttpIngestion::new(uri, Duration::from_secs(2))
			.unwrap()
			.send(&request(1))
			.await
			.unwrap_err();
		assert!(matches!(err, IngestionError::Network(_)));
		assert!(err.is_recoverable());
	}

	#[tokio::test]
	async fn test_closed_ingestion_rejects_calls() {
		let server = MockServer::start().await;
		let ingestion = ingestion(&server);
		ingestion.close().await;
		assert!(matches!(
			ingestion.send(&request(1)).await,
			Err(IngestionError::Cancelled)
		));

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.mount(&server)
			.await;
		ingestion.reopen().await;
		assert!(ingestion.send(&request(1)).await.is_ok());
	}

	#[test]
	fn test_invalid_base_url() {
		assert!(matches!(
			HttpIngestion::new("not a url", Duration::from_secs(1)),
			Err(IngestionError::InvalidBaseUrl(_))
		));
	}

	#[test]
	fn test_hide_secret() {
		assert_eq!(hide_secret("0123456789abcdef"), "********89abcdef");
		assert_eq!(hide_secret("short"), "short");
	}
}
