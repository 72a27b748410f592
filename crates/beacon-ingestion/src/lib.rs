// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Ingestion transports for Beacon.
//!
//! The channel talks to an [`Ingestion`] through [`send_async`]. The
//! standard stack, built by [`default_ingestion`], is:
//!
//! ```text
//! NetworkStateIngestion -> RetryingIngestion -> HttpIngestion
//! ```

pub mod error;
pub mod http;
pub mod ingestion;
pub mod network;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use beacon_common_http::RetryConfig;
use std::sync::Arc;

pub use error::{IngestionError, Result};
pub use http::{hide_secret, HttpIngestion, DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
pub use ingestion::{
	send_async, Ingestion, IngestionRequest, IngestionResponse, ServiceCall, ServiceCallback,
};
pub use network::{NetworkStateIngestion, NetworkStateListener, NetworkStateMonitor};
pub use retry::RetryingIngestion;

/// The gated, retrying HTTP transport.
pub type DefaultIngestion = NetworkStateIngestion<RetryingIngestion<HttpIngestion>>;

pub fn default_ingestion(
	http: HttpIngestion,
	monitor: &NetworkStateMonitor,
	retry: RetryConfig,
) -> Arc<DefaultIngestion> {
	NetworkStateIngestion::new(RetryingIngestion::new(http, retry), monitor)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use wiremock::matchers::method;
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[tokio::test]
	async fn test_default_stack_retries_server_errors() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503))
			.up_to_n_times(2)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.mount(&server)
			.await;

		let monitor = NetworkStateMonitor::new(true);
		let http = HttpIngestion::new(server.uri(), Duration::from_secs(5)).unwrap();
		let retry = RetryConfig {
			intervals: vec![Duration::from_millis(10); 3],
			jitter: false,
		};
		let ingestion = default_ingestion(http, &monitor, retry);

		let response = ingestion.send(&testing::request(2)).await.unwrap();
		assert_eq!(response.status, 200);
		assert_eq!(server.received_requests().await.unwrap().len(), 3);
	}
}
