// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry/backoff decorator.

use async_trait::async_trait;
use beacon_common_http::RetryConfig;

use crate::error::Result;
use crate::ingestion::{Ingestion, IngestionRequest, IngestionResponse};

/// Retries recoverable failures of the wrapped transport on the
/// configured interval table. Dropping a send cancels the running attempt
/// and any backoff sleep.
pub struct RetryingIngestion<I> {
	inner: I,
	config: RetryConfig,
}

impl<I: Ingestion> RetryingIngestion<I> {
	pub fn new(inner: I, config: RetryConfig) -> Self {
		Self { inner, config }
	}

	pub fn inner(&self) -> &I {
		&self.inner
	}
}

#[async_trait]
impl<I: Ingestion> Ingestion for RetryingIngestion<I> {
	async fn send(&self, request: &IngestionRequest) -> Result<IngestionResponse> {
		beacon_common_http::retry(&self.config, || self.inner.send(request)).await
	}

	async fn close(&self) {
		self.inner.close().await
	}

	async fn reopen(&self) {
		self.inner.reopen().await
	}
}
