// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::EngineClient;
use crate::error::ReadinessError;

/// Linear backoff: `min(base * attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	pub base: Duration,
	pub cap: Duration,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(20),
			cap: Duration::from_secs(600),
		}
	}
}

impl Backoff {
	/// Delay before retry number `attempt`, counting from 1.
	pub fn delay(&self, attempt: u32) -> Duration {
		self.base.saturating_mul(attempt.max(1)).min(self.cap)
	}
}

/// Blocks until the container engine answers a probe.
pub struct ReadinessMonitor {
	engine: Arc<dyn EngineClient>,
	backoff: Backoff,
	cancel: CancellationToken,
}

impl ReadinessMonitor {
	pub fn new(engine: Arc<dyn EngineClient>, backoff: Backoff, cancel: CancellationToken) -> Self {
		Self {
			engine,
			backoff,
			cancel,
		}
	}

	/// Returns the number of retries it took.
	///
	/// Only "engine not started" errors are retried. Anything else, such as a
	/// permission error on the socket, is fatal immediately.
	#[instrument(skip(self))]
	pub async fn wait_until_ready(&self) -> Result<u32, ReadinessError> {
		let mut attempt: u32 = 0;

		loop {
			if self.cancel.is_cancelled() {
				return Err(ReadinessError::Cancelled);
			}

			let err = match self.engine.ping().await {
				Ok(()) => {
					if attempt > 0 {
						info!(retries = attempt, "container engine is ready");
					} else {
						debug!("container engine is ready");
					}
					return Ok(attempt);
				}
				Err(e) => e,
			};

			if !err.is_engine_not_running() {
				warn!(error = %err, "container engine probe failed");
				return Err(ReadinessError::Fatal(err));
			}

			attempt = attempt.saturating_add(1);
			let delay = self.backoff.delay(attempt);
			info!(
				attempt,
				delay_secs = delay.as_secs(),
				"container engine not running, retrying"
			);

			tokio::select! {
				biased;

				_ = self.cancel.cancelled() => {
					debug!("readiness wait cancelled");
					return Err(ReadinessError::Cancelled);
				}

				_ = tokio::time::sleep(delay) => {}
			}
		}
	}
}
