// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reconnection policy with exponential backoff.
//!
//! Everything here is pure: the policy owns no timers and performs no I/O.
//! The connection loop feeds close events into [`ReconnectState`] and sleeps
//! for whatever delay it is told.

use std::time::Duration;

use gantry_config::ReconnectConfig;

use crate::protocol::CloseInfo;

/// Immutable reconnect policy, built once from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
	base_delay: Duration,
	max_delay: Duration,
	backoff_factor: f64,
	jitter: f64,
	max_attempts: u32,
}

/// Caller-supplied overrides applied on top of configuration.
#[derive(Debug, Clone, Default)]
pub struct ReconnectOverrides {
	pub base_delay: Option<Duration>,
	pub max_delay: Option<Duration>,
	pub backoff_factor: Option<f64>,
	pub jitter: Option<f64>,
	pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
	pub fn base_delay(&self) -> Duration {
		self.base_delay
	}

	pub fn max_delay(&self) -> Duration {
		self.max_delay
	}

	pub fn backoff_factor(&self) -> f64 {
		self.backoff_factor
	}

	pub fn jitter(&self) -> f64 {
		self.jitter
	}

	/// 0 means unlimited.
	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		resolve_reconnect_policy(&ReconnectConfig::default(), &ReconnectOverrides::default())
	}
}

/// Merge configuration with overrides into a normalized policy.
///
/// The factor is raised to at least 1, the max delay to at least the base
/// delay, and jitter is clamped to `[0, factor - 1]` so a jittered delay never
/// exceeds the next un-jittered one.
pub fn resolve_reconnect_policy(
	config: &ReconnectConfig,
	overrides: &ReconnectOverrides,
) -> ReconnectPolicy {
	let base_delay = overrides.base_delay.unwrap_or(config.base_delay);
	let max_delay = overrides.max_delay.unwrap_or(config.max_delay).max(base_delay);

	let mut backoff_factor = overrides.backoff_factor.unwrap_or(config.backoff_factor);
	if !backoff_factor.is_finite() || backoff_factor < 1.0 {
		backoff_factor = 1.0;
	}

	let jitter = overrides.jitter.unwrap_or(config.jitter);
	let jitter = if jitter.is_finite() {
		jitter.clamp(0.0, backoff_factor - 1.0)
	} else {
		0.0
	};

	ReconnectPolicy {
		base_delay,
		max_delay,
		backoff_factor,
		jitter,
		max_attempts: overrides.max_attempts.unwrap_or(config.max_attempts),
	}
}

/// Delay before reconnect attempt `attempt` (1-based), with random jitter.
pub fn compute_backoff(policy: &ReconnectPolicy, attempt: u32) -> Duration {
	compute_backoff_with(policy, attempt, fastrand::f64())
}

/// [`compute_backoff`] with the random sample supplied by the caller.
///
/// `sample` is clamped to `[0, 1]`. Attempt 0 is treated as attempt 1.
pub fn compute_backoff_with(policy: &ReconnectPolicy, attempt: u32, sample: f64) -> Duration {
	let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
	let base_ms = policy.base_delay.as_millis() as f64;
	let max_ms = policy.max_delay.as_millis() as f64;

	let sample = if sample.is_nan() {
		0.0
	} else {
		sample.clamp(0.0, 1.0)
	};

	let raw = base_ms * policy.backoff_factor.powi(exponent);
	let jittered = raw * (1.0 + policy.jitter * sample);
	let delay_ms = jittered.min(max_ms);

	Duration::from_millis(delay_ms.round() as u64)
}

/// What the connection loop should do after a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
	Retry { attempt: u32, delay: Duration },
	GiveUp { attempts: u32 },
	LoggedOut,
}

/// Attempt accounting owned by the connection loop.
#[derive(Debug, Default)]
pub struct ReconnectState {
	attempts: u32,
	retry_pending: bool,
}

impl ReconnectState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn retry_pending(&self) -> bool {
		self.retry_pending
	}

	/// A handshake completed.
	pub fn on_connected(&mut self) {
		self.attempts = 0;
		self.retry_pending = false;
	}

	/// The scheduled delay elapsed and a new dial is starting.
	pub fn on_retry_started(&mut self) {
		self.retry_pending = false;
	}

	pub fn on_close(&mut self, policy: &ReconnectPolicy, close: &CloseInfo) -> ReconnectDecision {
		if close.logged_out {
			self.retry_pending = false;
			return ReconnectDecision::LoggedOut;
		}

		if policy.max_attempts > 0 && self.attempts >= policy.max_attempts {
			self.retry_pending = false;
			return ReconnectDecision::GiveUp {
				attempts: self.attempts,
			};
		}

		// A close while a retry is already scheduled does not schedule another.
		if !self.retry_pending {
			self.attempts += 1;
			self.retry_pending = true;
		}

		ReconnectDecision::Retry {
			attempt: self.attempts,
			delay: compute_backoff(policy, self.attempts),
		}
	}
}
