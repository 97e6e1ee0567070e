// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::secret::SecretString;

/// Partial configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
	#[serde(default)]
	pub gateway: Option<GatewayLayer>,
	#[serde(default)]
	pub reconnect: Option<ReconnectLayer>,
	#[serde(default)]
	pub acp: Option<AcpLayer>,
	#[serde(default)]
	pub logging: Option<LoggingLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub token: Option<SecretString>,
	#[serde(default)]
	pub password: Option<SecretString>,
	#[serde(default)]
	pub request_timeout_ms: Option<u64>,
	#[serde(default)]
	pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconnectLayer {
	#[serde(default)]
	pub base_delay_ms: Option<u64>,
	#[serde(default)]
	pub max_delay_ms: Option<u64>,
	#[serde(default)]
	pub backoff_factor: Option<f64>,
	#[serde(default)]
	pub jitter: Option<f64>,
	#[serde(default)]
	pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcpLayer {
	#[serde(default)]
	pub session_key_prefix: Option<String>,
	#[serde(default)]
	pub duplicate_prefix_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingLayer {
	#[serde(default)]
	pub level: Option<String>,
	#[serde(default)]
	pub format: Option<String>,
}

impl ConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ConfigLayer) {
		merge_option(&mut self.gateway, other.gateway, GatewayLayer::merge);
		merge_option(&mut self.reconnect, other.reconnect, ReconnectLayer::merge);
		merge_option(&mut self.acp, other.acp, AcpLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

fn take<T>(target: &mut Option<T>, source: Option<T>) {
	if source.is_some() {
		*target = source;
	}
}

impl GatewayLayer {
	fn merge(&mut self, other: GatewayLayer) {
		take(&mut self.url, other.url);
		take(&mut self.token, other.token);
		take(&mut self.password, other.password);
		take(&mut self.request_timeout_ms, other.request_timeout_ms);
		take(&mut self.connect_timeout_ms, other.connect_timeout_ms);
	}
}

impl ReconnectLayer {
	fn merge(&mut self, other: ReconnectLayer) {
		take(&mut self.base_delay_ms, other.base_delay_ms);
		take(&mut self.max_delay_ms, other.max_delay_ms);
		take(&mut self.backoff_factor, other.backoff_factor);
		take(&mut self.jitter, other.jitter);
		take(&mut self.max_attempts, other.max_attempts);
	}
}

impl AcpLayer {
	fn merge(&mut self, other: AcpLayer) {
		take(&mut self.session_key_prefix, other.session_key_prefix);
		take(&mut self.duplicate_prefix_chars, other.duplicate_prefix_chars);
	}
}

impl LoggingLayer {
	fn merge(&mut self, other: LoggingLayer) {
		take(&mut self.level, other.level);
		take(&mut self.format, other.format);
	}
}
