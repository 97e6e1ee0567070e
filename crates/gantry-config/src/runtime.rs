// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runtime configuration types with resolved defaults.

use std::time::Duration;

use serde::Serialize;

use crate::layer::*;
use crate::paths::PathsConfig;
use crate::secret::SecretString;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";
pub const DEFAULT_SESSION_KEY_PREFIX: &str = "acp";
pub const DEFAULT_DUPLICATE_PREFIX_CHARS: usize = 20;

/// The final, validated configuration.
#[derive(Debug, Clone, Serialize)]
pub struct GantryConfig {
	pub gateway: GatewayConfig,
	pub reconnect: ReconnectConfig,
	pub acp: AcpConfig,
	pub logging: LoggingConfig,

	#[serde(skip)]
	pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayConfig {
	pub url: String,
	pub token: Option<SecretString>,
	pub password: Option<SecretString>,
	#[serde(with = "millis")]
	pub request_timeout: Duration,
	#[serde(with = "millis")]
	pub connect_timeout: Duration,
}

/// Reconnect settings as configured. The gateway crate turns these into an
/// immutable policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectConfig {
	#[serde(with = "millis")]
	pub base_delay: Duration,
	#[serde(with = "millis")]
	pub max_delay: Duration,
	pub backoff_factor: f64,
	/// Fraction of the un-jittered delay added at random.
	pub jitter: f64,
	/// 0 retries forever.
	pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcpConfig {
	pub session_key_prefix: String,
	/// Leading characters compared by the duplicate-suffix heuristic; 0 disables it.
	pub duplicate_prefix_chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
	pub level: LogLevel,
	pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Error,
	Warn,
	#[default]
	Info,
	Debug,
	Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
	Compact,
}

mod millis {
	use serde::Serializer;
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_millis() as u64)
	}
}

impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_GATEWAY_URL.to_string(),
			token: None,
			password: None,
			request_timeout: Duration::from_secs(30),
			connect_timeout: Duration::from_secs(10),
		}
	}
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_millis(1_000),
			max_delay: Duration::from_millis(30_000),
			backoff_factor: 2.0,
			jitter: 0.25,
			max_attempts: 0,
		}
	}
}

impl Default for AcpConfig {
	fn default() -> Self {
		Self {
			session_key_prefix: DEFAULT_SESSION_KEY_PREFIX.to_string(),
			duplicate_prefix_chars: DEFAULT_DUPLICATE_PREFIX_CHARS,
		}
	}
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: LogLevel::Info,
			format: LogFormat::Pretty,
		}
	}
}

impl GantryConfig {
	/// Build runtime config from a merged layer, filling in defaults.
	pub fn from_layer(layer: ConfigLayer, paths: PathsConfig) -> Self {
		Self {
			gateway: build_gateway_config(layer.gateway),
			reconnect: build_reconnect_config(layer.reconnect),
			acp: build_acp_config(layer.acp),
			logging: build_logging_config(layer.logging),
			paths,
		}
	}
}

fn build_gateway_config(layer: Option<GatewayLayer>) -> GatewayConfig {
	let layer = layer.unwrap_or_default();
	let defaults = GatewayConfig::default();
	GatewayConfig {
		url: layer.url.unwrap_or(defaults.url),
		token: layer.token,
		password: layer.password,
		request_timeout: layer
			.request_timeout_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.request_timeout),
		connect_timeout: layer
			.connect_timeout_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.connect_timeout),
	}
}

fn build_reconnect_config(layer: Option<ReconnectLayer>) -> ReconnectConfig {
	let layer = layer.unwrap_or_default();
	let defaults = ReconnectConfig::default();
	ReconnectConfig {
		base_delay: layer
			.base_delay_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.base_delay),
		max_delay: layer
			.max_delay_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.max_delay),
		backoff_factor: layer.backoff_factor.unwrap_or(defaults.backoff_factor),
		jitter: layer.jitter.unwrap_or(defaults.jitter),
		max_attempts: layer.max_attempts.unwrap_or(defaults.max_attempts),
	}
}

fn build_acp_config(layer: Option<AcpLayer>) -> AcpConfig {
	let layer = layer.unwrap_or_default();
	AcpConfig {
		session_key_prefix: layer
			.session_key_prefix
			.unwrap_or_else(|| DEFAULT_SESSION_KEY_PREFIX.to_string()),
		duplicate_prefix_chars: layer
			.duplicate_prefix_chars
			.unwrap_or(DEFAULT_DUPLICATE_PREFIX_CHARS),
	}
}

fn build_logging_config(layer: Option<LoggingLayer>) -> LoggingConfig {
	let layer = layer.unwrap_or_default();
	LoggingConfig {
		level: parse_log_level(layer.level.as_deref()),
		format: parse_log_format(layer.format.as_deref()),
	}
}

fn parse_log_level(s: Option<&str>) -> LogLevel {
	match s.map(str::to_ascii_lowercase).as_deref() {
		Some("error") => LogLevel::Error,
		Some("warn") => LogLevel::Warn,
		Some("debug") => LogLevel::Debug,
		Some("trace") => LogLevel::Trace,
		_ => LogLevel::Info,
	}
}

fn parse_log_format(s: Option<&str>) -> LogFormat {
	match s {
		Some("json") => LogFormat::Json,
		Some("compact") => LogFormat::Compact,
		_ => LogFormat::Pretty,
	}
}
