// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration validation rules.

use tracing::warn;
use url::Url;

use crate::runtime::GantryConfig;
use crate::ConfigError;

pub fn validate_config(config: &GantryConfig) -> Result<(), ConfigError> {
	validate_gateway(config)?;
	validate_reconnect(config)?;
	validate_acp(config)?;

	Ok(())
}

fn validate_gateway(config: &GantryConfig) -> Result<(), ConfigError> {
	let gateway = &config.gateway;

	let url = Url::parse(&gateway.url).map_err(|e| {
		ConfigError::invalid_value("gateway.url", format!("'{}' is not a URL: {e}", gateway.url))
	})?;
	if !matches!(url.scheme(), "ws" | "wss") {
		return Err(ConfigError::invalid_value(
			"gateway.url",
			format!("expected a ws:// or wss:// URL, got '{}'", gateway.url),
		));
	}

	if gateway.token.is_none() && gateway.password.is_none() {
		warn!("no gateway token or password configured; relying on an open gateway");
	}

	if gateway.request_timeout.is_zero() {
		return Err(ConfigError::invalid_value(
			"gateway.request_timeout_ms",
			"must be greater than 0",
		));
	}

	Ok(())
}

fn validate_reconnect(config: &GantryConfig) -> Result<(), ConfigError> {
	let reconnect = &config.reconnect;

	if reconnect.base_delay.is_zero() {
		return Err(ConfigError::invalid_value(
			"reconnect.base_delay_ms",
			"must be greater than 0",
		));
	}

	if reconnect.max_delay < reconnect.base_delay {
		return Err(ConfigError::invalid_value(
			"reconnect.max_delay_ms",
			"must be at least base_delay_ms",
		));
	}

	if !(reconnect.backoff_factor >= 1.0) {
		return Err(ConfigError::invalid_value(
			"reconnect.backoff_factor",
			"must be at least 1.0",
		));
	}

	if !(reconnect.jitter >= 0.0) {
		return Err(ConfigError::invalid_value(
			"reconnect.jitter",
			"must not be negative",
		));
	}

	Ok(())
}

fn validate_acp(config: &GantryConfig) -> Result<(), ConfigError> {
	if config.acp.session_key_prefix.trim().is_empty() {
		return Err(ConfigError::invalid_value(
			"acp.session_key_prefix",
			"cannot be empty",
		));
	}

	Ok(())
}
