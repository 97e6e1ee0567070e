// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: files, environment, CLI, defaults.

use std::path::PathBuf;

use tracing::{debug, trace, warn};

use crate::layer::*;
use crate::paths::PathsConfig;
use crate::secret::load_secret_env;
use crate::ConfigError;

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	SystemFile = 20,
	UserFile = 30,
	ExplicitFile = 40,
	Environment = 50,
	Cli = 60,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;

	fn precedence(&self) -> Precedence;

	fn load(&self) -> Result<ConfigLayer, ConfigError>;
}

/// Built-in defaults are applied when the runtime config is built, so this
/// source contributes an empty layer.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		Ok(ConfigLayer::default())
	}
}

pub struct FileSource {
	path: PathBuf,
	precedence: Precedence,
	name: &'static str,
	required: bool,
}

impl FileSource {
	pub fn system() -> Self {
		Self {
			path: PathBuf::from(crate::paths::SYSTEM_CONFIG_FILE),
			precedence: Precedence::SystemFile,
			name: "system-config",
			required: false,
		}
	}

	pub fn user(paths: &PathsConfig) -> Self {
		Self {
			path: paths.user_config_file.clone(),
			precedence: Precedence::UserFile,
			name: "user-config",
			required: false,
		}
	}

	/// A file named on the command line. Unlike the implicit files it must exist.
	pub fn explicit(path: PathBuf) -> Self {
		Self {
			path,
			precedence: Precedence::ExplicitFile,
			name: "explicit-config",
			required: true,
		}
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		self.name
	}
	fn precedence(&self) -> Precedence {
		self.precedence
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		if !self.path.exists() {
			if self.required {
				return Err(ConfigError::Io(std::io::Error::new(
					std::io::ErrorKind::NotFound,
					format!("config file not found: {}", self.path.display()),
				)));
			}
			debug!(path = %self.path.display(), source = self.name, "config file not found, skipping");
			return Ok(ConfigLayer::default());
		}

		debug!(path = %self.path.display(), source = self.name, "loading config file");

		let content = std::fs::read_to_string(&self.path)?;
		let layer: ConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!(source = self.name, "parsed config layer");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `GANTRY_<SECTION>_<FIELD>`. Credentials also accept `_FILE`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading environment variables");
		let mut layer = ConfigLayer::default();

		if let Some(token) = load_secret_env("GANTRY_GATEWAY_TOKEN")? {
			trace!("loaded gateway token from environment");
			gateway(&mut layer).token = Some(token);
		}
		if let Some(password) = load_secret_env("GANTRY_GATEWAY_PASSWORD")? {
			trace!("loaded gateway password from environment");
			gateway(&mut layer).password = Some(password);
		}

		for (key, value) in std::env::vars() {
			if !key.starts_with("GANTRY_") {
				continue;
			}

			let value = value.trim().to_string();
			if value.is_empty() {
				continue;
			}

			match key.as_str() {
				"GANTRY_GATEWAY_URL" => gateway(&mut layer).url = Some(value),
				"GANTRY_GATEWAY_REQUEST_TIMEOUT_MS" => {
					gateway(&mut layer).request_timeout_ms = parse_env(&key, &value)
				}
				"GANTRY_GATEWAY_CONNECT_TIMEOUT_MS" => {
					gateway(&mut layer).connect_timeout_ms = parse_env(&key, &value)
				}
				"GANTRY_RECONNECT_BASE_DELAY_MS" => {
					reconnect(&mut layer).base_delay_ms = parse_env(&key, &value)
				}
				"GANTRY_RECONNECT_MAX_DELAY_MS" => {
					reconnect(&mut layer).max_delay_ms = parse_env(&key, &value)
				}
				"GANTRY_RECONNECT_BACKOFF_FACTOR" => {
					reconnect(&mut layer).backoff_factor = parse_env(&key, &value)
				}
				"GANTRY_RECONNECT_JITTER" => reconnect(&mut layer).jitter = parse_env(&key, &value),
				"GANTRY_RECONNECT_MAX_ATTEMPTS" => {
					reconnect(&mut layer).max_attempts = parse_env(&key, &value)
				}
				"GANTRY_ACP_SESSION_KEY_PREFIX" => {
					layer
						.acp
						.get_or_insert_with(AcpLayer::default)
						.session_key_prefix = Some(value)
				}
				"GANTRY_ACP_DUPLICATE_PREFIX_CHARS" => {
					layer
						.acp
						.get_or_insert_with(AcpLayer::default)
						.duplicate_prefix_chars = parse_env(&key, &value)
				}
				"GANTRY_LOG_LEVEL" => {
					layer
						.logging
						.get_or_insert_with(LoggingLayer::default)
						.level = Some(value)
				}
				"GANTRY_LOG_FORMAT" => {
					layer
						.logging
						.get_or_insert_with(LoggingLayer::default)
						.format = Some(value)
				}
				_ => {}
			}
		}

		Ok(layer)
	}
}

fn gateway(layer: &mut ConfigLayer) -> &mut GatewayLayer {
	layer.gateway.get_or_insert_with(GatewayLayer::default)
}

fn reconnect(layer: &mut ConfigLayer) -> &mut ReconnectLayer {
	layer.reconnect.get_or_insert_with(ReconnectLayer::default)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
	match value.parse() {
		Ok(v) => Some(v),
		Err(_) => {
			warn!(key = %key, value = %value, "ignoring unparseable environment value");
			None
		}
	}
}

/// Overrides taken from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub config_file: Option<PathBuf>,
	pub gateway_url: Option<String>,
	pub gateway_token: Option<String>,
	pub gateway_password: Option<String>,
	pub log_level: Option<String>,
	pub log_format: Option<String>,
}

pub struct CliSource {
	overrides: CliOverrides,
}

impl CliSource {
	pub fn new(overrides: CliOverrides) -> Self {
		Self { overrides }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading CLI overrides");
		let mut layer = ConfigLayer::default();
		let cli = &self.overrides;

		if let Some(ref url) = cli.gateway_url {
			gateway(&mut layer).url = Some(url.clone());
		}
		if let Some(ref token) = cli.gateway_token {
			gateway(&mut layer).token = Some(crate::Secret::new(token.clone()));
		}
		if let Some(ref password) = cli.gateway_password {
			gateway(&mut layer).password = Some(crate::Secret::new(password.clone()));
		}
		if cli.log_level.is_some() || cli.log_format.is_some() {
			let logging = layer.logging.get_or_insert_with(LoggingLayer::default);
			logging.level = cli.log_level.clone();
			logging.format = cli.log_format.clone();
		}

		Ok(layer)
	}
}
