// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the gantry ACP bridge.
//!
//! Configuration is assembled from layered sources, lowest precedence first:
//! built-in defaults, `/etc/gantry/config.toml`, the XDG user file, an
//! explicit `--config` file, `GANTRY_*` environment variables, and finally
//! command-line overrides.

pub mod error;
pub mod layer;
pub mod paths;
pub mod registry;
pub mod runtime;
pub mod secret;
pub mod sources;
pub mod validation;

pub use error::ConfigError;
pub use layer::ConfigLayer;
pub use paths::PathsConfig;
pub use registry::ConfigRegistry;
pub use runtime::{
	AcpConfig, GantryConfig, GatewayConfig, LogFormat, LogLevel, LoggingConfig, ReconnectConfig,
};
pub use secret::{load_secret_env, Secret, SecretEnvError, SecretString, REDACTED};
pub use sources::{CliOverrides, ConfigSource, Precedence};

/// Load configuration from every source, applying CLI overrides last.
pub fn load_config_with_cli(cli: CliOverrides) -> Result<GantryConfig, ConfigError> {
	let paths = paths::resolve_xdg_paths()?;

	let mut registry = ConfigRegistry::new();

	registry.register(Box::new(sources::DefaultsSource));
	registry.register(Box::new(sources::FileSource::system()));
	registry.register(Box::new(sources::FileSource::user(&paths)));
	if let Some(ref path) = cli.config_file {
		registry.register(Box::new(sources::FileSource::explicit(path.clone())));
	}
	registry.register(Box::new(sources::EnvSource));
	registry.register(Box::new(sources::CliSource::new(cli)));

	registry.load(paths)
}
