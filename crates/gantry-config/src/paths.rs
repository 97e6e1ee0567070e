// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! XDG path resolution for config files.

use std::path::PathBuf;

use crate::ConfigError;

pub const SYSTEM_CONFIG_FILE: &str = "/etc/gantry/config.toml";

#[derive(Debug, Clone)]
pub struct PathsConfig {
	/// `$XDG_CONFIG_HOME/gantry/config.toml`
	pub user_config_file: PathBuf,
	/// `/etc/gantry/config.toml`
	pub system_config_file: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self {
			user_config_file: PathBuf::from("~/.config/gantry/config.toml"),
			system_config_file: PathBuf::from(SYSTEM_CONFIG_FILE),
		}
	}
}

/// Resolve config paths, honouring `XDG_CONFIG_HOME` when set.
pub fn resolve_xdg_paths() -> Result<PathsConfig, ConfigError> {
	let config_home = match std::env::var_os("XDG_CONFIG_HOME") {
		Some(dir) if !dir.is_empty() => PathBuf::from(dir),
		_ => dirs::home_dir()
			.ok_or(ConfigError::HomeDirNotFound)?
			.join(".config"),
	};

	tracing::debug!(config_home = %config_home.display(), "resolved XDG config home");

	Ok(PathsConfig {
		user_config_file: config_home.join("gantry/config.toml"),
		system_config_file: PathBuf::from(SYSTEM_CONFIG_FILE),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_resolved_user_file_is_namespaced() {
		let paths = resolve_xdg_paths().unwrap();
		assert!(paths.user_config_file.ends_with("gantry/config.toml"));
		assert_eq!(paths.system_config_file, PathBuf::from(SYSTEM_CONFIG_FILE));
	}
}
