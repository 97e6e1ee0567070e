// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
	#[error("gateway is not connected")]
	NotConnected,

	#[error("gateway disconnected: {0}")]
	Disconnected(String),

	#[error("gateway request '{method}' timed out")]
	Timeout { method: String },

	#[error("gateway request '{method}' failed: {code}: {message}")]
	Rpc {
		method: String,
		code: String,
		message: String,
	},

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}
