// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the ACP front end.

use thiserror::Error;

/// Errors that can occur during ACP operations.
#[derive(Debug, Error)]
pub enum AcpError {
	#[error("session not found: {0}")]
	SessionNotFound(String),

	#[error("{0} is not implemented")]
	NotImplemented(&'static str),

	#[error("failed to dispatch prompt to gateway: {0}")]
	GatewayDispatch(String),

	#[error("gateway disconnected: {0}")]
	GatewayDisconnected(String),

	#[error("bridge is shutting down")]
	ShuttingDown,

	#[error("notification channel closed")]
	NotificationChannelClosed,

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl From<AcpError> for agent_client_protocol::Error {
	fn from(err: AcpError) -> Self {
		let detail = serde_json::Value::String(err.to_string());
		let error = match err {
			AcpError::SessionNotFound(_) => agent_client_protocol::Error::invalid_params(),
			AcpError::NotImplemented(_) => agent_client_protocol::Error::method_not_found(),
			_ => agent_client_protocol::Error::internal_error(),
		};
		error.data(detail)
	}
}
