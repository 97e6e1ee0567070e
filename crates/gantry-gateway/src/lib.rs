// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client side of the Gateway link.
//!
//! The Gateway is reached over a single websocket that carries
//! request/response RPC calls and pushed event frames. This crate owns that
//! link:
//!
//! - [`protocol`]: frame and payload types
//! - [`client`]: RPC correlation ([`GatewayRpc`], [`GatewayClient`])
//! - [`connection`]: the connection loop that dials, handshakes and reconnects
//! - [`reconnect`]: the pure backoff policy the loop consults

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod reconnect;

pub use client::{GatewayClient, GatewayRpc, RequestOptions};
pub use connection::{
	spawn_connection, ConnectionConfig, ConnectionEvent, ConnectionHandle, StopReason,
};
pub use error::GatewayError;
pub use protocol::{CloseInfo, EventFrame};
pub use reconnect::{
	compute_backoff, compute_backoff_with, resolve_reconnect_policy, ReconnectDecision,
	ReconnectOverrides, ReconnectPolicy, ReconnectState,
};
