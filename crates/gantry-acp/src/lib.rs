// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Agent Client Protocol (ACP) front end for the Gateway.
//!
//! This crate exposes an ACP `Agent` to an editor over stdio while every
//! prompt is executed by the Gateway.
//!
//! # Architecture
//!
//! ```text
//! Editor (Client)  <--->  GatewayAcpAgent  <--->  Gateway
//!      stdio              acp::Agent           websocket RPC + events
//! ```
//!
//! The [`GatewayAcpAgent`]:
//! - Maps ACP sessions to Gateway session keys via the [`SessionRegistry`]
//! - Sends prompts as `chat.send` calls and tracks one active run per session
//! - Turns cumulative `chat` deltas into incremental ACP message chunks
//! - Forwards `agent` tool activity as ACP tool call notifications
//! - Fails outstanding prompts when the Gateway link drops

pub mod agent;
pub mod bridge;
pub mod error;
pub mod registry;
pub mod session;

pub use agent::GatewayAcpAgent;
pub use error::AcpError;
pub use registry::SessionRegistry;
pub use session::{ActiveRun, SessionNotificationRequest, SessionRecord};
