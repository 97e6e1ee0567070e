// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RPC correlation over the Gateway link.
//!
//! [`GatewayClient`] is a cheap handle shared by every caller. It survives
//! reconnects: the connection loop attaches a fresh outbound channel after
//! each handshake and detaches it (failing every in-flight call) on close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::GatewayError;
use crate::protocol::{Frame, RequestFrame, ResponseFrame};

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
	/// Skip interim `accepted` acknowledgements and wait for the final
	/// response. Expect-final calls are not subject to a timeout.
	pub expect_final: bool,
	/// Overrides the client's default request timeout.
	pub timeout: Option<Duration>,
}

impl RequestOptions {
	pub fn expect_final() -> Self {
		Self {
			expect_final: true,
			timeout: None,
		}
	}
}

/// The RPC surface the translator needs from the Gateway.
#[async_trait]
pub trait GatewayRpc: Send + Sync {
	async fn request(
		&self,
		method: &str,
		params: Value,
		options: RequestOptions,
	) -> Result<Value, GatewayError>;
}

pub(crate) type RpcResult = Result<Value, GatewayError>;

struct PendingCall {
	method: String,
	expect_final: bool,
	tx: oneshot::Sender<RpcResult>,
}

type PendingCalls = HashMap<String, PendingCall>;

#[derive(Clone)]
pub struct GatewayClient {
	inner: Arc<ClientInner>,
}

struct ClientInner {
	outbound: tokio::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
	pending: Mutex<PendingCalls>,
	request_timeout: Duration,
}

impl GatewayClient {
	pub fn new(request_timeout: Duration) -> Self {
		Self {
			inner: Arc::new(ClientInner {
				outbound: tokio::sync::Mutex::new(None),
				pending: Mutex::new(HashMap::new()),
				request_timeout,
			}),
		}
	}

	pub async fn is_connected(&self) -> bool {
		self.inner.outbound.lock().await.is_some()
	}

	pub(crate) async fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
		*self.inner.outbound.lock().await = Some(outbound);
	}

	/// Detach the outbound channel and fail every in-flight call.
	pub(crate) async fn detach(&self, reason: &str) {
		self.inner.outbound.lock().await.take();
		self.fail_all(reason);
	}

	/// Register a call and build its serialized frame without sending it.
	pub(crate) fn prepare(
		&self,
		method: &str,
		params: Value,
		expect_final: bool,
	) -> Result<(String, String, oneshot::Receiver<RpcResult>), GatewayError> {
		let id = uuid::Uuid::new_v4().to_string();
		let frame = Frame::Request(RequestFrame {
			id: id.clone(),
			method: method.to_string(),
			params,
		});
		let text = serde_json::to_string(&frame)?;

		let (tx, rx) = oneshot::channel();
		self.inner.pending.lock().insert(
			id.clone(),
			PendingCall {
				method: method.to_string(),
				expect_final,
				tx,
			},
		);

		Ok((id, text, rx))
	}

	pub(crate) fn forget(&self, id: &str) {
		self.inner.pending.lock().remove(id);
	}

	/// Route a response frame to its caller.
	pub(crate) fn handle_response(&self, response: ResponseFrame) {
		let mut pending = self.inner.pending.lock();

		let Some(call) = pending.get(&response.id) else {
			trace!(id = %response.id, "response for unknown request");
			return;
		};

		if call.expect_final && response.is_accepted_ack() {
			debug!(id = %response.id, method = %call.method, "request accepted, awaiting final response");
			return;
		}

		let Some(call) = pending.remove(&response.id) else {
			return;
		};
		drop(pending);

		let result = if response.ok {
			Ok(response.payload.unwrap_or(Value::Null))
		} else {
			let error = response.error.unwrap_or_default();
			Err(GatewayError::Rpc {
				method: call.method,
				code: error.code,
				message: error.message,
			})
		};

		let _ = call.tx.send(result);
	}

	pub(crate) fn fail_all(&self, reason: &str) {
		let drained: Vec<_> = self.inner.pending.lock().drain().collect();
		if !drained.is_empty() {
			debug!(count = drained.len(), reason, "failing in-flight gateway requests");
		}
		for (_, call) in drained {
			let _ = call.tx.send(Err(GatewayError::Disconnected(reason.to_string())));
		}
	}

	#[cfg(test)]
	pub(crate) fn pending_count(&self) -> usize {
		self.inner.pending.lock().len()
	}
}

/// Removes a call from the pending map unless it completed. Covers timeouts
/// and callers that drop the request future, such as a finished prompt.
struct ForgetOnDrop<'a> {
	client: &'a GatewayClient,
	id: Option<String>,
}

impl ForgetOnDrop<'_> {
	fn disarm(mut self) {
		self.id = None;
	}
}

impl Drop for ForgetOnDrop<'_> {
	fn drop(&mut self) {
		if let Some(id) = self.id.take() {
			self.client.forget(&id);
		}
	}
}

#[async_trait]
impl GatewayRpc for GatewayClient {
	async fn request(
		&self,
		method: &str,
		params: Value,
		options: RequestOptions,
	) -> Result<Value, GatewayError> {
		let outbound = self
			.inner
			.outbound
			.lock()
			.await
			.clone()
			.ok_or(GatewayError::NotConnected)?;

		let (id, text, rx) = self.prepare(method, params, options.expect_final)?;
		let guard = ForgetOnDrop {
			client: self,
			id: Some(id.clone()),
		};

		if outbound.send(text).is_err() {
			return Err(GatewayError::Disconnected("link closed".to_string()));
		}

		trace!(id = %id, method, "gateway request sent");

		let received = if options.expect_final {
			rx.await
		} else {
			let limit = options.timeout.unwrap_or(self.inner.request_timeout);
			match timeout(limit, rx).await {
				Ok(received) => received,
				Err(_) => {
					warn!(id = %id, method, timeout_ms = limit.as_millis() as u64, "gateway request timed out");
					return Err(GatewayError::Timeout {
						method: method.to_string(),
					});
				}
			}
		};
		guard.disarm();

		received.map_err(|_| GatewayError::Disconnected("request dropped".to_string()))?
	}
}
