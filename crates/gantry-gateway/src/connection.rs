// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The connection loop: exclusive owner of the physical Gateway link.
//!
//! It dials, performs the `connect` handshake, pumps frames, and on every
//! close consults [`ReconnectState`]. Everything a consumer needs to know is
//! published as a single ordered stream of [`ConnectionEvent`]s.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gantry_config::{GatewayConfig, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::client::GatewayClient;
use crate::protocol::{
	AuthParams, ClientInfo, CloseInfo, ConnectParams, EventFrame, Frame, RequestFrame, CLOSE_NORMAL,
	EVENT_CONNECT_CHALLENGE, METHOD_CONNECT, PROTOCOL_VERSION,
};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
use crate::GatewayError;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
	pub url: String,
	pub token: Option<SecretString>,
	pub password: Option<SecretString>,
	pub connect_timeout: Duration,
	pub request_timeout: Duration,
	pub client_id: String,
	pub client_version: String,
}

impl ConnectionConfig {
	pub fn from_gateway_config(config: &GatewayConfig) -> Self {
		Self {
			url: config.url.clone(),
			token: config.token.clone(),
			password: config.password.clone(),
			connect_timeout: config.connect_timeout,
			request_timeout: config.request_timeout,
			client_id: "gantry".to_string(),
			client_version: env!("CARGO_PKG_VERSION").to_string(),
		}
	}

	fn connect_params(&self) -> ConnectParams {
		ConnectParams {
			min_protocol: PROTOCOL_VERSION,
			max_protocol: PROTOCOL_VERSION,
			client: ClientInfo {
				id: self.client_id.clone(),
				version: self.client_version.clone(),
				platform: std::env::consts::OS.to_string(),
				mode: "cli".to_string(),
			},
			role: "operator".to_string(),
			auth: AuthParams {
				token: self.token.as_ref().map(|t| t.expose().clone()),
				password: self.password.as_ref().map(|p| p.expose().clone()),
			},
		}
	}
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
	/// Handshake completed; RPC calls may be issued.
	Connected,
	/// A pushed event frame.
	Event(EventFrame),
	/// An established link closed. In-flight RPC calls have already failed.
	Disconnected(CloseInfo),
	/// The loop ended and will not reconnect.
	Stopped(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
	Shutdown,
	LoggedOut(CloseInfo),
	MaxAttemptsExceeded { attempts: u32 },
}

impl std::fmt::Display for StopReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			StopReason::Shutdown => write!(f, "shut down"),
			StopReason::LoggedOut(close) => write!(f, "logged out ({})", close.describe()),
			StopReason::MaxAttemptsExceeded { attempts } => {
				write!(f, "gave up after {attempts} reconnect attempts")
			}
		}
	}
}

/// Controls a running connection loop.
pub struct ConnectionHandle {
	shutdown: CancellationToken,
	task: JoinHandle<()>,
}

impl ConnectionHandle {
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	pub async fn join(self) {
		if let Err(e) = self.task.await {
			error!(error = %e, "gateway connection task failed");
		}
	}
}

/// Start the connection loop on the current runtime.
pub fn spawn_connection(
	config: ConnectionConfig,
	policy: ReconnectPolicy,
) -> (
	GatewayClient,
	mpsc::UnboundedReceiver<ConnectionEvent>,
	ConnectionHandle,
) {
	let client = GatewayClient::new(config.request_timeout);
	let (events_tx, events_rx) = mpsc::unbounded_channel();
	let shutdown = CancellationToken::new();

	let task = tokio::spawn(run(
		config,
		policy,
		client.clone(),
		events_tx,
		shutdown.clone(),
	));

	(client, events_rx, ConnectionHandle { shutdown, task })
}

#[instrument(skip_all, fields(url = %config.url))]
async fn run(
	config: ConnectionConfig,
	policy: ReconnectPolicy,
	client: GatewayClient,
	events: mpsc::UnboundedSender<ConnectionEvent>,
	shutdown: CancellationToken,
) {
	let mut state = ReconnectState::new();

	loop {
		let end = run_link(&config, &client, &events, &mut state, &shutdown).await;

		client.detach(&end.close.describe()).await;
		if end.connected {
			let _ = events.send(ConnectionEvent::Disconnected(end.close.clone()));
		}

		if shutdown.is_cancelled() {
			info!("gateway connection shut down");
			let _ = events.send(ConnectionEvent::Stopped(StopReason::Shutdown));
			return;
		}

		match state.on_close(&policy, &end.close) {
			ReconnectDecision::Retry { attempt, delay } => {
				warn!(
					attempt,
					delay_ms = delay.as_millis() as u64,
					code = end.close.code,
					reason = %end.close.reason,
					"gateway link closed, reconnecting"
				);
				tokio::select! {
					_ = tokio::time::sleep(delay) => state.on_retry_started(),
					_ = shutdown.cancelled() => {
						info!("gateway connection shut down while waiting to reconnect");
						let _ = events.send(ConnectionEvent::Stopped(StopReason::Shutdown));
						return;
					}
				}
			}
			ReconnectDecision::GiveUp { attempts } => {
				error!(attempts, "max reconnect attempts exceeded, giving up");
				let _ = events.send(ConnectionEvent::Stopped(StopReason::MaxAttemptsExceeded {
					attempts,
				}));
				return;
			}
			ReconnectDecision::LoggedOut => {
				error!(code = end.close.code, reason = %end.close.reason, "gateway rejected credentials, not reconnecting");
				let _ = events.send(ConnectionEvent::Stopped(StopReason::LoggedOut(end.close)));
				return;
			}
		}
	}
}

struct LinkEnd {
	close: CloseInfo,
	connected: bool,
}

impl LinkEnd {
	fn before_handshake(close: CloseInfo) -> Self {
		Self {
			close,
			connected: false,
		}
	}
}

/// Drive one physical link from dial to close.
async fn run_link(
	config: &ConnectionConfig,
	client: &GatewayClient,
	events: &mpsc::UnboundedSender<ConnectionEvent>,
	state: &mut ReconnectState,
	shutdown: &CancellationToken,
) -> LinkEnd {
	debug!("dialing gateway");
	let ws = match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
		Ok(Ok((ws, _))) => ws,
		Ok(Err(e)) => return LinkEnd::before_handshake(CloseInfo::abnormal(e.to_string())),
		Err(_) => return LinkEnd::before_handshake(CloseInfo::abnormal("connect timed out")),
	};
	let (mut write, mut read) = ws.split();

	let handshake_id = uuid::Uuid::new_v4().to_string();
	let text = match connect_frame(config, &handshake_id) {
		Ok(text) => text,
		Err(e) => return LinkEnd::before_handshake(CloseInfo::abnormal(e.to_string())),
	};
	if let Err(e) = write.send(Message::Text(text)).await {
		return LinkEnd::before_handshake(CloseInfo::abnormal(e.to_string()));
	}

	let handshake_deadline = tokio::time::sleep(config.request_timeout);
	tokio::pin!(handshake_deadline);

	let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
	let mut connected = false;

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				let _ = write
					.send(Message::Close(Some(CloseFrame {
						code: CloseCode::Normal,
						reason: "shutdown".into(),
					})))
					.await;
				return LinkEnd { close: CloseInfo::new(CLOSE_NORMAL, "shutdown"), connected };
			}
			_ = &mut handshake_deadline, if !connected => {
				return LinkEnd::before_handshake(CloseInfo::abnormal("handshake timed out"));
			}
			Some(text) = out_rx.recv() => {
				if let Err(e) = write.send(Message::Text(text)).await {
					return LinkEnd { close: CloseInfo::abnormal(e.to_string()), connected };
				}
			}
			incoming = read.next() => {
				match incoming {
					Some(Ok(Message::Text(text))) => {
						let Some(frame) = parse_frame(&text) else {
							continue;
						};
						match frame {
							// Settled in frame order so nothing after hello-ok is seen as pre-handshake.
							Frame::Response(response) if !connected && response.id == handshake_id => {
								if !response.ok {
									let error = response.error.unwrap_or_default();
									return LinkEnd::before_handshake(CloseInfo::handshake_rejected(error.message));
								}
								connected = true;
								state.on_connected();
								client.attach(out_tx.clone()).await;
								info!("gateway handshake complete");
								let _ = events.send(ConnectionEvent::Connected);
							}
							frame => dispatch_frame(frame, client, events, connected),
						}
					}
					Some(Ok(Message::Ping(data))) => {
						if let Err(e) = write.send(Message::Pong(data)).await {
							return LinkEnd { close: CloseInfo::abnormal(e.to_string()), connected };
						}
					}
					Some(Ok(Message::Close(frame))) => {
						let close = match frame {
							Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.into_owned()),
							None => CloseInfo::new(CLOSE_NORMAL, ""),
						};
						return LinkEnd { close, connected };
					}
					Some(Ok(_)) => {}
					Some(Err(e)) => return LinkEnd { close: CloseInfo::abnormal(e.to_string()), connected },
					None => return LinkEnd { close: CloseInfo::abnormal("stream ended"), connected },
				}
			}
		}
	}
}

fn connect_frame(config: &ConnectionConfig, id: &str) -> Result<String, GatewayError> {
	let frame = Frame::Request(RequestFrame {
		id: id.to_string(),
		method: METHOD_CONNECT.to_string(),
		params: serde_json::to_value(config.connect_params())?,
	});
	Ok(serde_json::to_string(&frame)?)
}

fn parse_frame(text: &str) -> Option<Frame> {
	match serde_json::from_str::<Frame>(text) {
		Ok(frame) => Some(frame),
		Err(e) => {
			warn!(error = %e, "ignoring malformed gateway frame");
			None
		}
	}
}

fn dispatch_frame(
	frame: Frame,
	client: &GatewayClient,
	events: &mpsc::UnboundedSender<ConnectionEvent>,
	connected: bool,
) {
	match frame {
		Frame::Response(response) => client.handle_response(response),
		Frame::Event(event) if event.event == EVENT_CONNECT_CHALLENGE => {
			trace!("ignoring connect challenge");
		}
		Frame::Event(event) => {
			if connected {
				let _ = events.send(ConnectionEvent::Event(event));
			} else {
				debug!(event = %event.event, "dropping event received before handshake");
			}
		}
		Frame::Request(request) => {
			debug!(method = %request.method, "ignoring gateway-initiated request");
		}
	}
}
