// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `gantry`: serve the Agent Client Protocol on stdio, backed by a Gateway.
//!
//! stdout carries ACP frames, so all logging goes to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use gantry_acp::{GatewayAcpAgent, SessionNotificationRequest};
use gantry_config::{load_config_with_cli, CliOverrides, GantryConfig, LogFormat, LogLevel, LoggingConfig};
use gantry_gateway::{
	resolve_reconnect_policy, spawn_connection, ConnectionConfig, ConnectionEvent, GatewayRpc,
	ReconnectOverrides, StopReason,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
	name = "gantry",
	version,
	about = "Bridge an ACP client on stdio to a Gateway over WebSocket",
	long_about = None
)]
struct Args {
	/// Path to a TOML configuration file
	#[arg(short, long, env = "GANTRY_CONFIG")]
	config: Option<PathBuf>,

	/// Gateway WebSocket URL (ws:// or wss://)
	#[arg(long)]
	url: Option<String>,

	/// Gateway auth token
	#[arg(long)]
	token: Option<String>,

	/// Gateway auth password
	#[arg(long)]
	password: Option<String>,

	/// Give up after this many consecutive reconnect attempts (0 retries forever)
	#[arg(long)]
	reconnect_max_attempts: Option<u32>,

	/// Log level (error, warn, info, debug, trace)
	#[arg(long)]
	log_level: Option<String>,

	/// Shorthand for --log-level debug
	#[arg(short, long)]
	verbose: bool,

	/// Emit logs as JSON
	#[arg(long)]
	json_logs: bool,
}

impl From<&Args> for CliOverrides {
	fn from(args: &Args) -> Self {
		let log_level = if args.verbose {
			Some("debug".to_string())
		} else {
			args.log_level.clone()
		};

		Self {
			config_file: args.config.clone(),
			gateway_url: args.url.clone(),
			gateway_token: args.token.clone(),
			gateway_password: args.password.clone(),
			log_level,
			log_format: if args.json_logs {
				Some("json".to_string())
			} else {
				None
			},
		}
	}
}

impl From<&Args> for ReconnectOverrides {
	fn from(args: &Args) -> Self {
		Self {
			max_attempts: args.reconnect_max_attempts,
			..Default::default()
		}
	}
}

fn log_level_to_tracing(level: LogLevel) -> tracing::Level {
	match level {
		LogLevel::Trace => tracing::Level::TRACE,
		LogLevel::Debug => tracing::Level::DEBUG,
		LogLevel::Info => tracing::Level::INFO,
		LogLevel::Warn => tracing::Level::WARN,
		LogLevel::Error => tracing::Level::ERROR,
	}
}

fn default_filter(level: LogLevel) -> String {
	let level = log_level_to_tracing(level);
	["gantry", "gantry_acp", "gantry_gateway", "gantry_config"]
		.iter()
		.map(|target| format!("{target}={level}"))
		.collect::<Vec<_>>()
		.join(",")
}

fn init_tracing(logging: &LoggingConfig) {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(logging.level)));

	match logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Compact => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().compact().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(std::io::stderr))
				.init();
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let config =
		load_config_with_cli(CliOverrides::from(&args)).context("failed to load configuration")?;
	init_tracing(&config.logging);

	debug!(config = ?config, "configuration loaded");

	run_bridge(&config, ReconnectOverrides::from(&args)).await
}

/// Feed connection events into the agent until the loop stops for good.
async fn dispatch_connection_events(
	agent: GatewayAcpAgent,
	mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) -> Option<StopReason> {
	while let Some(event) = events.recv().await {
		match event {
			ConnectionEvent::Connected => agent.handle_gateway_reconnect(),
			ConnectionEvent::Event(frame) => agent.handle_gateway_event(&frame).await,
			ConnectionEvent::Disconnected(close) => agent.handle_gateway_disconnect(&close.describe()),
			ConnectionEvent::Stopped(reason) => {
				agent.handle_gateway_disconnect(&reason.to_string());
				return Some(reason);
			}
		}
	}
	None
}

async fn run_bridge(config: &GantryConfig, overrides: ReconnectOverrides) -> Result<()> {
	use agent_client_protocol::{self as acp, Client as _};
	use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

	let policy = resolve_reconnect_policy(&config.reconnect, &overrides);
	info!(
		url = %config.gateway.url,
		max_attempts = policy.max_attempts(),
		"connecting to gateway"
	);

	let (client, mut events, handle) =
		spawn_connection(ConnectionConfig::from_gateway_config(&config.gateway), policy);

	// The ACP side only starts once the first handshake has succeeded.
	loop {
		match events.recv().await {
			Some(ConnectionEvent::Connected) => break,
			Some(ConnectionEvent::Stopped(reason)) => {
				handle.join().await;
				bail!("gateway connection stopped before the first handshake: {reason}");
			}
			Some(_) => continue,
			None => {
				handle.join().await;
				bail!("gateway connection loop exited unexpectedly");
			}
		}
	}
	info!("gateway connected, serving ACP on stdio");

	let gateway: Arc<dyn GatewayRpc> = Arc::new(client);
	let (tx, mut rx) = mpsc::unbounded_channel::<SessionNotificationRequest>();
	let agent = GatewayAcpAgent::new(gateway, &config.acp, tx);

	let stdin = tokio::io::stdin().compat();
	let stdout = tokio::io::stdout().compat_write();

	let local_set = tokio::task::LocalSet::new();
	let stop = local_set
		.run_until(async move {
			let (conn, io_task) = acp::AgentSideConnection::new(agent.clone(), stdout, stdin, |fut| {
				tokio::task::spawn_local(fut);
			});

			tokio::task::spawn_local(async move {
				while let Some(req) = rx.recv().await {
					if let Err(e) = conn.session_notification(req.notification).await {
						error!(error = %e, "failed to send session notification");
						break;
					}
					req.completion_tx.send(()).ok();
				}
			});

			let dispatcher = tokio::task::spawn_local(dispatch_connection_events(agent.clone(), events));

			let stop = tokio::select! {
				result = io_task => {
					if let Err(e) = result {
						error!(error = %e, "ACP I/O error");
					}
					info!("ACP client closed stdio");
					None
				}
				result = dispatcher => match result {
					Ok(stop) => stop,
					Err(e) => {
						error!(error = %e, "connection event dispatcher failed");
						None
					}
				},
				_ = tokio::signal::ctrl_c() => {
					info!("received Ctrl+C, shutting down");
					None
				}
			};

			agent.shutdown();
			stop
		})
		.await;

	handle.shutdown();
	handle.join().await;

	match stop {
		None | Some(StopReason::Shutdown) => {
			info!("gantry exited");
			Ok(())
		}
		Some(reason) => {
			warn!(%reason, "gateway connection ended");
			bail!("gateway connection ended: {reason}")
		}
	}
}
