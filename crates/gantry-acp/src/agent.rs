// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ACP Agent trait implementation backed by the Gateway.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use agent_client_protocol::{
	self as acp, AgentCapabilities, AuthenticateRequest, AuthenticateResponse, CancelNotification,
	ExtNotification, ExtRequest, ExtResponse, Implementation, InitializeRequest, InitializeResponse,
	LoadSessionRequest, LoadSessionResponse, NewSessionRequest, NewSessionResponse, PromptRequest,
	PromptResponse, ProtocolVersion, SessionId, SessionNotification, SessionUpdate,
	SetSessionModeRequest, SetSessionModeResponse, StopReason,
};
use gantry_config::AcpConfig;
use gantry_gateway::protocol::{
	AgentEventPayload, ChatAbortParams, ChatEventPayload, ChatSendParams, ChatState,
	SessionsPatchParams, EVENT_AGENT, EVENT_CHAT, METHOD_CHAT_ABORT, METHOD_CHAT_SEND,
	METHOD_SESSIONS_PATCH,
};
use gantry_gateway::{EventFrame, GatewayError, GatewayRpc, RequestOptions};
use serde_json::value::RawValue;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::bridge::{self, DeltaOutcome};
use crate::error::AcpError;
use crate::registry::SessionRegistry;
use crate::session::{PendingPrompt, PromptOutcome, SessionNotificationRequest};

/// ACP agent that forwards every prompt to the Gateway.
///
/// Cheap to clone; clones share state. The binary keeps one clone to feed
/// Gateway events and connection changes into the translator.
#[derive(Clone)]
pub struct GatewayAcpAgent {
	inner: Rc<AgentInner>,
}

struct AgentInner {
	/// RPC surface of the Gateway link
	gateway: Arc<dyn GatewayRpc>,
	/// Duplicate-suffix heuristic threshold, 0 disables
	duplicate_prefix_chars: usize,
	/// Channel to send session notifications to the ACP connection
	session_update_tx: mpsc::UnboundedSender<SessionNotificationRequest>,
	/// Uses RefCell because ACP Agent trait is ?Send (single-threaded)
	registry: RefCell<SessionRegistry>,
	/// Outstanding prompts keyed by session ID
	pending: RefCell<HashMap<String, PendingPrompt>>,
	connected: Cell<bool>,
}

impl std::fmt::Debug for GatewayAcpAgent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GatewayAcpAgent")
			.field("connected", &self.inner.connected.get())
			.field("session_count", &self.inner.registry.borrow().len())
			.field("pending_prompts", &self.inner.pending.borrow().len())
			.finish()
	}
}

impl GatewayAcpAgent {
	pub fn new(
		gateway: Arc<dyn GatewayRpc>,
		config: &AcpConfig,
		session_update_tx: mpsc::UnboundedSender<SessionNotificationRequest>,
	) -> Self {
		Self {
			inner: Rc::new(AgentInner {
				gateway,
				duplicate_prefix_chars: config.duplicate_prefix_chars,
				session_update_tx,
				registry: RefCell::new(SessionRegistry::new(config.session_key_prefix.clone())),
				pending: RefCell::new(HashMap::new()),
				connected: Cell::new(true),
			}),
		}
	}

	pub fn is_connected(&self) -> bool {
		self.inner.connected.get()
	}

	pub fn session_key(&self, session_id: &SessionId) -> Option<String> {
		self
			.inner
			.registry
			.borrow()
			.get_session(&session_id.to_string())
			.map(|record| record.session_key.clone())
	}

	pub fn active_run_id(&self, session_id: &SessionId) -> Option<String> {
		self
			.inner
			.registry
			.borrow()
			.get_session(&session_id.to_string())
			.and_then(|record| record.active_run.as_ref())
			.map(|run| run.run_id.clone())
	}

	pub fn pending_prompt_count(&self) -> usize {
		self.inner.pending.borrow().len()
	}

	/// Route a pushed Gateway event to the session it belongs to.
	pub async fn handle_gateway_event(&self, frame: &EventFrame) {
		match frame.event.as_str() {
			EVENT_AGENT => self.handle_agent_event(&frame.payload).await,
			EVENT_CHAT => self.handle_chat_event(&frame.payload).await,
			other => trace!(event = other, "ignoring gateway event"),
		}
	}

	/// Fail every outstanding prompt. Sessions survive; only their runs end.
	pub fn handle_gateway_disconnect(&self, reason: &str) {
		self.inner.connected.set(false);

		let drained: Vec<(String, PendingPrompt)> = self.inner.pending.borrow_mut().drain().collect();
		warn!(
			reason,
			pending_prompts = drained.len(),
			"gateway disconnected, failing outstanding prompts"
		);

		for (session_id, prompt) in drained {
			self
				.inner
				.registry
				.borrow_mut()
				.clear_run(&session_id, &prompt.run_id);
			prompt.resolve(Err(AcpError::GatewayDisconnected(reason.to_string())));
		}
	}

	/// In-flight prompts are not replayed; they were already failed.
	pub fn handle_gateway_reconnect(&self) {
		self.inner.connected.set(true);
		info!("gateway reconnected");
	}

	/// Reject outstanding prompts and drop every session.
	pub fn shutdown(&self) {
		let drained: Vec<(String, PendingPrompt)> = self.inner.pending.borrow_mut().drain().collect();
		for (_, prompt) in drained {
			prompt.resolve(Err(AcpError::ShuttingDown));
		}
		self.inner.registry.borrow_mut().clear_all_sessions();
		info!("ACP agent shut down");
	}

	async fn send_update(&self, session_id: &str, update: SessionUpdate) -> Result<(), AcpError> {
		let notification = SessionNotification::new(SessionId::new(session_id.to_string()), update);
		let (tx, rx) = oneshot::channel();
		self
			.inner
			.session_update_tx
			.send(SessionNotificationRequest {
				notification,
				completion_tx: tx,
			})
			.map_err(|_| AcpError::NotificationChannelClosed)?;
		rx.await.map_err(|_| AcpError::NotificationChannelClosed)?;
		Ok(())
	}

	/// Send a text chunk notification to the client.
	async fn send_message_chunk(&self, session_id: &str, text: String) {
		let chunk = bridge::text_to_content_chunk(text);
		if let Err(e) = self
			.send_update(session_id, SessionUpdate::AgentMessageChunk(chunk))
			.await
		{
			warn!(session_id, error = %e, "failed to forward message chunk");
		}
	}

	/// Drop the pending prompt and active-run slot for `run_id`, if still current.
	fn release_run(&self, session_id: &str, run_id: &str) -> Option<PendingPrompt> {
		let prompt = {
			let mut pending = self.inner.pending.borrow_mut();
			if pending
				.get(session_id)
				.is_some_and(|prompt| prompt.run_id == run_id)
			{
				pending.remove(session_id)
			} else {
				None
			}
		};
		self.inner.registry.borrow_mut().clear_run(session_id, run_id);
		prompt
	}

	fn finish_run(&self, session_id: &str, run_id: &str, outcome: PromptOutcome) {
		match self.release_run(session_id, run_id) {
			Some(prompt) => {
				debug!(session_id, run_id, outcome = ?outcome, "run finished");
				prompt.resolve(outcome);
			}
			None => trace!(session_id, run_id, "run already finished"),
		}
	}

	/// Best-effort remote abort; failures are only logged.
	async fn abort_remote(&self, session_key: String, run_id: Option<String>) {
		let params = match serde_json::to_value(ChatAbortParams {
			session_key,
			run_id,
		}) {
			Ok(params) => params,
			Err(e) => {
				warn!(error = %e, "failed to encode chat.abort");
				return;
			}
		};

		if let Err(e) = self
			.inner
			.gateway
			.request(METHOD_CHAT_ABORT, params, RequestOptions::default())
			.await
		{
			warn!(error = %e, "chat.abort failed");
		}
	}

	/// Advance the stored cumulative text, returning the chunk to forward.
	fn advance_stream(
		&self,
		session_id: &str,
		run_id: &str,
		cumulative: &str,
		duplicate_prefix_chars: usize,
	) -> Option<String> {
		let mut pending = self.inner.pending.borrow_mut();
		let prompt = pending
			.get_mut(session_id)
			.filter(|prompt| prompt.run_id == run_id)?;

		match bridge::diff_cumulative(&prompt.sent_text, cumulative, duplicate_prefix_chars) {
			DeltaOutcome::Forward(chunk) => {
				prompt.sent_text = cumulative.to_string();
				Some(chunk)
			}
			DeltaOutcome::Duplicate => {
				debug!(
						session_id,
						sent_len = prompt.sent_text_len(),
						cumulative_len = cumulative.len(),
						"dropping duplicated delta"
				);
				prompt.sent_text = cumulative.to_string();
				None
			}
			DeltaOutcome::Unchanged => None,
		}
	}

	async fn handle_agent_event(&self, payload: &Value) {
		let event: AgentEventPayload = match serde_json::from_value(payload.clone()) {
			Ok(event) => event,
			Err(e) => {
				debug!(error = %e, "ignoring malformed agent event");
				return;
			}
		};
		if !event.is_tool_stream() {
			return;
		}

		let Some(run_id) = event.run_id.as_deref() else {
			trace!("tool event without run id");
			return;
		};
		let Some(session_id) = self
			.inner
			.registry
			.borrow()
			.get_session_by_run_id(run_id)
			.map(|record| record.session_id.clone())
		else {
			debug!(run_id, "tool event for unknown run");
			return;
		};
		let Some(update) = event.tool_data().as_ref().and_then(bridge::tool_event_to_update) else {
			trace!(run_id, "tool event has no ACP counterpart");
			return;
		};

		if let Err(e) = self.send_update(&session_id, update).await {
			warn!(session_id = %session_id, error = %e, "failed to forward tool update");
		}
	}

	async fn handle_chat_event(&self, payload: &Value) {
		let event: ChatEventPayload = match serde_json::from_value(payload.clone()) {
			Ok(event) => event,
			Err(e) => {
				debug!(error = %e, "ignoring malformed chat event");
				return;
			}
		};

		let found = self
			.inner
			.pending
			.borrow()
			.iter()
			.find(|(_, prompt)| prompt.session_key == event.session_key)
			.map(|(session_id, prompt)| (session_id.clone(), prompt.run_id.clone()));
		let Some((session_id, run_id)) = found else {
			trace!(session_key = %event.session_key, "chat event without pending prompt");
			return;
		};

		if let Some(event_run_id) = event.run_id.as_deref() {
			if event_run_id != run_id {
				debug!(
						session_id = %session_id,
						run_id = %run_id,
						event_run_id,
						"dropping chat event for a superseded run"
				);
				return;
			}
		}

		match event.state {
			ChatState::Delta => {
				let Some(text) = event.cumulative_text() else {
					return;
				};
				if let Some(chunk) =
					self.advance_stream(&session_id, &run_id, &text, self.inner.duplicate_prefix_chars)
				{
					self.send_message_chunk(&session_id, chunk).await;
				}
			}
			ChatState::Unknown => trace!(session_id = %session_id, "ignoring chat state"),
			state => {
				// Flush whatever the final payload carries beyond what was streamed.
				if let Some(text) = event.cumulative_text() {
					if let Some(chunk) = self.advance_stream(&session_id, &run_id, &text, 0) {
						self.send_message_chunk(&session_id, chunk).await;
					}
				}
				if state == ChatState::Error {
					warn!(
							session_id = %session_id,
							run_id = %run_id,
							error = event.error_message.as_deref().unwrap_or("unknown"),
							"gateway run failed"
					);
				}
				if let Some(reason) = bridge::terminal_stop_reason(state) {
					self.finish_run(&session_id, &run_id, Ok(reason));
				}
			}
		}
	}
}

#[async_trait::async_trait(?Send)]
impl acp::Agent for GatewayAcpAgent {
	#[instrument(skip(self, req))]
	async fn initialize(&self, req: InitializeRequest) -> acp::Result<InitializeResponse> {
		info!(
				client_version = %req.protocol_version,
				client_info = ?req.client_info,
				"ACP initialize request"
		);

		let mut capabilities = AgentCapabilities::default();
		capabilities.load_session = false;
		capabilities.prompt_capabilities.image = true;
		capabilities.prompt_capabilities.audio = false;
		capabilities.prompt_capabilities.embedded_context = true;

		let agent_info =
			Implementation::new("gantry", env!("CARGO_PKG_VERSION")).title("Gantry Gateway Bridge");

		Ok(
			InitializeResponse::new(ProtocolVersion::V1)
				.agent_capabilities(capabilities)
				.agent_info(agent_info),
		)
	}

	#[instrument(skip(self, _req))]
	async fn authenticate(&self, _req: AuthenticateRequest) -> acp::Result<AuthenticateResponse> {
		debug!("ACP authenticate request (no-op)");
		Ok(AuthenticateResponse::default())
	}

	#[instrument(skip(self, req))]
	async fn new_session(&self, req: NewSessionRequest) -> acp::Result<NewSessionResponse> {
		let cwd = req.cwd.display().to_string();
		let record = self.inner.registry.borrow_mut().create_session(cwd);

		info!(
				session_id = %record.session_id,
				session_key = %record.session_key,
				cwd = %record.cwd,
				"created new session"
		);

		Ok(NewSessionResponse::new(SessionId::new(record.session_id)))
	}

	#[instrument(skip(self, req))]
	async fn load_session(&self, req: LoadSessionRequest) -> acp::Result<LoadSessionResponse> {
		debug!(session_id = %req.session_id, "load_session not implemented");
		Err(AcpError::NotImplemented("load_session").into())
	}

	#[instrument(skip(self, req), fields(session_id = %req.session_id))]
	async fn prompt(&self, req: PromptRequest) -> acp::Result<PromptResponse> {
		let session_id = req.session_id.to_string();
		info!(prompt_blocks = req.prompt.len(), "ACP prompt request");

		let record = self
			.inner
			.registry
			.borrow()
			.get_session(&session_id)
			.cloned()
			.ok_or_else(|| AcpError::SessionNotFound(session_id.clone()))?;

		let payload = bridge::extract_prompt(&req.prompt);
		let run_id = uuid::Uuid::new_v4().to_string();
		let attachment_count = payload.attachments.len();
		let params = serde_json::to_value(ChatSendParams {
			session_key: record.session_key.clone(),
			message: bridge::with_working_directory(&record.cwd, &payload.text),
			attachments: payload.attachments,
			idempotency_key: run_id.clone(),
		})
		.map_err(AcpError::from)?;

		// Latest prompt wins: end the previous run before registering this one.
		let superseded = self.inner.registry.borrow_mut().cancel_active_run(&session_id);
		if let Some(previous) = &superseded {
			if let Some(prompt) = self.release_run(&session_id, &previous.run_id) {
				prompt.resolve(Ok(StopReason::Cancelled));
			}
		}

		let cancel = CancellationToken::new();
		let (tx, mut rx) = oneshot::channel();
		self
			.inner
			.registry
			.borrow_mut()
			.set_active_run(&session_id, run_id.clone(), cancel.clone());
		self.inner.pending.borrow_mut().insert(
			session_id.clone(),
			PendingPrompt {
				session_key: record.session_key.clone(),
				run_id: run_id.clone(),
				sent_text: String::new(),
				tx,
			},
		);

		if let Some(previous) = superseded {
			info!(previous_run_id = %previous.run_id, run_id = %run_id, "superseding active run");
			self
				.abort_remote(record.session_key.clone(), Some(previous.run_id))
				.await;
		}

		debug!(run_id = %run_id, attachments = attachment_count, "dispatching chat.send");
		let gateway = Arc::clone(&self.inner.gateway);
		let mut send = gateway.request(METHOD_CHAT_SEND, params, RequestOptions::expect_final());
		let mut dispatched = false;

		let outcome: PromptOutcome = loop {
			tokio::select! {
				biased;

				outcome = &mut rx => {
					// A dropped sender means the prompt was replaced without resolution.
					break outcome.unwrap_or(Ok(StopReason::Cancelled));
				}
				_ = cancel.cancelled() => {
					self.release_run(&session_id, &run_id);
					break Ok(StopReason::Cancelled);
				}
				result = &mut send, if !dispatched => match result {
					Ok(_) => {
						dispatched = true;
						debug!(run_id = %run_id, "chat.send completed, awaiting terminal chat event");
					}
					// The link closing fails an in-flight send before the disconnect is dispatched.
					Err(GatewayError::Disconnected(reason)) => {
						warn!(run_id = %run_id, reason = %reason, "gateway disconnected during prompt");
						self.release_run(&session_id, &run_id);
						break Err(AcpError::GatewayDisconnected(reason));
					}
					Err(e) => {
						error!(run_id = %run_id, error = %e, "chat.send failed");
						self.release_run(&session_id, &run_id);
						break Err(AcpError::GatewayDispatch(e.to_string()));
					}
				},
			}
		};

		match outcome {
			Ok(stop_reason) => {
				info!(run_id = %run_id, stop_reason = ?stop_reason, "prompt complete");
				Ok(PromptResponse::new(stop_reason))
			}
			Err(e) => {
				warn!(run_id = %run_id, error = %e, "prompt failed");
				Err(e.into())
			}
		}
	}

	#[instrument(skip(self, req))]
	async fn cancel(&self, req: CancelNotification) -> acp::Result<()> {
		let session_id = req.session_id.to_string();
		info!(session_id = %session_id, "ACP cancel request");

		let Some(session_key) = self
			.inner
			.registry
			.borrow()
			.get_session(&session_id)
			.map(|record| record.session_key.clone())
		else {
			debug!(session_id = %session_id, "cancel for unknown session");
			return Ok(());
		};

		let Some(run) = self.inner.registry.borrow_mut().cancel_active_run(&session_id) else {
			debug!(session_id = %session_id, "no active run to cancel");
			return Ok(());
		};

		if let Some(prompt) = self.release_run(&session_id, &run.run_id) {
			prompt.resolve(Ok(StopReason::Cancelled));
		}

		self.abort_remote(session_key, Some(run.run_id)).await;

		Ok(())
	}

	#[instrument(skip(self, req))]
	async fn set_session_mode(
		&self,
		req: SetSessionModeRequest,
	) -> acp::Result<SetSessionModeResponse> {
		let session_id = req.session_id.to_string();
		let session_key = self
			.inner
			.registry
			.borrow()
			.get_session(&session_id)
			.map(|record| record.session_key.clone())
			.ok_or_else(|| AcpError::SessionNotFound(session_id.clone()))?;

		let mode = req.mode_id.to_string();
		let params = serde_json::to_value(SessionsPatchParams {
			key: session_key,
			thinking_level: mode.clone(),
		})
		.map_err(AcpError::from)?;

		match self
			.inner
			.gateway
			.request(METHOD_SESSIONS_PATCH, params, RequestOptions::default())
			.await
		{
			Ok(_) => info!(session_id = %session_id, mode = %mode, "session mode updated"),
			Err(e) => warn!(session_id = %session_id, mode = %mode, error = %e, "sessions.patch failed"),
		}

		Ok(SetSessionModeResponse::default())
	}

	async fn ext_method(&self, req: ExtRequest) -> acp::Result<ExtResponse> {
		debug!(method = %req.method, "unhandled extension method");
		let raw = RawValue::from_string("null".into())?;
		Ok(ExtResponse::new(Arc::from(raw)))
	}

	async fn ext_notification(&self, req: ExtNotification) -> acp::Result<()> {
		debug!(method = %req.method, "unhandled extension notification");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use acp::Agent;
	use std::path::PathBuf;

	struct OfflineGateway;

	#[async_trait::async_trait]
	impl GatewayRpc for OfflineGateway {
		async fn request(
			&self,
			_method: &str,
			_params: Value,
			_options: RequestOptions,
		) -> Result<Value, GatewayError> {
			Err(GatewayError::NotConnected)
		}
	}

	fn agent() -> GatewayAcpAgent {
		let (tx, _rx) = mpsc::unbounded_channel();
		GatewayAcpAgent::new(Arc::new(OfflineGateway), &AcpConfig::default(), tx)
	}

	/// **Property: initialize advertises image support only**
	#[tokio::test]
	async fn test_initialize_capabilities() {
		let response = agent()
			.initialize(InitializeRequest::new(ProtocolVersion::V1))
			.await
			.unwrap();

		let caps = response.agent_capabilities;
		assert!(!caps.load_session);
		assert!(caps.prompt_capabilities.image);
		assert!(!caps.prompt_capabilities.audio);
		assert!(response.auth_methods.is_empty());
	}

	#[tokio::test]
	async fn test_new_session_uses_key_prefix() {
		let agent = agent();
		let response = agent
			.new_session(NewSessionRequest::new(PathBuf::from("/tmp/x")))
			.await
			.unwrap();

		let key = agent.session_key(&response.session_id).unwrap();
		assert_eq!(key, format!("acp:{}", response.session_id));
		assert!(agent.active_run_id(&response.session_id).is_none());
	}

	/// **Property: load_session is always rejected**
	#[tokio::test]
	async fn test_load_session_not_implemented() {
		let agent = agent();
		let result = agent
			.load_session(LoadSessionRequest::new(
				SessionId::new("anything".to_string()),
				PathBuf::from("/tmp"),
			))
			.await;
		assert!(result.is_err());
	}

	/// **Property: a prompt that cannot be dispatched releases its run**
	#[tokio::test]
	async fn test_prompt_dispatch_failure_releases_state() {
		let agent = agent();
		let session = agent
			.new_session(NewSessionRequest::new(PathBuf::from("/tmp")))
			.await
			.unwrap();

		let result = agent
			.prompt(PromptRequest::new(
				session.session_id.clone(),
				vec![acp::ContentBlock::Text(acp::TextContent::new("hi"))],
			))
			.await;

		assert!(result.is_err());
		assert!(agent.active_run_id(&session.session_id).is_none());
		assert_eq!(agent.pending_prompt_count(), 0);
	}

	#[tokio::test]
	async fn test_prompt_unknown_session() {
		let result = agent()
			.prompt(PromptRequest::new(
				SessionId::new("missing".to_string()),
				vec![],
			))
			.await;
		assert!(result.is_err());
	}
}
