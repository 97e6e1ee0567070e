// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end translator tests against an in-memory Gateway.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use agent_client_protocol::{
	self as acp, Agent, CancelNotification, ContentBlock, NewSessionRequest, PromptRequest,
	SessionId, SessionNotification, SessionUpdate, SetSessionModeRequest, StopReason, TextContent,
	ToolCallStatus, ToolKind,
};
use gantry_acp::{GatewayAcpAgent, SessionNotificationRequest};
use gantry_config::AcpConfig;
use gantry_gateway::{EventFrame, GatewayError, GatewayRpc, RequestOptions};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{spawn_local, JoinHandle, LocalSet};

type HeldReply = oneshot::Sender<Result<Value, GatewayError>>;

/// Records every call. Expect-final calls resolve at once, or, when
/// `hold_final` is set, stay in flight until `release` answers them.
#[derive(Default)]
struct MockGateway {
	calls: Mutex<Vec<(String, Value, bool)>>,
	failing: Mutex<HashSet<String>>,
	hold_final: bool,
	held: Mutex<Vec<HeldReply>>,
}

impl MockGateway {
	fn holding() -> Self {
		Self {
			hold_final: true,
			..Default::default()
		}
	}

	fn held_count(&self) -> usize {
		self.held.lock().unwrap().len()
	}

	/// Answer the oldest held call. Returns false if its caller already gave up.
	fn release(&self, result: Result<Value, GatewayError>) -> bool {
		let reply = self.held.lock().unwrap().remove(0);
		reply.send(result).is_ok()
	}

	fn fail(&self, method: &str) {
		self.failing.lock().unwrap().insert(method.to_string());
	}

	fn calls(&self, method: &str) -> Vec<Value> {
		self
			.calls
			.lock()
			.unwrap()
			.iter()
			.filter(|(m, _, _)| m == method)
			.map(|(_, params, _)| params.clone())
			.collect()
	}
}

#[async_trait::async_trait]
impl GatewayRpc for MockGateway {
	async fn request(
		&self,
		method: &str,
		params: Value,
		options: RequestOptions,
	) -> Result<Value, GatewayError> {
		self
			.calls
			.lock()
			.unwrap()
			.push((method.to_string(), params, options.expect_final));

		if self.failing.lock().unwrap().contains(method) {
			return Err(GatewayError::Rpc {
				method: method.to_string(),
				code: "UNAVAILABLE".to_string(),
				message: "mock failure".to_string(),
			});
		}
		if options.expect_final && self.hold_final {
			let (tx, rx) = oneshot::channel();
			self.held.lock().unwrap().push(tx);
			return rx
				.await
				.unwrap_or_else(|_| Err(GatewayError::Disconnected("mock dropped".to_string())));
		}
		Ok(json!({"status": "accepted"}))
	}
}

struct Harness {
	agent: GatewayAcpAgent,
	gateway: Arc<MockGateway>,
	notifications: Rc<RefCell<Vec<SessionNotification>>>,
}

impl Harness {
	fn new(config: AcpConfig) -> Self {
		Self::with_gateway(config, MockGateway::default())
	}

	/// `chat.send` stays in flight while the test drives events.
	fn holding(config: AcpConfig) -> Self {
		Self::with_gateway(config, MockGateway::holding())
	}

	fn with_gateway(config: AcpConfig, gateway: MockGateway) -> Self {
		let gateway = Arc::new(gateway);
		let (tx, mut rx) = mpsc::unbounded_channel::<SessionNotificationRequest>();
		let agent = GatewayAcpAgent::new(gateway.clone(), &config, tx);

		let notifications = Rc::new(RefCell::new(Vec::new()));
		let sink = notifications.clone();
		spawn_local(async move {
			while let Some(request) = rx.recv().await {
				sink.borrow_mut().push(request.notification);
				let _ = request.completion_tx.send(());
			}
		});

		Self {
			agent,
			gateway,
			notifications,
		}
	}

	async fn new_session(&self, cwd: &str) -> SessionId {
		self
			.agent
			.new_session(NewSessionRequest::new(PathBuf::from(cwd)))
			.await
			.unwrap()
			.session_id
	}

	/// Submit a prompt and wait until its `chat.send` reached the gateway.
	async fn start_prompt(
		&self,
		session_id: &SessionId,
		text: &str,
	) -> JoinHandle<acp::Result<acp::PromptResponse>> {
		let sent_before = self.gateway.calls("chat.send").len();
		let agent = self.agent.clone();
		let request = PromptRequest::new(
			session_id.clone(),
			vec![ContentBlock::Text(TextContent::new(text.to_string()))],
		);
		let handle = spawn_local(async move { agent.prompt(request).await });

		for _ in 0..100 {
			if self.gateway.calls("chat.send").len() > sent_before {
				break;
			}
			tokio::task::yield_now().await;
		}
		assert!(
			self.gateway.calls("chat.send").len() > sent_before,
			"prompt never dispatched"
		);
		handle
	}

	async fn chat(&self, session_id: &SessionId, state: &str, text: Option<&str>) {
		let key = self.agent.session_key(session_id).unwrap();
		let mut payload = json!({"sessionKey": key, "state": state});
		if let Some(text) = text {
			payload["message"] = json!({"role": "assistant", "content": [{"type": "text", "text": text}]});
		}
		self.event("chat", payload).await;
	}

	async fn event(&self, event: &str, payload: Value) {
		self
			.agent
			.handle_gateway_event(&EventFrame {
				event: event.to_string(),
				payload,
				seq: None,
			})
			.await;
	}

	fn chunks(&self) -> Vec<String> {
		self
			.notifications
			.borrow()
			.iter()
			.filter_map(|n| match &n.update {
				SessionUpdate::AgentMessageChunk(chunk) => match &chunk.content {
					ContentBlock::Text(t) => Some(t.text.clone()),
					_ => None,
				},
				_ => None,
			})
			.collect()
	}
}

fn run_local<F: std::future::Future<Output = ()>>(f: F) -> impl std::future::Future<Output = ()> {
	let local = LocalSet::new();
	async move { local.run_until(f).await }
}

/// **Property: ping/pong round trip ends the turn and frees the run slot**
#[tokio::test]
async fn test_end_to_end_ping_pong() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/tmp/x").await;

		let prompt = h.start_prompt(&session, "ping").await;

		let sent = &h.gateway.calls("chat.send")[0];
		assert_eq!(sent["message"], "[Working directory: /tmp/x]\n\nping");
		assert_eq!(sent["sessionKey"], json!(h.agent.session_key(&session).unwrap()));
		let run_id = sent["idempotencyKey"].as_str().unwrap().to_string();
		assert_eq!(h.agent.active_run_id(&session), Some(run_id));

		h.chat(&session, "delta", Some("pong")).await;
		h.chat(&session, "final", None).await;

		let response = prompt.await.unwrap().unwrap();
		assert_eq!(response.stop_reason, StopReason::EndTurn);
		assert_eq!(h.chunks(), vec!["pong".to_string()]);
		assert!(h.agent.active_run_id(&session).is_none());
		assert_eq!(h.agent.pending_prompt_count(), 0);
	})
	.await;
}

#[tokio::test]
async fn test_chat_send_requests_final_result() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "hi").await;

		let expect_final = h
			.gateway
			.calls
			.lock()
			.unwrap()
			.iter()
			.any(|(method, _, expect_final)| method == "chat.send" && *expect_final);
		assert!(expect_final);

		h.chat(&session, "done", None).await;
		assert_eq!(prompt.await.unwrap().unwrap().stop_reason, StopReason::EndTurn);
	})
	.await;
}

/// **Property: cumulative lengths 5, 12, 12, 20 stream as 5, 7, (none), 8**
#[tokio::test]
async fn test_streaming_forwards_only_new_text() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;

		for text in ["Hello", "Hello, world", "Hello, world", "Hello, world! ABCDEF"] {
			h.chat(&session, "delta", Some(text)).await;
		}
		h.chat(&session, "final", Some("Hello, world! ABCDEF")).await;

		assert_eq!(prompt.await.unwrap().unwrap().stop_reason, StopReason::EndTurn);
		let lengths: Vec<usize> = h.chunks().iter().map(String::len).collect();
		assert_eq!(lengths, vec![5, 7, 8]);
		assert_eq!(h.chunks().concat(), "Hello, world! ABCDEF");
	})
	.await;
}

/// **Property: a retransmitted suffix is dropped without a notification**
#[tokio::test]
async fn test_duplicate_suffix_suppressed() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;

		let first = "The quick brown fox jumps over";
		h.chat(&session, "delta", Some(first)).await;
		h.chat(&session, "delta", Some(&format!("{first}{first}"))).await;
		h.chat(&session, "delta", Some(&format!("{first}{first} the dog"))).await;
		h.chat(&session, "final", None).await;

		prompt.await.unwrap().unwrap();
		assert_eq!(h.chunks(), vec![first.to_string(), " the dog".to_string()]);
	})
	.await;
}

#[tokio::test]
async fn test_final_flushes_unsent_text() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;

		h.chat(&session, "delta", Some("partial")).await;
		h.chat(&session, "final", Some("partial answer")).await;

		prompt.await.unwrap().unwrap();
		assert_eq!(h.chunks(), vec!["partial".to_string(), " answer".to_string()]);
	})
	.await;
}

#[tokio::test]
async fn test_aborted_and_error_states() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;

		let prompt = h.start_prompt(&session, "one").await;
		h.chat(&session, "aborted", None).await;
		assert_eq!(prompt.await.unwrap().unwrap().stop_reason, StopReason::Cancelled);

		let prompt = h.start_prompt(&session, "two").await;
		let key = h.agent.session_key(&session).unwrap();
		h.event(
			"chat",
			json!({"sessionKey": key, "state": "error", "errorMessage": "model overloaded"}),
		)
		.await;
		assert_eq!(prompt.await.unwrap().unwrap().stop_reason, StopReason::Refusal);
		assert!(h.agent.active_run_id(&session).is_none());
	})
	.await;
}

#[tokio::test]
async fn test_stale_run_events_are_dropped() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;
		let key = h.agent.session_key(&session).unwrap();

		h.event(
			"chat",
			json!({"sessionKey": key, "runId": "someone-else", "state": "final", "text": "stale"}),
		)
		.await;
		assert_eq!(h.agent.pending_prompt_count(), 1);
		assert!(h.chunks().is_empty());

		h.chat(&session, "final", Some("fresh")).await;
		prompt.await.unwrap().unwrap();
		assert_eq!(h.chunks(), vec!["fresh".to_string()]);
	})
	.await;
}

/// **Property: at most one active run; the replaced run is cancelled first**
#[tokio::test]
async fn test_new_prompt_supersedes_active_run() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;

		let first = h.start_prompt(&session, "first").await;
		let first_run = h.agent.active_run_id(&session).unwrap();

		let second = h.start_prompt(&session, "second").await;
		let second_run = h.agent.active_run_id(&session).unwrap();
		assert_ne!(first_run, second_run);

		assert_eq!(first.await.unwrap().unwrap().stop_reason, StopReason::Cancelled);

		let aborts = h.gateway.calls("chat.abort");
		assert_eq!(aborts.len(), 1);
		assert_eq!(aborts[0]["runId"], json!(first_run));
		assert_eq!(h.agent.pending_prompt_count(), 1);

		h.chat(&session, "final", Some("ok")).await;
		assert_eq!(second.await.unwrap().unwrap().stop_reason, StopReason::EndTurn);
	})
	.await;
}

#[tokio::test]
async fn test_cancel_resolves_prompt_and_aborts() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;

		h.agent
			.cancel(CancelNotification::new(session.clone()))
			.await
			.unwrap();

		assert_eq!(prompt.await.unwrap().unwrap().stop_reason, StopReason::Cancelled);
		assert!(h.agent.active_run_id(&session).is_none());
		let aborts = h.gateway.calls("chat.abort");
		assert_eq!(aborts.len(), 1);
		assert_eq!(aborts[0]["sessionKey"], json!(h.agent.session_key(&session).unwrap()));
	})
	.await;
}

#[tokio::test]
async fn test_cancel_succeeds_when_abort_fails() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		h.gateway.fail("chat.abort");
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;

		assert!(h
			.agent
			.cancel(CancelNotification::new(session.clone()))
			.await
			.is_ok());
		assert_eq!(prompt.await.unwrap().unwrap().stop_reason, StopReason::Cancelled);
	})
	.await;
}

/// **Property: cancel without an active run is a harmless no-op**
#[tokio::test]
async fn test_cancel_idempotent() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let idle = h.new_session("/idle").await;
		let busy = h.new_session("/busy").await;
		let prompt = h.start_prompt(&busy, "go").await;
		let busy_run = h.agent.active_run_id(&busy);

		for _ in 0..2 {
			h.agent
				.cancel(CancelNotification::new(idle.clone()))
				.await
				.unwrap();
		}
		h.agent
			.cancel(CancelNotification::new(SessionId::new("missing".to_string())))
			.await
			.unwrap();

		assert!(h.gateway.calls("chat.abort").is_empty());
		assert_eq!(h.agent.active_run_id(&busy), busy_run);
		assert_eq!(h.agent.pending_prompt_count(), 1);

		h.chat(&busy, "final", None).await;
		prompt.await.unwrap().unwrap();
	})
	.await;
}

/// **Property: a disconnect fails every pending prompt and frees every run**
#[tokio::test]
async fn test_disconnect_rejects_all_pending() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let mut sessions = Vec::new();
		let mut prompts = Vec::new();
		for i in 0..3 {
			let session = h.new_session(&format!("/w{i}")).await;
			prompts.push(h.start_prompt(&session, "go").await);
			sessions.push(session);
		}
		assert_eq!(h.agent.pending_prompt_count(), 3);

		h.agent.handle_gateway_disconnect("socket closed");
		assert!(!h.agent.is_connected());
		assert_eq!(h.agent.pending_prompt_count(), 0);

		for prompt in prompts {
			assert!(prompt.await.unwrap().is_err());
		}
		for session in &sessions {
			assert!(h.agent.active_run_id(session).is_none());
			assert!(h.agent.session_key(session).is_some());
		}

		h.agent.handle_gateway_reconnect();
		assert!(h.agent.is_connected());
	})
	.await;
}

/// **Property: deltas stream and the final event completes the prompt while `chat.send` is still in flight**
#[tokio::test]
async fn test_streaming_while_send_in_flight() {
	run_local(async {
		let h = Harness::holding(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "greet").await;
		assert_eq!(h.gateway.held_count(), 1);

		h.chat(&session, "delta", Some("Hel")).await;
		h.chat(&session, "delta", Some("Hello")).await;
		assert_eq!(h.chunks(), vec!["Hel".to_string(), "lo".to_string()]);
		assert!(!prompt.is_finished());

		h.chat(&session, "final", Some("Hello!")).await;

		let response = prompt.await.unwrap().unwrap();
		assert_eq!(response.stop_reason, StopReason::EndTurn);
		assert_eq!(h.chunks().concat(), "Hello!");
		assert!(h.agent.active_run_id(&session).is_none());
		assert_eq!(h.agent.pending_prompt_count(), 0);

		// The completed prompt no longer waits on the send.
		assert!(!h.gateway.release(Ok(json!({"status": "ok"}))));
	})
	.await;
}

/// **Property: cancel ends a prompt whose `chat.send` never answered**
#[tokio::test]
async fn test_cancel_while_send_in_flight() {
	run_local(async {
		let h = Harness::holding(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;

		h.agent
			.cancel(CancelNotification::new(session.clone()))
			.await
			.unwrap();

		assert_eq!(prompt.await.unwrap().unwrap().stop_reason, StopReason::Cancelled);
		assert_eq!(h.gateway.calls("chat.abort").len(), 1);
		assert!(h.agent.active_run_id(&session).is_none());
		assert_eq!(h.agent.pending_prompt_count(), 0);
		assert!(!h.gateway.release(Ok(json!({"status": "ok"}))));
	})
	.await;
}

/// **Property: a link drop fails in-flight prompts as disconnects, whichever side reports it first**
#[tokio::test]
async fn test_disconnect_while_send_in_flight() {
	run_local(async {
		let h = Harness::holding(AcpConfig::default());
		let failed_send = h.new_session("/a").await;
		let dispatched = h.new_session("/b").await;
		let first = h.start_prompt(&failed_send, "go").await;
		let second = h.start_prompt(&dispatched, "go").await;
		assert_eq!(h.gateway.held_count(), 2);

		// The link fails the in-flight send before the disconnect event arrives.
		assert!(h
			.gateway
			.release(Err(GatewayError::Disconnected("socket closed".to_string()))));
		let error = first.await.unwrap().unwrap_err();
		assert_eq!(error.code, acp::Error::internal_error().code);
		assert_eq!(error.data, Some(json!("gateway disconnected: socket closed")));
		assert!(h.agent.active_run_id(&failed_send).is_none());
		assert_eq!(h.agent.pending_prompt_count(), 1);

		h.agent.handle_gateway_disconnect("socket closed");
		let error = second.await.unwrap().unwrap_err();
		assert_eq!(error.data, Some(json!("gateway disconnected: socket closed")));
		assert!(h.agent.active_run_id(&dispatched).is_none());
		assert_eq!(h.agent.pending_prompt_count(), 0);
	})
	.await;
}

#[tokio::test]
async fn test_dispatch_failure_frees_session() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		h.gateway.fail("chat.send");
		let session = h.new_session("/w").await;

		let result = h.start_prompt(&session, "go").await.await.unwrap();
		assert!(result.is_err());
		assert!(h.agent.active_run_id(&session).is_none());
		assert_eq!(h.agent.pending_prompt_count(), 0);
	})
	.await;
}

#[tokio::test]
async fn test_tool_events_map_to_tool_calls() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;
		let run_id = h.agent.active_run_id(&session).unwrap();

		h.event(
			"agent",
			json!({"runId": run_id, "stream": "tool", "data": {
				"phase": "start", "name": "read", "toolCallId": "t1", "args": {"path": "a.rs"}
			}}),
		)
		.await;
		h.event(
			"agent",
			json!({"runId": run_id, "stream": "tool", "data": {
				"phase": "result", "name": "read", "toolCallId": "t1", "isError": true
			}}),
		)
		.await;
		// Unknown run and missing tool call id are both dropped.
		h.event(
			"agent",
			json!({"runId": "other", "stream": "tool", "data": {"phase": "start", "toolCallId": "t2"}}),
		)
		.await;
		h.event(
			"agent",
			json!({"runId": run_id, "stream": "tool", "data": {"phase": "start", "name": "bash"}}),
		)
		.await;

		{
			let notifications = h.notifications.borrow();
			assert_eq!(notifications.len(), 2);
			assert_eq!(notifications[0].session_id, session);
			match &notifications[0].update {
				SessionUpdate::ToolCall(call) => {
					assert_eq!(call.tool_call_id.to_string(), "t1");
					assert_eq!(call.kind, ToolKind::Read);
				}
				other => panic!("unexpected update: {other:?}"),
			}
			match &notifications[1].update {
				SessionUpdate::ToolCallUpdate(update) => {
					assert_eq!(update.fields.status, Some(ToolCallStatus::Failed));
				}
				other => panic!("unexpected update: {other:?}"),
			}
		}

		h.chat(&session, "final", None).await;
		prompt.await.unwrap().unwrap();
	})
	.await;
}

#[tokio::test]
async fn test_set_session_mode_is_best_effort() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;

		let request: SetSessionModeRequest =
			serde_json::from_value(json!({"sessionId": session.to_string(), "modeId": "high"})).unwrap();
		h.agent.set_session_mode(request).await.unwrap();

		let patches = h.gateway.calls("sessions.patch");
		assert_eq!(patches.len(), 1);
		assert_eq!(patches[0]["thinkingLevel"], "high");
		assert_eq!(patches[0]["key"], json!(h.agent.session_key(&session).unwrap()));

		h.gateway.fail("sessions.patch");
		let request: SetSessionModeRequest =
			serde_json::from_value(json!({"sessionId": session.to_string(), "modeId": "low"})).unwrap();
		assert!(h.agent.set_session_mode(request).await.is_ok());

		let unknown: SetSessionModeRequest =
			serde_json::from_value(json!({"sessionId": "missing", "modeId": "low"})).unwrap();
		assert!(h.agent.set_session_mode(unknown).await.is_err());
	})
	.await;
}

#[tokio::test]
async fn test_shutdown_rejects_prompts_and_clears_sessions() {
	run_local(async {
		let h = Harness::new(AcpConfig::default());
		let session = h.new_session("/w").await;
		let prompt = h.start_prompt(&session, "go").await;

		h.agent.shutdown();

		assert!(prompt.await.unwrap().is_err());
		assert!(h.agent.session_key(&session).is_none());
	})
	.await;
}
