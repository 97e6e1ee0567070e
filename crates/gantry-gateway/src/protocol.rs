// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway wire protocol: JSON text frames over a websocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 3;

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_CHAT_SEND: &str = "chat.send";
pub const METHOD_CHAT_ABORT: &str = "chat.abort";
pub const METHOD_SESSIONS_PATCH: &str = "sessions.patch";

pub const EVENT_AGENT: &str = "agent";
pub const EVENT_CHAT: &str = "chat";
pub const EVENT_CONNECT_CHALLENGE: &str = "connect.challenge";

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// No close frame was received; the link simply dropped.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Policy violation. The gateway uses it when credentials are rejected.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
	#[serde(rename = "req")]
	Request(RequestFrame),
	#[serde(rename = "res")]
	Response(ResponseFrame),
	#[serde(rename = "event")]
	Event(EventFrame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
	pub id: String,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
	pub id: String,
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorShape>,
}

impl ResponseFrame {
	/// An `ok` response that only acknowledges an expect-final request.
	pub fn is_accepted_ack(&self) -> bool {
		self.ok
			&& self
				.payload
				.as_ref()
				.and_then(|p| p.get("status"))
				.and_then(Value::as_str)
				== Some("accepted")
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorShape {
	#[serde(default)]
	pub code: String,
	#[serde(default)]
	pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
	pub event: String,
	#[serde(default)]
	pub payload: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
	pub min_protocol: u32,
	pub max_protocol: u32,
	pub client: ClientInfo,
	pub role: String,
	pub auth: AuthParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
	pub id: String,
	pub version: String,
	pub platform: String,
	pub mode: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthParams {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
	pub session_key: String,
	pub message: String,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub attachments: Vec<ChatAttachment>,
	pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAttachment {
	#[serde(rename = "type")]
	pub kind: String,
	pub mime_type: String,
	/// Base64 payload.
	pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAbortParams {
	pub session_key: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsPatchParams {
	pub key: String,
	pub thinking_level: String,
}

/// Payload of an `agent` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEventPayload {
	#[serde(default)]
	pub run_id: Option<String>,
	#[serde(default)]
	pub stream: Option<String>,
	#[serde(default)]
	pub data: Value,
}

impl AgentEventPayload {
	pub fn is_tool_stream(&self) -> bool {
		self.stream.as_deref() == Some("tool")
	}

	pub fn tool_data(&self) -> Option<ToolEventData> {
		serde_json::from_value(self.data.clone()).ok()
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEventData {
	#[serde(default)]
	pub phase: String,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub tool_call_id: Option<String>,
	#[serde(default)]
	pub args: Option<Value>,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub is_error: bool,
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEventPayload {
	#[serde(default)]
	pub run_id: Option<String>,
	pub session_key: String,
	pub state: ChatState,
	#[serde(default)]
	pub message: Option<Value>,
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
	Delta,
	Final,
	Done,
	Aborted,
	Error,
	#[serde(other)]
	Unknown,
}

impl ChatEventPayload {
	/// Cumulative text carried by the event, if any.
	///
	/// The message is either a plain string or an object whose `content`
	/// array holds `{type: "text", text}` parts.
	pub fn cumulative_text(&self) -> Option<String> {
		if let Some(message) = &self.message {
			match message {
				Value::String(s) => return Some(s.clone()),
				Value::Object(obj) => {
					if let Some(Value::Array(parts)) = obj.get("content") {
						let text: String = parts
							.iter()
							.filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
							.filter_map(|p| p.get("text").and_then(Value::as_str))
							.collect();
						return Some(text);
					}
					if let Some(Value::String(s)) = obj.get("content") {
						return Some(s.clone());
					}
					if let Some(Value::String(s)) = obj.get("text") {
						return Some(s.clone());
					}
				}
				_ => {}
			}
		}
		self.text.clone()
	}
}

/// How a link ended, as seen by the reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
	pub code: u16,
	pub reason: String,
	pub logged_out: bool,
}

impl CloseInfo {
	pub fn new(code: u16, reason: impl Into<String>) -> Self {
		Self {
			code,
			reason: reason.into(),
			logged_out: code == CLOSE_POLICY_VIOLATION,
		}
	}

	/// The link dropped without a close frame, or never opened.
	pub fn abnormal(reason: impl Into<String>) -> Self {
		Self::new(CLOSE_ABNORMAL, reason)
	}

	pub fn handshake_rejected(reason: impl Into<String>) -> Self {
		Self {
			code: CLOSE_POLICY_VIOLATION,
			reason: reason.into(),
			logged_out: true,
		}
	}

	pub fn describe(&self) -> String {
		if self.reason.is_empty() {
			format!("closed with code {}", self.code)
		} else {
			format!("closed with code {}: {}", self.code, self.reason)
		}
	}
}
