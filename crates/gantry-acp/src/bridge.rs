// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ACP ↔ Gateway conversions.
//!
//! Pure functions only: prompt extraction, tool event mapping and the
//! cumulative-text diff used for streaming.

use agent_client_protocol::{
	self as acp, ContentBlock, ContentChunk, EmbeddedResourceResource, StopReason, ToolCallId,
	ToolCallStatus, ToolKind,
};
use gantry_gateway::protocol::{ChatAttachment, ChatState, ToolEventData};

// =============================================================================
// ACP prompt → Gateway chat message
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptPayload {
	pub text: String,
	pub attachments: Vec<ChatAttachment>,
}

/// Flatten ACP content blocks into message text and attachments.
///
/// Text blocks, embedded text resources and resource links are joined with
/// newlines in order. Images become base64 attachments. Audio and binary
/// resources are dropped.
pub fn extract_prompt(blocks: &[ContentBlock]) -> PromptPayload {
	let mut parts: Vec<String> = Vec::new();
	let mut attachments = Vec::new();

	for block in blocks {
		match block {
			ContentBlock::Text(t) => parts.push(t.text.clone()),
			ContentBlock::Image(image) => attachments.push(ChatAttachment {
				kind: "image".to_string(),
				mime_type: image.mime_type.clone(),
				content: image.data.clone(),
			}),
			ContentBlock::ResourceLink(link) => parts.push(format!("[{}]({})", link.name, link.uri)),
			ContentBlock::Resource(resource) => {
				if let EmbeddedResourceResource::TextResourceContents(contents) = &resource.resource {
					parts.push(contents.text.clone());
				}
			}
			_ => {}
		}
	}

	PromptPayload {
		text: parts.join("\n"),
		attachments,
	}
}

pub fn with_working_directory(cwd: &str, text: &str) -> String {
	format!("[Working directory: {cwd}]\n\n{text}")
}

/// Convert assistant text into an ACP content chunk for streaming.
pub fn text_to_content_chunk(text: String) -> ContentChunk {
	ContentChunk::new(text.into())
}

// =============================================================================
// Gateway chat state → ACP stop reason
// =============================================================================

/// Stop reason for a terminal chat state, `None` while the run continues.
///
/// ACP has no generic error stop reason; `error` maps to `Refusal`.
pub fn terminal_stop_reason(state: ChatState) -> Option<StopReason> {
	match state {
		ChatState::Final | ChatState::Done => Some(StopReason::EndTurn),
		ChatState::Aborted => Some(StopReason::Cancelled),
		ChatState::Error => Some(StopReason::Refusal),
		ChatState::Delta | ChatState::Unknown => None,
	}
}

// =============================================================================
// Cumulative text diff
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
	/// New text to forward.
	Forward(String),
	/// Suffix repeats already-sent text; drop it but adopt the cumulative text.
	Duplicate,
	/// Nothing beyond what was already sent.
	Unchanged,
}

/// Compute what to forward given the text already sent and the latest
/// cumulative text.
///
/// `duplicate_prefix_chars` enables the duplicate heuristic: once at least
/// that many characters were sent, a suffix that starts with the first
/// `duplicate_prefix_chars` characters of the sent text is a retransmission.
/// 0 disables it.
pub fn diff_cumulative(sent: &str, cumulative: &str, duplicate_prefix_chars: usize) -> DeltaOutcome {
	let Some(suffix) = suffix_after(cumulative, sent.len()) else {
		return DeltaOutcome::Unchanged;
	};
	if suffix.is_empty() {
		return DeltaOutcome::Unchanged;
	}

	if duplicate_prefix_chars > 0 && sent.chars().count() >= duplicate_prefix_chars {
		let prefix: String = sent.chars().take(duplicate_prefix_chars).collect();
		if suffix.starts_with(&prefix) {
			return DeltaOutcome::Duplicate;
		}
	}

	DeltaOutcome::Forward(suffix.to_string())
}

/// Slice of `text` past byte offset `from`, rounded up to a char boundary.
fn suffix_after(text: &str, from: usize) -> Option<&str> {
	if from >= text.len() {
		return None;
	}
	let start = (from..=text.len()).find(|&i| text.is_char_boundary(i))?;
	text.get(start..)
}

// =============================================================================
// Gateway tool events → ACP tool calls
// =============================================================================

/// Guess an ACP tool kind from a Gateway tool name.
pub fn infer_tool_kind(name: &str) -> ToolKind {
	let name = name.to_ascii_lowercase();
	let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

	if has(&["read", "view", "cat"]) {
		ToolKind::Read
	} else if has(&["edit", "write", "patch", "replace"]) {
		ToolKind::Edit
	} else if has(&["delete", "remove"]) {
		ToolKind::Delete
	} else if has(&["move", "rename"]) {
		ToolKind::Move
	} else if has(&["search", "grep", "find", "glob"]) {
		ToolKind::Search
	} else if has(&["exec", "bash", "shell", "run", "command"]) {
		ToolKind::Execute
	} else if has(&["fetch", "http", "web", "browse"]) {
		ToolKind::Fetch
	} else {
		ToolKind::Other
	}
}

/// Map a tool event to an ACP session update. `None` for phases with no ACP
/// counterpart or events missing a tool call ID.
pub fn tool_event_to_update(data: &ToolEventData) -> Option<acp::SessionUpdate> {
	let tool_call_id = data.tool_call_id.as_deref().filter(|id| !id.is_empty())?;
	let name = data.name.clone().unwrap_or_else(|| "tool".to_string());

	match data.phase.as_str() {
		"start" => {
			let mut call = acp::ToolCall::new(ToolCallId::new(tool_call_id.to_string()), name.clone());
			call.kind = infer_tool_kind(&name);
			call.status = ToolCallStatus::InProgress;
			call.raw_input = data.args.clone();
			Some(acp::SessionUpdate::ToolCall(call))
		}
		"result" => {
			let mut fields = acp::ToolCallUpdateFields::default();
			fields.status = Some(if data.is_error {
				ToolCallStatus::Failed
			} else {
				ToolCallStatus::Completed
			});
			fields.raw_output = data.result.clone();
			Some(acp::SessionUpdate::ToolCallUpdate(acp::ToolCallUpdate::new(
				ToolCallId::new(tool_call_id.to_string()),
				fields,
			)))
		}
		_ => None,
	}
}
