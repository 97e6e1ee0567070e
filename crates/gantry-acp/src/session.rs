// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session and run state for the ACP front end.

use agent_client_protocol::StopReason;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::AcpError;

/// A request to send a session notification to the client.
pub struct SessionNotificationRequest {
	pub notification: agent_client_protocol::SessionNotification,
	pub completion_tx: oneshot::Sender<()>,
}

/// One logical conversation.
#[derive(Debug, Clone)]
pub struct SessionRecord {
	/// The ACP session ID
	pub session_id: String,

	/// Gateway-side key for the same conversation
	pub session_key: String,

	/// Working directory supplied at creation
	pub cwd: String,

	/// The in-flight run, if a prompt is outstanding
	pub active_run: Option<ActiveRun>,
}

#[derive(Debug, Clone)]
pub struct ActiveRun {
	pub run_id: String,
	pub cancel: CancellationToken,
}

impl ActiveRun {
	pub fn new(run_id: impl Into<String>, cancel: CancellationToken) -> Self {
		Self {
			run_id: run_id.into(),
			cancel,
		}
	}
}

pub(crate) type PromptOutcome = Result<StopReason, AcpError>;

/// An outstanding `prompt` call awaiting a terminal chat event.
pub(crate) struct PendingPrompt {
	pub session_key: String,
	/// Also the idempotency key sent with `chat.send`.
	pub run_id: String,
	/// Cumulative text already forwarded to the client.
	pub sent_text: String,
	pub tx: oneshot::Sender<PromptOutcome>,
}

impl PendingPrompt {
	pub fn sent_text_len(&self) -> usize {
		self.sent_text.len()
	}

	pub fn resolve(self, outcome: PromptOutcome) {
		// The caller may already be gone (superseded or dropped).
		let _ = self.tx.send(outcome);
	}
}
