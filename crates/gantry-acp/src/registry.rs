// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory session table.
//!
//! Owns the mapping from ACP session IDs to Gateway session keys and the
//! single active-run slot per session. Nothing here fails: absence is
//! reported as `None`/`false` and callers decide whether that is an error.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::{ActiveRun, SessionRecord};

#[derive(Debug)]
pub struct SessionRegistry {
	key_prefix: String,
	sessions: HashMap<String, SessionRecord>,
}

impl SessionRegistry {
	pub fn new(key_prefix: impl Into<String>) -> Self {
		Self {
			key_prefix: key_prefix.into(),
			sessions: HashMap::new(),
		}
	}

	/// Derive the Gateway session key for an ACP session ID.
	pub fn session_key_for(&self, session_id: &str) -> String {
		format!("{}:{}", self.key_prefix, session_id)
	}

	pub fn create_session(&mut self, cwd: impl Into<String>) -> SessionRecord {
		let session_id = uuid::Uuid::new_v4().to_string();
		let record = SessionRecord {
			session_key: self.session_key_for(&session_id),
			session_id: session_id.clone(),
			cwd: cwd.into(),
			active_run: None,
		};
		self.sessions.insert(session_id, record.clone());
		record
	}

	pub fn get_session(&self, session_id: &str) -> Option<&SessionRecord> {
		self.sessions.get(session_id)
	}

	/// Linear scan; a session holds at most one run so the match is unique.
	pub fn get_session_by_run_id(&self, run_id: &str) -> Option<&SessionRecord> {
		self.sessions.values().find(|record| {
			record
				.active_run
				.as_ref()
				.is_some_and(|run| run.run_id == run_id)
		})
	}

	/// Returns `false` if the session is unknown.
	pub fn set_active_run(
		&mut self,
		session_id: &str,
		run_id: impl Into<String>,
		cancel: CancellationToken,
	) -> bool {
		match self.sessions.get_mut(session_id) {
			Some(record) => {
				record.active_run = Some(ActiveRun::new(run_id, cancel));
				true
			}
			None => false,
		}
	}

	pub fn clear_active_run(&mut self, session_id: &str) -> Option<ActiveRun> {
		self
			.sessions
			.get_mut(session_id)
			.and_then(|record| record.active_run.take())
	}

	/// Clear the slot only if it still holds `run_id`.
	pub fn clear_run(&mut self, session_id: &str, run_id: &str) -> Option<ActiveRun> {
		let record = self.sessions.get_mut(session_id)?;
		if record.active_run.as_ref()?.run_id != run_id {
			return None;
		}
		record.active_run.take()
	}

	/// Trigger the run's cancellation token, then clear the slot. No-op
	/// without an active run.
	pub fn cancel_active_run(&mut self, session_id: &str) -> Option<ActiveRun> {
		let run = self.clear_active_run(session_id)?;
		debug!(session_id, run_id = %run.run_id, "cancelling active run");
		run.cancel.cancel();
		Some(run)
	}

	pub fn remove_session(&mut self, session_id: &str) -> Option<SessionRecord> {
		let record = self.sessions.remove(session_id)?;
		if let Some(run) = &record.active_run {
			run.cancel.cancel();
		}
		Some(record)
	}

	pub fn clear_all_sessions(&mut self) {
		for record in self.sessions.values() {
			if let Some(run) = &record.active_run {
				run.cancel.cancel();
			}
		}
		self.sessions.clear();
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}
}
