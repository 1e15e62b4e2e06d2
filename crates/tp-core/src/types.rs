use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry-assigned session identifier. Ids start at 1 and are never reused
/// for the lifetime of a registry.
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Exited,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Bookkeeping for one registered session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub command: String,
    pub workdir: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl SessionMetadata {
    pub fn new(session_id: SessionId, command: impl Into<String>, workdir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_used: now,
            command: command.into(),
            workdir: workdir.into(),
            status: SessionStatus::Running,
            exit_code: None,
        }
    }

    /// Record an interaction. `last_used` never moves backwards, so it stays
    /// at or after `created_at` even if the wall clock does.
    pub fn touch(&mut self) {
        self.last_used = Utc::now().max(self.last_used);
    }

    pub fn mark_exited(&mut self, exit_code: Option<i32>) {
        self.status = SessionStatus::Exited;
        if exit_code.is_some() {
            self.exit_code = exit_code;
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Time since the last interaction.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_used)
    }
}
