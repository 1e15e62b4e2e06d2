use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use tp_core::config::TerminalConfig;
use tp_core::head_tail::{truncate_to_token_budget, HeadTailBuffer};
use tp_core::types::{SessionId, SessionMetadata};
use tp_session::{
    Eviction, ManagedProcess, PtyError, PtyProcess, ReadChunk, SessionRegistry, SpawnOptions,
    TerminateOutcome,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommandRequest {
    pub cmd: String,
    /// Defaults to the host's current directory.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Overrides the configured shell for this call.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub yield_time_ms: Option<u64>,
    #[serde(default)]
    pub max_output_lines: Option<usize>,
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
}

impl ExecCommandRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    pub fn yield_time_ms(mut self, ms: u64) -> Self {
        self.yield_time_ms = Some(ms);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStdinRequest {
    pub session_id: SessionId,
    /// Bytes to send. Empty means poll for output only.
    #[serde(default)]
    pub chars: String,
    #[serde(default)]
    pub yield_time_ms: Option<u64>,
    #[serde(default)]
    pub max_output_lines: Option<usize>,
    #[serde(default)]
    pub max_output_tokens: Option<usize>,
}

impl WriteStdinRequest {
    pub fn new(session_id: SessionId, chars: impl Into<String>) -> Self {
        Self {
            session_id,
            chars: chars.into(),
            ..Default::default()
        }
    }

    pub fn yield_time_ms(mut self, ms: u64) -> Self {
        self.yield_time_ms = Some(ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSessionRequest {
    pub session_id: SessionId,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The command finished within its yield time.
    Completed,
    /// The process is still running and registered as a session.
    Running,
    /// The session's process has exited and the session is gone.
    Exited,
    Killed,
    NotFound,
    Ok,
    Error,
}

/// How much output was cut before it was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    pub total_lines: usize,
    pub omitted_lines: usize,
    pub tokens_truncated: usize,
}

/// Structured result of every terminal tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub status: OutcomeStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
    /// A stale session was removed by this call.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cleaned_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evicted: Vec<Eviction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionMetadata>>,
    pub wall_time_ms: u64,
}

impl ToolOutcome {
    fn new(status: OutcomeStatus, output: impl Into<String>, started: Instant) -> Self {
        Self {
            status,
            output: output.into(),
            session_id: None,
            exit_code: None,
            truncation: None,
            cleaned_up: false,
            warning: None,
            evicted: Vec::new(),
            sessions: None,
            wall_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn not_found(session_id: SessionId, started: Instant) -> Self {
        let mut outcome = Self::new(
            OutcomeStatus::NotFound,
            format!("Session {session_id} does not exist. Use list_sessions to see active sessions."),
            started,
        );
        outcome.session_id = Some(session_id);
        outcome
    }

    pub fn is_error(&self) -> bool {
        self.status == OutcomeStatus::Error
    }
}

// ---------------------------------------------------------------------------
// TerminalTools
// ---------------------------------------------------------------------------

/// The four terminal operations over a shared session registry.
#[derive(Clone)]
pub struct TerminalTools {
    registry: Arc<SessionRegistry>,
    config: TerminalConfig,
}

impl TerminalTools {
    pub fn new(registry: Arc<SessionRegistry>, config: TerminalConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    fn grace(&self) -> Duration {
        self.registry.limits().grace_period()
    }

    /// Run a command, returning its output if it finishes within the yield
    /// time and a session id to continue with if it does not.
    pub async fn exec_command(&self, req: ExecCommandRequest) -> ToolOutcome {
        let started = Instant::now();
        if req.cmd.trim().is_empty() {
            return ToolOutcome::new(OutcomeStatus::Error, "cmd must not be empty", started);
        }

        let workdir = req
            .workdir
            .as_deref()
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        let shell = req.shell.clone().unwrap_or_else(|| self.config.resolve_shell());
        let options = SpawnOptions {
            login_shell: self.config.login_shell,
            env: self
                .config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            cols: self.config.cols,
            rows: self.config.rows,
        };

        let process = match PtyProcess::spawn(&req.cmd, &workdir, &shell, &options) {
            Ok(p) => p,
            Err(e) => {
                warn!(cmd = %req.cmd, workdir = %workdir.display(), "exec_command spawn failed: {e}");
                return ToolOutcome::new(
                    OutcomeStatus::Error,
                    format!("Failed to start `{}`: {e}", req.cmd),
                    started,
                );
            }
        };

        let yield_for = self
            .config
            .clamp_yield(req.yield_time_ms, self.config.exec_yield_time_ms);
        let chunk = collect_output(&process, yield_for, self.grace()).await;
        let (output, truncation) =
            self.render(&chunk.data, req.max_output_lines, req.max_output_tokens);

        if chunk.exited {
            let exit_code = process.exit_code();
            debug!(cmd = %req.cmd, ?exit_code, "command completed within yield time");
            let mut outcome = ToolOutcome::new(OutcomeStatus::Completed, output, started);
            outcome.exit_code = exit_code;
            outcome.truncation = truncation;
            return outcome;
        }

        // Registering may evict, and reaping an evicted child blocks.
        let registry = Arc::clone(&self.registry);
        let (command, workdir_label) = (req.cmd.clone(), workdir.display().to_string());
        let registration = match tokio::task::spawn_blocking(move || {
            registry.register(process, command, workdir_label)
        })
        .await
        {
            Ok(registration) => registration,
            Err(e) => {
                error!(cmd = %req.cmd, "session registration task failed: {e}");
                return ToolOutcome::new(
                    OutcomeStatus::Error,
                    format!("Failed to register `{}`: {e}", req.cmd),
                    started,
                );
            }
        };
        info!(
            session_id = registration.session_id,
            cmd = %req.cmd,
            evicted = registration.evicted.len(),
            "command still running, registered as session"
        );
        let mut outcome = ToolOutcome::new(OutcomeStatus::Running, output, started);
        outcome.session_id = Some(registration.session_id);
        outcome.truncation = truncation;
        outcome.warning = registration.warning;
        outcome.evicted = registration.evicted;
        outcome
    }

    /// Send input to a running session and return what it prints.
    pub async fn write_stdin(&self, req: WriteStdinRequest) -> ToolOutcome {
        let started = Instant::now();
        let id = req.session_id;
        let Ok(session) = self.registry.get(id) else {
            return ToolOutcome::not_found(id, started);
        };

        let _io = session.lock_io().await;
        // A kill may have won the race for the I/O lock.
        if self.registry.get(id).is_err() {
            return ToolOutcome::not_found(id, started);
        }
        let process = session.process();

        if !process.is_alive() {
            let chunk = process.read_available(Duration::ZERO, self.grace()).await;
            if let Err(e) = self.registry.remove(id) {
                debug!(session_id = id, "stale session already gone: {e}");
            }
            info!(session_id = id, "removed stale session");
            let (output, truncation) =
                self.render(&chunk.data, req.max_output_lines, req.max_output_tokens);
            let mut outcome = ToolOutcome::new(OutcomeStatus::Exited, output, started);
            outcome.session_id = Some(id);
            outcome.exit_code = process.exit_code();
            outcome.truncation = truncation;
            outcome.cleaned_up = true;
            return outcome;
        }

        if !req.chars.is_empty() {
            if let Err(e) = process.write(req.chars.as_bytes()) {
                warn!(session_id = id, "write_stdin failed: {e}");
                let mut outcome = ToolOutcome::new(
                    OutcomeStatus::Error,
                    format!("Failed to write to session {id}: {e}"),
                    started,
                );
                outcome.session_id = Some(id);
                return outcome;
            }
        }

        let yield_for = self
            .config
            .clamp_yield(req.yield_time_ms, self.config.write_yield_time_ms);
        let chunk = collect_output(process, yield_for, self.grace()).await;
        let (output, truncation) =
            self.render(&chunk.data, req.max_output_lines, req.max_output_tokens);

        let mut outcome = if chunk.exited {
            if let Err(e) = self.registry.remove(id) {
                debug!(session_id = id, "exited session already gone: {e}");
            }
            info!(session_id = id, "session exited during write_stdin");
            let mut outcome = ToolOutcome::new(OutcomeStatus::Exited, output, started);
            outcome.exit_code = process.exit_code();
            outcome
        } else {
            session.touch();
            ToolOutcome::new(OutcomeStatus::Running, output, started)
        };
        outcome.session_id = Some(id);
        outcome.truncation = truncation;
        outcome
    }

    /// Terminate a session and forget it.
    pub async fn kill_session(&self, req: KillSessionRequest) -> ToolOutcome {
        let started = Instant::now();
        let id = req.session_id;
        let Ok(session) = self.registry.remove(id) else {
            return ToolOutcome::not_found(id, started);
        };

        let command = session.command();
        let reaped = Arc::clone(&session);
        let terminated = tokio::task::spawn_blocking(move || reaped.process().terminate())
            .await
            .unwrap_or_else(|e| Err(PtyError::Internal(format!("terminate task failed: {e}"))));
        let output = match terminated {
            Ok(TerminateOutcome::Killed) => format!("Killed session {id} (`{command}`)."),
            Ok(TerminateOutcome::AlreadyExited) => {
                format!("Session {id} (`{command}`) had already exited and was removed.")
            }
            Err(e) => {
                warn!(session_id = id, "kill failed: {e}");
                format!("Removed session {id} (`{command}`); terminating it reported: {e}")
            }
        };
        info!(session_id = id, %command, "killed session");

        let mut outcome = ToolOutcome::new(OutcomeStatus::Killed, output, started);
        outcome.session_id = Some(id);
        outcome.exit_code = session.process().exit_code();
        outcome
    }

    /// Snapshot of every session. Does not count as using them.
    pub async fn list_sessions(&self) -> ToolOutcome {
        let started = Instant::now();
        let sessions = self.registry.list();
        let output = if sessions.is_empty() {
            "No active sessions.".to_string()
        } else {
            let now = Utc::now();
            let mut lines = Vec::with_capacity(sessions.len() + 1);
            lines.push(format!("{} session(s):", sessions.len()));
            for m in &sessions {
                lines.push(format!(
                    "  [{}] {} `{}` in {} (idle {}s)",
                    m.session_id,
                    m.status,
                    m.command,
                    m.workdir,
                    m.idle_for(now).num_seconds().max(0)
                ));
            }
            lines.join("\n")
        };
        let mut outcome = ToolOutcome::new(OutcomeStatus::Ok, output, started);
        outcome.sessions = Some(sessions);
        outcome
    }

    /// Terminate every session. Blocks while children are reaped.
    pub fn shutdown(&self) -> usize {
        self.registry.shutdown()
    }

    fn render(
        &self,
        raw: &[u8],
        max_lines: Option<usize>,
        max_tokens: Option<usize>,
    ) -> (String, Option<Truncation>) {
        let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
        let max_lines = max_lines.unwrap_or(self.config.default_max_output_lines);

        let (text, tokens_truncated) = match max_tokens.or(self.config.default_max_output_tokens) {
            Some(budget) => {
                let cut = truncate_to_token_budget(&text, budget);
                let removed = cut.tokens_truncated;
                (cut.text.into_owned(), removed)
            }
            None => (text, 0),
        };

        let buf = HeadTailBuffer::build(&text, max_lines);
        let truncation = (buf.truncated || tokens_truncated > 0).then(|| Truncation {
            total_lines: buf.total_lines,
            omitted_lines: buf.omitted_lines(),
            tokens_truncated,
        });
        (buf.into_text(), truncation)
    }
}

impl std::fmt::Debug for TerminalTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalTools")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// Gather output until the process exits or `yield_for` runs out.
async fn collect_output(process: &PtyProcess, yield_for: Duration, grace: Duration) -> ReadChunk {
    let deadline = Instant::now() + yield_for;
    let mut collected = ReadChunk::default();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let chunk = process.read_available(remaining, grace).await;
        collected.data.extend(chunk.data);
        if chunk.exited {
            collected.exited = true;
            return collected;
        }
        if remaining.is_zero() || Instant::now() >= deadline {
            return collected;
        }
    }
}
