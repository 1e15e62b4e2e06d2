use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use tp_core::config::{ConfigError, SessionLimits};
use tp_core::types::{SessionId, SessionMetadata};
use tp_telemetry::metrics::{
    global_metrics, ACTIVE_SESSIONS, CAPACITY_WARNINGS, SESSIONS_EVICTED, SESSIONS_REGISTERED,
    SESSIONS_REMOVED,
};

use crate::process::ManagedProcess;
use crate::pty_process::PtyProcess;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0} not found")]
    NotFound(SessionId),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One registry entry: a process and its bookkeeping.
///
/// The I/O lock serialises tool calls against the same session; metadata is
/// behind its own short-lived lock so capacity checks never wait on I/O.
pub struct Session<P: ManagedProcess = PtyProcess> {
    id: SessionId,
    process: P,
    metadata: Mutex<SessionMetadata>,
    io_lock: tokio::sync::Mutex<()>,
}

impl<P: ManagedProcess> Session<P> {
    fn new(process: P, metadata: SessionMetadata) -> Self {
        Self {
            id: metadata.session_id,
            process,
            metadata: Mutex::new(metadata),
            io_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    /// Hold this for the duration of any read or write on the process.
    pub async fn lock_io(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.io_lock.lock().await
    }

    pub fn command(&self) -> String {
        self.meta().command.clone()
    }

    fn meta(&self) -> MutexGuard<'_, SessionMetadata> {
        self.metadata.lock().unwrap_or_else(|e| {
            warn!(session_id = self.id, "metadata lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn last_used(&self) -> DateTime<Utc> {
        self.meta().last_used
    }

    /// Record an interaction and fold in the process's current state.
    pub fn touch(&self) {
        let alive = self.process.is_alive();
        let mut meta = self.meta();
        meta.touch();
        if !alive {
            meta.mark_exited(self.process.exit_code());
        }
    }

    /// Metadata with status reflecting the process right now. Stored
    /// metadata is left untouched.
    pub fn snapshot(&self) -> SessionMetadata {
        let alive = self.process.is_alive();
        let mut meta = self.meta().clone();
        if !alive {
            meta.mark_exited(self.process.exit_code());
        }
        meta
    }
}

impl<P: ManagedProcess + std::fmt::Debug> std::fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("process", &self.process)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Eviction records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// The process had already exited.
    Exited,
    /// Oldest running session outside the protected window.
    LeastRecentlyUsed,
    /// Taken from the protected window because nothing else was left.
    ProtectedOverflow,
}

impl EvictionReason {
    fn as_label(&self) -> &'static str {
        match self {
            Self::Exited => "exited",
            Self::LeastRecentlyUsed => "lru",
            Self::ProtectedOverflow => "protected",
        }
    }
}

/// A session removed by the capacity policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub session_id: SessionId,
    pub command: String,
    pub reason: EvictionReason,
}

/// What happened when a session was registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub session_id: SessionId,
    pub evicted: Vec<Eviction>,
    /// Set when the registry was at or above its warning threshold.
    pub warning: Option<String>,
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

type SessionMap<P> = HashMap<SessionId, Arc<Session<P>>>;

/// Shared, bounded mapping from session id to running process.
///
/// All mutations of the mapping happen under one mutex, so capacity
/// enforcement always sees a consistent set of sessions. Terminating evicted
/// processes happens after that lock is released.
pub struct SessionRegistry<P: ManagedProcess = PtyProcess> {
    limits: SessionLimits,
    sessions: Mutex<SessionMap<P>>,
    next_id: AtomicU64,
}

impl<P: ManagedProcess> SessionRegistry<P> {
    /// Build a registry, rejecting limits under which eviction cannot work.
    pub fn new(limits: SessionLimits) -> Result<Self, ConfigError> {
        limits.validate()?;
        Ok(Self::with_limits(limits))
    }

    fn with_limits(limits: SessionLimits) -> Self {
        info!(
            max_sessions = limits.max_sessions,
            warning_threshold = limits.warning_threshold,
            protected_count = limits.protected_count,
            "creating SessionRegistry"
        );
        Self {
            limits,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    fn lock_map(&self) -> MutexGuard<'_, SessionMap<P>> {
        self.sessions.lock().unwrap_or_else(|e| {
            warn!("SessionRegistry lock was poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a process, making room first if the registry is full.
    ///
    /// Evicted children are reaped before this returns, which can block for
    /// a few hundred milliseconds per victim. Async callers should run it on
    /// a blocking thread.
    pub fn register(
        &self,
        process: P,
        command: impl Into<String>,
        workdir: impl Into<String>,
    ) -> Registration {
        let (session_id, evicted, warning, count) = {
            let mut map = self.lock_map();

            let warning = if map.len() >= self.limits.warning_threshold {
                let msg = format!(
                    "{} of {} terminal sessions in use; idle sessions will be evicted at the limit",
                    map.len() + 1,
                    self.limits.max_sessions
                );
                warn!(
                    active = map.len(),
                    threshold = self.limits.warning_threshold,
                    max = self.limits.max_sessions,
                    "session registry nearing capacity"
                );
                global_metrics().increment_counter(CAPACITY_WARNINGS, &[]);
                Some(msg)
            } else {
                None
            };

            let evicted = if map.len() >= self.limits.max_sessions {
                self.evict_locked(&mut map)
            } else {
                Vec::new()
            };

            let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let metadata = SessionMetadata::new(session_id, command, workdir);
            map.insert(session_id, Arc::new(Session::new(process, metadata)));
            (session_id, evicted, warning, map.len())
        };

        let evicted = self.finish_evictions(evicted);
        global_metrics().increment_counter(SESSIONS_REGISTERED, &[]);
        global_metrics().set_gauge(ACTIVE_SESSIONS, count as i64);
        info!(session_id, active = count, evicted = evicted.len(), "registered session");

        Registration {
            session_id,
            evicted,
            warning,
        }
    }

    pub fn get(&self, session_id: SessionId) -> Result<Arc<Session<P>>, RegistryError> {
        self.lock_map()
            .get(&session_id)
            .cloned()
            .ok_or(RegistryError::NotFound(session_id))
    }

    /// Mark a session as just used.
    pub fn touch(&self, session_id: SessionId) -> Result<(), RegistryError> {
        self.get(session_id)?.touch();
        Ok(())
    }

    /// Take a session out of the registry. The caller owns what happens to
    /// its process; the last `Arc` to drop releases it.
    pub fn remove(&self, session_id: SessionId) -> Result<Arc<Session<P>>, RegistryError> {
        let (session, count) = {
            let mut map = self.lock_map();
            let session = map
                .remove(&session_id)
                .ok_or(RegistryError::NotFound(session_id))?;
            (session, map.len())
        };
        global_metrics().increment_counter(SESSIONS_REMOVED, &[]);
        global_metrics().set_gauge(ACTIVE_SESSIONS, count as i64);
        debug!(session_id, active = count, "removed session");
        Ok(session)
    }

    /// Id-ordered snapshot of every session. Changes nothing.
    pub fn list(&self) -> Vec<SessionMetadata> {
        let sessions: Vec<Arc<Session<P>>> = self.lock_map().values().cloned().collect();
        let mut out: Vec<SessionMetadata> = sessions.iter().map(|s| s.snapshot()).collect();
        out.sort_by_key(|m| m.session_id);
        out
    }

    /// Evict until there is room for one more session. Blocks like
    /// [`Self::register`].
    pub fn enforce_capacity(&self) -> Vec<Eviction> {
        let evicted = {
            let mut map = self.lock_map();
            self.evict_locked(&mut map)
        };
        let evicted = self.finish_evictions(evicted);
        global_metrics().set_gauge(ACTIVE_SESSIONS, self.len() as i64);
        evicted
    }

    /// Pick and remove victims. Runs under the map lock; processes are
    /// terminated later by [`Self::finish_evictions`].
    fn evict_locked(&self, map: &mut SessionMap<P>) -> Vec<(Arc<Session<P>>, EvictionReason)> {
        let max = self.limits.max_sessions;
        let mut victims = Vec::new();
        if map.len() < max {
            return victims;
        }

        // Exited sessions first, whatever their recency.
        let exited: Vec<SessionId> = map
            .values()
            .filter(|s| !s.process.is_alive())
            .map(|s| s.id)
            .collect();
        for id in exited {
            if let Some(s) = map.remove(&id) {
                victims.push((s, EvictionReason::Exited));
            }
        }
        if map.len() < max {
            return victims;
        }

        // Most recent first; ties broken by the newer id.
        let mut running: Vec<(DateTime<Utc>, SessionId)> =
            map.values().map(|s| (s.last_used(), s.id)).collect();
        running.sort_unstable_by(|a, b| b.cmp(a));
        let split = self.limits.protected_count.min(running.len());
        let (protected, evictable) = running.split_at(split);

        for &(_, id) in evictable.iter().rev() {
            if map.len() < max {
                break;
            }
            if let Some(s) = map.remove(&id) {
                victims.push((s, EvictionReason::LeastRecentlyUsed));
            }
        }

        if map.len() >= max {
            error!(
                protected_count = self.limits.protected_count,
                max_sessions = max,
                "capacity cannot be met outside the protected window; evicting protected sessions"
            );
            for &(_, id) in protected.iter().rev() {
                if map.len() < max {
                    break;
                }
                if let Some(s) = map.remove(&id) {
                    victims.push((s, EvictionReason::ProtectedOverflow));
                }
            }
        }

        victims
    }

    fn finish_evictions(&self, victims: Vec<(Arc<Session<P>>, EvictionReason)>) -> Vec<Eviction> {
        victims
            .into_iter()
            .map(|(session, reason)| {
                if let Err(e) = session.process.terminate() {
                    error!(session_id = session.id, "failed to terminate evicted session: {e}");
                }
                global_metrics().increment_counter(SESSIONS_EVICTED, &[("reason", reason.as_label())]);
                let command = session.command();
                info!(session_id = session.id, %command, reason = reason.as_label(), "evicted session");
                Eviction {
                    session_id: session.id,
                    command,
                    reason,
                }
            })
            .collect()
    }

    /// Terminate and drop every session. Returns how many were removed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Arc<Session<P>>> = self.lock_map().drain().map(|(_, s)| s).collect();
        for session in &drained {
            if let Err(e) = session.process.terminate() {
                warn!(session_id = session.id, "failed to terminate session on shutdown: {e}");
            }
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "session registry shut down");
        }
        global_metrics().set_gauge(ACTIVE_SESSIONS, 0);
        drained.len()
    }
}

impl<P: ManagedProcess> Drop for SessionRegistry<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P: ManagedProcess> std::fmt::Debug for SessionRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("limits", &self.limits)
            .field("active", &self.len())
            .finish()
    }
}
