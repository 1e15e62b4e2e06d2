use crate::pty_process::PtyError;

/// Result of asking a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process was running and has been signalled.
    Killed,
    /// The process had already exited; nothing was sent.
    AlreadyExited,
}

/// The process-side view the registry needs for its capacity policy.
///
/// Implemented by [`crate::PtyProcess`]; tests substitute lightweight fakes.
pub trait ManagedProcess: Send + Sync + 'static {
    /// Non-blocking liveness check.
    fn is_alive(&self) -> bool;

    /// Exit code once the process has been reaped.
    fn exit_code(&self) -> Option<i32>;

    /// Stop the process. Calling this on an exited process is not an error.
    fn terminate(&self) -> Result<TerminateOutcome, PtyError>;
}
