use std::io::{Read as IoRead, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::process::{ManagedProcess, TerminateOutcome};

/// How long an idle read waits before re-checking liveness.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Quiet period that ends a burst of output once some data has arrived.
const COALESCE_WINDOW: Duration = Duration::from_millis(25);
/// Number of `try_wait` attempts made to reap a child after killing it.
const REAP_ATTEMPTS: usize = 20;
/// Chunks buffered between polls before the reader applies backpressure.
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("working directory does not exist: {}", .0.display())]
    WorkdirNotFound(PathBuf),

    #[error("pty spawn failed: {0}")]
    SpawnFailed(String),

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PtyError>;

// ---------------------------------------------------------------------------
// SpawnOptions
// ---------------------------------------------------------------------------

/// Knobs for [`PtyProcess::spawn`] beyond the command itself.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Run through `shell -lc` instead of `shell -c`.
    pub login_shell: bool,
    /// Extra environment on top of the inherited one.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            login_shell: false,
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

// ---------------------------------------------------------------------------
// ReadChunk
// ---------------------------------------------------------------------------

/// Output gathered by one [`PtyProcess::read_available`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadChunk {
    pub data: Vec<u8>,
    /// The process was observed to have exited; `data` includes whatever
    /// arrived during the grace period.
    pub exited: bool,
}

// ---------------------------------------------------------------------------
// PtyProcess
// ---------------------------------------------------------------------------

/// One shell command running on its own pseudo-terminal.
///
/// Output is pumped by a reader thread into a bounded channel and input goes
/// through a writer thread, so no method here blocks on the PTY itself.
pub struct PtyProcess {
    command: String,
    pid: Option<u32>,
    started_at: Instant,
    output: flume::Receiver<Vec<u8>>,
    input: flume::Sender<Vec<u8>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    /// Held so the terminal stays open for the child's lifetime.
    _master: Mutex<Box<dyn MasterPty + Send>>,
    exit_code: OnceLock<i32>,
    _reader_thread: Option<std::thread::JoinHandle<()>>,
    _writer_thread: Option<std::thread::JoinHandle<()>>,
}

fn lock<'a, T: ?Sized>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!(what, "lock was poisoned, recovering");
        e.into_inner()
    })
}

impl PtyProcess {
    /// Start `cmd` under `shell -c` in `workdir` on a fresh PTY.
    ///
    /// Returns as soon as the child is running. Fails without leaving
    /// anything behind if the workdir is missing, the PTY cannot be opened,
    /// or the shell cannot be executed.
    pub fn spawn(cmd: &str, workdir: &Path, shell: &str, options: &SpawnOptions) -> Result<Self> {
        if !workdir.is_dir() {
            return Err(PtyError::WorkdirNotFound(workdir.to_path_buf()));
        }

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        // Take both ends of the master before the child exists so a failure
        // here cannot leave an orphaned process behind.
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let mut command = CommandBuilder::new(shell);
        command.arg(if options.login_shell { "-lc" } else { "-c" });
        command.arg(cmd);
        command.cwd(workdir);
        for (k, v) in &options.env {
            command.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| PtyError::SpawnFailed(format!("{shell}: {e}")))?;
        // The child holds its own copy of the slave; ours must go so the
        // reader sees EOF once the process tree closes the terminal.
        drop(pair.slave);

        let pid = child.process_id();
        debug!(cmd, shell, ?pid, workdir = %workdir.display(), "spawned PTY process");

        // -- output reader thread --
        let (read_tx, read_rx) = flume::bounded::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        let reader_thread = std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if read_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO is how Linux reports a closed slave side.
                        debug!("pty reader finished: {e}");
                        break;
                    }
                }
            }
        });

        // -- input writer thread --
        let (write_tx, write_rx) = flume::bounded::<Vec<u8>>(256);
        let writer_thread = std::thread::spawn(move || {
            while let Ok(data) = write_rx.recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        Ok(Self {
            command: cmd.to_string(),
            pid,
            started_at: Instant::now(),
            output: read_rx,
            input: write_tx,
            child: Mutex::new(child),
            _master: Mutex::new(pair.master),
            exit_code: OnceLock::new(),
            _reader_thread: Some(reader_thread),
            _writer_thread: Some(writer_thread),
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Queue bytes for the process's stdin.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|e| PtyError::Internal(format!("writer channel closed: {e}")))
    }

    /// Everything already buffered, without waiting.
    pub fn drain(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        while let Ok(chunk) = self.output.try_recv() {
            buf.extend_from_slice(&chunk);
        }
        buf
    }

    /// Wait up to `timeout` for output.
    ///
    /// Returns once a burst of output has been collected, when the timeout
    /// elapses (possibly with nothing), or when the process is seen to have
    /// exited. In the last case it sleeps `grace` and drains once more so
    /// that output flushed just before exit is not lost.
    pub async fn read_available(&self, timeout: Duration, grace: Duration) -> ReadChunk {
        let deadline = Instant::now() + timeout;
        let mut data = Vec::new();

        loop {
            data.extend(self.drain());

            if !self.is_alive() {
                tokio::time::sleep(grace).await;
                data.extend(self.drain());
                return ReadChunk { data, exited: true };
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = if data.is_empty() { POLL_INTERVAL } else { COALESCE_WINDOW };
            let wait = wait.min(deadline - now);

            match tokio::time::timeout(wait, self.output.recv_async()).await {
                Ok(Ok(chunk)) => data.extend_from_slice(&chunk),
                // Reader is gone: the terminal closed and the exit status
                // is about to become visible.
                Ok(Err(_)) => {
                    if !data.is_empty() {
                        break;
                    }
                    tokio::time::sleep(wait).await;
                }
                Err(_) => {
                    if !data.is_empty() {
                        break;
                    }
                }
            }
        }

        ReadChunk { data, exited: false }
    }

    fn record_exit(&self, code: u32) -> i32 {
        *self.exit_code.get_or_init(|| code as i32)
    }
}

impl ManagedProcess for PtyProcess {
    fn is_alive(&self) -> bool {
        if self.exit_code.get().is_some() {
            return false;
        }
        let mut child = lock(&self.child, "child");
        match child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status.exit_code());
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(pid = ?self.pid, "try_wait failed: {e}");
                false
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        if self.exit_code.get().is_none() {
            self.is_alive();
        }
        self.exit_code.get().copied()
    }

    fn terminate(&self) -> Result<TerminateOutcome> {
        if !self.is_alive() {
            return Ok(TerminateOutcome::AlreadyExited);
        }

        let mut child = lock(&self.child, "child");
        if let Err(e) = child.kill() {
            // Lost a race with a natural exit.
            if let Ok(Some(status)) = child.try_wait() {
                self.record_exit(status.exit_code());
                return Ok(TerminateOutcome::AlreadyExited);
            }
            return Err(PtyError::Internal(format!("kill failed: {e}")));
        }

        for _ in 0..REAP_ATTEMPTS {
            if let Ok(Some(status)) = child.try_wait() {
                self.record_exit(status.exit_code());
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        info!(pid = ?self.pid, command = %self.command, "terminated PTY process");
        Ok(TerminateOutcome::Killed)
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!(pid = ?self.pid, "failed to terminate on drop: {e}");
        }
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code.get())
            .finish()
    }
}
