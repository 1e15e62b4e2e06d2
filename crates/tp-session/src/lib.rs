//! PTY-backed sessions and the registry that bounds them.
//!
//! A [`pty_process::PtyProcess`] is one shell command running on a
//! pseudo-terminal. The [`registry::SessionRegistry`] keeps long-lived
//! processes addressable by id across many tool calls and enforces the
//! capacity policy: exited sessions go first, then the least recently used
//! running sessions outside the protected window.

pub mod process;
pub mod pty_process;
pub mod registry;

pub use process::{ManagedProcess, TerminateOutcome};
pub use pty_process::{PtyError, PtyProcess, ReadChunk, SpawnOptions};
pub use registry::{Eviction, EvictionReason, Registration, RegistryError, Session, SessionRegistry};
