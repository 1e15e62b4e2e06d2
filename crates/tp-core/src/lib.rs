//! Shared building blocks for termpool.
//!
//! - [`head_tail`]: bounded, information-preserving rendering of large output
//! - [`types`]: session identity and bookkeeping records
//! - [`config`]: TOML-backed configuration with validated session limits

pub mod config;
pub mod head_tail;
pub mod types;
