pub mod config;
pub mod exec;
pub mod serve;
pub mod tools;

use std::sync::Arc;

use anyhow::Context;
use tp_core::config::Config;
use tp_session::SessionRegistry;
use tp_tools::TerminalTools;

/// Build the shared registry and the tools over it.
pub fn build_tools(config: &Config) -> anyhow::Result<TerminalTools> {
    let registry =
        SessionRegistry::new(config.limits).context("invalid session limits in config")?;
    Ok(TerminalTools::new(
        Arc::new(registry),
        config.terminal.clone(),
    ))
}
