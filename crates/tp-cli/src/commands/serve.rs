use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tp_core::config::Config;
use tp_tools::{dispatch, TerminalTools, ToolCallRequest, ToolCallResult};
use tracing::{debug, info};

/// Run the `serve` subcommand: one JSON tool call per stdin line, one JSON
/// result per stdout line. Logs stay on stderr.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let tools = super::build_tools(config)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!(
        max_sessions = config.limits.max_sessions,
        shell = %config.terminal.resolve_shell(),
        "serving terminal tools on stdio"
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let result = handle_line(&tools, &line).await;
                let mut encoded = serde_json::to_string(&result)?;
                encoded.push('\n');
                stdout.write_all(encoded.as_bytes()).await?;
                stdout.flush().await?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("ctrl-c received, shutting down");
                break;
            }
        }
    }

    let killed = tokio::task::spawn_blocking(move || tools.shutdown()).await?;
    info!(killed, "terminal sessions shut down");
    Ok(())
}

async fn handle_line(tools: &TerminalTools, line: &str) -> ToolCallResult {
    match serde_json::from_str::<ToolCallRequest>(line) {
        Ok(request) => dispatch(tools, &request).await,
        Err(e) => {
            debug!("rejected request line: {e}");
            ToolCallResult::error(format!("invalid request: {e}"))
        }
    }
}
