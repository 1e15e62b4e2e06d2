use tp_core::config::Config;
use tp_tools::{ExecCommandRequest, OutcomeStatus};
use tracing::info;

/// Run the `exec` subcommand.
///
/// A command still running after its yield time is terminated when this
/// returns, since nothing can reach the session afterwards.
pub async fn run(config: &Config, request: ExecCommandRequest, json: bool) -> anyhow::Result<()> {
    let tools = super::build_tools(config)?;
    let outcome = tools.exec_command(request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", outcome.output);
        if !outcome.output.is_empty() && !outcome.output.ends_with('\n') {
            println!();
        }
        match outcome.status {
            OutcomeStatus::Completed => {
                if let Some(code) = outcome.exit_code.filter(|c| *c != 0) {
                    eprintln!("exit code {code}");
                }
            }
            OutcomeStatus::Running => {
                eprintln!(
                    "still running after {} ms; terminating",
                    outcome.wall_time_ms
                );
            }
            _ => {}
        }
    }

    let killed = tokio::task::spawn_blocking(move || tools.shutdown()).await?;
    if killed > 0 {
        info!(killed, "terminated sessions left by exec");
    }
    if outcome.is_error() {
        anyhow::bail!("exec failed");
    }
    Ok(())
}
