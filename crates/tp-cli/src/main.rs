//! `tp` -- host the terminal tools for an agent, or drive them by hand.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tp_core::config::Config;

mod commands;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "tp", version, about)]
struct Cli {
    /// Config file (default: ~/.termpool/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer JSON tool calls on stdin, one per line (default).
    Serve,

    /// Run one command through exec_command and print the result.
    Exec {
        /// Command line for the shell.
        cmd: String,
        /// Working directory.
        #[arg(long)]
        workdir: Option<String>,
        /// How long to wait for the command, in milliseconds.
        #[arg(long)]
        yield_time_ms: Option<u64>,
        /// Keep at most this many lines of output.
        #[arg(long)]
        max_output_lines: Option<usize>,
        /// Print the full structured outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the tool definitions as JSON.
    Tools,

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    tp_telemetry::logging::init(
        "tp",
        &config.general.log_level,
        cli.json_logs || config.general.json_logs,
    );

    match cli.command {
        None | Some(Commands::Serve) => commands::serve::run(&config).await?,
        Some(Commands::Exec {
            cmd,
            workdir,
            yield_time_ms,
            max_output_lines,
            json,
        }) => {
            let request = tp_tools::ExecCommandRequest {
                cmd,
                workdir,
                yield_time_ms,
                max_output_lines,
                ..Default::default()
            };
            commands::exec::run(&config, request, json).await?;
        }
        Some(Commands::Tools) => commands::tools::run()?,
        Some(Commands::Config) => commands::config::run(&config, cli.config.as_deref())?,
    }

    Ok(())
}
