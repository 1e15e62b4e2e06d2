use std::path::Path;

use tp_core::config::Config;

/// Run the `config` subcommand: print the effective configuration.
pub fn run(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    let source = path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);
    let marker = if source.exists() { "" } else { " (not found, defaults)" };
    println!("# {}{marker}", source.display());
    print!("{}", config.to_toml()?);
    Ok(())
}
