/// Run the `tools` subcommand.
pub fn run() -> anyhow::Result<()> {
    let definitions = tp_tools::tool_definitions();
    println!("{}", serde_json::to_string_pretty(&definitions)?);
    Ok(())
}
