//! Shell completion generation.

use std::io::Write;

use clap::CommandFactory;
use clap_complete::Shell;

/// Map a shell name, case-insensitively, to a completion generator.
pub fn parse_shell(shell: &str) -> anyhow::Result<Shell> {
    match shell.to_lowercase().as_str() {
        "bash" => Ok(Shell::Bash),
        "zsh" => Ok(Shell::Zsh),
        "fish" => Ok(Shell::Fish),
        "powershell" | "ps" => Ok(Shell::PowerShell),
        "elvish" => Ok(Shell::Elvish),
        _ => anyhow::bail!(
            "Unsupported shell: {}. Supported: bash, zsh, fish, powershell, elvish",
            shell
        ),
    }
}

/// Write the completion script for `din` to `out`.
pub fn generate_completions(shell: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let shell = parse_shell(shell)?;
    let mut cmd = crate::cli::Cli::command();
    let bin_name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, bin_name, out);
    Ok(())
}
