//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Run a command inside an OS-level sandbox.
#[derive(Parser, Debug)]
#[command(name = "vsbx")]
#[command(about = "Sandbox a shell command with filesystem and network restrictions")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Path to the settings file (default: ~/.vsbx-settings.json)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    /// Run a command string through the shell
    #[arg(short = 'c', value_name = "COMMAND")]
    pub command: Option<String>,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// The command string to wrap. Positional tokens are joined with
    /// spaces; `-c` passes the string through untouched.
    pub fn get_command(&self) -> Option<String> {
        if let Some(ref command) = self.command {
            Some(command.clone())
        } else if !self.args.is_empty() {
            Some(self.args.join(" "))
        } else {
            None
        }
    }

    pub fn settings_path(&self) -> Option<PathBuf> {
        self.settings
            .clone()
            .or_else(crate::config::default_settings_path)
    }
}
