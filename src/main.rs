//! CLI entry point for the vsbx sandbox runtime.

use std::process::ExitCode;

use vsbx::cli::Cli;
use vsbx::config::{load_config, load_default_config};
use vsbx::manager::SandboxManager;
use vsbx::utils::init_debug_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_debug_logging(cli.debug);

    let config = match cli.settings_path() {
        Some(path) if path.exists() => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("vsbx: failed to load settings from {}: {e}", path.display());
                return ExitCode::from(1);
            }
        },
        _ => match load_default_config() {
            Ok(config) => config,
            Err(e) => {
                eprintln!("vsbx: failed to load default settings: {e}");
                return ExitCode::from(1);
            }
        },
    };

    let Some(command) = cli.get_command() else {
        eprintln!("vsbx: no command given; use -c <command> or positional arguments");
        return ExitCode::from(1);
    };

    let manager = SandboxManager::new();
    if let Err(e) = manager.initialize(config).await {
        eprintln!("vsbx: initialization failed: {e}");
        return ExitCode::from(1);
    }

    let wrapped = match manager.wrap_with_sandbox(&command, None, None).await {
        Ok(wrapped) => wrapped,
        Err(e) => {
            eprintln!("vsbx: failed to wrap command: {e}");
            manager.reset().await;
            return ExitCode::from(1);
        }
    };

    tracing::debug!("wrapped command: {wrapped}");

    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&wrapped)
        .status()
        .await;

    manager.reset().await;

    match status {
        Ok(status) => match status.code() {
            Some(code) => ExitCode::from(code as u8),
            None => {
                eprintln!("vsbx: command terminated by signal");
                ExitCode::from(1)
            }
        },
        Err(e) => {
            eprintln!("vsbx: failed to execute command: {e}");
            ExitCode::from(1)
        }
    }
}
