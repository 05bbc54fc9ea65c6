//! Mandatory-deny discovery: a bounded-depth ripgrep sweep for
//! credential-bearing files under the working directory.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::{RipgrepConfig, DANGEROUS_DIRECTORIES, DANGEROUS_FILES};
use crate::error::{Result, SandboxError};

/// Default search depth when the policy does not set one.
pub const DEFAULT_SEARCH_DEPTH: u8 = 3;

/// Wall-clock bound on the ripgrep subprocess.
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on accepted scan output.
const MAX_SCAN_OUTPUT: usize = 20 * 1024 * 1024;

/// Enumerate dangerous files and directories within `cwd` up to `depth`.
///
/// Returns absolute paths. Any failure mode (missing tool, timeout, abort,
/// oversized output) surfaces as an error; callers degrade to the
/// literal-only deny set rather than refusing to wrap.
pub async fn find_dangerous_files(
    cwd: &Path,
    config: Option<&RipgrepConfig>,
    depth: u8,
    abort: Option<oneshot::Receiver<()>>,
) -> Result<Vec<String>> {
    let command = config.map(|c| c.command.as_str()).unwrap_or("rg");

    let mut cmd = tokio::process::Command::new(command);
    cmd.arg("--files")
        .arg("--hidden")
        .arg("--max-depth")
        .arg(depth.to_string());

    for file in DANGEROUS_FILES {
        cmd.arg("--iglob").arg(format!("**/{file}"));
    }
    for dir in DANGEROUS_DIRECTORIES {
        cmd.arg("--iglob").arg(format!("**/{dir}/**"));
    }
    cmd.arg("--glob").arg("!**/node_modules/**");

    if let Some(extra) = config.and_then(|c| c.args.as_ref()) {
        cmd.args(extra);
    }

    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SandboxError::MissingDependency(format!("ripgrep not found at '{command}'"))
        } else {
            SandboxError::Io(e)
        }
    })?;

    let gather = tokio::time::timeout(SCAN_TIMEOUT, child.wait_with_output());
    let output = match abort {
        Some(mut abort_rx) => {
            tokio::select! {
                out = gather => out,
                _ = &mut abort_rx => {
                    return Err(SandboxError::Wrap("dangerous-file scan aborted".into()));
                }
            }
        }
        None => gather.await,
    }
    .map_err(|_| SandboxError::Wrap("dangerous-file scan timed out".into()))??;

    if output.stdout.len() > MAX_SCAN_OUTPUT {
        return Err(SandboxError::Wrap(
            "dangerous-file scan output exceeded 20 MB".into(),
        ));
    }

    // ripgrep exits 1 on "no matches", which is a perfectly good empty set.
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let path = Path::new(line);
            if path.is_absolute() {
                line.to_string()
            } else {
                cwd.join(line).display().to_string()
            }
        })
        .collect())
}

/// Check that the configured (or default) ripgrep binary runs.
pub fn check_ripgrep(config: Option<&RipgrepConfig>) -> bool {
    let command = config.map(|c| c.command.as_str()).unwrap_or("rg");
    std::process::Command::new(command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tool_reports_dependency() {
        let cfg = RipgrepConfig {
            command: "/no/such/rg-binary".to_string(),
            args: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let err = find_dangerous_files(dir.path(), Some(&cfg), 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::MissingDependency(_)));
    }

    #[tokio::test]
    async fn scan_depth_is_monotonic() {
        if !check_ripgrep(None) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        std::fs::write(base.join(".bashrc"), "").unwrap();
        std::fs::create_dir_all(base.join("a/b/c")).unwrap();
        std::fs::write(base.join("a/.gitconfig"), "").unwrap();
        std::fs::write(base.join("a/b/c/.zshrc"), "").unwrap();

        let mut previous = 0;
        for depth in [1u8, 3, 10] {
            let found = find_dangerous_files(base, None, depth, None).await.unwrap();
            assert!(found.len() >= previous, "depth {depth} lost results");
            previous = found.len();
        }
        assert!(previous >= 2);
    }

    #[tokio::test]
    async fn abort_signal_cancels_scan() {
        if !check_ripgrep(None) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();
        let result = find_dangerous_files(dir.path(), None, 10, Some(rx)).await;
        // Either the abort won the race or the (empty) scan finished first;
        // both are acceptable, an abort must not hang.
        if let Err(e) = result {
            assert!(matches!(e, SandboxError::Wrap(_)));
        }
    }
}
