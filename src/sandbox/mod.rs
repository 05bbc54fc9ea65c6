//! Platform-specific sandbox compilers and their shared dispatch surface.

pub mod linux;
pub mod macos;

use std::path::Path;

use crate::config::PolicyConfig;
use crate::error::{Result, SandboxError};
use crate::utils::{check_ripgrep, Arch, Platform};

/// Loopback and RFC1918 destinations that bypass the proxies.
pub const NO_PROXY_LIST: &str =
    "localhost,127.0.0.1,::1,10.0.0.0/8,172.16.0.0/12,192.168.0.0/16,169.254.0.0/16";

/// Everything a platform compiler needs to wrap one command.
pub struct SandboxParams<'a> {
    pub command: &'a str,
    pub config: &'a PolicyConfig,
    pub cwd: &'a Path,
    pub shell: &'a str,
    pub http_proxy_port: Option<u16>,
    pub socks_proxy_port: Option<u16>,
    pub http_socket_path: Option<&'a str>,
    pub socks_socket_path: Option<&'a str>,
}

/// Result of wrapping a command.
#[derive(Debug)]
pub struct WrapResult {
    /// The shell string to execute.
    pub command: String,
    /// Violation correlation tag (macOS only).
    pub log_tag: Option<String>,
    /// Non-fatal degradations encountered while compiling.
    pub warnings: Vec<String>,
}

/// Proxy environment for the wrapped process. Ports are the ones the
/// process can actually reach: host proxy ports on macOS, the fixed
/// in-namespace relay ports on Linux.
pub fn proxy_env_vars(http_port: u16, socks_port: u16) -> Vec<(String, String)> {
    let http = format!("http://localhost:{http_port}");
    let socks = format!("socks5h://localhost:{socks_port}");

    vec![
        ("HTTP_PROXY".to_string(), http.clone()),
        ("HTTPS_PROXY".to_string(), http.clone()),
        ("http_proxy".to_string(), http.clone()),
        ("https_proxy".to_string(), http.clone()),
        ("NO_PROXY".to_string(), NO_PROXY_LIST.to_string()),
        ("ALL_PROXY".to_string(), socks),
        ("FTP_PROXY".to_string(), http.clone()),
        ("RSYNC_PROXY".to_string(), format!("localhost:{http_port}")),
        ("GRPC_PROXY".to_string(), http.clone()),
        ("DOCKER_HTTP_PROXY".to_string(), http.clone()),
        ("DOCKER_HTTPS_PROXY".to_string(), http),
    ]
}

/// Outcome of the dependency preflight.
#[derive(Debug, Clone, Default)]
pub struct DependencyCheck {
    /// Hard failures: the sandbox cannot be used.
    pub errors: Vec<String>,
    /// Degradations: the sandbox runs with reduced coverage.
    pub warnings: Vec<String>,
}

impl DependencyCheck {
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(SandboxError::MissingDependency(self.errors.join("; ")))
        }
    }
}

/// Verify the per-platform toolchain before initialization.
pub fn check_dependencies(platform: Platform, config: &PolicyConfig) -> DependencyCheck {
    let mut check = DependencyCheck::default();

    if !check_ripgrep(config.ripgrep.as_ref()) {
        check
            .errors
            .push("ripgrep (rg) not found; required for the mandatory-deny scan".to_string());
    }

    if platform == Platform::Linux {
        if !linux::check_bwrap() {
            check.errors.push("bubblewrap (bwrap) not installed".to_string());
        }
        if !linux::check_socat() {
            check.errors.push("socat not installed".to_string());
        }

        let allow_all_unix = config
            .network
            .as_ref()
            .and_then(|n| n.allow_all_unix_sockets)
            .unwrap_or(false);
        if !allow_all_unix {
            match Arch::current() {
                None => check.errors.push(
                    "unknown CPU architecture: no seccomp artifacts; set allowAllUnixSockets \
                     to run without unix-socket blocking"
                        .to_string(),
                ),
                Some(arch) => {
                    if let Err(e) = linux::find_artifacts(arch) {
                        check
                            .warnings
                            .push(format!("unix sockets will not be blocked: {e}"));
                    }
                }
            }
        }
    }

    check
}

/// Compile the wrapped command for `platform`.
pub async fn wrap_command(platform: Platform, params: &SandboxParams<'_>) -> Result<WrapResult> {
    match platform {
        Platform::MacOS => {
            let (command, log_tag) = macos::wrap_command(params)?;
            Ok(WrapResult {
                command,
                log_tag,
                warnings: Vec::new(),
            })
        }
        Platform::Linux => {
            let (command, warnings) = linux::wrap_command(params).await?;
            Ok(WrapResult {
                command,
                log_tag: None,
                warnings,
            })
        }
    }
}
