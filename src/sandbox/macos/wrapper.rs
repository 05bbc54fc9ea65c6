//! Command wrapping for macOS sandbox-exec.

use crate::error::Result;
use crate::sandbox::macos::profile::{generate_log_tag, generate_profile};
use crate::sandbox::{proxy_env_vars, SandboxParams};
use crate::utils::shell::{join_tokens, ShellToken};

/// Wrap a command for `sandbox-exec`.
///
/// Returns the shell string and the log tag under which violations will be
/// reported. An unrestricted policy wraps to the identity.
pub fn wrap_command(params: &SandboxParams<'_>) -> Result<(String, Option<String>)> {
    if params.config.is_unrestricted() {
        return Ok((params.command.to_string(), None));
    }

    let log_tag = generate_log_tag(params.command);
    let profile = generate_profile(
        params.config,
        params.http_proxy_port,
        params.socks_proxy_port,
        Some(&log_tag),
        params.cwd,
    );

    let mut tokens = vec![ShellToken::lit("env")];

    if params.config.network_restricted() {
        if let (Some(http_port), Some(socks_port)) =
            (params.http_proxy_port, params.socks_proxy_port)
        {
            for (key, value) in proxy_env_vars(http_port, socks_port) {
                tokens.push(ShellToken::lit(format!("{key}={value}")));
            }
        }
    }

    tokens.push(ShellToken::lit("sandbox-exec"));
    tokens.push(ShellToken::lit("-p"));
    tokens.push(ShellToken::lit(profile));
    tokens.push(ShellToken::lit(params.shell));
    tokens.push(ShellToken::lit("-c"));
    tokens.push(ShellToken::lit(params.command));

    Ok((join_tokens(&tokens), Some(log_tag)))
}
