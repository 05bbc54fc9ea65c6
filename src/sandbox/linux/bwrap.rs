//! Bubblewrap command assembly for the Linux sandbox.

use std::process::Stdio;

use crate::error::Result;
use crate::sandbox::linux::bridge::{
    tcp_to_unix_relay_command, NAMESPACE_HTTP_PORT, NAMESPACE_SOCKS_PORT,
};
use crate::sandbox::linux::filesystem::plan_bind_mounts;
use crate::sandbox::linux::seccomp::find_artifacts;
use crate::sandbox::{proxy_env_vars, SandboxParams};
use crate::utils::ripgrep::DEFAULT_SEARCH_DEPTH;
use crate::utils::shell::{join_tokens, ShellToken};
use crate::utils::Arch;

/// Check if bubblewrap is available.
pub fn check_bwrap() -> bool {
    std::process::Command::new("bwrap")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Wrap a command for bubblewrap.
///
/// Unrestricted policies wrap to the identity. Otherwise the result is a
/// shell-quoted `bwrap <args> -- <shell> -c <inner>` string whose inner
/// script brings up the in-namespace relays (when bridged) and applies
/// seccomp before the user command runs.
pub async fn wrap_command(params: &SandboxParams<'_>) -> Result<(String, Vec<String>)> {
    let config = params.config;
    if config.is_unrestricted() {
        return Ok((params.command.to_string(), Vec::new()));
    }

    let mut warnings = Vec::new();
    let mut tokens = vec![
        ShellToken::lit("bwrap"),
        ShellToken::lit("--new-session"),
        ShellToken::lit("--die-with-parent"),
    ];

    let network_restricted = config.network_restricted();
    let bridged = network_restricted
        && params.http_socket_path.is_some()
        && params.socks_socket_path.is_some();

    if network_restricted {
        tokens.push(ShellToken::lit("--unshare-net"));
    }

    if bridged {
        let http_socket = params.http_socket_path.unwrap_or_default();
        let socks_socket = params.socks_socket_path.unwrap_or_default();
        for socket in [http_socket, socks_socket] {
            tokens.push(ShellToken::lit("--bind"));
            tokens.push(ShellToken::lit(socket));
            tokens.push(ShellToken::lit(socket));
        }
        // The relay ports are fixed inside the namespace regardless of
        // where the host proxies listen.
        for (key, value) in proxy_env_vars(NAMESPACE_HTTP_PORT, NAMESPACE_SOCKS_PORT) {
            tokens.push(ShellToken::lit("--setenv"));
            tokens.push(ShellToken::lit(key));
            tokens.push(ShellToken::lit(value));
        }
    }

    if let Some(ref fs) = config.filesystem {
        tokens.push(ShellToken::lit("--ro-bind"));
        tokens.push(ShellToken::lit("/"));
        tokens.push(ShellToken::lit("/"));

        let depth = config
            .mandatory_deny_search_depth
            .unwrap_or(DEFAULT_SEARCH_DEPTH);
        let (mounts, mount_warnings) =
            plan_bind_mounts(fs, params.cwd, config.ripgrep.as_ref(), depth, None).await?;
        warnings.extend(mount_warnings);

        for mount in mounts.iter().filter(|m| m.is_writable()) {
            tokens.extend(mount.to_args().into_iter().map(ShellToken::lit));
        }
        for mount in mounts.iter().filter(|m| !m.is_writable()) {
            tokens.extend(mount.to_args().into_iter().map(ShellToken::lit));
        }
    } else {
        tokens.push(ShellToken::lit("--bind"));
        tokens.push(ShellToken::lit("/"));
        tokens.push(ShellToken::lit("/"));
    }

    tokens.push(ShellToken::lit("--dev"));
    tokens.push(ShellToken::lit("/dev"));
    tokens.push(ShellToken::lit("--unshare-pid"));
    if !config.enable_weaker_nested_sandbox.unwrap_or(false) {
        tokens.push(ShellToken::lit("--proc"));
        tokens.push(ShellToken::lit("/proc"));
    }

    let inner = build_inner_command(params, bridged, &mut warnings);

    tokens.push(ShellToken::Operator("--"));
    tokens.push(ShellToken::lit(params.shell));
    tokens.push(ShellToken::lit("-c"));
    tokens.push(ShellToken::lit(inner));

    Ok((join_tokens(&tokens), warnings))
}

/// Compose the script run as namespace PID 1.
///
/// When bridged, the relays must listen before the user command runs, and
/// seccomp must come after them (socat needs AF_UNIX); the applier is
/// exec'd so the user command keeps PID 1.
fn build_inner_command(
    params: &SandboxParams<'_>,
    bridged: bool,
    warnings: &mut Vec<String>,
) -> String {
    let seccomp = seccomp_exec_prefix(params, warnings);

    if !bridged && seccomp.is_none() {
        return params.command.to_string();
    }

    let mut lines = Vec::new();

    if bridged {
        let http_socket = params.http_socket_path.unwrap_or_default();
        let socks_socket = params.socks_socket_path.unwrap_or_default();
        lines.push(format!(
            "{} &",
            tcp_to_unix_relay_command(NAMESPACE_HTTP_PORT, http_socket)
        ));
        lines.push(format!(
            "{} &",
            tcp_to_unix_relay_command(NAMESPACE_SOCKS_PORT, socks_socket)
        ));
        lines.push("trap \"kill 0\" EXIT".to_string());
    }

    let exec_target = match seccomp {
        Some(prefix) => format!(
            "exec {prefix} {} -c {}",
            params.shell,
            double_quote(params.command)
        ),
        None => format!("exec {} -c {}", params.shell, double_quote(params.command)),
    };
    lines.push(exec_target);

    lines.join("\n")
}

/// `<applier> <bpf>` when the AF_UNIX block applies and its artifacts are
/// present; missing artifacts degrade with a warning.
fn seccomp_exec_prefix(params: &SandboxParams<'_>, warnings: &mut Vec<String>) -> Option<String> {
    let allow_all = params
        .config
        .network
        .as_ref()
        .and_then(|n| n.allow_all_unix_sockets)
        .unwrap_or(false);
    if allow_all {
        return None;
    }

    let arch = match Arch::current() {
        Some(arch) => arch,
        None => {
            warnings.push("unknown CPU architecture; unix sockets not blocked".to_string());
            return None;
        }
    };

    match find_artifacts(arch) {
        Ok(artifacts) => Some(format!(
            "{} {}",
            artifacts.applier_path.display(),
            artifacts.bpf_path.display()
        )),
        Err(e) => {
            tracing::warn!("seccomp unavailable, unix sockets not blocked: {e}");
            warnings.push(format!("seccomp unavailable: {e}"));
            None
        }
    }
}

/// Double-quote a command for one extra shell-parsing layer, keeping the
/// inner script free of single quotes so the outer quoter can pass it
/// verbatim.
fn double_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use std::path::Path;

    fn params<'a>(
        command: &'a str,
        config: &'a PolicyConfig,
        http_socket: Option<&'a str>,
        socks_socket: Option<&'a str>,
    ) -> SandboxParams<'a> {
        SandboxParams {
            command,
            config,
            cwd: Path::new("/work/project"),
            shell: "/bin/bash",
            http_proxy_port: Some(40001),
            socks_proxy_port: Some(40002),
            http_socket_path: http_socket,
            socks_socket_path: socks_socket,
        }
    }

    #[tokio::test]
    async fn unrestricted_policy_is_identity() {
        let config: PolicyConfig = serde_json::from_str("{}").unwrap();
        let (wrapped, warnings) = wrap_command(&params("make test", &config, None, None))
            .await
            .unwrap();
        assert_eq!(wrapped, "make test");
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn network_restriction_without_bridge_has_no_proxy_env() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"network": {"allowedDomains": []}}"#).unwrap();
        let (wrapped, _) = wrap_command(&params("curl x.com", &config, None, None))
            .await
            .unwrap();

        assert!(wrapped.starts_with("bwrap --new-session --die-with-parent"));
        assert!(wrapped.contains("--unshare-net"));
        assert!(!wrapped.contains("HTTP_PROXY"));
        assert!(!wrapped.contains("TCP-LISTEN"));
    }

    #[tokio::test]
    async fn bridged_wrap_contains_sockets_env_and_relays() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"network": {"allowedDomains": ["github.com"]}}"#).unwrap();
        let (wrapped, _) = wrap_command(&params(
            "git fetch",
            &config,
            Some("/tmp/vsbx-http-0123456789abcdef.sock"),
            Some("/tmp/vsbx-socks-0123456789abcdef.sock"),
        ))
        .await
        .unwrap();

        assert!(wrapped.contains("--unshare-net"));
        assert!(wrapped.contains("/tmp/vsbx-http-0123456789abcdef.sock"));
        assert!(wrapped.contains("/tmp/vsbx-socks-0123456789abcdef.sock"));
        // Fixed in-namespace ports, independent of the host proxy ports.
        assert!(wrapped.contains("TCP-LISTEN:3128"));
        assert!(wrapped.contains("TCP-LISTEN:1080"));
        assert!(wrapped.contains("HTTP_PROXY http://localhost:3128"));
        assert!(wrapped.contains("ALL_PROXY socks5h://localhost:1080"));
        assert!(wrapped.contains("NO_PROXY"));
        assert!(wrapped.contains("trap"));
    }

    #[tokio::test]
    async fn write_config_switches_root_to_read_only() {
        let config: PolicyConfig = serde_json::from_str(r#"{"filesystem": {}}"#).unwrap();
        let (wrapped, _) = wrap_command(&params("ls", &config, None, None)).await.unwrap();

        assert!(wrapped.contains("--ro-bind / /"));
        assert!(wrapped.contains("--dev /dev"));
        assert!(wrapped.contains("--unshare-pid"));
        assert!(wrapped.contains("--proc /proc"));
    }

    #[tokio::test]
    async fn read_only_policy_without_write_config_keeps_root_writable() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"network": {"allowedDomains": []}}"#).unwrap();
        let (wrapped, _) = wrap_command(&params("ls", &config, None, None)).await.unwrap();
        assert!(wrapped.contains("--bind / /"));
        assert!(!wrapped.contains("--ro-bind / /"));
    }

    #[tokio::test]
    async fn weaker_nested_sandbox_drops_proc_mount() {
        let config: PolicyConfig = serde_json::from_str(
            r#"{"filesystem": {}, "enableWeakerNestedSandbox": true}"#,
        )
        .unwrap();
        let (wrapped, _) = wrap_command(&params("ls", &config, None, None)).await.unwrap();
        assert!(!wrapped.contains("--proc"));
        assert!(wrapped.contains("--unshare-pid"));
    }

    #[tokio::test]
    async fn command_appears_exactly_once() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"network": {"allowedDomains": []}}"#).unwrap();
        let marker = "echo vsbx-unique-marker";
        let (wrapped, _) = wrap_command(&params(marker, &config, None, None)).await.unwrap();
        assert_eq!(wrapped.matches("vsbx-unique-marker").count(), 1);
    }

    #[test]
    fn double_quote_escapes_expansion_characters() {
        assert_eq!(double_quote("echo $HOME"), "\"echo \\$HOME\"");
        assert_eq!(double_quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(double_quote("tick `date`"), "\"tick \\`date\\`\"");
        assert_eq!(double_quote("back\\slash"), "\"back\\\\slash\"");
    }
}
