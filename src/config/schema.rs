//! Policy configuration schema.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Network restriction policy.
///
/// `allowed_domains` is deliberately an `Option`: a present-but-empty list
/// blocks the network entirely, while an absent field inherits whatever the
/// manager's base policy says. The distinction is observable at the wrapper
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkConfig {
    /// Domains reachable through the proxies (e.g. "github.com", "*.npmjs.org").
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,

    /// Domains always refused, checked before the allow list.
    #[serde(default)]
    pub denied_domains: Vec<String>,

    /// Unix socket paths the sandboxed process may use (macOS).
    #[serde(default)]
    pub allow_unix_sockets: Option<Vec<String>>,

    /// Allow all Unix sockets (disables the seccomp AF_UNIX block on Linux).
    #[serde(default)]
    pub allow_all_unix_sockets: Option<bool>,

    /// Allow binding/listening on localhost.
    #[serde(default)]
    pub allow_local_binding: Option<bool>,

    /// Use an externally managed HTTP proxy on this port instead of
    /// starting one.
    #[serde(default)]
    pub http_proxy_port: Option<u16>,

    /// Use an externally managed SOCKS5 proxy on this port.
    #[serde(default)]
    pub socks_proxy_port: Option<u16>,
}

impl NetworkConfig {
    /// Whether this policy restricts network access at all.
    pub fn is_restricted(&self) -> bool {
        self.allowed_domains.is_some() || !self.denied_domains.is_empty()
    }
}

/// Filesystem restriction policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilesystemConfig {
    /// Paths/patterns denied for reading. Empty means reads are unrestricted.
    #[serde(default)]
    pub deny_read: Vec<String>,

    /// Paths writable by the command. Empty (with `filesystem` present)
    /// means only the hardwired default writable paths.
    #[serde(default)]
    pub allow_write: Vec<String>,

    /// Paths denied for writing even inside an allowed write path.
    #[serde(default)]
    pub deny_write: Vec<String>,

    /// Permit writes to `.git/config` (kept in the mandatory deny set
    /// otherwise).
    #[serde(default)]
    pub allow_git_config: Option<bool>,
}

/// Location of the ripgrep binary used by the mandatory-deny scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RipgrepConfig {
    pub command: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// The authoritative policy input.
///
/// Unknown top-level keys are tolerated for forward compatibility; unknown
/// nested keys fail validation via `deny_unknown_fields` on the subsections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(default)]
    pub network: Option<NetworkConfig>,

    #[serde(default)]
    pub filesystem: Option<FilesystemConfig>,

    /// Violation report filtering: command substring pattern -> path
    /// fragments to ignore. The key `"*"` applies to every command.
    #[serde(default)]
    pub ignore_violations: Option<HashMap<String, Vec<String>>>,

    /// Relax the Linux sandbox for environments that cannot nest `/proc`
    /// mounts.
    #[serde(default)]
    pub enable_weaker_nested_sandbox: Option<bool>,

    /// Recursion depth for the mandatory-deny scan (1..=10, default 3).
    #[serde(default)]
    pub mandatory_deny_search_depth: Option<u8>,

    /// Grant pseudo-terminal access (macOS).
    #[serde(default)]
    pub allow_pty: Option<bool>,

    #[serde(default)]
    pub ripgrep: Option<RipgrepConfig>,
}

impl PolicyConfig {
    /// Validate every field, returning the first diagnostic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref network) = self.network {
            for domain in network.allowed_domains.iter().flatten() {
                validate_domain_pattern(domain)?;
            }
            for domain in &network.denied_domains {
                validate_domain_pattern(domain)?;
            }
            for path in network.allow_unix_sockets.iter().flatten() {
                validate_path_pattern(path)?;
            }
        }

        if let Some(ref fs) = self.filesystem {
            for path in fs
                .deny_read
                .iter()
                .chain(&fs.allow_write)
                .chain(&fs.deny_write)
            {
                validate_path_pattern(path)?;
            }
        }

        if let Some(depth) = self.mandatory_deny_search_depth {
            if !(1..=10).contains(&depth) {
                return Err(ConfigError::InvalidDepth(depth));
            }
        }

        Ok(())
    }

    /// Merge a partial override on top of this policy. Each present subkey
    /// of `custom` replaces the corresponding base subkey wholesale; absent
    /// subkeys inherit.
    pub fn merged(&self, custom: &PolicyConfig) -> PolicyConfig {
        PolicyConfig {
            network: custom.network.clone().or_else(|| self.network.clone()),
            filesystem: custom
                .filesystem
                .clone()
                .or_else(|| self.filesystem.clone()),
            ignore_violations: custom
                .ignore_violations
                .clone()
                .or_else(|| self.ignore_violations.clone()),
            enable_weaker_nested_sandbox: custom
                .enable_weaker_nested_sandbox
                .or(self.enable_weaker_nested_sandbox),
            mandatory_deny_search_depth: custom
                .mandatory_deny_search_depth
                .or(self.mandatory_deny_search_depth),
            allow_pty: custom.allow_pty.or(self.allow_pty),
            ripgrep: custom.ripgrep.clone().or_else(|| self.ripgrep.clone()),
        }
    }

    /// Whether the effective policy restricts network access.
    pub fn network_restricted(&self) -> bool {
        self.network.as_ref().is_some_and(|n| n.is_restricted())
    }

    /// Whether this policy applies any restriction at all. Unrestricted
    /// policies wrap to the identity.
    pub fn is_unrestricted(&self) -> bool {
        !self.network_restricted() && self.filesystem.is_none()
    }

    /// A write config is "present" as soon as the filesystem section exists;
    /// an empty `allow_write` still means writes are restricted.
    pub fn has_write_config(&self) -> bool {
        self.filesystem.is_some()
    }
}

/// Files that must never become writable, wherever they appear.
pub const DANGEROUS_FILES: &[&str] = &[
    ".gitconfig",
    ".bashrc",
    ".bash_profile",
    ".zshrc",
    ".zshenv",
    ".profile",
    ".ripgreprc",
    ".mcp.json",
];

/// Directories that must never become writable.
pub const DANGEROUS_DIRECTORIES: &[&str] = &[".vscode", ".idea", ".vsbx/commands", ".vsbx/agents"];

/// Always denied regardless of `allow_git_config`.
pub const GIT_HOOKS_DIR: &str = ".git/hooks";

/// Denied unless `allow_git_config` is set.
pub const GIT_CONFIG_FILE: &str = ".git/config";

/// Paths that stay writable under any write restriction.
pub const DEFAULT_WRITABLE_PATHS: &[&str] = &[
    "/dev/stdout",
    "/dev/stderr",
    "/dev/null",
    "/dev/tty",
    "/dev/dtracehelper",
    "/dev/autofs_nowait",
    "/tmp/vsbx",
    "/private/tmp/vsbx",
    "~/.npm/_logs",
    "~/.vsbx/debug",
];

/// Validate a domain pattern against the strict syntax: `localhost`, a
/// dotted literal with at least two labels, or `*.<name>` where `<name>`
/// itself has at least two labels.
pub fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let reject = |reason: &str| {
        Err(ConfigError::InvalidDomainPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        })
    };

    if pattern.is_empty() {
        return reject("pattern is empty");
    }
    if pattern.eq_ignore_ascii_case("localhost") {
        return Ok(());
    }

    let body = pattern.strip_prefix("*.").unwrap_or(pattern);
    if body.contains("://") || body.contains('/') {
        return reject("schemes and paths are not allowed");
    }
    if body.contains(':') {
        return reject("ports are not allowed");
    }
    if body.contains('*') {
        return reject("wildcard is only allowed as a leading '*.'");
    }

    let labels: Vec<&str> = body.split('.').collect();
    if labels.len() < 2 {
        return reject("at least two labels are required");
    }
    for label in labels {
        if label.is_empty() {
            return reject("empty label");
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return reject("invalid character in label");
        }
    }

    Ok(())
}

/// Validate a path pattern (non-empty is the only structural requirement).
fn validate_path_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPathPattern {
            pattern: pattern.to_string(),
            reason: "path pattern is empty".to_string(),
        });
    }
    Ok(())
}

/// Case-insensitive hostname match against a validated pattern.
pub fn matches_domain_pattern(hostname: &str, pattern: &str) -> bool {
    let hostname = hostname.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    if let Some(base) = pattern.strip_prefix("*.") {
        // *.example.com matches api.example.com but not example.com itself.
        hostname.ends_with(&format!(".{base}"))
    } else {
        hostname == pattern
    }
}
