//! Seatbelt profile compiler.
//!
//! Produces the S-expression program consumed by `sandbox-exec`. Reads are
//! allowed by default and carved out per policy; writes flip to deny-by-
//! default as soon as a filesystem section exists. Every denied path also
//! gets a `file-write-unlink` denial on itself and each ancestor directory,
//! so a restriction cannot be escaped by renaming a parent out from under
//! it.

use std::path::{Path, PathBuf};

use crate::config::{
    FilesystemConfig, NetworkConfig, PolicyConfig, DANGEROUS_DIRECTORIES, DANGEROUS_FILES,
    DEFAULT_WRITABLE_PATHS, GIT_CONFIG_FILE, GIT_HOOKS_DIR,
};
use crate::sandbox::macos::glob::glob_to_seatbelt_regex;
use crate::utils::{contains_glob_chars, expand_home, normalize_path_pattern};
use crate::violation::encode_command;

/// Per-process random suffix distinguishing this session's log tags.
static SESSION_SUFFIX: once_cell::sync::Lazy<String> = once_cell::sync::Lazy::new(|| {
    use rand::Rng;
    format!("{:08x}", rand::thread_rng().gen::<u32>())
});

/// The session suffix embedded in every log tag, used by the log monitor's
/// predicate.
pub fn session_suffix() -> &'static str {
    &SESSION_SUFFIX
}

/// Build the log tag correlating profile denials back to `command`.
pub fn generate_log_tag(command: &str) -> String {
    format!("CMD64_{}_END_{}", encode_command(command), *SESSION_SUFFIX)
}

/// Compile the policy into a seatbelt profile.
pub fn generate_profile(
    config: &PolicyConfig,
    http_proxy_port: Option<u16>,
    socks_proxy_port: Option<u16>,
    log_tag: Option<&str>,
    cwd: &Path,
) -> String {
    let mut profile = String::new();

    profile.push_str("(version 1)\n");
    profile.push_str("(deny default)\n\n");

    // Process bootstrap: spawning, inheriting, and self-introspection.
    profile.push_str("; Process\n");
    profile.push_str("(allow process-exec)\n");
    profile.push_str("(allow process-fork)\n");
    profile.push_str("(allow process-info*)\n");
    profile.push_str("(allow process-codesigning-status*)\n");
    profile.push_str("(allow signal)\n\n");

    profile.push_str("; IPC and service lookup\n");
    profile.push_str("(allow ipc-posix*)\n");
    profile.push_str("(allow mach-lookup)\n\n");

    // kern.proc.all keeps `ps` and friends working under the blanket read.
    profile.push_str("; Introspection\n");
    profile.push_str("(allow sysctl-read)\n");
    profile.push_str("(allow file-read-metadata)\n");
    profile.push_str("(allow file-ioctl (literal \"/dev/null\"))\n\n");

    if config.allow_pty.unwrap_or(false) {
        profile.push_str("; PTY\n");
        profile.push_str("(allow pseudo-tty)\n");
        profile.push_str("(allow file-read* file-write* (regex #\"^/dev/ttys[0-9]*$\"))\n");
        profile.push_str("(allow file-ioctl (regex #\"^/dev/ttys[0-9]*$\"))\n\n");
    }

    profile.push_str("; Network\n");
    generate_network_rules(
        &mut profile,
        config.network.as_ref(),
        http_proxy_port,
        socks_proxy_port,
        cwd,
    );
    profile.push('\n');

    profile.push_str("; Filesystem reads\n");
    generate_read_rules(&mut profile, config.filesystem.as_ref(), log_tag, cwd);
    profile.push('\n');

    profile.push_str("; Filesystem writes\n");
    generate_write_rules(&mut profile, config.filesystem.as_ref(), log_tag, cwd);

    profile
}

fn generate_network_rules(
    profile: &mut String,
    network: Option<&NetworkConfig>,
    http_proxy_port: Option<u16>,
    socks_proxy_port: Option<u16>,
    cwd: &Path,
) {
    let Some(network) = network.filter(|n| n.is_restricted()) else {
        profile.push_str("(allow network*)\n");
        return;
    };

    if network.allow_local_binding.unwrap_or(false) {
        profile.push_str("(allow network-bind (local ip \"localhost:*\"))\n");
        profile.push_str("(allow network-inbound (local ip \"localhost:*\"))\n");
        profile.push_str("(allow network-outbound (remote ip \"localhost:*\"))\n");
    }

    if network.allow_all_unix_sockets.unwrap_or(false) {
        profile.push_str("(allow network* (subpath \"/\"))\n");
    } else {
        for socket in network.allow_unix_sockets.iter().flatten() {
            let normalized = normalize_path_pattern(socket, cwd);
            profile.push_str(&format!(
                "(allow network* (subpath \"{}\"))\n",
                escape_seatbelt_string(&normalized)
            ));
        }
    }

    // The sandboxed process talks to the local proxies, and the proxies
    // accept on these ports.
    for port in [http_proxy_port, socks_proxy_port].into_iter().flatten() {
        profile.push_str(&format!(
            "(allow network-outbound (remote ip \"localhost:{port}\"))\n"
        ));
        profile.push_str(&format!(
            "(allow network-inbound (local ip \"localhost:{port}\"))\n"
        ));
        profile.push_str(&format!(
            "(allow network-bind (local ip \"localhost:{port}\"))\n"
        ));
    }
}

fn generate_read_rules(
    profile: &mut String,
    filesystem: Option<&FilesystemConfig>,
    log_tag: Option<&str>,
    cwd: &Path,
) {
    profile.push_str("(allow file-read*)\n");

    let Some(fs) = filesystem else { return };

    for pattern in &fs.deny_read {
        let normalized = normalize_path_pattern(pattern, cwd);
        if contains_glob_chars(&normalized) {
            let regex = glob_to_seatbelt_regex(&normalized);
            profile.push_str(&deny_rule(
                "file-read*",
                &format!("(regex #\"{regex}\")"),
                log_tag,
            ));
            if let Some(static_dir) = glob_static_dir(&normalized) {
                push_unlink_tower(profile, &static_dir, log_tag);
            }
        } else {
            profile.push_str(&deny_rule(
                "file-read*",
                &format!("(subpath \"{}\")", escape_seatbelt_string(&normalized)),
                log_tag,
            ));
            // Renaming the target or any ancestor would make the denied
            // content reachable under a fresh name.
            push_unlink_tower(profile, &normalized, log_tag);
        }
    }
}

fn generate_write_rules(
    profile: &mut String,
    filesystem: Option<&FilesystemConfig>,
    log_tag: Option<&str>,
    cwd: &Path,
) {
    let Some(fs) = filesystem else {
        profile.push_str("(allow file-write*)\n");
        return;
    };

    // Hardwired safe writes, device nodes as literals and scratch
    // directories as subpaths. The darwin per-user tmpdir lives under
    // /var/folders in both canonical spellings.
    for path in DEFAULT_WRITABLE_PATHS {
        let expanded = expand_home(path);
        let matcher = if expanded.starts_with("/dev/") {
            format!("(literal \"{}\")", escape_seatbelt_string(&expanded))
        } else {
            format!("(subpath \"{}\")", escape_seatbelt_string(&expanded))
        };
        profile.push_str(&format!("(allow file-write* {matcher})\n"));
    }
    profile.push_str("(allow file-write* (subpath \"/var/folders\"))\n");
    profile.push_str("(allow file-write* (subpath \"/private/var/folders\"))\n");

    for pattern in &fs.allow_write {
        let normalized = normalize_path_pattern(pattern, cwd);
        if contains_glob_chars(&normalized) {
            let regex = glob_to_seatbelt_regex(&normalized);
            profile.push_str(&format!("(allow file-write* (regex #\"{regex}\"))\n"));
        } else {
            profile.push_str(&format!(
                "(allow file-write* (subpath \"{}\"))\n",
                escape_seatbelt_string(&normalized)
            ));
        }
    }

    for pattern in &fs.deny_write {
        let normalized = normalize_path_pattern(pattern, cwd);
        if contains_glob_chars(&normalized) {
            let regex = glob_to_seatbelt_regex(&normalized);
            profile.push_str(&deny_rule(
                "file-write*",
                &format!("(regex #\"{regex}\")"),
                log_tag,
            ));
            if let Some(static_dir) = glob_static_dir(&normalized) {
                push_unlink_tower(profile, &static_dir, log_tag);
            }
        } else {
            profile.push_str(&deny_rule(
                "file-write*",
                &format!("(subpath \"{}\")", escape_seatbelt_string(&normalized)),
                log_tag,
            ));
            push_unlink_tower(profile, &normalized, log_tag);
        }
    }

    generate_mandatory_deny_rules(profile, fs, log_tag, cwd);
}

/// Credential-bearing files and directories under the cwd stay read-only no
/// matter what the allow list says.
fn generate_mandatory_deny_rules(
    profile: &mut String,
    fs: &FilesystemConfig,
    log_tag: Option<&str>,
    cwd: &Path,
) {
    let cwd_re = regex::escape(&cwd.display().to_string());

    for file in DANGEROUS_FILES {
        let name = regex::escape(file);
        profile.push_str(&deny_rule(
            "file-write*",
            &format!("(regex #\"^{cwd_re}/(.*/)?{name}$\")"),
            log_tag,
        ));
    }

    for dir in DANGEROUS_DIRECTORIES {
        let name = regex::escape(dir);
        profile.push_str(&deny_rule(
            "file-write*",
            &format!("(regex #\"^{cwd_re}/(.*/)?{name}(/.*)?$\")"),
            log_tag,
        ));
    }

    let hooks = regex::escape(GIT_HOOKS_DIR);
    profile.push_str(&deny_rule(
        "file-write*",
        &format!("(regex #\"^{cwd_re}/(.*/)?{hooks}(/.*)?$\")"),
        log_tag,
    ));

    if !fs.allow_git_config.unwrap_or(false) {
        let git_config = regex::escape(GIT_CONFIG_FILE);
        profile.push_str(&deny_rule(
            "file-write*",
            &format!("(regex #\"^{cwd_re}/(.*/)?{git_config}$\")"),
            log_tag,
        ));
    }
}

fn deny_rule(operation: &str, matcher: &str, log_tag: Option<&str>) -> String {
    match log_tag {
        Some(tag) => format!("(deny {operation} {matcher} (with message \"{tag}\"))\n"),
        None => format!("(deny {operation} {matcher})\n"),
    }
}

/// Deny `file-write-unlink` on `path` and every ancestor directory up to
/// (not including) the root.
fn push_unlink_tower(profile: &mut String, path: &str, log_tag: Option<&str>) {
    let mut current = PathBuf::from(path);
    loop {
        profile.push_str(&deny_rule(
            "file-write-unlink",
            &format!(
                "(literal \"{}\")",
                escape_seatbelt_string(&current.display().to_string())
            ),
            log_tag,
        ));
        match current.parent() {
            Some(parent) if parent != Path::new("/") && !parent.as_os_str().is_empty() => {
                current = parent.to_path_buf();
            }
            _ => break,
        }
    }
}

/// Directory prefix of a glob pattern before its first metacharacter.
fn glob_static_dir(pattern: &str) -> Option<String> {
    let idx = pattern.find(['*', '?', '['])?;
    let dir_end = pattern[..idx].rfind('/')?;
    if dir_end == 0 {
        return None;
    }
    Some(pattern[..dir_end].to_string())
}

fn escape_seatbelt_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
