//! Violation monitoring via the macOS unified log stream.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::Result;
use crate::sandbox::macos::profile::session_suffix;
use crate::violation::{SandboxViolationEvent, SandboxViolationStore};

/// Log lines that are sandbox chatter, not command violations.
const NOISE_FILTERS: &[&str] = &[
    "mDNSResponder",
    "mach-lookup com.apple.diagnosticd",
    "mach-lookup com.apple.analyticsd",
];

/// Streams seatbelt denials tagged with this session's suffix into the
/// violation store.
pub struct LogMonitor {
    child: Option<Child>,
}

impl LogMonitor {
    /// Spawn `log stream` filtered to this session and feed parsed events
    /// into `store`.
    pub fn start(
        store: Arc<SandboxViolationStore>,
        ignore_violations: Option<HashMap<String, Vec<String>>>,
    ) -> Result<Self> {
        let predicate = format!("eventMessage ENDSWITH \"{}\"", session_suffix());

        let mut child = Command::new("log")
            .args(["stream", "--style", "syslog", "--predicate", &predicate])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let reader = BufReader::new(stdout);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(event) = parse_violation_chunk(&line, ignore_violations.as_ref()) {
                        store.add(event);
                    }
                }
            });
        }

        Ok(Self { child: Some(child) })
    }

    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

impl Drop for LogMonitor {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
    }
}

/// Parse one log chunk into a violation event.
///
/// A reportable chunk has a line containing both `Sandbox:` and `deny`, and
/// a `CMD64_…_END_…` tag somewhere in the chunk. Noise and configured
/// ignore patterns drop the event.
pub fn parse_violation_chunk(
    chunk: &str,
    ignore_violations: Option<&HashMap<String, Vec<String>>>,
) -> Option<SandboxViolationEvent> {
    let sandbox_line = chunk
        .lines()
        .find(|l| l.contains("Sandbox:") && l.contains("deny"))?;
    let tag = chunk
        .lines()
        .find_map(|l| l.find("CMD64_").map(|i| l[i..].to_string()))?;

    let detail = sandbox_line.split("Sandbox:").nth(1)?.trim().to_string();

    for noise in NOISE_FILTERS {
        if detail.contains(noise) {
            return None;
        }
    }

    let encoded = tag.strip_prefix("CMD64_")?.split("_END_").next()?.to_string();
    let command = decode_command(&encoded);

    if let Some(ignore) = ignore_violations {
        if let Some(paths) = ignore.get("*") {
            if paths.iter().any(|p| detail.contains(p.as_str())) {
                return None;
            }
        }
        if let Some(ref cmd) = command {
            for (key, paths) in ignore {
                if key != "*"
                    && cmd.contains(key.as_str())
                    && paths.iter().any(|p| detail.contains(p.as_str()))
                {
                    return None;
                }
            }
        }
    }

    Some(SandboxViolationEvent::new(detail, command, Some(encoded)))
}

/// Recover the (truncated) command from its base64 tag component.
pub fn decode_command(encoded: &str) -> Option<String> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violation::encode_command;

    fn tagged_line(detail: &str, command: &str) -> String {
        format!(
            "2026-08-02 10:00:00 kernel: Sandbox: {detail} CMD64_{}_END_deadbeef",
            encode_command(command)
        )
    }

    #[test]
    fn parses_deny_line_with_tag() {
        let line = tagged_line("deny(1) file-read-data /T/denied/secret", "cat /T/denied/secret");
        let event = parse_violation_chunk(&line, None).unwrap();

        assert!(event.line.starts_with("deny(1) file-read-data"));
        assert_eq!(event.command.as_deref(), Some("cat /T/denied/secret"));
        assert_eq!(
            event.encoded_command.as_deref(),
            Some(encode_command("cat /T/denied/secret").as_str())
        );
    }

    #[test]
    fn requires_both_deny_and_tag() {
        assert!(parse_violation_chunk("Sandbox: allow file-read-data /x", None).is_none());
        assert!(parse_violation_chunk("Sandbox: deny file-read-data /x", None).is_none());
        assert!(parse_violation_chunk("CMD64_eA==_END_ff without sandbox marker", None).is_none());
    }

    #[test]
    fn tag_may_arrive_on_following_line() {
        let chunk = format!(
            "kernel: Sandbox: deny(1) file-write-data /etc/x\nCMD64_{}_END_ff",
            encode_command("touch /etc/x")
        );
        let event = parse_violation_chunk(&chunk, None).unwrap();
        assert_eq!(event.command.as_deref(), Some("touch /etc/x"));
    }

    #[test]
    fn noise_is_filtered() {
        let line = tagged_line("deny(1) mach-lookup com.apple.diagnosticd", "anything");
        assert!(parse_violation_chunk(&line, None).is_none());

        let line = tagged_line("deny(1) network-outbound mDNSResponder", "anything");
        assert!(parse_violation_chunk(&line, None).is_none());
    }

    #[test]
    fn wildcard_ignore_list_applies_to_all_commands() {
        let mut ignore = HashMap::new();
        ignore.insert("*".to_string(), vec!["/dev/autofs".to_string()]);

        let line = tagged_line("deny(1) file-read-data /dev/autofs_nowait", "ls");
        assert!(parse_violation_chunk(&line, Some(&ignore)).is_none());

        let line = tagged_line("deny(1) file-read-data /T/secret", "ls");
        assert!(parse_violation_chunk(&line, Some(&ignore)).is_some());
    }

    #[test]
    fn command_pattern_ignore_requires_substring_match() {
        let mut ignore = HashMap::new();
        ignore.insert("npm install".to_string(), vec!["/usr/local".to_string()]);

        let hit = tagged_line("deny(1) file-write-data /usr/local/lib", "npm install left-pad");
        assert!(parse_violation_chunk(&hit, Some(&ignore)).is_none());

        // Different command: the pattern does not apply.
        let miss = tagged_line("deny(1) file-write-data /usr/local/lib", "cargo build");
        assert!(parse_violation_chunk(&miss, Some(&ignore)).is_some());
    }

    #[test]
    fn decode_round_trip() {
        let encoded = encode_command("echo hello");
        assert_eq!(decode_command(&encoded).as_deref(), Some("echo hello"));
        assert!(decode_command("!!notbase64!!").is_none());
    }
}
