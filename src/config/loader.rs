//! Settings file loading (`~/.vsbx-settings.json`).

use std::path::{Path, PathBuf};

use crate::config::schema::PolicyConfig;
use crate::error::{ConfigError, Result};

/// Default settings file name, resolved under the home directory.
const DEFAULT_SETTINGS_FILE: &str = ".vsbx-settings.json";

/// Get the default settings file path.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_SETTINGS_FILE))
}

/// Load and validate configuration from a file path.
pub fn load_config(path: &Path) -> Result<PolicyConfig> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()).into());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Parse(format!("failed to read {}: {e}", path.display())))?;

    parse_config(&content)
}

/// Load from the default path, or fall back to an unrestricted policy when
/// no settings file exists.
pub fn load_default_config() -> Result<PolicyConfig> {
    match default_settings_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(PolicyConfig::default()),
    }
}

/// Parse and validate a JSON policy document.
pub fn parse_config(json: &str) -> Result<PolicyConfig> {
    let config: PolicyConfig =
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = parse_config("{}").unwrap();
        assert!(config.network.is_none());
        assert!(config.filesystem.is_none());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "network": {
                "allowedDomains": ["github.com", "*.npmjs.org"],
                "deniedDomains": ["evil.example.com"],
                "allowLocalBinding": true,
                "allowUnixSockets": ["/var/run/docker.sock"]
            },
            "filesystem": {
                "denyRead": ["/etc/shadow"],
                "allowWrite": ["/tmp/build"],
                "denyWrite": ["/tmp/build/keep"],
                "allowGitConfig": false
            },
            "ignoreViolations": {"*": ["/dev/autofs"]},
            "mandatoryDenySearchDepth": 5,
            "allowPty": true,
            "ripgrep": {"command": "rg"}
        }"#;

        let config = parse_config(json).unwrap();
        let network = config.network.as_ref().unwrap();
        assert_eq!(network.allowed_domains.as_ref().unwrap().len(), 2);
        assert_eq!(network.denied_domains.len(), 1);
        assert_eq!(network.allow_local_binding, Some(true));
        let fs = config.filesystem.as_ref().unwrap();
        assert_eq!(fs.deny_read, vec!["/etc/shadow"]);
        assert_eq!(fs.allow_write, vec!["/tmp/build"]);
        assert_eq!(config.mandatory_deny_search_depth, Some(5));
        assert_eq!(config.allow_pty, Some(true));
    }

    #[test]
    fn invalid_domain_fails_parse() {
        let json = r#"{"network": {"allowedDomains": ["*.com"]}}"#;
        assert!(parse_config(json).is_err());
    }

    #[test]
    fn invalid_depth_fails_parse() {
        let json = r#"{"mandatoryDenySearchDepth": 0}"#;
        assert!(parse_config(json).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("/no/such/settings.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"network": {"allowedDomains": ["x.com"]}}"#).unwrap();
        let config = load_config(&path).unwrap();
        assert!(config.network_restricted());
    }
}
