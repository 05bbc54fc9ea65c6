//! Bind-mount planning for the bubblewrap sandbox.
//!
//! Linux enforces write policy with mounts instead of matchers: the root is
//! bound read-only, allowed paths are bound writable on top, and dangerous
//! or denied paths are overlaid read-only (or masked entirely) afterwards.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::sync::oneshot;

use crate::config::{
    FilesystemConfig, RipgrepConfig, DANGEROUS_DIRECTORIES, DANGEROUS_FILES, GIT_CONFIG_FILE,
    GIT_HOOKS_DIR,
};
use crate::error::Result;
use crate::utils::ripgrep::find_dangerous_files;
use crate::utils::{contains_glob_chars, normalize_path_pattern};

/// Masked directory honored whenever a filesystem section is active.
const SSH_CONFIG_DIR: &str = "/etc/ssh/ssh_config.d";

/// One bubblewrap mount argument group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMount {
    /// `--bind <path> <path>`: writable.
    Writable(PathBuf),
    /// `--ro-bind <path> <path>`: read-only overlay.
    ReadOnly(PathBuf),
    /// `--tmpfs <path>`: masks a directory with an empty filesystem.
    Tmpfs(PathBuf),
    /// `--ro-bind /dev/null <path>`: masks a file.
    DevNull(PathBuf),
}

impl BindMount {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            BindMount::Writable(p) => {
                let p = p.display().to_string();
                vec!["--bind".into(), p.clone(), p]
            }
            BindMount::ReadOnly(p) => {
                let p = p.display().to_string();
                vec!["--ro-bind".into(), p.clone(), p]
            }
            BindMount::Tmpfs(p) => vec!["--tmpfs".into(), p.display().to_string()],
            BindMount::DevNull(p) => vec![
                "--ro-bind".into(),
                "/dev/null".into(),
                p.display().to_string(),
            ],
        }
    }

    /// Writable binds must precede the read-only overlays that trim them.
    pub fn is_writable(&self) -> bool {
        matches!(self, BindMount::Writable(_))
    }
}

/// Plan the mount set for a filesystem policy.
///
/// The dangerous-file scan failing (missing tool, timeout, abort) degrades
/// to the literal deny set with a warning; wrapping still succeeds.
pub async fn plan_bind_mounts(
    fs: &FilesystemConfig,
    cwd: &Path,
    ripgrep: Option<&RipgrepConfig>,
    search_depth: u8,
    scan_abort: Option<oneshot::Receiver<()>>,
) -> Result<(Vec<BindMount>, Vec<String>)> {
    let mut mounts = Vec::new();
    let mut warnings = Vec::new();

    // Writable binds for existing allowed paths.
    let mut writable: BTreeSet<PathBuf> = BTreeSet::new();
    for pattern in &fs.allow_write {
        if contains_glob_chars(pattern) {
            warnings.push(format!(
                "glob pattern '{pattern}' is not supported on Linux; ignoring"
            ));
            continue;
        }
        let normalized = PathBuf::from(normalize_path_pattern(pattern, cwd));
        if normalized.exists() {
            writable.insert(normalized);
        } else {
            warnings.push(format!(
                "write path '{}' does not exist; ignoring",
                normalized.display()
            ));
        }
    }
    mounts.extend(writable.iter().cloned().map(BindMount::Writable));

    // Mandatory deny: scanned plus literal dangerous paths, overlaid
    // read-only wherever they fall inside a writable bind.
    let mut dangerous: BTreeSet<PathBuf> = BTreeSet::new();
    match find_dangerous_files(cwd, ripgrep, search_depth, scan_abort).await {
        Ok(found) => dangerous.extend(found.into_iter().map(PathBuf::from)),
        Err(e) => {
            tracing::warn!("dangerous-file scan degraded to literal deny set: {e}");
            warnings.push(format!("dangerous-file scan failed: {e}"));
        }
    }
    dangerous.extend(literal_dangerous_paths(fs, cwd));

    for path in dangerous {
        let exists = path.exists();
        let in_dev = path.starts_with("/dev");
        let in_writable = writable.iter().any(|w| path.starts_with(w));
        if exists && !in_dev && in_writable {
            mounts.push(BindMount::ReadOnly(path));
        }
    }

    // Deny-read masking: directories vanish behind tmpfs, files behind
    // /dev/null.
    for pattern in &fs.deny_read {
        if contains_glob_chars(pattern) {
            warnings.push(format!(
                "glob pattern '{pattern}' is not supported on Linux; ignoring"
            ));
            continue;
        }
        let normalized = PathBuf::from(normalize_path_pattern(pattern, cwd));
        if normalized.is_dir() {
            mounts.push(BindMount::Tmpfs(normalized));
        } else if normalized.exists() {
            mounts.push(BindMount::DevNull(normalized));
        }
    }
    for pattern in &fs.deny_write {
        if contains_glob_chars(pattern) {
            warnings.push(format!(
                "glob pattern '{pattern}' is not supported on Linux; ignoring"
            ));
            continue;
        }
        let normalized = PathBuf::from(normalize_path_pattern(pattern, cwd));
        if normalized.exists() {
            mounts.push(BindMount::ReadOnly(normalized));
        }
    }

    let ssh_config = Path::new(SSH_CONFIG_DIR);
    if ssh_config.is_dir() {
        mounts.push(BindMount::Tmpfs(ssh_config.to_path_buf()));
    }

    Ok((mounts, warnings))
}

/// Dangerous paths known without scanning: the dangerous set anchored at
/// the cwd and the home directory.
fn literal_dangerous_paths(fs: &FilesystemConfig, cwd: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    let mut roots = vec![cwd.to_path_buf()];
    if let Some(home) = dirs::home_dir() {
        roots.push(home);
    }

    for root in &roots {
        for file in DANGEROUS_FILES {
            paths.push(root.join(file));
        }
        for dir in DANGEROUS_DIRECTORIES {
            paths.push(root.join(dir));
        }
    }

    paths.push(cwd.join(GIT_HOOKS_DIR));
    if !fs.allow_git_config.unwrap_or(false) {
        paths.push(cwd.join(GIT_CONFIG_FILE));
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_config(deny_read: Vec<&str>, allow_write: Vec<&str>, deny_write: Vec<&str>) -> FilesystemConfig {
        FilesystemConfig {
            deny_read: deny_read.into_iter().map(String::from).collect(),
            allow_write: allow_write.into_iter().map(String::from).collect(),
            deny_write: deny_write.into_iter().map(String::from).collect(),
            allow_git_config: None,
        }
    }

    #[test]
    fn bind_mount_argument_shapes() {
        assert_eq!(
            BindMount::Writable("/w".into()).to_args(),
            vec!["--bind", "/w", "/w"]
        );
        assert_eq!(
            BindMount::ReadOnly("/r".into()).to_args(),
            vec!["--ro-bind", "/r", "/r"]
        );
        assert_eq!(
            BindMount::Tmpfs("/t".into()).to_args(),
            vec!["--tmpfs", "/t"]
        );
        assert_eq!(
            BindMount::DevNull("/f".into()).to_args(),
            vec!["--ro-bind", "/dev/null", "/f"]
        );
    }

    #[tokio::test]
    async fn writable_binds_require_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir(base.join("out")).unwrap();

        let out = base.join("out").display().to_string();
        let missing = base.join("absent").display().to_string();
        let fs = fs_config(vec![], vec![&out, &missing], vec![]);

        let (mounts, warnings) = plan_bind_mounts(&fs, &base, None, 3, None).await.unwrap();
        assert!(mounts.contains(&BindMount::Writable(base.join("out"))));
        assert!(warnings.iter().any(|w| w.contains("does not exist")));
    }

    #[tokio::test]
    async fn globs_are_dropped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        let fs = fs_config(vec!["/x/*.log"], vec!["/y/**"], vec![]);

        let (mounts, warnings) = plan_bind_mounts(&fs, &base, None, 3, None).await.unwrap();
        assert_eq!(warnings.iter().filter(|w| w.contains("not supported")).count(), 2);
        assert!(mounts.iter().all(|m| !m.to_args().join(" ").contains('*')));
    }

    #[tokio::test]
    async fn deny_read_masks_dirs_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir(base.join("private")).unwrap();
        std::fs::write(base.join("token"), "x").unwrap();

        let private = base.join("private").display().to_string();
        let token = base.join("token").display().to_string();
        let fs = fs_config(vec![&private, &token], vec![], vec![]);

        let (mounts, _) = plan_bind_mounts(&fs, &base, None, 3, None).await.unwrap();
        assert!(mounts.contains(&BindMount::Tmpfs(base.join("private"))));
        assert!(mounts.contains(&BindMount::DevNull(base.join("token"))));
    }

    #[tokio::test]
    async fn dangerous_file_in_writable_tree_is_overlaid() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::write(base.join(".gitconfig"), "").unwrap();

        let root = base.display().to_string();
        let fs = fs_config(vec![], vec![&root], vec![]);

        let (mounts, _) = plan_bind_mounts(&fs, &base, None, 3, None).await.unwrap();
        assert!(mounts.contains(&BindMount::ReadOnly(base.join(".gitconfig"))));
    }

    #[tokio::test]
    async fn dangerous_file_outside_writable_tree_is_not_overlaid() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::write(base.join(".bashrc"), "").unwrap();
        std::fs::create_dir(base.join("out")).unwrap();

        let out = base.join("out").display().to_string();
        let fs = fs_config(vec![], vec![&out], vec![]);

        let (mounts, _) = plan_bind_mounts(&fs, &base, None, 3, None).await.unwrap();
        // Root is read-only anyway; no overlay needed outside writable binds.
        assert!(!mounts.contains(&BindMount::ReadOnly(base.join(".bashrc"))));
    }

    #[tokio::test]
    async fn deny_write_overlays_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::create_dir(base.join("out")).unwrap();
        std::fs::create_dir(base.join("out/keep")).unwrap();

        let out = base.join("out").display().to_string();
        let keep = base.join("out/keep").display().to_string();
        let fs = fs_config(vec![], vec![&out], vec![&keep]);

        let (mounts, _) = plan_bind_mounts(&fs, &base, None, 3, None).await.unwrap();
        let writable_pos = mounts
            .iter()
            .position(|m| *m == BindMount::Writable(base.join("out")))
            .unwrap();
        let deny_pos = mounts
            .iter()
            .position(|m| *m == BindMount::ReadOnly(base.join("out/keep")))
            .unwrap();
        assert!(writable_pos < deny_pos);
    }
}
