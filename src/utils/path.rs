//! Path pattern normalization and the symlink boundary rule.
//!
//! Every user-supplied path flows through [`normalize_path_pattern`] before
//! it is embedded into a seatbelt rule or a bind-mount argument. Real-path
//! resolution is only accepted when it preserves or narrows the scope of the
//! original pattern; a symlink planted at or under a restricted path can
//! therefore never widen what the restriction covers.

use std::path::{Component, Path, PathBuf};

/// Glob metacharacters recognized in path patterns.
const GLOB_CHARS: [char; 4] = ['*', '?', '[', ']'];

/// Check if a path pattern contains glob metacharacters.
pub fn contains_glob_chars(path: &str) -> bool {
    path.contains(GLOB_CHARS)
}

/// Expand a leading `~` or `~/` to the user's home directory.
pub fn expand_home(path: &str) -> String {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.display().to_string();
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).display().to_string();
        }
    }
    path.to_string()
}

/// Normalize a user path pattern into an absolute path string.
///
/// Expands `~`, resolves relative paths against `cwd`, and canonicalizes
/// under the symlink boundary rule. For glob patterns only the static
/// prefix's containing directory is canonicalized; the glob remainder is
/// spliced back untouched.
pub fn normalize_path_pattern(pattern: &str, cwd: &Path) -> String {
    let expanded = expand_home(pattern);
    let absolute = if Path::new(&expanded).is_absolute() {
        expanded
    } else {
        cwd.join(&expanded).display().to_string()
    };

    if let Some(glob_idx) = absolute.find(GLOB_CHARS) {
        // Canonicalize only up to the directory containing the first glob
        // segment; `/a/b/*.txt` resolves `/a/b` and re-attaches `/*.txt`.
        let dir_end = absolute[..glob_idx].rfind('/').unwrap_or(0);
        if dir_end == 0 {
            return absolute;
        }
        let static_dir = &absolute[..dir_end];
        let remainder = &absolute[dir_end..];
        let resolved = resolve_within_boundary(Path::new(static_dir));
        format!("{}{}", resolved.display(), remainder)
    } else {
        resolve_within_boundary(Path::new(&absolute))
            .display()
            .to_string()
    }
}

/// Resolve `original` via the filesystem, accepting the result only when it
/// stays inside the boundary defined by `original` itself.
///
/// The resolution `R` of path `P` is accepted iff `R == P`, `R` is the macOS
/// private-prefixed form of `P` (`/tmp` ↔ `/private/tmp`, `/var` ↔
/// `/private/var`), or `R` is a strict descendant of either. Resolutions to
/// `/`, to single-segment paths, to ancestors of `P`, or to unrelated trees
/// are discarded and the unresolved `P` is returned.
pub fn resolve_within_boundary(original: &Path) -> PathBuf {
    let resolved = match std::fs::canonicalize(original) {
        Ok(p) => p,
        Err(_) => return original.to_path_buf(),
    };

    if is_within_boundary(original, &resolved) {
        resolved
    } else {
        original.to_path_buf()
    }
}

/// Boundary predicate: does `resolved` preserve or narrow the scope of
/// `original`?
pub fn is_within_boundary(original: &Path, resolved: &Path) -> bool {
    if resolved == Path::new("/") {
        return false;
    }
    // A resolution collapsing to a single path segment (e.g. `/etc`) is
    // never a legitimate narrowing of a deeper pattern.
    if path_depth(resolved) <= 1 && path_depth(original) > 1 {
        return false;
    }

    for base in boundary_forms(original) {
        if resolved == base {
            return true;
        }
        if resolved.starts_with(&base) {
            // starts_with is also true for equality, already handled; any
            // other hit is a strict descendant.
            return true;
        }
    }
    false
}

/// The acceptable boundary anchors for a path: itself plus its
/// `/private`-prefixed (or -stripped) macOS canonical form.
fn boundary_forms(original: &Path) -> Vec<PathBuf> {
    let mut forms = vec![original.to_path_buf()];
    let s = original.to_string_lossy();
    for prefix in ["/tmp", "/var"] {
        if s == *prefix || s.starts_with(&format!("{prefix}/")) {
            forms.push(PathBuf::from(format!("/private{s}")));
        }
    }
    if let Some(stripped) = s.strip_prefix("/private") {
        if stripped == "/tmp"
            || stripped == "/var"
            || stripped.starts_with("/tmp/")
            || stripped.starts_with("/var/")
        {
            forms.push(PathBuf::from(stripped));
        }
    }
    forms
}

fn path_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon_tempdir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let canon = std::fs::canonicalize(dir.path()).unwrap();
        (dir, canon)
    }

    #[test]
    fn expand_home_prefix() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~"), home.display().to_string());
        assert_eq!(
            expand_home("~/notes"),
            home.join("notes").display().to_string()
        );
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        assert_eq!(expand_home("rel/path"), "rel/path");
    }

    #[test]
    fn glob_char_detection() {
        assert!(contains_glob_chars("*.txt"));
        assert!(contains_glob_chars("src/**/x.rs"));
        assert!(contains_glob_chars("file?.log"));
        assert!(contains_glob_chars("file[0-9]"));
        assert!(!contains_glob_chars("/plain/path"));
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let (_dir, base) = canon_tempdir();
        std::fs::create_dir(base.join("sub")).unwrap();
        let normalized = normalize_path_pattern("sub", &base);
        assert_eq!(normalized, base.join("sub").display().to_string());
    }

    #[test]
    fn real_directory_resolves_to_itself() {
        let (_dir, base) = canon_tempdir();
        std::fs::create_dir(base.join("real")).unwrap();
        let p = base.join("real");
        assert_eq!(resolve_within_boundary(&p), p);
    }

    #[test]
    fn symlink_to_sibling_is_rejected() {
        let (_dir, base) = canon_tempdir();
        std::fs::create_dir(base.join("target")).unwrap();
        std::os::unix::fs::symlink(base.join("target"), base.join("link")).unwrap();
        // Resolution escapes to an unrelated tree; the original is kept.
        assert_eq!(resolve_within_boundary(&base.join("link")), base.join("link"));
    }

    #[test]
    fn symlink_to_ancestor_is_rejected() {
        let (_dir, base) = canon_tempdir();
        std::fs::create_dir(base.join("sub")).unwrap();
        std::os::unix::fs::symlink(&base, base.join("sub/up")).unwrap();
        let p = base.join("sub/up");
        assert_eq!(resolve_within_boundary(&p), p);
    }

    #[test]
    fn symlink_to_root_is_rejected() {
        let (_dir, base) = canon_tempdir();
        std::os::unix::fs::symlink("/", base.join("rootlink")).unwrap();
        let p = base.join("rootlink");
        assert_eq!(resolve_within_boundary(&p), p);
    }

    #[test]
    fn missing_path_returned_unresolved() {
        let p = Path::new("/no/such/path/here");
        assert_eq!(resolve_within_boundary(p), p);
    }

    #[test]
    fn private_prefix_forms_are_inside_boundary() {
        assert!(is_within_boundary(
            Path::new("/tmp/work"),
            Path::new("/private/tmp/work")
        ));
        assert!(is_within_boundary(
            Path::new("/var/log/x"),
            Path::new("/private/var/log/x")
        ));
        assert!(is_within_boundary(
            Path::new("/private/tmp/work"),
            Path::new("/tmp/work")
        ));
        // Descendants of the private form narrow scope and are fine.
        assert!(is_within_boundary(
            Path::new("/tmp/work"),
            Path::new("/private/tmp/work/deeper")
        ));
    }

    #[test]
    fn unrelated_and_widening_resolutions_are_outside() {
        assert!(!is_within_boundary(Path::new("/home/u/p"), Path::new("/")));
        assert!(!is_within_boundary(
            Path::new("/home/u/p"),
            Path::new("/etc")
        ));
        assert!(!is_within_boundary(
            Path::new("/home/u/p"),
            Path::new("/home/u")
        ));
        assert!(!is_within_boundary(
            Path::new("/home/u/p"),
            Path::new("/srv/other")
        ));
    }

    #[test]
    fn glob_pattern_keeps_suffix() {
        let (_dir, base) = canon_tempdir();
        std::fs::create_dir(base.join("logs")).unwrap();
        let pattern = format!("{}/logs/*.txt", base.display());
        let normalized = normalize_path_pattern(&pattern, &base);
        assert_eq!(normalized, pattern);
    }

    #[test]
    fn glob_prefix_boundary_violation_keeps_original_dir() {
        let (_dir, base) = canon_tempdir();
        std::fs::create_dir(base.join("target")).unwrap();
        std::os::unix::fs::symlink(base.join("target"), base.join("link")).unwrap();
        let pattern = format!("{}/link/*.txt", base.display());
        let normalized = normalize_path_pattern(&pattern, &base);
        assert_eq!(normalized, pattern);
    }
}
