//! Precompiled seccomp artifact discovery.
//!
//! The BPF blob denies `socket(AF_UNIX, ...)` with EPERM; the applier sets
//! `PR_SET_NO_NEW_PRIVS`, installs the filter, and execs the wrapped shell.
//! Both ship as opaque per-architecture binaries under `vendor/seccomp/`.

use std::path::PathBuf;

use crate::error::{Result, SandboxError};
use crate::utils::Arch;

/// Located seccomp artifacts for the current architecture.
#[derive(Debug, Clone)]
pub struct SeccompArtifacts {
    pub bpf_path: PathBuf,
    pub applier_path: PathBuf,
}

/// Candidate roots probed for the vendored artifact directory.
fn candidate_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            roots.push(dir.to_path_buf());
            if let Some(parent) = dir.parent() {
                roots.push(parent.to_path_buf());
            }
        }
    }
    roots
}

fn locate(relative: &str) -> Option<PathBuf> {
    candidate_roots()
        .into_iter()
        .map(|root| root.join(relative))
        .find(|p| p.exists())
}

/// Find both artifacts for `arch`, validating the BPF blob.
pub fn find_artifacts(arch: Arch) -> Result<SeccompArtifacts> {
    let arch_name = arch.name();

    let bpf_path = locate(&format!("vendor/seccomp/{arch_name}/unix-block.bpf"))
        .ok_or_else(|| {
            SandboxError::Seccomp(format!("unix-block.bpf not found for '{arch_name}'"))
        })?;
    let applier_path = locate(&format!("vendor/seccomp/{arch_name}/apply-seccomp"))
        .ok_or_else(|| {
            SandboxError::Seccomp(format!("apply-seccomp not found for '{arch_name}'"))
        })?;

    validate_bpf(&bpf_path)?;

    Ok(SeccompArtifacts {
        bpf_path,
        applier_path,
    })
}

/// A BPF program is an array of 8-byte `sock_filter` entries; anything else
/// is a corrupt artifact.
fn validate_bpf(path: &std::path::Path) -> Result<()> {
    let len = std::fs::metadata(path)?.len();
    if len == 0 || len % 8 != 0 {
        return Err(SandboxError::Seccomp(format!(
            "invalid BPF filter size {len} in {}",
            path.display()
        )));
    }
    Ok(())
}

/// Whether seccomp artifacts are present for this machine.
pub fn is_seccomp_available() -> bool {
    Arch::current().is_some_and(|arch| find_artifacts(arch).is_ok())
}
