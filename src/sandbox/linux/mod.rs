//! Linux sandbox: bubblewrap namespaces, socat bridges, seccomp.

pub mod bridge;
pub mod bwrap;
pub mod filesystem;
pub mod seccomp;

pub use bridge::{
    check_socat, tcp_to_unix_relay_command, LinuxBridge, NAMESPACE_HTTP_PORT, NAMESPACE_SOCKS_PORT,
};
pub use bwrap::{check_bwrap, wrap_command};
pub use filesystem::{plan_bind_mounts, BindMount};
pub use seccomp::{find_artifacts, is_seccomp_available, SeccompArtifacts};
