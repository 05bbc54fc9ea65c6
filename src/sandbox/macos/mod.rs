//! macOS sandbox: seatbelt profile compilation and `sandbox-exec` wrapping.

pub mod glob;
pub mod monitor;
pub mod profile;
pub mod wrapper;

pub use monitor::{parse_violation_chunk, LogMonitor};
pub use profile::{generate_log_tag, generate_profile, session_suffix};
pub use wrapper::wrap_command;
