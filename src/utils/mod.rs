//! Utility modules.

pub mod debug;
pub mod path;
pub mod platform;
pub mod ripgrep;
pub mod shell;

pub use debug::{init_debug_logging, is_debug_enabled, VSBX_DEBUG_ENV};
pub use path::{
    contains_glob_chars, expand_home, is_within_boundary, normalize_path_pattern,
    resolve_within_boundary,
};
pub use platform::{current_platform, Arch, Platform};
pub use ripgrep::{check_ripgrep, find_dangerous_files, DEFAULT_SEARCH_DEPTH};
pub use shell::{join_args, join_tokens, quote, ShellToken};
