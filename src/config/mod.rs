//! Configuration module.

pub mod loader;
pub mod schema;

pub use loader::{default_settings_path, load_config, load_default_config, parse_config};
pub use schema::{
    matches_domain_pattern, validate_domain_pattern, FilesystemConfig, NetworkConfig, PolicyConfig,
    RipgrepConfig, DANGEROUS_DIRECTORIES, DANGEROUS_FILES, DEFAULT_WRITABLE_PATHS, GIT_CONFIG_FILE,
    GIT_HOOKS_DIR,
};
