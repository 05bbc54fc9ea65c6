//! Error types for the sandbox runtime.

use thiserror::Error;

/// Main error type for the sandbox runtime.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform not supported: {0}")]
    UnsupportedPlatform(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Bridge startup failed: {0}")]
    Bridge(String),

    #[error("Seccomp error: {0}")]
    Seccomp(String),

    #[error("Failed to wrap command: {0}")]
    Wrap(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors, with field-level diagnostics.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid domain pattern '{pattern}': {reason}")]
    InvalidDomainPattern { pattern: String, reason: String },

    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPathPattern { pattern: String, reason: String },

    #[error("mandatoryDenySearchDepth must be between 1 and 10, got {0}")]
    InvalidDepth(u8),

    #[error("Settings file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
