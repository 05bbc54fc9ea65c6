//! Sandbox violation events and their bounded store.

pub mod store;

pub use store::{
    encode_command, SandboxViolationEvent, SandboxViolationStore, LOG_TAG_COMMAND_BYTES,
    MAX_VIOLATIONS,
};
