//! Prelude module for convenient imports.

pub use crate::error::{ErrorKind, Result, SandboxError};
pub use crate::sandbox::{
    artifacts::Artifact,
    config::SandboxConfig,
    executor::{CodeSandbox, SandboxOptions},
    language::Language,
    outcome::{ExecutionOutcome, ExecutionResponse, ExecutionSuccess},
    policy::SecurityPolicy,
    request::ExecutionRequest,
};
