//! # Code Sandbox
//!
//! Runs untrusted Python and JavaScript with injected variables and returns
//! one structured result.
//!
//! Every execution happens in a fresh interpreter process with a cleared
//! environment and a private scratch directory. Protection is layered:
//!
//! - **Static policy**: denied imports and constructs are refused before anything is spawned
//! - **Run-time guard**: the generated program blocks denied imports again inside the child
//! - **Resource limits**: address space, file size and captured output are capped
//! - **Hard deadline**: the child's whole process group is killed when time runs out
//!
//! User code defines a `main` callable. The sandbox binds each request
//! variable, calls `main` with no arguments, the whole variable bag, or the
//! variables matching its parameter names, and decodes the single JSON line
//! the child prints. Figures left open by matplotlib come back as base64 PNG
//! artifacts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use code_sandbox_rs::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SandboxConfig::builder()
//!         .default_time_limit(Duration::from_secs(5))
//!         .max_memory(256 * 1024 * 1024) // 256MB
//!         .build();
//!
//!     let sandbox = CodeSandbox::new(config)?;
//!     let request = ExecutionRequest::python("def main(x): return x * 2").with_variable("x", 21);
//!     let result = sandbox.try_execute(request).await?;
//!
//!     assert_eq!(result.value, 42);
//!     Ok(())
//! }
//! ```
//!
//! ## Dependencies
//!
//! Third-party imports are installed on first use into a directory owned by
//! the sandbox (`pip --target`, `npm --prefix`) and recorded in a shared
//! [`DependencySet`](sandbox::cache::DependencySet), so concurrent requests
//! install each package once.

pub mod error;
pub mod prelude;
pub mod sandbox;

// Re-export main types at crate root for convenience
pub use error::{ErrorKind, Result, SandboxError};
pub use sandbox::artifacts::Artifact;
pub use sandbox::cache::DependencySet;
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::{CodeSandbox, SandboxOptions};
pub use sandbox::language::Language;
pub use sandbox::limits::ResourceLimits;
pub use sandbox::outcome::{ExecutionOutcome, ExecutionResponse, ExecutionSuccess};
pub use sandbox::policy::SecurityPolicy;
pub use sandbox::request::ExecutionRequest;
pub use sandbox::resolver::{PackageInstaller, ResolutionReport};
