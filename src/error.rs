//! Error types for the code sandbox.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed execution, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing or empty code, malformed variable names, bad limits.
    InvalidRequest,
    /// A denied import or construct was found before execution.
    PolicyViolation,
    /// User code failed to import a package whose installation failed.
    DependencyInstallFailure,
    /// The child process was killed after its deadline.
    Timeout,
    /// An exception was raised inside user code or the entry-point adapter.
    RuntimeError,
    /// The child produced output that is not a single structured line.
    DecodeError,
    /// The host could not run the child at all (missing interpreter, scratch I/O).
    EnvironmentError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::PolicyViolation => "PolicyViolation",
            ErrorKind::DependencyInstallFailure => "DependencyInstallFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::DecodeError => "DecodeError",
            ErrorKind::EnvironmentError => "EnvironmentError",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while preparing or running an execution.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The request was rejected before anything ran.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The security policy refused the code or one of its packages.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A dependency could not be installed and the code then failed to import it.
    #[error("failed to install '{package}' for module '{module}': {reason}")]
    DependencyInstall {
        /// The importable module name the code asked for.
        module: String,
        /// The package manager name that was attempted.
        package: String,
        /// Why the install failed.
        reason: String,
    },

    /// The execution exceeded its time limit.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// An exception was raised by the user's code.
    #[error("{exception_type}: {message}")]
    Runtime {
        /// The exception type (e.g., "ValueError", "TypeError").
        exception_type: String,
        /// The exception message.
        message: String,
        /// The full traceback, if available.
        traceback: Option<String>,
    },

    /// The child's output did not follow the one-line result contract.
    #[error("could not decode sandbox output: {0}")]
    Decode(String),

    /// The interpreter for the requested language was not found.
    #[error("interpreter not found: {0}")]
    InterpreterNotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure of the host environment (spawning, scratch directories).
    #[error("sandbox environment failure: {0}")]
    Environment(#[source] anyhow::Error),

    /// I/O error on the host side.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// The caller-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            SandboxError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            SandboxError::DependencyInstall { .. } => ErrorKind::DependencyInstallFailure,
            SandboxError::Timeout(_) => ErrorKind::Timeout,
            SandboxError::Runtime { .. } => ErrorKind::RuntimeError,
            SandboxError::Decode(_) => ErrorKind::DecodeError,
            SandboxError::InterpreterNotFound(_)
            | SandboxError::Config(_)
            | SandboxError::Environment(_)
            | SandboxError::Io(_) => ErrorKind::EnvironmentError,
        }
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// Check if this error was raised by the security policy.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, SandboxError::PolicyViolation(_))
    }

    /// Check if this error represents an exception raised by user code.
    pub fn is_runtime_error(&self) -> bool {
        matches!(self, SandboxError::Runtime { .. })
    }

    /// Check if this error rejected the request before execution.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, SandboxError::InvalidRequest(_))
    }

    /// Wrap a host-side failure.
    pub(crate) fn environment(err: impl Into<anyhow::Error>) -> Self {
        SandboxError::Environment(err.into())
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Parse a Python exception from stderr output.
///
/// This attempts to extract the exception type, message, and traceback
/// from Python's standard error output format.
pub fn parse_python_exception(stderr: &str) -> Option<SandboxError> {
    if stderr.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = stderr.lines().collect();

    // The exception line is the last unindented line that looks like one.
    let mut exception_line = None;
    let mut traceback_start = None;

    for (i, line) in lines.iter().enumerate() {
        if line.starts_with("Traceback (most recent call last):") {
            traceback_start = Some(i);
        }
        if !line.starts_with(' ')
            && !line.is_empty()
            && !line.starts_with("Traceback")
            && looks_like_exception(line)
        {
            exception_line = Some((i, *line));
        }
    }

    let (line_idx, exception_str) = exception_line?;
    let (exception_type, message) = split_exception_line(exception_str);

    // SyntaxErrors raised at compile time have no "Traceback" header but still
    // carry the offending source excerpt above the exception line.
    let start = traceback_start.unwrap_or(0);
    let traceback = if start < line_idx {
        Some(lines[start..=line_idx].join("\n"))
    } else {
        None
    };

    Some(SandboxError::Runtime {
        exception_type,
        message,
        traceback,
    })
}

/// Parse a Node.js exception from stderr output.
///
/// Node prints the failing source location first and the `TypeError: ...`
/// line afterwards, followed by the stack, so the first exception line wins.
pub fn parse_javascript_exception(stderr: &str) -> Option<SandboxError> {
    if stderr.trim().is_empty() {
        return None;
    }

    let exception_str = stderr
        .lines()
        .find(|line| !line.starts_with(' ') && looks_like_exception(line))?;
    let (exception_type, message) = split_exception_line(exception_str);

    Some(SandboxError::Runtime {
        exception_type,
        message,
        traceback: Some(stderr.trim_end().to_string()),
    })
}

fn split_exception_line(line: &str) -> (String, String) {
    match line.find(':') {
        Some(colon_pos) => (
            line[..colon_pos].trim().to_string(),
            line[colon_pos + 1..].trim().to_string(),
        ),
        None => (line.trim().to_string(), String::new()),
    }
}

/// Check if a line looks like an exception header.
fn looks_like_exception(line: &str) -> bool {
    let exception_suffixes = ["Error", "Exception", "Warning"];
    let standalone_exceptions = [
        "KeyboardInterrupt",
        "SystemExit",
        "StopIteration",
        "GeneratorExit",
    ];

    let first_char = line.chars().next();
    if !first_char.map(|c| c.is_ascii_uppercase()).unwrap_or(false) {
        return false;
    }

    let ends_token = |after_idx: usize| {
        after_idx >= line.len() || matches!(line.as_bytes()[after_idx], b':' | b' ' | b'\n')
    };

    // The exception name must be the first token (e.g. "ValueError: ...",
    // "Error [ERR_REQUIRE_ESM]: ...").
    let head = line
        .split(|c: char| c == ':' || c == ' ')
        .next()
        .unwrap_or_default();
    let dotted_name = head
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !dotted_name {
        return false;
    }

    for suffix in exception_suffixes.iter() {
        if head.ends_with(suffix) && ends_token(head.len()) {
            return true;
        }
    }

    for exc in standalone_exceptions.iter() {
        if line.starts_with(exc) && ends_token(exc.len()) {
            return true;
        }
    }

    false
}
