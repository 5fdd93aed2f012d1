//! Execution outcomes and the caller-facing response shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, SandboxError};
use crate::sandbox::artifacts::Artifact;

/// A successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSuccess {
    /// The value returned by `main`, with artifacts merged in when present.
    pub value: Value,
    /// Typed view of the artifacts carried in `value`.
    pub artifacts: Vec<Artifact>,
    /// Output the user code printed while running.
    pub logs: String,
    /// Wall-clock time of the whole pipeline.
    pub elapsed: Duration,
}

/// The result of one execution: a value or a classified failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The code ran and `main` returned a value.
    Success(ExecutionSuccess),
    /// The request failed before, during or after execution.
    Failure {
        /// Classification of the failure.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

impl ExecutionOutcome {
    /// Check if the execution succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    /// The failure kind, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// The returned value on success.
    pub fn value(&self) -> Option<&Value> {
        match self {
            ExecutionOutcome::Success(success) => Some(&success.value),
            ExecutionOutcome::Failure { .. } => None,
        }
    }

    /// Render the outcome in the caller-facing JSON shape.
    pub fn to_response(&self) -> ExecutionResponse {
        match self {
            ExecutionOutcome::Success(success) => ExecutionResponse {
                success: true,
                result: Some(success.value.clone()),
                logs: (!success.logs.is_empty()).then(|| success.logs.clone()),
                error_kind: None,
                message: None,
            },
            ExecutionOutcome::Failure { kind, message } => ExecutionResponse {
                success: false,
                result: None,
                logs: None,
                error_kind: Some(*kind),
                message: Some(message.clone()),
            },
        }
    }
}

impl From<SandboxError> for ExecutionOutcome {
    fn from(err: SandboxError) -> Self {
        let kind = err.kind();
        let message = match &err {
            // The traceback is the useful part for runtime failures.
            SandboxError::Runtime {
                traceback: Some(traceback),
                ..
            } if !traceback.is_empty() => format!("{}\n{}", err, traceback),
            _ => err.to_string(),
        };
        ExecutionOutcome::Failure { kind, message }
    }
}

impl From<ExecutionSuccess> for ExecutionOutcome {
    fn from(success: ExecutionSuccess) -> Self {
        ExecutionOutcome::Success(success)
    }
}

/// Wire shape returned to callers: `{success, result}` or `{success, errorKind, message}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    /// Whether the execution succeeded.
    pub success: bool,
    /// The returned value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Captured output of the user code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
