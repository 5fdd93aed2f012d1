//! Turns a finished child process into a value or a classified error.
//!
//! The wrapper writes exactly one JSON line to stdout. Decoding only ever
//! parses that line as data with `serde_json`; nothing the child prints is
//! evaluated.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{parse_javascript_exception, parse_python_exception, Result, SandboxError};
use crate::sandbox::artifacts::{collect_artifacts, Artifact};
use crate::sandbox::language::Language;
use crate::sandbox::runner::RunOutput;

/// Exception type the run-time guard raises for a denied import.
pub const POLICY_EXCEPTION: &str = "SandboxPolicyViolation";

/// A decoded successful result.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResult {
    /// The value `main` returned, artifacts merged in.
    pub value: Value,
    /// Typed view of the harvested artifacts.
    pub artifacts: Vec<Artifact>,
    /// What the user code printed.
    pub logs: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    logs: String,
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    #[serde(rename = "type")]
    exception_type: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    traceback: Option<String>,
}

/// Decodes child output for one language.
#[derive(Debug, Clone, Copy)]
pub struct ResultDecoder {
    language: Language,
    stderr_is_fatal: bool,
}

impl ResultDecoder {
    /// Create a decoder.
    pub fn new(language: Language, stderr_is_fatal: bool) -> Self {
        Self {
            language,
            stderr_is_fatal,
        }
    }

    /// Classify `output`. `time_limit` is only used to describe a timeout.
    pub fn decode(&self, output: &RunOutput, time_limit: Duration) -> Result<DecodedResult> {
        if output.timed_out {
            return Err(SandboxError::Timeout(time_limit));
        }
        if output.stdout.is_truncated() {
            return Err(SandboxError::Decode(format!(
                "result exceeded the output limit of {} bytes",
                output.stdout.len()
            )));
        }

        let stdout = output.stdout.to_string_lossy();
        let stderr = output.stderr.to_string_lossy();

        match single_envelope(&stdout) {
            Some(envelope) => self.decode_envelope(envelope, output, &stderr),
            None => Err(self.classify_without_envelope(output, &stdout, &stderr)),
        }
    }

    fn decode_envelope(
        &self,
        envelope: Envelope,
        output: &RunOutput,
        stderr: &str,
    ) -> Result<DecodedResult> {
        if !envelope.ok {
            let error = envelope.error.unwrap_or(EnvelopeError {
                exception_type: "Error".into(),
                message: "execution failed without details".into(),
                traceback: None,
            });
            if error.exception_type == POLICY_EXCEPTION {
                return Err(SandboxError::PolicyViolation(error.message));
            }
            return Err(SandboxError::Runtime {
                exception_type: error.exception_type,
                message: error.message,
                traceback: error.traceback.filter(|t| !t.trim().is_empty()),
            });
        }

        if self.stderr_is_fatal && !output.stderr.is_blank() {
            return Err(self.stderr_error(stderr));
        }
        if let Some(code) = output.exit_code.filter(|code| *code != 0) {
            return Err(runtime(
                "ProcessExit",
                format!("process exited with status {} after reporting a result", code),
            ));
        }

        let artifacts = collect_artifacts(&envelope.result);
        Ok(DecodedResult {
            value: envelope.result,
            artifacts,
            logs: envelope.logs,
        })
    }

    fn classify_without_envelope(
        &self,
        output: &RunOutput,
        stdout: &str,
        stderr: &str,
    ) -> SandboxError {
        if !output.stderr.is_blank() {
            return self.stderr_error(stderr);
        }
        if let Some(signal) = output.signal {
            return runtime(
                "Killed",
                format!("process was terminated by signal {}", signal),
            );
        }
        if let Some(code) = output.exit_code.filter(|code| *code != 0) {
            return runtime(
                "ProcessExit",
                format!("process exited with status {} without a result", code),
            );
        }
        if stdout.trim().is_empty() {
            return SandboxError::Decode("no output".into());
        }
        let lines = stdout.trim().lines().count();
        if lines > 1 {
            SandboxError::Decode(format!("expected one result line, got {}", lines))
        } else {
            SandboxError::Decode(format!("unrecognized result line: {}", preview(stdout.trim())))
        }
    }

    fn stderr_error(&self, stderr: &str) -> SandboxError {
        let parsed = match self.language {
            Language::Python => parse_python_exception(stderr),
            Language::JavaScript => parse_javascript_exception(stderr),
        };
        parsed.unwrap_or_else(|| SandboxError::Runtime {
            exception_type: "UnexpectedStderr".into(),
            message: preview(stderr.trim()),
            traceback: Some(stderr.trim_end().to_string()),
        })
    }
}

fn single_envelope(stdout: &str) -> Option<Envelope> {
    let line = stdout.trim();
    if line.is_empty() || line.contains('\n') {
        return None;
    }
    serde_json::from_str(line).ok()
}

fn runtime(exception_type: &str, message: String) -> SandboxError {
    SandboxError::Runtime {
        exception_type: exception_type.to_string(),
        message,
        traceback: None,
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
