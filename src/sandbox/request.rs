//! The caller-supplied execution request.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SandboxError};
use crate::sandbox::language::{Language, RESERVED_PREFIX};

/// One unit of work: source code, its input variables and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// The user's source code.
    pub code: String,
    /// Named inputs, bound as variables before the code runs.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub variables: Map<String, Value>,
    /// Wall-clock limit in milliseconds; the sandbox default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    /// Target language.
    #[serde(default)]
    pub language: Language,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ExecutionRequest {
    /// Create a request for the given language with no variables.
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            variables: Map::new(),
            time_limit_ms: None,
            language,
        }
    }

    /// Create a Python request.
    pub fn python(code: impl Into<String>) -> Self {
        Self::new(Language::Python, code)
    }

    /// Create a JavaScript request.
    pub fn javascript(code: impl Into<String>) -> Self {
        Self::new(Language::JavaScript, code)
    }

    /// Parse a request body such as `{"code": "...", "variables": {...}, "timeLimitMs": 500}`.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| SandboxError::InvalidRequest(e.to_string()))
    }

    /// Add one variable binding.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Replace all variables.
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Set the time limit.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_ms = Some(limit.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// The requested time limit, if any.
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }

    /// Reject requests that must never reach a child process.
    pub fn validate(&self, max_code_bytes: usize) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(SandboxError::InvalidRequest("code must not be empty".into()));
        }
        if self.code.len() > max_code_bytes {
            return Err(SandboxError::InvalidRequest(format!(
                "code is {} bytes, limit is {}",
                self.code.len(),
                max_code_bytes
            )));
        }
        if self.time_limit_ms == Some(0) {
            return Err(SandboxError::InvalidRequest(
                "timeLimitMs must be greater than zero".into(),
            ));
        }
        for name in self.variables.keys() {
            if name.trim().is_empty() {
                return Err(SandboxError::InvalidRequest(
                    "variable names must not be empty".into(),
                ));
            }
            if name.starts_with(RESERVED_PREFIX) {
                return Err(SandboxError::InvalidRequest(format!(
                    "variable name '{}' uses the reserved prefix '{}'",
                    name, RESERVED_PREFIX
                )));
            }
            if !self.language.is_valid_identifier(name) {
                return Err(SandboxError::InvalidRequest(format!(
                    "'{}' is not a valid {} identifier",
                    name, self.language
                )));
            }
        }
        Ok(())
    }
}
