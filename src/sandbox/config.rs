//! Sandbox configuration with builder pattern.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SandboxError};
use crate::sandbox::language::Language;
use crate::sandbox::limits::ResourceLimits;
use crate::sandbox::policy::SecurityPolicy;

/// Fonts tried in order for figure text; CJK-capable fonts first.
pub const DEFAULT_FONT_FALLBACKS: &[&str] = &[
    "Noto Sans CJK SC",
    "Noto Sans CJK TC",
    "Noto Sans CJK JP",
    "Noto Sans CJK KR",
    "SimHei",
    "Microsoft YaHei",
    "WenQuanYi Micro Hei",
    "Arial Unicode MS",
    "Liberation Sans",
    "Droid Sans Fallback",
    "FreeSans",
    "DejaVu Sans",
];

/// Configuration for the code sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Time limit used when a request does not set one.
    pub default_time_limit: Duration,
    /// Upper bound for request time limits; larger requests are clamped.
    pub max_time_limit: Duration,
    /// Python interpreter, looked up on `PATH` when relative.
    pub python_path: PathBuf,
    /// Node.js executable.
    pub node_path: PathBuf,
    /// npm executable used to install JavaScript packages.
    pub npm_path: PathBuf,
    /// Directory receiving installed packages.
    pub packages_dir: PathBuf,
    /// Parent of per-execution scratch directories; the system temp dir when `None`.
    pub scratch_root: Option<PathBuf>,
    /// Install missing third-party packages before running.
    pub auto_install: bool,
    /// Limit for one package install.
    pub install_timeout: Duration,
    /// Limit for all installs of one request.
    pub install_budget: Duration,
    /// Treat any stderr output as a failure, even after a clean result.
    pub stderr_is_fatal: bool,
    /// Largest accepted source, in bytes.
    pub max_code_bytes: usize,
    /// Resolution of harvested figures.
    pub artifact_dpi: u32,
    /// Font families tried for figure text.
    pub font_fallbacks: Vec<String>,
    /// Limits applied to each child process.
    pub limits: ResourceLimits,
    /// Deny-lists checked before execution.
    pub policy: SecurityPolicy,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_time_limit: Duration::from_secs(10),
            max_time_limit: Duration::from_secs(60),
            python_path: PathBuf::from("python3"),
            node_path: PathBuf::from("node"),
            npm_path: PathBuf::from("npm"),
            packages_dir: std::env::temp_dir().join("code-sandbox-packages"),
            scratch_root: None,
            auto_install: true,
            install_timeout: Duration::from_secs(60),
            install_budget: Duration::from_secs(120),
            stderr_is_fatal: true,
            max_code_bytes: 1024 * 1024, // 1MB
            artifact_dpi: 150,
            font_fallbacks: DEFAULT_FONT_FALLBACKS.iter().map(|f| f.to_string()).collect(),
            limits: ResourceLimits::default(),
            policy: SecurityPolicy::default(),
        }
    }
}

impl SandboxConfig {
    /// Create a new builder for SandboxConfig.
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// The effective time limit for a request.
    pub fn time_limit_for(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_time_limit)
            .min(self.max_time_limit)
    }

    /// The configured interpreter for `language`.
    pub fn interpreter_path(&self, language: Language) -> &Path {
        match language {
            Language::Python => &self.python_path,
            Language::JavaScript => &self.node_path,
        }
    }

    /// Where packages for `language` are installed.
    pub fn packages_dir_for(&self, language: Language) -> PathBuf {
        match language {
            Language::Python => self.packages_dir.join("python"),
            Language::JavaScript => self.packages_dir.join("node"),
        }
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.default_time_limit.is_zero() || self.max_time_limit.is_zero() {
            return Err(SandboxError::Config("time limits must be non-zero".into()));
        }
        if self.default_time_limit > self.max_time_limit {
            return Err(SandboxError::Config(format!(
                "default time limit {:?} exceeds maximum {:?}",
                self.default_time_limit, self.max_time_limit
            )));
        }
        if self.max_code_bytes == 0 || self.limits.max_output_bytes == 0 {
            return Err(SandboxError::Config(
                "code and output limits must be non-zero".into(),
            ));
        }
        if self.artifact_dpi == 0 {
            return Err(SandboxError::Config("artifact DPI must be non-zero".into()));
        }
        Ok(())
    }
}

/// Builder for creating SandboxConfig instances.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfigBuilder {
    default_time_limit: Option<Duration>,
    max_time_limit: Option<Duration>,
    python_path: Option<PathBuf>,
    node_path: Option<PathBuf>,
    npm_path: Option<PathBuf>,
    packages_dir: Option<PathBuf>,
    scratch_root: Option<PathBuf>,
    auto_install: Option<bool>,
    install_timeout: Option<Duration>,
    install_budget: Option<Duration>,
    stderr_is_fatal: Option<bool>,
    max_code_bytes: Option<usize>,
    artifact_dpi: Option<u32>,
    font_fallbacks: Option<Vec<String>>,
    limits: Option<ResourceLimits>,
    policy: Option<SecurityPolicy>,
}

impl SandboxConfigBuilder {
    /// Set the time limit used when a request has none.
    pub fn default_time_limit(mut self, limit: Duration) -> Self {
        self.default_time_limit = Some(limit);
        self
    }

    /// Set the upper bound for request time limits.
    pub fn max_time_limit(mut self, limit: Duration) -> Self {
        self.max_time_limit = Some(limit);
        self
    }

    /// Set the Python interpreter.
    pub fn python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.python_path = Some(path.into());
        self
    }

    /// Set the Node.js executable.
    pub fn node_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.node_path = Some(path.into());
        self
    }

    /// Set the npm executable.
    pub fn npm_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.npm_path = Some(path.into());
        self
    }

    /// Set the package install directory.
    pub fn packages_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.packages_dir = Some(path.into());
        self
    }

    /// Set the parent directory of scratch directories.
    pub fn scratch_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(path.into());
        self
    }

    /// Enable or disable automatic package installation.
    pub fn auto_install(mut self, enabled: bool) -> Self {
        self.auto_install = Some(enabled);
        self
    }

    /// Set the limit for one package install.
    pub fn install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = Some(timeout);
        self
    }

    /// Set the limit for all installs of one request.
    pub fn install_budget(mut self, budget: Duration) -> Self {
        self.install_budget = Some(budget);
        self
    }

    /// Choose whether stderr output fails an otherwise successful run.
    pub fn stderr_is_fatal(mut self, fatal: bool) -> Self {
        self.stderr_is_fatal = Some(fatal);
        self
    }

    /// Set the largest accepted source size in bytes.
    pub fn max_code_bytes(mut self, bytes: usize) -> Self {
        self.max_code_bytes = Some(bytes);
        self
    }

    /// Set the resolution of harvested figures.
    pub fn artifact_dpi(mut self, dpi: u32) -> Self {
        self.artifact_dpi = Some(dpi);
        self
    }

    /// Set the font fallback list.
    pub fn font_fallbacks<I, S>(mut self, fonts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.font_fallbacks = Some(fonts.into_iter().map(Into::into).collect());
        self
    }

    /// Set the per-process resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Set the maximum memory in bytes.
    pub fn max_memory(mut self, bytes: u64) -> Self {
        let mut limits = self.limits.take().unwrap_or_default();
        limits.max_memory = Some(bytes);
        self.limits = Some(limits);
        self
    }

    /// Set the security policy.
    pub fn policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Build the SandboxConfig.
    pub fn build(self) -> SandboxConfig {
        let default = SandboxConfig::default();
        SandboxConfig {
            default_time_limit: self.default_time_limit.unwrap_or(default.default_time_limit),
            max_time_limit: self.max_time_limit.unwrap_or(default.max_time_limit),
            python_path: self.python_path.unwrap_or(default.python_path),
            node_path: self.node_path.unwrap_or(default.node_path),
            npm_path: self.npm_path.unwrap_or(default.npm_path),
            packages_dir: self.packages_dir.unwrap_or(default.packages_dir),
            scratch_root: self.scratch_root.or(default.scratch_root),
            auto_install: self.auto_install.unwrap_or(default.auto_install),
            install_timeout: self.install_timeout.unwrap_or(default.install_timeout),
            install_budget: self.install_budget.unwrap_or(default.install_budget),
            stderr_is_fatal: self.stderr_is_fatal.unwrap_or(default.stderr_is_fatal),
            max_code_bytes: self.max_code_bytes.unwrap_or(default.max_code_bytes),
            artifact_dpi: self.artifact_dpi.unwrap_or(default.artifact_dpi),
            font_fallbacks: self.font_fallbacks.unwrap_or(default.font_fallbacks),
            limits: self.limits.unwrap_or(default.limits),
            policy: self.policy.unwrap_or(default.policy),
        }
    }
}
