//! Dependency resolution: make imported third-party modules importable.
//!
//! Resolution is best effort. A package that fails to install is recorded in
//! the [`ResolutionReport`] and the execution still runs; if the code then
//! fails to import the module, the failure is reported as a dependency
//! install failure instead of a plain runtime error.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::error::{Result, SandboxError};
use crate::sandbox::cache::DependencySet;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::language::Language;
use crate::sandbox::runner::{base_env, resolve_program, run_bounded, RunOutput};

const PYTHON_LOOKUP: &str = include_str!("../../scripts/lookup/python_missing.py");
const JAVASCRIPT_LOOKUP: &str = include_str!("../../scripts/lookup/javascript_missing.js");

/// Lookups are quick; they only ask the interpreter where modules live.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Host variables passed through to package managers so proxies and mirrors keep working.
const INSTALLER_PASSTHROUGH: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "PIP_INDEX_URL",
    "PIP_EXTRA_INDEX_URL",
    "npm_config_registry",
];

/// Importable module name to pip package name, where they differ.
pub const PYTHON_PACKAGE_ALIASES: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("cv2", "opencv-python"),
    ("sklearn", "scikit-learn"),
    ("bs4", "beautifulsoup4"),
    ("yaml", "pyyaml"),
    ("IPython", "ipython"),
    ("skimage", "scikit-image"),
    ("dateutil", "python-dateutil"),
    ("Crypto", "pycryptodome"),
    ("docx", "python-docx"),
    ("pptx", "python-pptx"),
    ("fitz", "pymupdf"),
    ("dotenv", "python-dotenv"),
    ("attr", "attrs"),
];

/// Standard-library modules that never need a lookup.
const PYTHON_STANDARD_MODULES: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "binascii", "bisect",
    "builtins", "bz2", "calendar", "cmath", "codecs", "collections", "colorsys", "contextlib",
    "copy", "csv", "ctypes", "dataclasses", "datetime", "decimal", "difflib", "enum", "errno",
    "fractions", "functools", "gc", "getopt", "gettext", "glob", "gzip", "hashlib", "heapq",
    "hmac", "html", "http", "inspect", "io", "ipaddress", "itertools", "json", "keyword",
    "linecache", "locale", "logging", "lzma", "math", "mimetypes", "numbers", "operator", "os",
    "pathlib", "pickle", "platform", "pprint", "queue", "random", "re", "secrets", "shutil",
    "signal", "socket", "sqlite3", "statistics", "string", "struct", "subprocess", "sys",
    "tempfile", "textwrap", "threading", "time", "timeit", "tokenize", "traceback", "types",
    "typing", "unicodedata", "unittest", "urllib", "uuid", "warnings", "weakref", "xml",
    "zipfile", "zlib", "zoneinfo",
];

/// Node.js built-in modules.
const NODE_BUILTIN_MODULES: &[&str] = &[
    "assert", "async_hooks", "buffer", "child_process", "cluster", "console", "constants",
    "crypto", "dgram", "diagnostics_channel", "dns", "domain", "events", "fs", "http", "http2",
    "https", "inspector", "module", "net", "os", "path", "perf_hooks", "process", "punycode",
    "querystring", "readline", "repl", "stream", "string_decoder", "sys", "timers", "tls",
    "trace_events", "tty", "url", "util", "v8", "vm", "wasi", "worker_threads", "zlib",
];

static PIP_PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("pip package pattern must compile")
});

static NPM_PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$")
        .expect("npm package pattern must compile")
});

/// The package that provides `module`.
pub fn package_for(language: Language, module: &str) -> String {
    match language {
        Language::Python => PYTHON_PACKAGE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == module)
            .map(|(_, package)| package.to_string())
            .unwrap_or_else(|| module.to_string()),
        Language::JavaScript => module.to_string(),
    }
}

/// Whether `module` ships with the interpreter.
pub fn is_standard_module(language: Language, module: &str) -> bool {
    let root = language.root_module(language.normalize_specifier(module));
    match language {
        Language::Python => PYTHON_STANDARD_MODULES.contains(&root),
        Language::JavaScript => NODE_BUILTIN_MODULES.contains(&root),
    }
}

/// Whether `package` is safe to hand to the package manager.
pub fn is_valid_package_name(language: Language, package: &str) -> bool {
    match language {
        Language::Python => package.len() <= 100 && PIP_PACKAGE_NAME.is_match(package),
        Language::JavaScript => package.len() <= 214 && NPM_PACKAGE_NAME.is_match(package),
    }
}

/// A package manager the resolver can drive.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// The subset of `modules` that cannot currently be imported.
    async fn find_missing(&self, language: Language, modules: &[String]) -> Result<Vec<String>>;

    /// Install one package, giving up after `timeout`.
    async fn install(&self, language: Language, package: &str, timeout: Duration) -> Result<()>;
}

/// Installs with the host's pip and npm into the configured packages directory.
#[derive(Debug, Clone)]
pub struct SystemInstaller {
    config: SandboxConfig,
}

impl SystemInstaller {
    /// Create an installer using the interpreters and directories of `config`.
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn command(&self, program: &Path, programs: &[&Path]) -> Command {
        let home = &self.config.packages_dir;
        let mut command = Command::new(program);
        command
            .current_dir(home)
            .env_clear()
            .envs(base_env(&self.config, programs, home));
        for name in INSTALLER_PASSTHROUGH {
            if let Some(value) = std::env::var_os(name) {
                command.env(name, value);
            }
        }
        command
    }

    async fn prepare_dir(&self, language: Language) -> Result<PathBuf> {
        let dir = self.config.packages_dir_for(language);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))
            .map_err(SandboxError::Environment)?;
        Ok(dir)
    }

    async fn run(&self, command: Command, timeout: Duration) -> Result<RunOutput> {
        let output = run_bounded(
            command,
            timeout,
            self.config.limits.for_installer().max_output_bytes,
        )
        .await?;
        if output.timed_out {
            return Err(SandboxError::Timeout(timeout));
        }
        Ok(output)
    }
}

#[async_trait]
impl PackageInstaller for SystemInstaller {
    async fn find_missing(&self, language: Language, modules: &[String]) -> Result<Vec<String>> {
        let packages = self.prepare_dir(language).await?;
        let interpreter = resolve_program(self.config.interpreter_path(language))?;
        let modules_json = serde_json::to_string(modules)
            .map_err(|e| SandboxError::environment(anyhow!("encoding module lookup input: {}", e)))?;

        let mut command = self.command(&interpreter, &[interpreter.as_path()]);
        match language {
            Language::Python => {
                command
                    .env("PYTHONPATH", &packages)
                    .args(["-s", "-c", PYTHON_LOOKUP]);
            }
            Language::JavaScript => {
                command
                    .env("NODE_PATH", packages.join("node_modules"))
                    .args(["-e", JAVASCRIPT_LOOKUP]);
            }
        }
        command.arg(modules_json);

        let output = self.run(command, LOOKUP_TIMEOUT).await?;
        if !output.success() {
            return Err(SandboxError::environment(anyhow!(
                "module lookup failed: {}",
                output.stderr.to_string_lossy().trim()
            )));
        }
        serde_json::from_slice(output.stdout.as_bytes())
            .map_err(|e| SandboxError::Decode(format!("module lookup output: {}", e)))
    }

    async fn install(&self, language: Language, package: &str, timeout: Duration) -> Result<()> {
        let target = self.prepare_dir(language).await?;
        let output = match language {
            Language::Python => {
                let python = resolve_program(&self.config.python_path)?;
                let mut command = self.command(&python, &[python.as_path()]);
                command
                    .args(["-m", "pip", "install"])
                    .args(["--disable-pip-version-check", "--no-input", "--no-cache-dir"])
                    .args(["--quiet", "--target"])
                    .arg(&target)
                    .arg(package);
                self.run(command, timeout).await?
            }
            Language::JavaScript => {
                let npm = resolve_program(&self.config.npm_path)?;
                // npm is itself a node script.
                let node = resolve_program(&self.config.node_path).unwrap_or_else(|_| npm.clone());
                let mut command = self.command(&npm, &[npm.as_path(), node.as_path()]);
                command
                    .args(["install", "--no-audit", "--no-fund", "--loglevel=error"])
                    .arg("--prefix")
                    .arg(&target)
                    .arg(package);
                self.run(command, timeout).await?
            }
        };

        if output.success() {
            return Ok(());
        }
        let stderr = output.stderr.to_string_lossy();
        let detail = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no diagnostics")
            .trim()
            .to_string();
        Err(SandboxError::environment(anyhow!(
            "package manager exited with status {}: {}",
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".into()),
            detail
        )))
    }
}

/// A module the resolver could not make importable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedInstall {
    /// Module the code imports.
    pub module: String,
    /// Package that was attempted.
    pub package: String,
    /// Why it failed.
    pub reason: String,
}

/// What one resolution pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Modules installed during this pass.
    pub installed: Vec<String>,
    /// Modules found importable without installing.
    pub present: Vec<String>,
    /// Modules whose installation failed.
    pub failed: Vec<FailedInstall>,
}

impl ResolutionReport {
    /// The failed install for `module`, if any.
    pub fn failure_for(&self, module: &str) -> Option<&FailedInstall> {
        self.failed.iter().find(|f| f.module == module)
    }

    /// Whether nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn an import failure of a module that failed to install into a
    /// dependency error. Every other error passes through unchanged.
    pub fn reclassify(&self, language: Language, err: SandboxError) -> SandboxError {
        let SandboxError::Runtime {
            exception_type,
            message,
            ..
        } = &err
        else {
            return err;
        };
        let import_failure = match language {
            Language::Python => {
                exception_type == "ModuleNotFoundError" || exception_type == "ImportError"
            }
            Language::JavaScript => message.contains("Cannot find module"),
        };
        if !import_failure {
            return err;
        }
        match self
            .failed
            .iter()
            .find(|f| mentions_module(message, &f.module, language))
        {
            Some(failed) => SandboxError::DependencyInstall {
                module: failed.module.clone(),
                package: failed.package.clone(),
                reason: failed.reason.clone(),
            },
            None => err,
        }
    }
}

/// Whether `message` quotes `module` or one of its submodules.
fn mentions_module(message: &str, module: &str, language: Language) -> bool {
    let quoted = format!("'{}", module);
    message.match_indices(&quoted).any(|(at, _)| {
        let next = message[at + quoted.len()..].chars().next();
        next == Some('\'') || next == Some(language.module_separator())
    })
}

/// Makes the imports of one request available.
pub struct DependencyResolver<'a> {
    config: &'a SandboxConfig,
    dependencies: &'a DependencySet,
    installer: &'a dyn PackageInstaller,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver recording into `dependencies`.
    pub fn new(
        config: &'a SandboxConfig,
        dependencies: &'a DependencySet,
        installer: &'a dyn PackageInstaller,
    ) -> Self {
        Self {
            config,
            dependencies,
            installer,
        }
    }

    /// Look up and install the third-party roots of `modules`.
    ///
    /// Never fails: problems are logged and recorded in the report.
    pub async fn resolve(&self, language: Language, modules: &BTreeSet<String>) -> ResolutionReport {
        let mut report = ResolutionReport::default();
        if !self.config.auto_install {
            return report;
        }

        let mut pending = self.unresolved(language, modules);
        if pending.is_empty() {
            return report;
        }

        let _guard = self.dependencies.install_lock().await;
        // Another request may have installed them while we waited.
        pending.retain(|m| !self.dependencies.contains(language, m));
        if pending.is_empty() {
            return report;
        }

        let missing = match self.installer.find_missing(language, &pending).await {
            Ok(missing) => missing,
            Err(err) => {
                tracing::warn!(language = %language, error = %err, "module lookup failed, skipping installs");
                return report;
            }
        };
        for module in pending.iter().filter(|m| !missing.contains(*m)) {
            self.dependencies.mark_installed(language, module.clone());
            report.present.push(module.clone());
        }

        let deadline = Instant::now() + self.config.install_budget;
        for module in missing {
            let package = package_for(language, &module);
            match self.install_one(language, &package, deadline).await {
                Ok(()) => {
                    tracing::info!(language = %language, module = %module, package = %package, "installed package");
                    self.dependencies.mark_installed(language, module.clone());
                    report.installed.push(module);
                }
                Err(reason) => {
                    tracing::warn!(language = %language, module = %module, package = %package, reason = %reason, "package install failed");
                    report.failed.push(FailedInstall {
                        module,
                        package,
                        reason,
                    });
                }
            }
        }
        report
    }

    fn unresolved(&self, language: Language, modules: &BTreeSet<String>) -> Vec<String> {
        let roots: BTreeSet<&str> = modules
            .iter()
            .map(|m| language.root_module(language.normalize_specifier(m)))
            .collect();
        roots
            .into_iter()
            .filter(|m| !is_standard_module(language, m))
            .filter(|m| !self.dependencies.contains(language, m))
            .map(str::to_string)
            .collect()
    }

    async fn install_one(
        &self,
        language: Language,
        package: &str,
        deadline: Instant,
    ) -> std::result::Result<(), String> {
        if !is_valid_package_name(language, package) {
            return Err(format!("'{}' is not a valid package name", package));
        }
        self.config
            .policy
            .check_package(language, package)
            .map_err(|e| e.to_string())?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err("install budget exhausted".into());
        }
        let timeout = self.config.install_timeout.min(remaining);
        self.installer
            .install(language, package, timeout)
            .await
            .map_err(|e| e.to_string())
    }
}
