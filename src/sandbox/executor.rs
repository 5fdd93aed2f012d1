//! Core execution engine for the code sandbox.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::sandbox::analysis::analyze;
use crate::sandbox::cache::DependencySet;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::decoder::ResultDecoder;
use crate::sandbox::outcome::{ExecutionOutcome, ExecutionResponse, ExecutionSuccess};
use crate::sandbox::request::ExecutionRequest;
use crate::sandbox::resolver::{DependencyResolver, PackageInstaller, SystemInstaller};
use crate::sandbox::runner::ProcessRunner;
use crate::sandbox::wrapper::WrapperGenerator;

/// Options for sandbox creation.
#[derive(Clone, Default)]
pub struct SandboxOptions {
    /// Installed-module record to share with other sandboxes. A fresh one when `None`.
    pub dependencies: Option<Arc<DependencySet>>,
    /// Package manager driver. The host's pip and npm when `None`.
    pub installer: Option<Arc<dyn PackageInstaller>>,
}

impl SandboxOptions {
    /// Share `dependencies` with this sandbox.
    pub fn with_dependencies(mut self, dependencies: Arc<DependencySet>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    /// Use `installer` instead of the host package managers.
    pub fn with_installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }
}

impl std::fmt::Debug for SandboxOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxOptions")
            .field("dependencies", &self.dependencies)
            .field("installer", &self.installer.as_ref().map(|_| "<installer>"))
            .finish()
    }
}

/// Runs untrusted Python and JavaScript in child processes.
///
/// A sandbox holds no per-request state; share one between tasks behind an
/// `Arc` and call [`execute`](Self::execute) concurrently.
pub struct CodeSandbox {
    config: SandboxConfig,
    dependencies: Arc<DependencySet>,
    installer: Arc<dyn PackageInstaller>,
}

impl CodeSandbox {
    /// Create a new sandbox with the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        Self::new_with_options(config, SandboxOptions::default())
    }

    /// Create a new sandbox with custom options.
    pub fn new_with_options(config: SandboxConfig, options: SandboxOptions) -> Result<Self> {
        config.validate()?;
        let installer: Arc<dyn PackageInstaller> = match options.installer {
            Some(installer) => installer,
            None => Arc::new(SystemInstaller::new(&config)),
        };
        let dependencies = options.dependencies.unwrap_or_default();
        Ok(Self {
            config,
            dependencies,
            installer,
        })
    }

    /// The sandbox configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The installed-module record.
    pub fn dependencies(&self) -> &Arc<DependencySet> {
        &self.dependencies
    }

    /// Execute a request. Every failure is folded into the outcome.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        match self.try_execute(request).await {
            Ok(success) => success.into(),
            Err(err) => err.into(),
        }
    }

    /// Parse a JSON request body, execute it and render the response.
    pub async fn execute_json(&self, body: &str) -> ExecutionResponse {
        let outcome = match ExecutionRequest::from_json(body) {
            Ok(request) => self.execute(request).await,
            Err(err) => err.into(),
        };
        outcome.to_response()
    }

    /// Execute a request, returning failures as errors.
    pub async fn try_execute(&self, request: ExecutionRequest) -> Result<ExecutionSuccess> {
        let execution_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "execution",
            %execution_id,
            language = %request.language
        );
        self.run_pipeline(request).instrument(span).await
    }

    async fn run_pipeline(&self, request: ExecutionRequest) -> Result<ExecutionSuccess> {
        let started = Instant::now();
        let language = request.language;

        request.validate(self.config.max_code_bytes)?;
        let analysis = analyze(language, &request.code);
        self.config.policy.check(&analysis, &request.code)?;
        tracing::debug!(
            imports = ?analysis.imports,
            convention = ?analysis.entry_point,
            "request accepted"
        );

        let report = DependencyResolver::new(
            &self.config,
            &self.dependencies,
            self.installer.as_ref(),
        )
        .resolve(language, &analysis.imports)
        .await;

        let wrapper = WrapperGenerator::new(&self.config).generate(&request, &analysis)?;
        let time_limit = self.config.time_limit_for(request.time_limit());
        let output = ProcessRunner::new(&self.config)
            .run(wrapper, time_limit)
            .await?;

        let decoded = ResultDecoder::new(language, self.config.stderr_is_fatal)
            .decode(&output, time_limit)
            .map_err(|err| report.reclassify(language, err));
        let elapsed = started.elapsed();

        match decoded {
            Ok(decoded) => {
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    artifacts = decoded.artifacts.len(),
                    "execution succeeded"
                );
                Ok(ExecutionSuccess {
                    value: decoded.value,
                    artifacts: decoded.artifacts,
                    logs: decoded.logs,
                    elapsed,
                })
            }
            Err(err) => {
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error_kind = %err.kind(),
                    "execution failed"
                );
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for CodeSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeSandbox")
            .field("config", &self.config)
            .field("dependencies", &self.dependencies.len())
            .finish_non_exhaustive()
    }
}
