//! Child-process execution with a hard deadline.
//!
//! Every execution gets a private scratch directory and a fresh interpreter
//! whose environment is rebuilt from nothing. The child leads its own process
//! group so that a timeout, or the caller dropping the future, kills every
//! descendant along with it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::error::{Result, SandboxError};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::CapturedOutput;
use crate::sandbox::language::Language;
use crate::sandbox::wrapper::{BlockKind, CompiledWrapper};

/// How long output readers may lag behind the child's exit.
const READER_GRACE: Duration = Duration::from_secs(2);

/// System directories appended to the child's `PATH`.
const SYSTEM_PATH: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

/// What a finished (or killed) child left behind.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// Captured standard output.
    pub stdout: CapturedOutput,
    /// Captured standard error.
    pub stderr: CapturedOutput,
    /// Exit code, when the child exited normally.
    pub exit_code: Option<i32>,
    /// Signal that terminated the child, if any.
    pub signal: Option<i32>,
    /// The deadline elapsed and the child was killed.
    pub timed_out: bool,
    /// Process id of the child.
    pub pid: Option<u32>,
    /// Time from spawn to exit.
    pub elapsed: Duration,
}

impl RunOutput {
    /// The child exited on its own with status zero.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Kills a process group on drop unless disarmed.
struct ProcessGroupGuard {
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        #[cfg(unix)]
        {
            let pgid = pid
                .and_then(|pid| i32::try_from(pid).ok())
                .map(nix::unistd::Pid::from_raw);
            Self { pgid }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            Self {}
        }
    }

    /// Send SIGKILL to every process in the group.
    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            use nix::sys::signal::{killpg, Signal};
            // ESRCH just means the group is already gone.
            if let Err(err) = killpg(pgid, Signal::SIGKILL) {
                if err != nix::errno::Errno::ESRCH {
                    tracing::warn!(pgid = pgid.as_raw(), error = %err, "failed to kill process group");
                }
            }
        }
    }

    /// Forget the group once it is known to be empty, so a recycled id is never signalled.
    fn disarm(&mut self) {
        #[cfg(unix)]
        {
            self.pgid = None;
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `command` to completion or until `timeout`, capturing at most
/// `output_limit` bytes of each output stream.
///
/// The caller configures program, arguments and environment. This function
/// owns stdio, the process group and the deadline.
pub async fn run_bounded(
    mut command: Command,
    timeout: Duration,
    output_limit: usize,
) -> Result<RunOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let started = Instant::now();
    let mut child = command
        .spawn()
        .context("failed to spawn child process")
        .map_err(SandboxError::Environment)?;
    let pid = child.id();
    let mut group = ProcessGroupGuard::new(pid);
    tracing::debug!(pid = ?pid, timeout_ms = timeout.as_millis() as u64, "spawned child");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SandboxError::environment(anyhow!("child stdout was not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SandboxError::environment(anyhow!("child stderr was not captured")))?;
    let stdout_task = tokio::spawn(CapturedOutput::capture(stdout, output_limit));
    let stderr_task = tokio::spawn(CapturedOutput::capture(stderr, output_limit));

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (Some(status?), false),
        Err(_) => {
            group.kill();
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "child already exited");
            }
            (child.wait().await.ok(), true)
        }
    };
    let elapsed = started.elapsed();

    // Orphaned descendants may still hold the pipes open.
    group.kill();
    group.disarm();

    let stdout = collect(stdout_task, "stdout").await;
    let stderr = collect(stderr_task, "stderr").await;

    let exit_code = status.and_then(|s| s.code());
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.and_then(|s| s.signal())
    };
    #[cfg(not(unix))]
    let signal = None;

    tracing::debug!(
        pid = ?pid,
        exit_code = ?exit_code,
        signal = ?signal,
        timed_out,
        elapsed_ms = elapsed.as_millis() as u64,
        "child finished"
    );

    Ok(RunOutput {
        stdout,
        stderr,
        exit_code,
        signal,
        timed_out,
        pid,
        elapsed,
    })
}

async fn collect(
    mut task: JoinHandle<std::io::Result<CapturedOutput>>,
    stream: &'static str,
) -> CapturedOutput {
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(Ok(output))) => output,
        Ok(Ok(Err(err))) => {
            tracing::warn!(stream, error = %err, "failed to read child output");
            CapturedOutput::default()
        }
        Ok(Err(err)) => {
            tracing::warn!(stream, error = %err, "output reader task failed");
            CapturedOutput::default()
        }
        Err(_) => {
            task.abort();
            tracing::warn!(stream, "output reader did not finish after the child exited");
            CapturedOutput::default()
        }
    }
}

/// Find an executable by name on the host `PATH`, or check an explicit path.
pub fn resolve_program(program: &Path) -> Result<PathBuf> {
    which::which(program)
        .map_err(|_| SandboxError::InterpreterNotFound(program.display().to_string()))
}

/// A minimal `PATH`: the given program directories, then the system directories.
pub(crate) fn search_path(programs: &[&Path]) -> OsString {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for program in programs {
        if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_path_buf());
            }
        }
    }
    for dir in SYSTEM_PATH {
        let dir = PathBuf::from(dir);
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    std::env::join_paths(dirs).unwrap_or_else(|_| OsString::from(SYSTEM_PATH.join(":")))
}

/// Environment shared by every sandbox child: locale, home and thread caps.
pub(crate) fn base_env(
    config: &SandboxConfig,
    programs: &[&Path],
    home: &Path,
) -> Vec<(&'static str, OsString)> {
    let mut env = vec![
        ("PATH", search_path(programs)),
        ("HOME", home.as_os_str().to_owned()),
        ("TMPDIR", home.as_os_str().to_owned()),
        ("LANG", "C.UTF-8".into()),
        ("LC_ALL", "C.UTF-8".into()),
        ("PYTHONIOENCODING", "utf-8".into()),
        ("PYTHONDONTWRITEBYTECODE", "1".into()),
    ];
    env.extend(
        config
            .limits
            .thread_env()
            .into_iter()
            .map(|(name, value)| (name, OsString::from(value))),
    );
    env
}

/// Runs compiled wrappers in fresh interpreter processes.
#[derive(Debug)]
pub struct ProcessRunner<'a> {
    config: &'a SandboxConfig,
}

impl<'a> ProcessRunner<'a> {
    /// Create a runner for `config`.
    pub fn new(config: &'a SandboxConfig) -> Self {
        Self { config }
    }

    /// Write `wrapper` to a fresh scratch directory and run it.
    ///
    /// The scratch directory is removed when this returns or is dropped.
    pub async fn run(&self, wrapper: CompiledWrapper, timeout: Duration) -> Result<RunOutput> {
        let language = wrapper.language();
        let interpreter = resolve_program(self.config.interpreter_path(language))?;
        let scratch = self.scratch_dir()?;

        let script = scratch.path().join(wrapper.file_name());
        tokio::fs::write(&script, wrapper.render())
            .await
            .with_context(|| format!("failed to write {}", script.display()))
            .map_err(SandboxError::Environment)?;

        let mut command = Command::new(&interpreter);
        command
            .current_dir(scratch.path())
            .env_clear()
            .envs(base_env(self.config, &[interpreter.as_path()], scratch.path()))
            .envs(self.language_env(language).await);

        command.args(self.config.limits.interpreter_args(language));
        match language {
            Language::Python => {
                // No user site-packages, no bytecode files.
                command.args(["-s", "-B"]);
            }
            Language::JavaScript => {
                if wrapper.block(BlockKind::Guard).is_some() {
                    command.arg("--disallow-code-generation-from-strings");
                }
            }
        }
        command.arg(&script);
        self.config.limits.apply(&mut command, language);

        tracing::debug!(
            language = %language,
            interpreter = %interpreter.display(),
            scratch = %scratch.path().display(),
            "running wrapper"
        );
        let output = run_bounded(command, timeout, self.config.limits.max_output_bytes).await;

        if let Err(err) = scratch.close() {
            tracing::warn!(error = %err, "failed to remove scratch directory");
        }
        output
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sandbox-");
        let dir = match &self.config.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.context("failed to create scratch directory")
            .map_err(SandboxError::Environment)
    }

    async fn language_env(&self, language: Language) -> Vec<(&'static str, OsString)> {
        let packages = self.config.packages_dir_for(language);
        match language {
            Language::Python => {
                let mpl_config = self.config.packages_dir.join("matplotlib");
                if let Err(err) = tokio::fs::create_dir_all(&mpl_config).await {
                    tracing::warn!(path = %mpl_config.display(), error = %err, "failed to create matplotlib config dir");
                }
                vec![
                    ("PYTHONPATH", packages.into_os_string()),
                    ("MPLBACKEND", "Agg".into()),
                    ("MPLCONFIGDIR", mpl_config.into_os_string()),
                ]
            }
            Language::JavaScript => vec![(
                "NODE_PATH",
                packages.join("node_modules").into_os_string(),
            )],
        }
    }
}
