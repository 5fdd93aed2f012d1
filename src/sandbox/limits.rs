//! Resource limits for sandboxed child processes.

use tokio::process::Command;

use crate::sandbox::language::Language;

const MIB: u64 = 1024 * 1024;

/// Limits applied to every sandboxed child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Address-space cap for Python, heap cap for Node.js. `None` leaves it unbounded.
    pub max_memory: Option<u64>,
    /// Largest file the child may write.
    pub max_file_size: Option<u64>,
    /// Bytes kept per output stream; the rest is drained and discarded.
    pub max_output_bytes: usize,
    /// Thread cap exported to numeric libraries.
    pub max_threads: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory: Some(1024 * MIB), // 1GB
            max_file_size: Some(64 * MIB),
            max_output_bytes: 8 * MIB as usize,
            max_threads: 1,
        }
    }
}

impl ResourceLimits {
    /// Limits for package-manager subprocesses: output is still capped, nothing else.
    pub fn for_installer(&self) -> Self {
        Self {
            max_memory: None,
            max_file_size: None,
            max_output_bytes: self.max_output_bytes,
            max_threads: self.max_threads,
        }
    }

    /// Environment variables capping threads in BLAS/OpenMP-backed libraries.
    pub fn thread_env(&self) -> Vec<(&'static str, String)> {
        let threads = self.max_threads.max(1).to_string();
        [
            "OMP_NUM_THREADS",
            "OPENBLAS_NUM_THREADS",
            "MKL_NUM_THREADS",
            "NUMEXPR_NUM_THREADS",
            "UV_THREADPOOL_SIZE",
        ]
        .into_iter()
        .map(|name| (name, threads.clone()))
        .collect()
    }

    /// Interpreter flags that enforce limits from inside the runtime.
    pub fn interpreter_args(&self, language: Language) -> Vec<String> {
        match (language, self.max_memory) {
            // V8 reserves far more address space than it uses, so Node gets a
            // heap cap instead of RLIMIT_AS.
            (Language::JavaScript, Some(bytes)) => {
                vec![format!("--max-old-space-size={}", (bytes / MIB).max(16))]
            }
            _ => Vec::new(),
        }
    }

    /// Install kernel limits on `command`, applied in the child before exec.
    #[cfg(unix)]
    pub fn apply(&self, command: &mut Command, language: Language) {
        use nix::sys::resource::{setrlimit, Resource};

        let address_space = match language {
            Language::Python => self.max_memory,
            Language::JavaScript => None,
        };
        let file_size = self.max_file_size;

        let set = |resource: Resource, value: u64| -> std::io::Result<()> {
            setrlimit(resource, value as nix::libc::rlim_t, value as nix::libc::rlim_t)
                .map_err(std::io::Error::from)
        };

        // SAFETY: the closure only issues setrlimit syscalls, which are
        // async-signal-safe, and allocates nothing.
        unsafe {
            command.pre_exec(move || {
                if let Some(bytes) = address_space {
                    set(Resource::RLIMIT_AS, bytes)?;
                }
                if let Some(bytes) = file_size {
                    set(Resource::RLIMIT_FSIZE, bytes)?;
                }
                set(Resource::RLIMIT_CORE, 0)
            });
        }
    }

    /// Kernel limits are unavailable off unix; the output cap and timeout still apply.
    #[cfg(not(unix))]
    pub fn apply(&self, _command: &mut Command, _language: Language) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_memory, Some(1024 * 1024 * 1024));
        assert_eq!(limits.max_output_bytes, 8 * 1024 * 1024);
        assert_eq!(limits.max_threads, 1);
    }

    #[test]
    fn test_node_heap_flag() {
        let limits = ResourceLimits {
            max_memory: Some(256 * MIB),
            ..ResourceLimits::default()
        };
        assert_eq!(
            limits.interpreter_args(Language::JavaScript),
            vec!["--max-old-space-size=256"]
        );
        assert!(limits.interpreter_args(Language::Python).is_empty());

        let unbounded = ResourceLimits {
            max_memory: None,
            ..ResourceLimits::default()
        };
        assert!(unbounded.interpreter_args(Language::JavaScript).is_empty());
    }

    #[test]
    fn test_thread_env() {
        let limits = ResourceLimits {
            max_threads: 0,
            ..ResourceLimits::default()
        };
        let env = limits.thread_env();
        assert!(env.contains(&("OMP_NUM_THREADS", "1".to_string())));
        assert!(env.iter().all(|(_, v)| v == "1"));
    }

    #[test]
    fn test_installer_limits_keep_output_cap() {
        let limits = ResourceLimits::default().for_installer();
        assert_eq!(limits.max_memory, None);
        assert_eq!(limits.max_file_size, None);
        assert_eq!(limits.max_output_bytes, 8 * 1024 * 1024);
    }
}
