//! The shared record of installed dependencies.
//!
//! A `DependencySet` is the only state that outlives a single execution. It
//! is append-only: modules are marked installed once confirmed importable and
//! never removed. Share one set between sandboxes by wrapping it in an `Arc`
//! and passing it through `SandboxOptions`.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use tokio::sync::{Mutex, MutexGuard};

use crate::sandbox::language::Language;

/// A thread-safe, append-only set of modules confirmed importable.
///
/// Lookups take a read lock. Installs are serialized by a separate async
/// lock so that two executions importing the same new package install it
/// only once: the second waits, then finds the module already marked.
///
/// # Example
///
/// ```rust
/// use code_sandbox_rs::sandbox::cache::DependencySet;
/// use code_sandbox_rs::Language;
///
/// let deps = DependencySet::new();
/// assert!(!deps.contains(Language::Python, "numpy"));
///
/// deps.mark_installed(Language::Python, "numpy");
/// assert!(deps.contains(Language::Python, "numpy"));
/// assert!(!deps.contains(Language::JavaScript, "numpy"));
/// ```
#[derive(Debug, Default)]
pub struct DependencySet {
    /// Installed modules, keyed by language and root module name.
    modules: RwLock<HashSet<(Language, String)>>,
    /// Held for the whole check-then-install sequence.
    install_lock: Mutex<()>,
}

impl DependencySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a module is known to be importable.
    pub fn contains(&self, language: Language, module: &str) -> bool {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules.contains(&(language, module.to_string()))
    }

    /// Record a module as importable.
    ///
    /// Returns `true` if the module was not already present.
    pub fn mark_installed(&self, language: Language, module: impl Into<String>) -> bool {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        modules.insert((language, module.into()))
    }

    /// Acquire the install lock.
    ///
    /// Callers must re-check `contains` after acquiring it.
    pub async fn install_lock(&self) -> MutexGuard<'_, ()> {
        self.install_lock.lock().await
    }

    /// Get the number of recorded modules.
    pub fn len(&self) -> usize {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded modules for one language, sorted.
    pub fn modules(&self, language: Language) -> Vec<String> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = modules
            .iter()
            .filter(|(lang, _)| *lang == language)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}
