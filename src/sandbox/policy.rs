//! Security policy: deny-lists applied before any process is spawned.
//!
//! The policy gates two surfaces. Module names found by source analysis are
//! matched against a per-language deny-list, and the raw source is scanned
//! for constructs that bypass import-based detection (dynamic evaluation,
//! reflective access to builtins). The resolver additionally consults the
//! package deny-list before handing a name to a package manager.
//!
//! The same module deny-list is also enforced at run time by the guard block
//! of the generated wrapper.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::{Result, SandboxError};
use crate::sandbox::analysis::{python, SourceAnalysis};
use crate::sandbox::language::Language;

const PYTHON_DENIED_MODULES: &[&str] = &[
    "os", "subprocess", "shutil", "socket", "ctypes", "multiprocessing", "threading", "pickle",
    "tempfile", "pathlib", "fileinput", "glob", "fnmatch", "zipfile", "tarfile", "gzip", "bz2",
    "lzma", "mmap", "signal", "resource", "pwd", "grp", "importlib", "pty", "fcntl", "posix",
    "socketserver", "code", "codeop", "marshal", "builtins", "gc", "inspect", "runpy", "pdb",
    "_io", "_posixsubprocess",
];

const PYTHON_DENIED_PATTERNS: &[(&str, &str)] = &[
    ("sandbox internals", r"__sandbox"),
    ("__import__", r"__import__"),
    ("importlib", r"\bimportlib\b"),
    ("eval()", r"(?m)(?:^|[^.\w])eval\s*\("),
    ("exec()", r"(?m)(?:^|[^.\w])exec\s*\("),
    ("compile()", r"(?m)(?:^|[^.\w])compile\s*\("),
    ("open()", r"(?m)(?:^|[^.\w])open\s*\("),
    ("io.open", r"\b(?:io|codecs)\s*\.\s*(?:open|FileIO)\b"),
    ("io.open", r"(?m)^\s*from\s+(?:io|codecs)\s+import\b.*\b(?:open|FileIO)\b"),
    ("__builtins__", r"__builtins__"),
    ("__subclasses__", r"__subclasses__"),
    ("__globals__", r"__globals__"),
    ("sys.modules", r"\bsys\s*\.\s*modules\b"),
    ("breakpoint()", r"(?m)(?:^|[^.\w])breakpoint\s*\("),
    (
        "reflection builtins",
        r"(?m)(?:^|[^.\w])(?:getattr|setattr|delattr|vars|globals|locals)\s*\(",
    ),
    (
        "frame and closure introspection",
        r"\b(?:__(?:closure|code|getattribute|dict|self|func|loader|spec|bases|mro)__|f_(?:globals|locals|builtins|back|code)|(?:tb|gi|cr|ag)_frame|gi_code|cell_contents|_getframe)\b",
    ),
    // Library modules keep their own references, e.g. `logging.os` or `collections._sys`.
    (
        "module reached through an attribute",
        r"\.\s*_{0,2}(?:os|sys|posix|nt|subprocess|builtins|socket|shutil|ctypes|importlib)\b",
    ),
];

const JAVASCRIPT_DENIED_MODULES: &[&str] = &[
    "child_process", "fs", "fs/promises", "net", "dgram", "dns", "http", "https", "http2", "tls",
    "cluster", "worker_threads", "vm", "os", "module", "inspector", "v8", "process", "repl",
    "readline",
];

const JAVASCRIPT_DENIED_PATTERNS: &[(&str, &str)] = &[
    ("sandbox internals", r"__sandbox"),
    ("eval()", r"(?m)(?:^|[^.\w$])eval\s*\("),
    ("Function constructor", r"(?m)(?:^|[^.\w$])Function\s*\("),
    ("dynamic import()", r#"(?m)(?:^|[^.\w$])import\s*\(\s*[^'"\s]"#),
    ("non-literal require()", r#"(?m)(?:^|[^.\w$])require\s*\(\s*[^'"\s]"#),
    ("process.binding", r"\bprocess\s*\.\s*binding\b"),
    ("process.dlopen", r"\bprocess\s*\.\s*dlopen\b"),
    ("process.kill", r"\bprocess\s*\.\s*kill\b"),
    ("process.env", r"\bprocess\s*\.\s*env\b"),
    ("process.chdir", r"\bprocess\s*\.\s*chdir\b"),
    ("process.mainModule", r"\bprocess\s*\.\s*mainModule\b"),
    ("module.require", r"\bmodule\s*\.\s*require\b"),
    ("module.constructor", r"\bmodule\s*\.\s*constructor\b"),
    (
        "module loader internals",
        r"\b(?:mainModule|_load|_cache|_resolveFilename|_extensions|_linkedBinding|getPrototypeOf|__proto__)\b",
    ),
];

/// A named source pattern that is refused.
#[derive(Debug, Clone)]
pub struct DeniedPattern {
    /// Name used in violation messages.
    pub name: String,
    /// The compiled pattern.
    pub regex: Regex,
}

impl DeniedPattern {
    /// Compile a pattern; an invalid regex is a configuration error.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| SandboxError::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            name: name.into(),
            regex,
        })
    }

    fn builtin(table: &[(&str, &str)]) -> Vec<Self> {
        table
            .iter()
            .map(|(name, pattern)| Self {
                name: (*name).to_string(),
                regex: Regex::new(pattern).expect("built-in policy pattern must compile"),
            })
            .collect()
    }
}

/// Deny-lists for one language.
#[derive(Debug, Clone, Default)]
pub struct LanguagePolicy {
    /// Modules that may not be imported, matched with their submodules.
    pub denied_modules: BTreeSet<String>,
    /// Source constructs that are refused.
    pub denied_patterns: Vec<DeniedPattern>,
    /// Packages the resolver must never install.
    pub denied_packages: BTreeSet<String>,
}

impl LanguagePolicy {
    fn defaults(language: Language) -> Self {
        let (modules, patterns) = match language {
            Language::Python => (PYTHON_DENIED_MODULES, PYTHON_DENIED_PATTERNS),
            Language::JavaScript => (JAVASCRIPT_DENIED_MODULES, JAVASCRIPT_DENIED_PATTERNS),
        };
        Self {
            denied_modules: modules.iter().map(|m| m.to_string()).collect(),
            denied_patterns: DeniedPattern::builtin(patterns),
            denied_packages: BTreeSet::new(),
        }
    }

    /// The deny-list entry matching `module`, if any.
    pub fn denied_module(&self, language: Language, module: &str) -> Option<&str> {
        self.denied_modules
            .iter()
            .find(|denied| language.module_matches(module, denied))
            .map(String::as_str)
    }
}

/// Deny-lists for every supported language.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    python: LanguagePolicy,
    javascript: LanguagePolicy,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            python: LanguagePolicy::defaults(Language::Python),
            javascript: LanguagePolicy::defaults(Language::JavaScript),
        }
    }
}

impl SecurityPolicy {
    /// A policy that denies nothing.
    pub fn permissive() -> Self {
        Self {
            python: LanguagePolicy::default(),
            javascript: LanguagePolicy::default(),
        }
    }

    /// The deny-lists for `language`.
    pub fn for_language(&self, language: Language) -> &LanguagePolicy {
        match language {
            Language::Python => &self.python,
            Language::JavaScript => &self.javascript,
        }
    }

    fn for_language_mut(&mut self, language: Language) -> &mut LanguagePolicy {
        match language {
            Language::Python => &mut self.python,
            Language::JavaScript => &mut self.javascript,
        }
    }

    /// Add a module to the deny-list.
    pub fn deny_module(mut self, language: Language, module: impl Into<String>) -> Self {
        self.for_language_mut(language)
            .denied_modules
            .insert(module.into());
        self
    }

    /// Remove a module from the deny-list.
    pub fn allow_module(mut self, language: Language, module: &str) -> Self {
        self.for_language_mut(language).denied_modules.remove(module);
        self
    }

    /// Refuse source matching `pattern`.
    pub fn deny_pattern(
        mut self,
        language: Language,
        name: impl Into<String>,
        pattern: &str,
    ) -> Result<Self> {
        let pattern = DeniedPattern::new(name, pattern)?;
        self.for_language_mut(language).denied_patterns.push(pattern);
        Ok(self)
    }

    /// Never install `package`.
    pub fn deny_package(mut self, language: Language, package: impl Into<String>) -> Self {
        self.for_language_mut(language)
            .denied_packages
            .insert(package.into());
        self
    }

    /// Run every static check against analyzed source.
    pub fn check(&self, analysis: &SourceAnalysis, code: &str) -> Result<()> {
        if analysis.parsed {
            self.check_imports(analysis.language, analysis.imports.iter().map(String::as_str))?;
        } else if analysis.language == Language::Python {
            // The parser gave up; a plain line scan still catches the imports.
            let scanned = python::scan_import_lines(code);
            self.check_imports(analysis.language, scanned.iter().map(String::as_str))?;
        }
        self.check_source(analysis.language, code)
    }

    /// Refuse any import of a denied module.
    pub fn check_imports<'a>(
        &self,
        language: Language,
        imports: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let policy = self.for_language(language);
        for module in imports {
            if let Some(denied) = policy.denied_module(language, module) {
                tracing::info!(%language, module, denied, "import refused");
                return Err(SandboxError::PolicyViolation(format!(
                    "importing '{}' is not allowed",
                    module
                )));
            }
        }
        Ok(())
    }

    /// Refuse source containing a denied construct.
    pub fn check_source(&self, language: Language, code: &str) -> Result<()> {
        for pattern in &self.for_language(language).denied_patterns {
            if pattern.regex.is_match(code) {
                tracing::info!(%language, construct = %pattern.name, "construct refused");
                return Err(SandboxError::PolicyViolation(format!(
                    "use of {} is not allowed",
                    pattern.name
                )));
            }
        }
        Ok(())
    }

    /// Refuse installing a denied package.
    pub fn check_package(&self, language: Language, package: &str) -> Result<()> {
        let policy = self.for_language(language);
        let denied = policy.denied_packages.contains(package)
            || policy.denied_module(language, package).is_some();
        if denied {
            return Err(SandboxError::PolicyViolation(format!(
                "installing '{}' is not allowed",
                package
            )));
        }
        Ok(())
    }
}
