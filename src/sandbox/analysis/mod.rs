//! Static analysis of user source: imported modules and the calling
//! convention of `main`. Nothing here executes user code.

pub mod javascript;
pub mod python;

use std::collections::BTreeSet;

use crate::sandbox::language::Language;

/// How a declared parameter of `main` may be passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Positional or keyword.
    Positional,
    /// Python keyword-only parameter (after `*`).
    KeywordOnly,
}

/// One declared parameter of `main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// How it may be passed.
    pub kind: ParamKind,
}

impl Param {
    /// A positional parameter.
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Positional,
        }
    }

    /// A keyword-only parameter.
    pub fn keyword_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::KeywordOnly,
        }
    }
}

/// How the entry-point adapter invokes `main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallConvention {
    /// `main()`.
    NoArgs,
    /// `main(variables)`: the whole bag as the only argument.
    VariableBag,
    /// Each declared parameter is resolved by name from the bindings.
    Named(Vec<Param>),
    /// `main` could not be read statically; the child decides with the same rules.
    Introspect,
}

impl CallConvention {
    /// Pick a convention from a declared parameter list.
    pub fn from_params(params: Vec<Param>) -> Self {
        if params.iter().any(|p| p.name == "variables") {
            CallConvention::VariableBag
        } else if params.is_empty() {
            CallConvention::NoArgs
        } else {
            CallConvention::Named(params)
        }
    }
}

/// Everything the pipeline learns from source before running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAnalysis {
    /// Language the source was analyzed as.
    pub language: Language,
    /// Imported module specifiers (`x.y` for `from x.y import z`).
    pub imports: BTreeSet<String>,
    /// Calling convention of `main`.
    pub entry_point: CallConvention,
    /// Whether the source parsed. Unparsed source reports no imports.
    pub parsed: bool,
}

impl SourceAnalysis {
    /// Whether any import is `module` or one of its submodules.
    pub fn imports_module(&self, module: &str) -> bool {
        self.imports
            .iter()
            .any(|import| self.language.module_matches(import, module))
    }

    /// Installable roots of the imports, deduplicated.
    pub fn root_modules(&self) -> BTreeSet<String> {
        self.imports
            .iter()
            .map(|import| self.language.root_module(import).to_string())
            .collect()
    }
}

/// Analyze source for `language`.
pub fn analyze(language: Language, code: &str) -> SourceAnalysis {
    match language {
        Language::Python => python::analyze(code),
        Language::JavaScript => javascript::analyze(code),
    }
}

/// List the modules imported by `code`; empty when it does not parse.
pub fn extract_imports(language: Language, code: &str) -> BTreeSet<String> {
    analyze(language, code).imports
}
