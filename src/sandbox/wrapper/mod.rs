//! Wrapper generation: turns a request into a runnable program.
//!
//! A wrapper is an ordered list of typed blocks rendered with an explicit
//! separator line between them. Only the `UserCode` block contains text from
//! the request; variable values enter through literal renderers that are
//! exact for every JSON value, never through string splicing.

pub mod javascript;
pub mod python;

use std::fmt;

use serde_json::{json, Value};

use crate::error::{Result, SandboxError};
use crate::sandbox::analysis::{CallConvention, ParamKind, SourceAnalysis};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::language::{Language, RESERVED_PREFIX};
use crate::sandbox::request::ExecutionRequest;

/// Captured user output kept in the result envelope, in characters.
pub const MAX_LOG_CHARS: usize = 64 * 1024;

/// The role of a block in the wrapper, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockKind {
    /// Output capture, serialization helpers and crash handlers.
    Setup,
    /// Headless rendering backend and font configuration.
    Graphics,
    /// Run-time import deny-list.
    Guard,
    /// One binding per request variable, plus the variable bag.
    Bindings,
    /// The user's source, verbatim.
    UserCode,
    /// Entry-point invocation, artifact harvesting and the result line.
    Adapter,
}

impl BlockKind {
    fn label(&self) -> &'static str {
        match self {
            BlockKind::Setup => "setup",
            BlockKind::Graphics => "graphics",
            BlockKind::Guard => "guard",
            BlockKind::Bindings => "bindings",
            BlockKind::UserCode => "user code",
            BlockKind::Adapter => "adapter",
        }
    }
}

/// One block of generated program text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperBlock {
    /// What the block does.
    pub kind: BlockKind,
    /// Program text.
    pub text: String,
}

/// A complete program for one execution attempt.
///
/// Not `Clone`: it is built per request and consumed by the runner.
#[derive(Debug, PartialEq, Eq)]
pub struct CompiledWrapper {
    language: Language,
    blocks: Vec<WrapperBlock>,
}

impl CompiledWrapper {
    /// Language of the program.
    pub fn language(&self) -> Language {
        self.language
    }

    /// The blocks in rendering order.
    pub fn blocks(&self) -> &[WrapperBlock] {
        &self.blocks
    }

    /// The block of a given kind, if present.
    pub fn block(&self, kind: BlockKind) -> Option<&WrapperBlock> {
        self.blocks.iter().find(|b| b.kind == kind)
    }

    /// File name the runner writes the program to.
    pub fn file_name(&self) -> String {
        format!("main.{}", self.language.extension())
    }

    /// Render the program text.
    pub fn render(&self) -> String {
        let comment = match self.language {
            Language::Python => "#",
            Language::JavaScript => "//",
        };
        let mut out = String::new();
        for block in &self.blocks {
            out.push_str(&format!("{} ---- {} ----\n", comment, block.kind.label()));
            out.push_str(&block.text);
            if !block.text.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for CompiledWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Builds wrappers from requests.
#[derive(Debug)]
pub struct WrapperGenerator<'a> {
    config: &'a SandboxConfig,
}

impl<'a> WrapperGenerator<'a> {
    /// Create a generator using `config` for fonts, DPI and the deny-list.
    pub fn new(config: &'a SandboxConfig) -> Self {
        Self { config }
    }

    /// Assemble the wrapper for `request`.
    pub fn generate(
        &self,
        request: &ExecutionRequest,
        analysis: &SourceAnalysis,
    ) -> Result<CompiledWrapper> {
        let language = request.language;
        for name in request.variables.keys() {
            if name.starts_with(RESERVED_PREFIX) || !language.is_valid_identifier(name) {
                return Err(SandboxError::InvalidRequest(format!(
                    "'{}' is not a valid {} variable name",
                    name, language
                )));
            }
        }

        let denied: Vec<&str> = self
            .config
            .policy
            .for_language(language)
            .denied_modules
            .iter()
            .map(String::as_str)
            .collect();
        let convention = convention_value(&analysis.entry_point);

        let mut blocks = Vec::with_capacity(6);
        match language {
            Language::Python => {
                blocks.push(python::setup_block(self.config.artifact_dpi));
                if analysis.imports_module("matplotlib") {
                    blocks.push(python::graphics_block(
                        &self.config.font_fallbacks,
                        self.config.artifact_dpi,
                    ));
                }
                if !denied.is_empty() {
                    blocks.push(python::guard_block(&denied));
                }
                blocks.push(python::bindings_block(&request.variables));
            }
            Language::JavaScript => {
                blocks.push(javascript::setup_block());
                if !denied.is_empty() {
                    blocks.push(javascript::guard_block(&denied));
                }
                blocks.push(javascript::bindings_block(&request.variables));
            }
        }
        blocks.push(WrapperBlock {
            kind: BlockKind::UserCode,
            text: request.code.clone(),
        });
        blocks.push(match language {
            Language::Python => python::adapter_block(&convention),
            Language::JavaScript => javascript::adapter_block(&convention),
        });

        tracing::debug!(
            language = %language,
            blocks = blocks.len(),
            convention = ?analysis.entry_point,
            "generated wrapper"
        );
        Ok(CompiledWrapper { language, blocks })
    }
}

/// The calling convention as data for the adapter.
fn convention_value(convention: &CallConvention) -> Value {
    match convention {
        CallConvention::NoArgs => json!({"kind": "none"}),
        CallConvention::VariableBag => json!({"kind": "bag"}),
        CallConvention::Introspect => json!({"kind": "introspect"}),
        CallConvention::Named(params) => {
            let params: Vec<Value> = params
                .iter()
                .map(|p| {
                    let how = match p.kind {
                        ParamKind::Positional => "positional",
                        ParamKind::KeywordOnly => "keyword",
                    };
                    json!([p.name, how])
                })
                .collect();
            json!({"kind": "named", "params": params})
        }
    }
}
