//! Python source analysis on top of `rustpython-parser`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use rustpython_parser::{ast, Parse};

use super::{CallConvention, Param, SourceAnalysis};
use crate::sandbox::language::Language;

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*import\s+(.+)$").expect("import line pattern must compile")
});

static FROM_IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+([A-Za-z_][\w.]*)\s+import\b").expect("from-import pattern must compile")
});

/// Parse `code` and collect imports and the entry-point convention.
pub fn analyze(code: &str) -> SourceAnalysis {
    match ast::Suite::parse(code, "<sandbox>") {
        Ok(suite) => {
            let mut imports = BTreeSet::new();
            collect_imports(&suite, &mut imports);
            SourceAnalysis {
                language: Language::Python,
                imports,
                entry_point: entry_point(&suite),
                parsed: true,
            }
        }
        Err(err) => {
            tracing::debug!(error = ?err, "python source did not parse");
            SourceAnalysis {
                language: Language::Python,
                imports: BTreeSet::new(),
                entry_point: CallConvention::Introspect,
                parsed: false,
            }
        }
    }
}

fn collect_imports(body: &[ast::Stmt], out: &mut BTreeSet<String>) {
    use ast::Stmt;

    for stmt in body {
        match stmt {
            Stmt::Import(ast::StmtImport { names, .. }) => {
                for alias in names {
                    out.insert(alias.name.as_str().to_string());
                }
            }
            Stmt::ImportFrom(ast::StmtImportFrom { module, level, .. }) => {
                let relative = level.as_ref().map_or(0, |l| l.to_u32()) > 0;
                if let (false, Some(module)) = (relative, module) {
                    out.insert(module.as_str().to_string());
                }
            }
            Stmt::FunctionDef(ast::StmtFunctionDef { body, .. })
            | Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef { body, .. })
            | Stmt::ClassDef(ast::StmtClassDef { body, .. })
            | Stmt::With(ast::StmtWith { body, .. })
            | Stmt::AsyncWith(ast::StmtAsyncWith { body, .. }) => collect_imports(body, out),
            Stmt::For(ast::StmtFor { body, orelse, .. })
            | Stmt::AsyncFor(ast::StmtAsyncFor { body, orelse, .. })
            | Stmt::While(ast::StmtWhile { body, orelse, .. })
            | Stmt::If(ast::StmtIf { body, orelse, .. }) => {
                collect_imports(body, out);
                collect_imports(orelse, out);
            }
            Stmt::Match(ast::StmtMatch { cases, .. }) => {
                for case in cases {
                    collect_imports(&case.body, out);
                }
            }
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                collect_imports(body, out);
                for handler in handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    collect_imports(&handler.body, out);
                }
                collect_imports(orelse, out);
                collect_imports(finalbody, out);
            }
            _ => {}
        }
    }
}

/// The convention of the last top-level binding of `main`.
fn entry_point(suite: &[ast::Stmt]) -> CallConvention {
    use ast::Stmt;

    let mut convention = CallConvention::Introspect;
    for stmt in suite {
        match stmt {
            Stmt::FunctionDef(ast::StmtFunctionDef {
                name,
                args,
                decorator_list,
                ..
            })
            | Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
                name,
                args,
                decorator_list,
                ..
            }) if name.as_str() == "main" => {
                convention = if decorator_list.is_empty() {
                    CallConvention::from_params(declared_params(args))
                } else {
                    CallConvention::Introspect
                };
            }
            other if binds_main(other) => convention = CallConvention::Introspect,
            _ => {}
        }
    }
    convention
}

fn declared_params(args: &ast::Arguments) -> Vec<Param> {
    let positional = args
        .posonlyargs
        .iter()
        .chain(args.args.iter())
        .map(|a| Param::positional(a.def.arg.as_str()));
    let keyword_only = args
        .kwonlyargs
        .iter()
        .map(|a| Param::keyword_only(a.def.arg.as_str()));
    positional.chain(keyword_only).collect()
}

fn is_main_target(expr: &ast::Expr) -> bool {
    match expr {
        ast::Expr::Name(ast::ExprName { id, .. }) => id.as_str() == "main",
        ast::Expr::Tuple(ast::ExprTuple { elts, .. })
        | ast::Expr::List(ast::ExprList { elts, .. }) => elts.iter().any(is_main_target),
        _ => false,
    }
}

/// Whether a statement (re)binds `main` in a way that hides its signature.
fn binds_main(stmt: &ast::Stmt) -> bool {
    use ast::Stmt;

    let any = |body: &[Stmt]| {
        body.iter().any(|s| match s {
            Stmt::FunctionDef(ast::StmtFunctionDef { name, .. })
            | Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef { name, .. }) => {
                name.as_str() == "main"
            }
            other => binds_main(other),
        })
    };

    match stmt {
        Stmt::Assign(ast::StmtAssign { targets, .. }) => targets.iter().any(is_main_target),
        Stmt::AnnAssign(ast::StmtAnnAssign { target, .. })
        | Stmt::AugAssign(ast::StmtAugAssign { target, .. }) => is_main_target(target),
        Stmt::ClassDef(ast::StmtClassDef { name, .. }) => name.as_str() == "main",
        Stmt::Import(ast::StmtImport { names, .. })
        | Stmt::ImportFrom(ast::StmtImportFrom { names, .. }) => names.iter().any(|alias| {
            alias.asname.as_ref().unwrap_or(&alias.name).as_str() == "main"
        }),
        Stmt::If(ast::StmtIf { body, orelse, .. })
        | Stmt::For(ast::StmtFor { body, orelse, .. })
        | Stmt::While(ast::StmtWhile { body, orelse, .. }) => any(body) || any(orelse),
        Stmt::With(ast::StmtWith { body, .. }) => any(body),
        Stmt::Try(ast::StmtTry {
            body,
            handlers,
            orelse,
            finalbody,
            ..
        }) => {
            any(body)
                || any(orelse)
                || any(finalbody)
                || handlers.iter().any(|h| {
                    let ast::ExceptHandler::ExceptHandler(h) = h;
                    any(&h.body)
                })
        }
        _ => false,
    }
}

/// Line-oriented import scan for source the parser rejected.
pub fn scan_import_lines(code: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for line in code.lines().flat_map(|l| l.split(';')) {
        if let Some(caps) = FROM_IMPORT_LINE.captures(line) {
            out.insert(caps[1].to_string());
        } else if let Some(caps) = IMPORT_LINE.captures(line) {
            for part in caps[1].split(',') {
                let name = part.split_whitespace().next().unwrap_or_default();
                if !name.is_empty() {
                    out.insert(name.trim_end_matches(['(', ')', '\\']).to_string());
                }
            }
        }
    }
    out
}
