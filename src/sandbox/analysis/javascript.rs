//! Lexical analysis of JavaScript source.
//!
//! Comments are blanked out first so commented-out `require` calls are not
//! reported, then module specifiers and the shape of `main` are matched.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{CallConvention, Param, SourceAnalysis};
use crate::sandbox::language::Language;

const QUOTED: &str = r#"(?:'([^'\n]*)'|"([^"\n]*)"|`([^`$]*)`)"#;

static SPECIFIER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"(?:^|[^.\w$])require\s*\(\s*{}\s*\)", QUOTED),
        format!(r"(?:^|[^.\w$])import\s*\(\s*{}\s*\)", QUOTED),
        format!(r#"(?:^|[^.\w$])import\s+[^'";()]*?\bfrom\s*{}"#, QUOTED),
        format!(r"(?:^|[^.\w$])import\s*{}", QUOTED),
        format!(r#"(?:^|[^.\w$])export\s+[^'";()]*?\bfrom\s*{}"#, QUOTED),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("specifier pattern must compile"))
    .collect()
});

static MAIN_DEFINITIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*main\s*\(([^)]*)\)",
        r"(?m)^\s*(?:const|let|var)\s+main\s*=\s*(?:async\s+)?function\b[^(]*\(([^)]*)\)",
        r"(?m)^\s*(?:const|let|var)\s+main\s*=\s*(?:async\s+)?\(([^)]*)\)\s*=>",
        r"(?m)^\s*(?:const|let|var)\s+main\s*=\s*(?:async\s+)?([A-Za-z_$][\w$]*)\s*=>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("main definition pattern must compile"))
    .collect()
});

static MAIN_REASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:(?:const|let|var)\s+)?main\s*=[^=>]").expect("reassignment pattern must compile")
});

/// Analyze JavaScript source. Lexical analysis never fails.
pub fn analyze(code: &str) -> SourceAnalysis {
    let stripped = strip_comments(code);
    SourceAnalysis {
        language: Language::JavaScript,
        imports: collect_specifiers(&stripped),
        entry_point: entry_point(&stripped),
        parsed: true,
    }
}

fn collect_specifiers(code: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for pattern in SPECIFIER_PATTERNS.iter() {
        for caps in pattern.captures_iter(code) {
            let specifier = (1..=3).find_map(|i| caps.get(i)).map(|m| m.as_str());
            if let Some(specifier) = specifier {
                let specifier = Language::JavaScript.normalize_specifier(specifier.trim());
                let local = specifier.starts_with('.') || specifier.starts_with('/');
                if !specifier.is_empty() && !local {
                    out.insert(specifier.to_string());
                }
            }
        }
    }
    out
}

fn entry_point(code: &str) -> CallConvention {
    let last_definition = MAIN_DEFINITIONS
        .iter()
        .filter_map(|pattern| pattern.captures_iter(code).last())
        .max_by_key(|caps| caps.get(0).map_or(0, |m| m.start()));

    let Some(caps) = last_definition else {
        return CallConvention::Introspect;
    };
    let definition_end = caps.get(0).map_or(0, |m| m.end());

    let reassigned = MAIN_REASSIGNMENT
        .find_iter(code)
        .any(|m| m.start() >= definition_end);
    if reassigned {
        return CallConvention::Introspect;
    }

    match caps.get(1).map(|m| parse_params(m.as_str())) {
        // A bag parameter after others needs its position resolved in the child.
        Some(Some(params)) if params.iter().skip(1).any(|p| p.name == "variables") => {
            CallConvention::Introspect
        }
        Some(Some(params)) => CallConvention::from_params(params),
        _ => CallConvention::Introspect,
    }
}

/// Parse a simple parameter list; destructuring and computed defaults give up.
fn parse_params(list: &str) -> Option<Vec<Param>> {
    if list.contains(['{', '[', '(', '`', '\'', '"']) {
        return None;
    }
    let mut params = Vec::new();
    for raw in list.split(',') {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("...") {
            continue;
        }
        let name = raw.split('=').next().unwrap_or_default().trim();
        if !Language::JavaScript.is_valid_identifier(name) {
            return None;
        }
        params.push(Param::positional(name));
    }
    Some(params)
}

/// Replace comments with spaces, keeping string literals and line breaks intact.
pub fn strip_comments(code: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Str(char),
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(code.len());
    let mut state = State::Code;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match (c, chars.peek().copied()) {
                ('/', Some('/')) => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                ('/', Some('*')) => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                ('\'' | '"' | '`', _) => {
                    out.push(c);
                    state = State::Str(c);
                }
                _ => out.push(c),
            },
            State::Str(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote || (c == '\n' && quote != '`') {
                    state = State::Code;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek().copied() == Some('/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
        }
    }
    out
}
