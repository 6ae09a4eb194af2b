// src/template/selector.rs

//! Selector-and-substitution dialect
//!
//! Used for recipe preprocessing and for templates whose rendered size must
//! stay predictable (shell headers, NSIS scripts):
//!
//! - a trailing `# [EXPR]` comment keeps the line only when `EXPR` holds
//! - `#if EXPR` / `#else` / `#endif` lines bracket conditional blocks
//! - `__NAME__` placeholders are replaced literally

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::expr::{Expr, ExprError, is_truthy};
use super::TemplateError;

fn selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\s*\[([^\[\]]+)\]\s*$").expect("Invalid selector regex"))
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__([A-Z][A-Z0-9_]*[A-Z0-9])__").expect("Invalid placeholder regex"))
}

fn eval_line(expr: &str, scope: &Map<String, Value>, line: usize) -> Result<bool, TemplateError> {
    let parsed = Expr::parse(expr).map_err(|e| TemplateError::at(line, e))?;
    // Every referenced predicate must exist, even on a short-circuited side
    for name in parsed.names() {
        if !scope.contains_key(name) {
            return Err(TemplateError::at(line, ExprError::Undefined(name.to_string())));
        }
    }
    let value = parsed.eval(scope).map_err(|e| TemplateError::at(line, e))?;
    Ok(is_truthy(&value))
}

/// Drop lines whose trailing `# [EXPR]` selector is false
///
/// Lines without a selector, and lines whose selector holds, are kept
/// verbatim, which makes the operation idempotent.
pub fn preprocess(text: &str, scope: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let body = line.trim_end_matches(['\n', '\r']);
        if let Some(caps) = selector_re().captures(body) {
            if !eval_line(caps[1].trim(), scope, idx + 1)? {
                continue;
            }
        }
        out.push_str(line);
    }
    Ok(out)
}

/// Render the selector dialect: line selectors, `#if` blocks, placeholders
pub fn render(
    text: &str,
    scope: &Map<String, Value>,
    vars: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let selected = preprocess(text, scope)?;

    // Each stack entry: (branch currently emitting, any branch taken, line)
    let mut stack: Vec<(bool, bool, usize)> = Vec::new();
    let mut out = String::with_capacity(selected.len());

    for (idx, line) in selected.split_inclusive('\n').enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim();
        let parent_active = stack.iter().all(|(active, _, _)| *active);

        if let Some(expr) = trimmed.strip_prefix("#if ") {
            let holds = parent_active && eval_line(expr.trim(), scope, lineno)?;
            stack.push((holds, holds, lineno));
            continue;
        }
        if trimmed == "#else" {
            let Some(top) = stack.pop() else {
                return Err(TemplateError::syntax(lineno, "#else without #if"));
            };
            let enclosing = stack.iter().all(|(active, _, _)| *active);
            stack.push((enclosing && !top.1, true, top.2));
            continue;
        }
        if trimmed == "#endif" {
            if stack.pop().is_none() {
                return Err(TemplateError::syntax(lineno, "#endif without #if"));
            }
            continue;
        }
        if !parent_active {
            continue;
        }

        let mut missing = None;
        let replaced = placeholder_re().replace_all(line, |caps: &regex::Captures<'_>| {
            match vars.get(&caps[1]) {
                Some(v) => v.clone(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        if let Some(name) = missing {
            return Err(TemplateError::Undefined { name, line: lineno });
        }
        out.push_str(&replaced);
    }

    if let Some((_, _, line)) = stack.last() {
        return Err(TemplateError::syntax(*line, "unterminated #if"));
    }
    Ok(out)
}
