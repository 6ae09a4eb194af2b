// src/template/mod.rs

//! Text templating for installer scripts
//!
//! Two dialects coexist:
//!
//! - [`selector`]: `# [EXPR]` line selectors, `#if`/`#else`/`#endif` blocks
//!   and literal `__NAME__` placeholders. Shell headers use it because the
//!   payload size and hash are spliced in after rendering and the rendered
//!   length must be predictable.
//! - [`general`]: a Jinja-like subset with loops, conditionals, filters and
//!   strict undefined variables, used for script fragments.
//!
//! Both render against a [`TemplateScope`]: the recipe (read-only), the
//! platform predicate dictionary, and computed variables added by emitters.

pub mod expr;
pub mod general;
pub mod selector;

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::recipe::Recipe;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use expr::{Expr, ExprError};

/// Template rendering errors, located by line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("line {line}: {source}")]
    Expr { line: usize, source: ExprError },

    #[error("line {line}: undefined placeholder __{name}__")]
    Undefined { name: String, line: usize },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

impl TemplateError {
    pub(crate) fn at(line: usize, source: ExprError) -> Self {
        Self::Expr { line, source }
    }

    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Variables visible to templates
#[derive(Debug, Clone, Default)]
pub struct TemplateScope {
    values: Map<String, Value>,
}

impl TemplateScope {
    /// Scope holding only the platform predicates
    pub fn for_platform(platform: Platform) -> Self {
        let values = platform
            .predicates()
            .into_iter()
            .map(|(k, v)| (k, Value::Bool(v)))
            .collect();
        Self { values }
    }

    /// Scope for a recipe: predicates, `recipe.*`, and `platform`
    pub fn for_recipe(recipe: &Recipe) -> Result<Self> {
        let mut scope = Self::for_platform(recipe.platform);
        scope.set("recipe", recipe)?;
        scope.set("platform", recipe.platform.subdir())?;
        Ok(scope)
    }

    /// Insert or replace a variable
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        self.values
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

fn located(name: &str, err: TemplateError) -> Error {
    Error::Emit(format!("template {name}: {err}"))
}

/// Render `text` (named `name` in errors) with the selector dialect
pub fn render_selectors(
    name: &str,
    text: &str,
    scope: &TemplateScope,
    vars: &BTreeMap<String, String>,
) -> Result<String> {
    selector::render(text, scope.as_map(), vars).map_err(|e| located(name, e))
}

/// Render `text` (named `name` in errors) with the general dialect
pub fn render_general(name: &str, text: &str, scope: &TemplateScope) -> Result<String> {
    general::render(text, scope.as_map()).map_err(|e| located(name, e))
}
