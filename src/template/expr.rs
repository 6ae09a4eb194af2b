// src/template/expr.rs

//! Boolean/value expressions for selectors and template directives
//!
//! Grammar:
//!
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := not ("and" not)*
//! not     := "not" not | compare
//! compare := primary (("==" | "!=" | "in" | "not in") primary)?
//! primary := "(" expr ")" | STRING | NUMBER | "true" | "false" | path
//! path    := IDENT ("." IDENT)*
//! ```
//!
//! Identifiers may contain `-` between alphanumerics so that platform
//! subdirs such as `linux-64` and `osx-arm64` are single predicates.

use serde_json::{Map, Value};

/// Expression parsing and evaluation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("undefined variable '{0}'")]
    Undefined(String),
    #[error("syntax error in '{expr}': {message}")]
    Syntax { expr: String, message: String },
    #[error("cannot evaluate '{0}'")]
    Evaluation(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Dot,
    Eq,
    Ne,
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let syntax = |message: String| ExprError::Syntax {
        expr: src.to_string(),
        message,
    };
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' | '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(syntax(format!("unexpected '{c}'")));
                }
                tokens.push(if c == '=' { Token::Eq } else { Token::Ne });
                i += 2;
            }
            '"' | '\'' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| syntax("unterminated string".to_string()))?;
                tokens.push(Token::Str(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| syntax(format!("bad number '{text}'")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i];
                    let dash_inside = ch == '-'
                        && chars.get(i + 1).is_some_and(|n| n.is_ascii_alphanumeric());
                    if ch.is_ascii_alphanumeric() || ch == '_' || dash_inside {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            expr: self.src.to_string(),
            message: message.into(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_primary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                Ok(Expr::Eq(Box::new(left), Box::new(self.parse_primary()?)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                Ok(Expr::Ne(Box::new(left), Box::new(self.parse_primary()?)))
            }
            Some(Token::Ident(kw)) if kw == "in" => {
                self.pos += 1;
                Ok(Expr::In(Box::new(left), Box::new(self.parse_primary()?)))
            }
            Some(Token::Ident(kw))
                if kw == "not"
                    && matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(k)) if k == "in") =>
            {
                self.pos += 2;
                let right = self.parse_primary()?;
                Ok(Expr::Not(Box::new(Expr::In(Box::new(left), Box::new(right)))))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
            )),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "and" | "or" | "not" | "in" => Err(self.error(format!("unexpected '{name}'"))),
                _ => {
                    let mut path = vec![name];
                    while self.peek() == Some(&Token::Dot) {
                        self.pos += 1;
                        match self.next() {
                            Some(Token::Ident(attr)) => path.push(attr),
                            _ => return Err(self.error("expected attribute after '.'")),
                        }
                    }
                    Ok(Expr::Path(path))
                }
            },
            Some(tok) => Err(self.error(format!("unexpected token {tok:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

impl Expr {
    /// Parse an expression
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { src, tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("trailing tokens"));
        }
        Ok(expr)
    }

    /// Top-level names referenced anywhere in the expression
    pub fn names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Path(path) => out.push(path[0].as_str()),
            Expr::Not(inner) => inner.collect_names(out),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Eq(a, b) | Expr::Ne(a, b) | Expr::In(a, b) => {
                a.collect_names(out);
                b.collect_names(out);
            }
        }
    }

    /// Evaluate against a scope; unknown names are errors
    pub fn eval(&self, scope: &Map<String, Value>) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(path) => lookup(scope, path),
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.eval(scope)?))),
            Expr::And(a, b) => {
                let left = a.eval(scope)?;
                if !is_truthy(&left) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&b.eval(scope)?)))
            }
            Expr::Or(a, b) => {
                let left = a.eval(scope)?;
                if is_truthy(&left) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&b.eval(scope)?)))
            }
            Expr::Eq(a, b) => Ok(Value::Bool(loose_eq(&a.eval(scope)?, &b.eval(scope)?))),
            Expr::Ne(a, b) => Ok(Value::Bool(!loose_eq(&a.eval(scope)?, &b.eval(scope)?))),
            Expr::In(a, b) => {
                let needle = a.eval(scope)?;
                let haystack = b.eval(scope)?;
                let found = match &haystack {
                    Value::Array(items) => items.iter().any(|i| loose_eq(i, &needle)),
                    Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
                    Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
                    _ => return Err(ExprError::Evaluation(format!("{needle} in {haystack}"))),
                };
                Ok(Value::Bool(found))
            }
        }
    }
}

fn lookup(scope: &Map<String, Value>, path: &[String]) -> Result<Value, ExprError> {
    let mut current = scope
        .get(&path[0])
        .ok_or_else(|| ExprError::Undefined(path[0].clone()))?;
    for (depth, attr) in path.iter().enumerate().skip(1) {
        current = current
            .get(attr)
            .ok_or_else(|| ExprError::Undefined(path[..=depth].join(".")))?;
    }
    Ok(current.clone())
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Python-style truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Parse and evaluate an expression as a boolean
pub fn evaluate_bool(src: &str, scope: &Map<String, Value>) -> Result<bool, ExprError> {
    Ok(is_truthy(&Expr::parse(src)?.eval(scope)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Map<String, Value> {
        match json!({
            "linux": true,
            "osx": false,
            "linux-64": true,
            "installer_type": "sh",
            "specs": ["python", "pip"],
            "recipe": {"name": "Miniconda", "batch_mode": false},
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_boolean_operators() {
        let s = scope();
        assert!(evaluate_bool("linux", &s).unwrap());
        assert!(!evaluate_bool("osx", &s).unwrap());
        assert!(evaluate_bool("linux and not osx", &s).unwrap());
        assert!(evaluate_bool("osx or linux-64", &s).unwrap());
        assert!(!evaluate_bool("not (linux or osx)", &s).unwrap());
    }

    #[test]
    fn test_comparisons() {
        let s = scope();
        assert!(evaluate_bool("installer_type == 'sh'", &s).unwrap());
        assert!(evaluate_bool("installer_type != \"pkg\"", &s).unwrap());
        assert!(evaluate_bool("'pip' in specs", &s).unwrap());
        assert!(evaluate_bool("'conda' not in specs", &s).unwrap());
        assert!(evaluate_bool("recipe.name == 'Miniconda'", &s).unwrap());
        assert!(!evaluate_bool("recipe.batch_mode", &s).unwrap());
    }

    #[test]
    fn test_undefined_is_error() {
        let s = scope();
        assert_eq!(
            evaluate_bool("win", &s),
            Err(ExprError::Undefined("win".to_string()))
        );
        assert_eq!(
            evaluate_bool("recipe.company", &s),
            Err(ExprError::Undefined("recipe.company".to_string()))
        );
        // Short-circuit does not touch the undefined side
        assert!(evaluate_bool("linux or win", &s).unwrap());
    }

    #[test]
    fn test_syntax_errors() {
        let s = scope();
        assert!(matches!(evaluate_bool("linux and", &s), Err(ExprError::Syntax { .. })));
        assert!(matches!(evaluate_bool("(linux", &s), Err(ExprError::Syntax { .. })));
        assert!(matches!(evaluate_bool("linux = 1", &s), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn test_subdir_identifiers() {
        assert_eq!(
            Expr::parse("osx-arm64").unwrap(),
            Expr::Path(vec!["osx-arm64".to_string()])
        );
    }
}
