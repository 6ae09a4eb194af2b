// src/template/general.rs

//! General template dialect
//!
//! A small Jinja-compatible subset for script fragments whose size is not
//! byte-sensitive:
//!
//! - `{{ expr }}` and `{{ expr | filter }}` interpolation
//! - `{% if %}` / `{% elif %}` / `{% else %}` / `{% endif %}`
//! - `{% for item in expr %}` / `{% endfor %}` with `loop.index`, `loop.first`, `loop.last`
//! - `{# comments #}`
//!
//! Block tags use `trim_blocks` and `lstrip_blocks` semantics: a tag alone
//! on its line leaves no blank line behind. Undefined variables are errors.

use serde_json::{Map, Value, json};

use super::expr::{Expr, is_truthy};
use super::TemplateError;

#[derive(Debug)]
enum Node {
    Text(String),
    Output {
        expr: Expr,
        filters: Vec<String>,
        line: usize,
    },
    If {
        branches: Vec<(Expr, Vec<Node>, usize)>,
        otherwise: Vec<Node>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
        line: usize,
    },
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Output(String, usize),
    Tag(String, usize),
}

fn line_of(src: &str, offset: usize) -> usize {
    src[..offset].matches('\n').count() + 1
}

fn lex(src: &str) -> Result<Vec<Piece>, TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = 0;
    let mut trim_next_newline = false;

    loop {
        let next = ["{{", "{%", "{#"]
            .iter()
            .filter_map(|open| src[rest..].find(open).map(|i| (rest + i, *open)))
            .min_by_key(|(i, _)| *i);

        let Some((start, open)) = next else {
            let mut text = &src[rest..];
            if trim_next_newline {
                text = text.strip_prefix('\n').unwrap_or(text);
            }
            if !text.is_empty() {
                pieces.push(Piece::Text(text.to_string()));
            }
            break;
        };

        let close = match open {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };
        let line = line_of(src, start);
        let body_start = start + 2;
        let end = src[body_start..]
            .find(close)
            .map(|i| body_start + i)
            .ok_or_else(|| TemplateError::syntax(line, format!("unclosed '{open}'")))?;

        let mut text = &src[rest..start];
        if trim_next_newline {
            text = text.strip_prefix('\n').unwrap_or(text);
        }
        let is_block = open != "{{";
        if is_block {
            // lstrip_blocks: drop indentation before a block tag
            if let Some(nl) = text.rfind('\n') {
                if text[nl + 1..].chars().all(|c| c == ' ' || c == '\t') {
                    text = &text[..=nl];
                }
            } else if rest == 0 || trim_next_newline {
                if text.chars().all(|c| c == ' ' || c == '\t') {
                    text = "";
                }
            }
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text.to_string()));
        }

        let inner = src[body_start..end].trim().to_string();
        match open {
            "{{" => pieces.push(Piece::Output(inner, line)),
            "{%" => pieces.push(Piece::Tag(inner, line)),
            _ => {}
        }
        trim_next_newline = is_block;
        rest = end + 2;
    }

    Ok(pieces)
}

struct Builder {
    pieces: std::vec::IntoIter<Piece>,
}

enum Terminator {
    Eof,
    Tag(String, usize),
}

impl Builder {
    /// Parse nodes until EOF or a block-closing tag
    fn parse_block(&mut self) -> Result<(Vec<Node>, Terminator), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(piece) = self.pieces.next() {
            match piece {
                Piece::Text(t) => nodes.push(Node::Text(t)),
                Piece::Output(inner, line) => {
                    let mut parts = inner.split('|');
                    let expr_src = parts.next().unwrap_or_default().trim();
                    let expr = Expr::parse(expr_src).map_err(|e| TemplateError::at(line, e))?;
                    let filters = parts.map(|f| f.trim().to_string()).collect();
                    nodes.push(Node::Output { expr, filters, line });
                }
                Piece::Tag(tag, line) => {
                    let keyword = tag.split_whitespace().next().unwrap_or_default();
                    match keyword {
                        "if" => nodes.push(self.parse_if(&tag[2..], line)?),
                        "for" => nodes.push(self.parse_for(&tag[3..], line)?),
                        "elif" | "else" | "endif" | "endfor" => {
                            return Ok((nodes, Terminator::Tag(tag, line)));
                        }
                        other => {
                            return Err(TemplateError::syntax(line, format!("unknown tag '{other}'")));
                        }
                    }
                }
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn parse_if(&mut self, cond: &str, line: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut current = Expr::parse(cond.trim()).map_err(|e| TemplateError::at(line, e))?;
        let mut current_line = line;
        loop {
            let (body, term) = self.parse_block()?;
            match term {
                Terminator::Tag(tag, tline) if tag.starts_with("elif") => {
                    branches.push((current, body, current_line));
                    current =
                        Expr::parse(tag[4..].trim()).map_err(|e| TemplateError::at(tline, e))?;
                    current_line = tline;
                }
                Terminator::Tag(tag, _) if tag == "else" => {
                    branches.push((current, body, current_line));
                    let (otherwise, term) = self.parse_block()?;
                    return match term {
                        Terminator::Tag(t, _) if t == "endif" => Ok(Node::If { branches, otherwise }),
                        _ => Err(TemplateError::syntax(line, "expected {% endif %}")),
                    };
                }
                Terminator::Tag(tag, _) if tag == "endif" => {
                    branches.push((current, body, current_line));
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                _ => return Err(TemplateError::syntax(line, "unterminated {% if %}")),
            }
        }
    }

    fn parse_for(&mut self, header: &str, line: usize) -> Result<Node, TemplateError> {
        let (var, iterable) = header
            .trim()
            .split_once(" in ")
            .ok_or_else(|| TemplateError::syntax(line, "expected 'for NAME in EXPR'"))?;
        let iterable = Expr::parse(iterable.trim()).map_err(|e| TemplateError::at(line, e))?;
        let (body, term) = self.parse_block()?;
        match term {
            Terminator::Tag(t, _) if t == "endfor" => Ok(Node::For {
                var: var.trim().to_string(),
                iterable,
                body,
                line,
            }),
            _ => Err(TemplateError::syntax(line, "unterminated {% for %}")),
        }
    }
}

fn apply_filter(value: Value, filter: &str, line: usize) -> Result<Value, TemplateError> {
    Ok(match filter {
        "tojson" => Value::String(value.to_string()),
        "lower" => Value::String(stringify(&value).to_lowercase()),
        "upper" => Value::String(stringify(&value).to_uppercase()),
        "length" => match &value {
            Value::Array(a) => json!(a.len()),
            Value::Object(o) => json!(o.len()),
            Value::String(s) => json!(s.chars().count()),
            _ => return Err(TemplateError::syntax(line, "length of a scalar")),
        },
        "shquote" => Value::String(format!("'{}'", stringify(&value).replace('\'', r"'\''"))),
        other => return Err(TemplateError::syntax(line, format!("unknown filter '{other}'"))),
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) if n.is_f64() && n.as_f64().is_some_and(|f| f.fract() == 0.0) => {
            format!("{}", n.as_f64().unwrap_or_default() as i64)
        }
        other => other.to_string(),
    }
}

fn render_nodes(
    nodes: &[Node],
    scope: &Map<String, Value>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Output { expr, filters, line } => {
                let mut value = expr.eval(scope).map_err(|e| TemplateError::at(*line, e))?;
                for f in filters {
                    value = apply_filter(value, f, *line)?;
                }
                out.push_str(&stringify(&value));
            }
            Node::If { branches, otherwise } => {
                let mut taken = false;
                for (cond, body, line) in branches {
                    let holds = cond.eval(scope).map_err(|e| TemplateError::at(*line, e))?;
                    if is_truthy(&holds) {
                        render_nodes(body, scope, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    render_nodes(otherwise, scope, out)?;
                }
            }
            Node::For {
                var,
                iterable,
                body,
                line,
            } => {
                let items = match iterable.eval(scope).map_err(|e| TemplateError::at(*line, e))? {
                    Value::Array(items) => items,
                    Value::Object(map) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
                    other => {
                        return Err(TemplateError::syntax(*line, format!("cannot iterate over {other}")));
                    }
                };
                let count = items.len();
                let mut inner = scope.clone();
                for (i, item) in items.into_iter().enumerate() {
                    inner.insert(var.clone(), item);
                    inner.insert(
                        "loop".to_string(),
                        json!({"index": i + 1, "first": i == 0, "last": i + 1 == count}),
                    );
                    render_nodes(body, &inner, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Render a general-dialect template against a scope
pub fn render(src: &str, scope: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut builder = Builder {
        pieces: lex(src)?.into_iter(),
    };
    let (nodes, term) = builder.parse_block()?;
    if let Terminator::Tag(tag, line) = term {
        return Err(TemplateError::syntax(line, format!("unexpected {{% {tag} %}}")));
    }
    let mut out = String::with_capacity(src.len());
    render_nodes(&nodes, scope, &mut out)?;
    Ok(out)
}
