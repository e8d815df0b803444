//! Template expressions resolved against the build context.
//!
//! Step configs may embed `<%= path %>` expressions. A path is a chain of
//! keys joined by `.` with optional `[N]` array indices, evaluated over the
//! JSON rendering of the build context:
//!
//! ```text
//! <%= contracts.Token.address %>
//! <%= imports.registry.contracts.Registry.address %>
//! <%= extras.holders[0] %>
//! ```
//!
//! There is no arithmetic, no function calls and no access to anything but
//! the context tree.
//!
//! # Rendering
//!
//! A string that is exactly one expression renders to the referenced value
//! with its JSON type intact. Otherwise every expression is stringified and
//! spliced into the surrounding text.
//!
//! # Escaping
//!
//! `<%%` produces a literal `<%`. A `<%` followed by anything but `=` or `%`
//! is ordinary text.
//!
//! # Example
//!
//! ```
//! use chainbuild_lib::template::render;
//! use serde_json::json;
//!
//! let scope = json!({ "contracts": { "Token": { "address": "0xabc" } } });
//! let value = render("token at <%= contracts.Token.address %>", &scope).unwrap();
//! assert_eq!(value, json!("token at 0xabc"));
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// One step of a template path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
  Key(String),
  Index(usize),
}

/// A parsed `a.b[0].c` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePath(pub Vec<PathSegment>);

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (escapes already applied)
  Literal(String),

  /// An expression to be evaluated
  Expr(TemplatePath),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed template expression at position {0}")]
  Unclosed(usize),

  #[error("invalid template path {path:?}: {reason}")]
  InvalidPath { path: String, reason: String },

  #[error("template path '{0}' does not resolve in the build context")]
  UnresolvedPath(String),
}

impl TemplatePath {
  /// The dependency this path points at: its first two keys
  /// (`contracts.Foo`), or the single key for top-level values (`chainId`).
  pub fn reference(&self) -> String {
    let mut keys = Vec::with_capacity(2);
    for segment in &self.0 {
      match segment {
        PathSegment::Key(k) if keys.len() < 2 => keys.push(k.as_str()),
        _ => break,
      }
    }
    keys.join(".")
  }

  fn lookup<'a>(&self, scope: &'a Value) -> Option<&'a Value> {
    self.0.iter().try_fold(scope, |current, segment| match segment {
      PathSegment::Key(key) => current.as_object()?.get(key),
      PathSegment::Index(i) => current.as_array()?.get(*i),
    })
  }
}

impl fmt::Display for TemplatePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.0.iter().enumerate() {
      match segment {
        PathSegment::Key(k) if i == 0 => write!(f, "{}", k)?,
        PathSegment::Key(k) => write!(f, ".{}", k)?,
        PathSegment::Index(n) => write!(f, "[{}]", n)?,
      }
    }
    Ok(())
  }
}

/// Cheap check used to skip plain strings.
pub fn has_template(input: &str) -> bool {
  input.contains("<%")
}

/// Parse a string into literal and expression segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(start) = rest.find("<%") {
    literal.push_str(&rest[..start]);
    let after = &rest[start + 2..];

    if let Some(stripped) = after.strip_prefix('%') {
      // Escaped: <%% -> <%
      literal.push_str("<%");
      offset += start + 3;
      rest = stripped;
    } else if let Some(body) = after.strip_prefix('=') {
      let Some(end) = body.find("%>") else {
        return Err(TemplateError::Unclosed(offset + start));
      };

      if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(&mut literal)));
      }
      segments.push(Segment::Expr(parse_path(body[..end].trim())?));

      let consumed = start + 3 + end + 2;
      offset += consumed;
      rest = &rest[consumed..];
    } else {
      literal.push_str("<%");
      offset += start + 2;
      rest = after;
    }
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse an expression body into a path.
pub fn parse_path(expr: &str) -> Result<TemplatePath, TemplateError> {
  let invalid = |reason: &str| TemplateError::InvalidPath {
    path: expr.to_string(),
    reason: reason.to_string(),
  };

  if expr.is_empty() {
    return Err(invalid("empty expression"));
  }

  let mut segments = Vec::new();
  let bytes = expr.as_bytes();
  let mut i = 0;
  let mut expect_key = true;

  while i < bytes.len() {
    if expect_key {
      let start = i;
      while i < bytes.len() && is_key_byte(bytes[i]) {
        i += 1;
      }
      if start == i {
        return Err(invalid("expected an identifier"));
      }
      segments.push(PathSegment::Key(expr[start..i].to_string()));
      expect_key = false;
      continue;
    }

    match bytes[i] {
      b'.' => {
        i += 1;
        if i == bytes.len() {
          return Err(invalid("trailing '.'"));
        }
        expect_key = true;
      }
      b'[' => {
        let close = expr[i..].find(']').ok_or_else(|| invalid("unclosed '['"))? + i;
        let index = expr[i + 1..close]
          .trim()
          .parse::<usize>()
          .map_err(|_| invalid("array index must be a non-negative integer"))?;
        segments.push(PathSegment::Index(index));
        i = close + 1;
      }
      _ => return Err(invalid("only identifiers, '.' and '[N]' are allowed")),
    }
  }

  Ok(TemplatePath(segments))
}

fn is_key_byte(b: u8) -> bool {
  b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'$'
}

/// Evaluate a single path against the scope.
pub fn evaluate(path: &TemplatePath, scope: &Value) -> Result<Value, TemplateError> {
  path
    .lookup(scope)
    .cloned()
    .ok_or_else(|| TemplateError::UnresolvedPath(path.to_string()))
}

/// Render a template string.
pub fn render(input: &str, scope: &Value) -> Result<Value, TemplateError> {
  let segments = parse(input)?;

  if let [Segment::Expr(path)] = segments.as_slice() {
    return evaluate(path, scope);
  }

  let mut out = String::new();
  for segment in &segments {
    match segment {
      Segment::Literal(text) => out.push_str(text),
      Segment::Expr(path) => out.push_str(&stringify(&evaluate(path, scope)?)),
    }
  }
  Ok(Value::String(out))
}

/// Render every string inside a JSON document. Object keys are left as-is.
pub fn render_value(value: &Value, scope: &Value) -> Result<Value, TemplateError> {
  match value {
    Value::String(s) if has_template(s) => render(s, scope),
    Value::Array(items) => items
      .iter()
      .map(|item| render_value(item, scope))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(map) => {
      let mut out = serde_json::Map::with_capacity(map.len());
      for (key, item) in map {
        out.insert(key.clone(), render_value(item, scope)?);
      }
      Ok(Value::Object(out))
    }
    other => Ok(other.clone()),
  }
}

/// Dependencies referenced by a template string.
pub fn references(input: &str) -> Result<BTreeSet<String>, TemplateError> {
  let mut refs = BTreeSet::new();
  for segment in parse(input)? {
    if let Segment::Expr(path) = segment {
      refs.insert(path.reference());
    }
  }
  Ok(refs)
}

/// Collect the references of every string inside a JSON document.
pub fn collect_references(value: &Value, refs: &mut BTreeSet<String>) -> Result<(), TemplateError> {
  match value {
    Value::String(s) if has_template(s) => refs.extend(references(s)?),
    Value::Array(items) => {
      for item in items {
        collect_references(item, refs)?;
      }
    }
    Value::Object(map) => {
      for item in map.values() {
        collect_references(item, refs)?;
      }
    }
    _ => {}
  }
  Ok(())
}

/// Stringify a value for interpolation. Strings are inserted without quotes.
pub fn stringify(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}
