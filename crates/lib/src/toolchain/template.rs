//! Command template expansion.
//!
//! Module commands in `weft.toml` reference job values with `$${name}`
//! placeholders, expanded when a toolchain turns a job into tasks.
//!
//! # Placeholders
//!
//! - `$${out}` - the job's output directory
//! - `$${target}`, `$${module}` - target and module names
//! - `$${module_dir}` - the module's source folder
//! - `$${configuration}`, `$${platform}`, `$${architecture}` - the job tuple
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` work without escaping. Use `$$${` to produce a literal `$${`.
//!
//! # Example
//!
//! ```
//! use weft_lib::toolchain::template::{parse, Placeholder, Segment};
//!
//! let segments = parse("cc -o $${out}/app $CFLAGS").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("cc -o ".to_string()),
//!     Segment::Placeholder(Placeholder::Out),
//!     Segment::Literal("/app $CFLAGS".to_string()),
//! ]);
//! ```

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
  Out,
  Target,
  Module,
  ModuleDir,
  Configuration,
  Platform,
  Architecture,
}

impl Placeholder {
  fn from_name(name: &str) -> Option<Self> {
    match name {
      "out" => Some(Self::Out),
      "target" => Some(Self::Target),
      "module" => Some(Self::Module),
      "module_dir" => Some(Self::ModuleDir),
      "configuration" => Some(Self::Configuration),
      "platform" => Some(Self::Platform),
      "architecture" => Some(Self::Architecture),
      _ => None,
    }
  }
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("placeholder {0:?} has no value here")]
  Unresolved(Placeholder),
}

/// Supplies values for placeholders.
pub trait Resolver {
  fn resolve(&self, placeholder: Placeholder) -> Result<&str, TemplateError>;
}

/// Parse a template into literal and placeholder segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();

            // $$${ escapes to a literal $${
            if let Some((_, '{')) = chars.peek() {
              literal.push_str("$${");
              chars.next();
            } else {
              literal.push_str("$$$");
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut name = String::new();
            let mut found_close = false;
            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              name.push(c);
            }

            if !found_close {
              return Err(TemplateError::Unclosed(pos));
            }

            let placeholder = Placeholder::from_name(name.trim()).ok_or(TemplateError::Unknown(name))?;
            segments.push(Segment::Placeholder(placeholder));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse and expand a template in one step.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, TemplateError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, TemplateError> {
  let mut result = String::new();
  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p) => result.push_str(resolver.resolve(*p)?),
    }
  }
  Ok(result)
}
