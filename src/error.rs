//! The error model (§7): every failure is a first-class `Bottom` value
//! carried inside [`crate::types::ValueKind::Bottom`]. This module defines
//! the payload ([`BottomVal`]) and its rendering; there is no exception
//! type used for evaluation failures.
//!
//! [`EvalError`] is the one place this crate does throw a conventional Rust
//! error, for host-side setup mistakes (malformed builtin registration)
//! that happen before any evaluation begins — mirroring the teacher's own
//! `server.rs` idiom of a small newtype around `Box<dyn Error>` with a
//! family of `From` impls, rather than pulling in an error-trait crate the
//! teacher does not use at this layer.

use std::error::Error;
use std::fmt;

use crate::types::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorCode {
  TypeError,
  NotExist,
  Incomplete,
  Cycle,
  Fatal,
}

impl ErrorCode {
  /// A Bottom with this code is recoverable: a surrounding operation may
  /// still produce a meaningful value around it (§3 Invariants, §7).
  #[must_use] pub fn is_recoverable(self) -> bool {
    matches!(self, ErrorCode::Incomplete | ErrorCode::Cycle)
  }
}

#[derive(Clone, Debug)]
pub struct BottomVal {
  pub code: ErrorCode,
  pub message: String,
  pub cause: Option<Value>,
  pub offending: Option<Value>,
  pub expr_depth: u32,
  /// For a `Cycle`-class bottom, the arc whose forcing detected the
  /// re-entrancy — carried so a conjunction that later pairs this value
  /// with a ground atom knows which arc's cache to retry (§4.9).
  pub cyclic_arc: Option<crate::types::structure::Arc>,
  /// Set on a bottom produced by invoking a `CustomValidator` (§4.4, §7):
  /// the unifier's "better error" rule prefers this over a plainer bottom
  /// from the opposite operand order, since a validator's own message is
  /// more informative than a generic conflicting-values report.
  pub from_custom_validator: bool,
}

impl BottomVal {
  #[must_use] pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
    BottomVal {
      code, message: message.into(), cause: None, offending: None, expr_depth: 0,
      cyclic_arc: None, from_custom_validator: false,
    }
  }

  #[must_use] pub fn with_cause(mut self, cause: Value) -> Self { self.cause = Some(cause); self }
  #[must_use] pub fn with_offending(mut self, v: Value) -> Self { self.offending = Some(v); self }
  #[must_use] pub fn at_depth(mut self, depth: u32) -> Self { self.expr_depth = depth; self }
  #[must_use] pub fn with_cyclic_arc(mut self, arc: crate::types::structure::Arc) -> Self {
    self.cyclic_arc = Some(arc);
    self
  }
  #[must_use] pub fn from_custom_validator(mut self) -> Self { self.from_custom_validator = true; self }

  #[must_use] pub fn cycle(depth: u32) -> Self {
    BottomVal::new(ErrorCode::Cycle, "cycle error").at_depth(depth)
  }

  #[must_use] pub fn type_error(message: impl Into<String>) -> Self {
    BottomVal::new(ErrorCode::TypeError, message)
  }

  #[must_use] pub fn not_exist(message: impl Into<String>) -> Self {
    BottomVal::new(ErrorCode::NotExist, message)
  }

  #[must_use] pub fn incomplete(message: impl Into<String>) -> Self {
    BottomVal::new(ErrorCode::Incomplete, message)
  }

  /// Render the primary message plus every wrapped cause's message,
  /// deduplicated, as the §7 "user-visible behavior" requires.
  #[must_use] pub fn render(&self) -> String {
    let mut seen = Vec::new();
    let mut cur = Some(self);
    let mut lines = Vec::new();
    while let Some(b) = cur {
      if !seen.iter().any(|m: &String| m == &b.message) {
        lines.push(b.message.clone());
        seen.push(b.message.clone());
      }
      cur = b.cause.as_ref().and_then(|v| match &v.node {
        crate::types::value::ValueKind::Bottom(inner) => Some(inner.as_ref()),
        _ => None,
      });
    }
    lines.join("\n")
  }
}

impl fmt::Display for BottomVal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.render()) }
}

/// A host-facing Rust-level error, used only for setup-time failures that
/// happen outside the value lattice (e.g. registering a builtin with a
/// malformed signature).
#[derive(Debug)]
pub struct EvalError(Box<dyn Error>);

impl fmt::Display for EvalError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
impl Error for EvalError {}

impl From<regex::Error> for EvalError {
  fn from(e: regex::Error) -> Self { EvalError(Box::new(e)) }
}
impl From<&'static str> for EvalError {
  fn from(e: &'static str) -> Self { EvalError(e.into()) }
}

pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::value::ValueExt;

  #[test] fn render_deduplicates_repeated_causes() {
    let inner = Value::bottom(BottomVal::type_error("bad"));
    let outer = BottomVal::type_error("bad").with_cause(inner);
    assert_eq!(outer.render(), "bad");
  }

  #[test] fn cycle_and_incomplete_are_recoverable() {
    assert!(ErrorCode::Cycle.is_recoverable());
    assert!(ErrorCode::Incomplete.is_recoverable());
    assert!(!ErrorCode::Fatal.is_recoverable());
  }
}
