//! `confcore`: the core evaluation engine for a constraint-based
//! configuration language.
//!
//! A configuration is a point in a partially ordered lattice of values;
//! evaluation is unification (the lattice meet) applied until the
//! expression tree reaches a fixed point. This crate owns the pieces an
//! implementer must reproduce to make `A & B`, `A | B`, references, and
//! recursive struct merging behave identically across hosts:
//!
//! - [`types`] — the value model (§3): atoms, bounds, structs/arcs, lists,
//!   lambdas, disjunctions, and the expression tree a host parser builds.
//! - [`unify`] — the unifier (§4.4): the binary meet operation.
//! - [`disjunction`] — distribution over `|`, normalization, and default
//!   ("marked") manifestation (§4.5).
//! - [`eval`] — lazy, demand-driven expression evaluation with cycle
//!   detection (§4.6) and comprehensions (§4.9/§4.10).
//! - [`path`] — path-based lookup and struct-walking (§6 "Lookup by path",
//!   "Walk"), layered over the same primitives `eval` uses.
//! - [`context`] — the one mutable, non-shareable piece of state a single
//!   evaluation owns (§5).
//! - [`builtin`] — the uniform protocol the core invokes host-registered
//!   functions through (§6).
//! - [`error`] — first-class `Bottom` error values (§7).
//! - [`symbol`] — label/identifier interning.
//!
//! Parsing, package/instance loading, source formatting, and the
//! host-marshalling bridge are deliberately outside this crate; it consumes
//! an already-built expression tree and exposes values, not source text.

pub mod builtin;
pub mod context;
pub mod disjunction;
pub mod error;
pub mod eval;
pub mod path;
pub mod symbol;
pub mod types;
pub mod unify;

pub use builtin::{Builtin, BuiltinRegistry};
pub use context::{EvalContext, Options, Scope};
pub use error::{BottomVal, ErrorCode, EvalError, Result};
pub use eval::{eval, force_arc};
pub use path::{lookup, walk, Selector, WalkEntry};
pub use symbol::{intern, Symbol};
pub use types::{Expr, ExprKind, Value, ValueExt, ValueKind};
pub use unify::{unify, unify_unchecked};

/// Build a root struct value from an already-parsed expression tree (§6
/// "Build"). The expression is expected to be a single top-level
/// `StructLit`; import resolution (mapping package paths to pre-built
/// instances) is the host's responsibility and happens before the tree
/// reaches this crate; this entry point only establishes the root lexical
/// scope and triggers the one-shot comprehension expansion pass.
#[must_use] pub fn build(root: &Expr) -> Value {
  let mut ctx = EvalContext::new(Options::empty());
  let empty = types::StructVal::open_struct(im::Vector::new());
  let scope = Scope::root(empty);
  eval(&mut ctx, &scope, root)
}

/// Evaluate a root value (optionally narrowed by a path-selected
/// sub-expression) down to its manifested form (§6 "Evaluate"): select
/// defaults out of any remaining disjunctions and return either a concrete
/// value or the structured `Bottom` describing why it couldn't be reached.
#[must_use] pub fn evaluate(ctx: &mut EvalContext, root: &Value) -> Value {
  if ctx.options.contains(Options::RAW) { return root.clone() }
  let manifested = disjunction::manifest(root);
  if ctx.options.contains(Options::CONCRETE) && !manifested.is_ground() && !manifested.is_bottom() {
    return Value::bottom(BottomVal::incomplete("value is not concrete"));
  }
  manifested
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::expr::{ExprExt, ExprKind, FieldDecl, StructLit};
  use crate::types::num::Num;
  use crate::types::structure::ArcFlags;
  use crate::types::structure::Label;

  #[test] fn build_then_evaluate_a_trivial_struct() {
    let lit = StructLit {
      fields: vec![FieldDecl {
        label: Label::Str(intern("x")),
        expr: Expr::new(ExprKind::Lit(Value::num(Num::from_i64(5)))),
        flags: ArcFlags::empty(),
        attrs: vec![],
        doc: None,
      }],
      embeds: vec![],
      emit: None,
      template: None,
      comprehensions: vec![],
      is_definition: false,
    };
    let root_expr = Expr::new(ExprKind::StructLit(lit));
    let root = build(&root_expr);
    assert!(!root.is_bottom());

    let mut ctx = EvalContext::new(Options::empty());
    let x = crate::eval::eval(&mut ctx, &Scope::root(match &root.node {
      ValueKind::Struct(s) => s.clone(),
      _ => panic!("expected struct"),
    }), &Expr::new(ExprKind::NodeRef { up: 0, label: Label::Str(intern("x")) }));
    assert!(!x.is_bottom());
  }

  #[test] fn evaluate_manifests_a_default_disjunction() {
    let mut ctx = EvalContext::new(Options::empty());
    let five = Value::num(Num::from_i64(5));
    let disj = Value::atom(ValueKind::Disjunction(std::rc::Rc::new(crate::types::value::DisjunctionVal {
      has_defaults: true,
      disjuncts: smallvec::smallvec![(five.clone(), true), (Value::string("a"), false)],
    })));
    let result = evaluate(&mut ctx, &disj);
    assert!(crate::types::value::value_eq(&result, &five));
  }
}
