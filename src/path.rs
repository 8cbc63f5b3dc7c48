//! §6 "Lookup by path" and "Walk": the two read-only traversal entry points
//! a host bridge drives once it has a built root value, layered on top of
//! the same `select`/`index` operators `eval.rs` uses for `Selector`/`Index`
//! expressions (§4.8) so a path lookup behaves identically to the
//! equivalent expression.

use crate::context::{EvalContext, Options};
use crate::eval::{index, select, select_definition, struct_scope};
use crate::types::kind::Kind;
use crate::types::num::Num;
use crate::types::structure::{ArcFlags, Label, StructVal};
use crate::types::value::{Value, ValueExt};
use std::rc::Rc;

/// One step of a lookup path (§6): a string label, an integer index, or a
/// definition label (which ordinary field selection refuses to address).
#[derive(Clone, Debug)]
pub enum Selector {
  Field(Label),
  Index(i64),
  Definition(Label),
}

/// Apply each selector of `path` in turn, starting from `root`. A bottom
/// encountered partway through short-circuits the remainder, matching how
/// `select`/`index` already propagate bottoms (§4.4 step 1).
#[must_use] pub fn lookup(ctx: &mut EvalContext, root: &Value, path: &[Selector]) -> Value {
  let mut cur = root.clone();
  for sel in path {
    if cur.is_bottom() { return cur }
    cur = match sel {
      Selector::Field(label) => select(ctx, &cur, *label),
      Selector::Index(i) => index(ctx, &cur, &Value::num(Num::from_i64(*i))),
      Selector::Definition(label) => select_definition(ctx, &cur, *label),
    };
  }
  cur
}

/// One entry the Walk interface yields per visited arc: its label, the
/// kind of its forced value, its declaration flags, and the value itself.
#[derive(Clone, Debug)]
pub struct WalkEntry {
  pub label: Label,
  pub kind: Kind,
  pub flags: ArcFlags,
  pub value: Value,
}

/// Iterate a struct's arcs (§6 "Walk"), forcing each one and filtering by
/// `options`. Order follows the struct's arc order (label order, per §3's
/// invariant that arcs are kept stably sorted).
pub fn walk(ctx: &mut EvalContext, s: &Rc<StructVal>, options: Options) -> Vec<WalkEntry> {
  let owner = struct_scope(s);
  let arcs: Vec<_> = s.arcs.borrow().iter().cloned().collect();
  arcs.into_iter()
    .filter(|arc| {
      if options.contains(Options::OMIT_HIDDEN) && arc.is_hidden() { return false }
      if options.contains(Options::OMIT_DEFINITIONS) && arc.is_definition() { return false }
      if options.contains(Options::OMIT_OPTIONAL) && arc.is_optional() { return false }
      true
    })
    .map(|arc| {
      let label = arc.label();
      let flags = arc.flags();
      let value = crate::eval::force_arc(ctx, &owner, &arc);
      let kind = value.kind();
      WalkEntry { label, kind, flags, value }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::Scope;
  use crate::symbol::intern;
  use crate::types::expr::{Expr, ExprExt, ExprKind, FieldDecl, StructLit};

  fn field(name: &str, expr: Expr, flags: ArcFlags) -> FieldDecl {
    FieldDecl { label: Label::Str(intern(name)), expr, flags, attrs: vec![], doc: None }
  }

  fn sample_struct() -> Value {
    let lit = StructLit {
      fields: vec![
        field("x", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(1)))), ArcFlags::empty()),
        field("secret", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(2)))), ArcFlags::HIDDEN),
        field("Def", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(3)))), ArcFlags::DEFINITION),
      ],
      embeds: vec![], emit: None, template: None, comprehensions: vec![], is_definition: false,
    };
    let mut ctx = EvalContext::new(Options::empty());
    let empty = StructVal::open_struct(im::Vector::new());
    crate::eval::eval(&mut ctx, &Scope::root(empty), &Expr::new(ExprKind::StructLit(lit)))
  }

  #[test] fn lookup_resolves_a_field_by_label() {
    let mut ctx = EvalContext::new(Options::empty());
    let root = sample_struct();
    let result = lookup(&mut ctx, &root, &[Selector::Field(Label::Str(intern("x")))]);
    match &result.node {
      crate::types::value::ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(1)),
      _ => panic!("expected num, got {result:?}"),
    }
  }

  #[test] fn lookup_can_address_a_definition_explicitly() {
    let mut ctx = EvalContext::new(Options::empty());
    let root = sample_struct();
    let via_field = lookup(&mut ctx, &root, &[Selector::Field(Label::Str(intern("Def")))]);
    assert!(via_field.is_bottom(), "ordinary field selection must still refuse a definition");
    let via_def = lookup(&mut ctx, &root, &[Selector::Definition(Label::Str(intern("Def")))]);
    assert!(!via_def.is_bottom());
  }

  #[test] fn walk_omits_hidden_and_definitions_when_asked() {
    let mut ctx = EvalContext::new(Options::empty());
    let root = sample_struct();
    let crate::types::value::ValueKind::Struct(s) = &root.node else { panic!("expected struct") };
    let all = walk(&mut ctx, s, Options::empty());
    assert_eq!(all.len(), 3);

    let filtered = walk(&mut ctx, s, Options::OMIT_HIDDEN | Options::OMIT_DEFINITIONS);
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].label, Label::Str(intern("x")));
  }
}
