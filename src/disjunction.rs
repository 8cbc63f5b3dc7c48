//! Disjunction distribution, normalization, and default manifestation
//! (§4.4 step 5, §4.5). Distribution is the "mark composition rule": unify
//! every disjunct against the other operand independently; normalization
//! then drops failures and collapses subsumed alternatives, the same way
//! the teacher's `build_vcode.rs` lowers a branch set down to its live arms
//! before register allocation sees it.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::context::EvalContext;
use crate::error::BottomVal;
use crate::types::value::{value_eq, Value, ValueExt, ValueKind};
use crate::types::value::DisjunctionVal;
use crate::unify::Checked;

/// Unify every disjunct of `disj` against `other` independently (§4.4 step
/// 5), producing a new (not yet normalized) disjunction with the same
/// marks and order. `unify_fn` is threaded in rather than called directly
/// to avoid this module depending on `unify`'s private dispatch internals.
pub fn distribute_over(
  ctx: &mut EvalContext,
  disj: &Value,
  other: &Value,
  checked: Checked,
  unify_fn: impl Fn(&mut EvalContext, &Value, &Value, Checked) -> Value,
) -> Value {
  let ValueKind::Disjunction(d) = &disj.node else { return unify_fn(ctx, disj, other, checked) };
  let mut results: SmallVec<[(Value, bool); 4]> = SmallVec::new();
  for (val, marked) in &d.disjuncts {
    let r = unify_fn(ctx, val, other, checked);
    let decisive = ctx.stop_on_decisive_default && *marked && !r.is_bottom();
    results.push((r, *marked));
    if decisive { break }
  }
  Value::atom(ValueKind::Disjunction(Rc::new(DisjunctionVal {
    has_defaults: results.iter().any(|(_, m)| *m),
    disjuncts: results,
  })))
}

/// Two pairwise-comparable disjuncts are considered the same alternative
/// when they are value-equal, or — for the non-atomic shapes unify can
/// still produce here (bounds, basic types) — structurally equal. Structs
/// and lambdas are only ever "the same" by identity; distribution never
/// merges two distinct struct disjuncts into one.
fn same_alternative(a: &Value, b: &Value) -> bool {
  if value_eq(a, b) { return true }
  match (&a.node, &b.node) {
    (ValueKind::Bound(x), ValueKind::Bound(y)) =>
      x.op == y.op && x.kind_mask == y.kind_mask && value_eq(&x.operand, &y.operand),
    (ValueKind::Struct(x), ValueKind::Struct(y)) => Rc::ptr_eq(x, y),
    (ValueKind::Lambda(x), ValueKind::Lambda(y)) => Rc::ptr_eq(x, y),
    _ => false,
  }
}

/// `x` dominates `y` when every value `y` admits, `x` admits too — here
/// approximated (since the core has no general subtype test outside
/// unify) as: `x` and `y` are the same alternative, or `x` is the
/// unconstrained top of the pair's shape. This is sufficient for the
/// common case normalization exists to handle: a bare default duplicating
/// (or being implied by) a plain alternative already in the list.
fn subsumes(x: &Value, y: &Value) -> bool {
  if same_alternative(x, y) { return true }
  x.is_top()
}

/// Normalize a disjunction result (§4.5): drop failed (bottom) disjuncts,
/// then drop disjuncts dominated by another surviving disjunct, per
/// `leq(a, b) := subsumes(b, a) && (!a.marked || b.marked)` — an
/// unmarked alternative may be dropped in favor of any surviving
/// alternative that subsumes it, but a marked (default) alternative is
/// only dropped in favor of another marked one.
pub fn normalize(ctx: &mut EvalContext, v: &Value) -> Value {
  let ValueKind::Disjunction(d) = &v.node else { return v.clone() };
  log::trace!("normalizing disjunction with {} disjunct(s)", d.disjuncts.len());

  let non_bottom: Vec<(Value, bool)> = d.disjuncts.iter().filter(|(r, _)| !r.is_bottom()).cloned().collect();

  if non_bottom.is_empty() {
    let marked_bottoms: Vec<&(Value, bool)> = d.disjuncts.iter().filter(|(_, m)| *m).collect();
    let cause = marked_bottoms.first().copied().or_else(|| d.disjuncts.first()).map(|(r, _)| r.clone());
    let mut bot = BottomVal::type_error("empty disjunction: no value satisfies all alternatives");
    if let Some(c) = cause { bot = bot.with_cause(c) }
    return Value::bottom(bot);
  }

  let mut kept: Vec<(Value, bool)> = Vec::new();
  'outer: for (i, (a, a_marked)) in non_bottom.iter().enumerate() {
    for (j, (b, b_marked)) in non_bottom.iter().enumerate() {
      if i == j { continue }
      let dominated_by_other = subsumes(b, a) && (!a_marked || *b_marked);
      // Tie-break in favor of the earlier entry when both mutually subsume.
      if dominated_by_other && !(subsumes(a, b) && (!b_marked || *a_marked) && i < j) {
        continue 'outer;
      }
    }
    kept.push((a.clone(), *a_marked));
  }
  if kept.is_empty() { kept = non_bottom }
  log::trace!("normalized disjunction: {} -> {} disjunct(s)", d.disjuncts.len(), kept.len());

  if kept.len() == 1 {
    return kept.into_iter().next().unwrap().0;
  }

  let _ = ctx;
  Value::atom(ValueKind::Disjunction(Rc::new(DisjunctionVal {
    has_defaults: kept.iter().any(|(_, m)| *m),
    disjuncts: kept.into_iter().collect(),
  })))
}

/// Collapse a (normalized) disjunction to its final, concrete export value
/// (§4.5 "Default selection"/manifestation): exactly one marked survivor
/// wins outright; failing that, exactly one unmarked survivor wins;
/// anything else (no survivors, or more than one candidate at the winning
/// level) is ambiguous and becomes a `Bottom`.
#[must_use] pub fn manifest(v: &Value) -> Value {
  let ValueKind::Disjunction(d) = &v.node else { return v.clone() };

  let marked: Vec<&Value> = d.disjuncts.iter().filter(|(_, m)| *m).map(|(r, _)| r).collect();
  if marked.len() == 1 { return marked[0].clone() }
  if marked.len() > 1 {
    return Value::bottom(BottomVal::type_error("ambiguous disjunction: more than one default remains"));
  }

  let unmarked: Vec<&Value> = d.disjuncts.iter().map(|(r, _)| r).collect();
  match unmarked.len() {
    0 => Value::bottom(BottomVal::type_error("empty disjunction")),
    1 => unmarked[0].clone(),
    _ => Value::bottom(BottomVal::type_error("ambiguous disjunction: multiple values remain")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::Options;
  use crate::types::num::Num;
  use crate::unify::unify;

  fn ctx() -> EvalContext { EvalContext::new(Options::empty()) }

  fn disj(pairs: Vec<(Value, bool)>) -> Value {
    Value::atom(ValueKind::Disjunction(Rc::new(DisjunctionVal {
      has_defaults: pairs.iter().any(|(_, m)| *m),
      disjuncts: pairs.into_iter().collect(),
    })))
  }

  #[test] fn single_marked_default_manifests() {
    let five = Value::num(Num::from_i64(5));
    let a = Value::string("a");
    let t = Value::bool(true);
    let d = disj(vec![(five.clone(), true), (a, false), (t, false)]);
    let m = manifest(&d);
    assert!(value_eq(&m, &five));
  }

  #[test] fn no_default_and_one_survivor_manifests() {
    let five = Value::num(Num::from_i64(5));
    let d = disj(vec![(five.clone(), false)]);
    assert!(value_eq(&manifest(&d), &five));
  }

  #[test] fn two_defaults_are_ambiguous() {
    let a = Value::num(Num::from_i64(1));
    let b = Value::num(Num::from_i64(2));
    let d = disj(vec![(a, true), (b, true)]);
    assert!(manifest(&d).is_bottom());
  }

  #[test] fn distribution_drops_failing_disjuncts_via_unify() {
    let mut c = ctx();
    let one = Value::num(Num::from_i64(1));
    let two = Value::num(Num::from_i64(2));
    let d = disj(vec![(one.clone(), false), (two, false)]);
    let r = unify(&mut c, &d, &one);
    assert!(value_eq(&r, &one));
  }

  #[test] fn all_bottom_normalizes_to_bottom() {
    let mut c = ctx();
    let bad = Value::bottom(BottomVal::type_error("x"));
    let d = disj(vec![(bad.clone(), false), (bad, true)]);
    assert!(normalize(&mut c, &d).is_bottom());
  }
}
