//! The unifier (§4.4): the binary meet operation over every value variant.
//! Dispatch is a single function switching on the operand pair, mirroring
//! the teacher's `TranslateBase`/`Translate` variant-pair dispatch in
//! `build_mir.rs` rather than a virtual method per variant.

use std::cmp::Ordering;
use std::rc::Rc;

use im::Vector;
use itertools::{EitherOrBoth, Itertools};
use log::trace;

use crate::context::{DelayedConstraint, EvalContext};
use crate::disjunction::{distribute_over, normalize};
use crate::error::BottomVal;
use crate::types::bound::{self, BoundVal, Simplified};
use crate::types::kind::Kind;
use crate::types::num::Num;
use crate::types::structure::{Arc as FieldArc, ArcFlags, CloseStatus, Label, StructVal};
use crate::types::value::{value_eq, Value, ValueExt, ValueKind};

/// Whether a struct×struct unification checks closed-field admission
/// (`unify`) or skips it (`unify_unchecked`, used for embeds per §4.7).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Checked { Checked, Unchecked }

/// `unify(src, a, b) -> value`, the entry point for the meet operation
/// (§4.4). Both operands must already be "evaluated" (partially resolved).
pub fn unify(ctx: &mut EvalContext, a: &Value, b: &Value) -> Value {
  let r = unify_inner(ctx, a, b, Checked::Checked);
  trace!("unify {:?} & {:?} -> {:?}", a.kind(), b.kind(), r.kind());
  r
}

/// The embed variant: struct merges never reject fields admitted only by
/// the other side's closedness (§4.7).
pub fn unify_unchecked(ctx: &mut EvalContext, a: &Value, b: &Value) -> Value {
  let r = unify_inner(ctx, a, b, Checked::Unchecked);
  trace!("unify_unchecked {:?} & {:?} -> {:?}", a.kind(), b.kind(), r.kind());
  r
}

fn unify_inner(ctx: &mut EvalContext, a: &Value, b: &Value, checked: Checked) -> Value {
  trace!("unify {:?} & {:?}", a.kind(), b.kind());

  // Step 1: bottom propagation. A cycle-class bottom means some conjunct
  // referenced a field still being forced; rather than failing the whole
  // conjunction, schedule a delayed constraint against the arc whose
  // expression is currently being forced (the frame this very `unify` call
  // is nested inside of — always the right target, regardless of which
  // ancestor frame the cycle bottom itself names, so resolution does not
  // depend on which field a caller happens to force first, §4.9, §8
  // scenario 1), and optimistically adopt the other operand now.
  if let ValueKind::Bottom(bot) = &a.node {
    if bot.code == crate::error::ErrorCode::Cycle {
      if let Some(target) = ctx.innermost_arc() {
        ctx.schedule_delayed(DelayedConstraint { target, atom: b.clone() });
        return b.clone();
      }
    }
    return a.clone();
  }
  if let ValueKind::Bottom(bot) = &b.node {
    if bot.code == crate::error::ErrorCode::Cycle {
      if let Some(target) = ctx.innermost_arc() {
        ctx.schedule_delayed(DelayedConstraint { target, atom: a.clone() });
        return a.clone();
      }
    }
    return b.clone();
  }

  // Step 4: identity / Top.
  if a.is_top() { return b.clone() }
  if b.is_top() { return a.clone() }
  if Rc::ptr_eq(a, b) { return a.clone() }

  // Step 5: disjunction distribution.
  if let ValueKind::Disjunction(_) = &a.node {
    let result = distribute_over(ctx, a, b, checked, unify_inner);
    return normalize(ctx, &result);
  }
  if let ValueKind::Disjunction(_) = &b.node {
    let result = distribute_over(ctx, b, a, checked, unify_inner);
    return normalize(ctx, &result);
  }

  // Step 6: unreducible-Unification accumulation.
  if let ValueKind::Unification(u) = &a.node {
    return accumulate(ctx, u, b, checked);
  }
  if let ValueKind::Unification(u) = &b.node {
    return accumulate(ctx, u, a, checked);
  }

  // Step 3: kind compatibility, computed lazily per dispatch arm below so
  // that struct/list/lambda pairs (whose "kind" is coarse) still get a
  // precise diagnostic.
  //
  // "Better error" rule (§4.4, §5, §7): when the natural operand order
  // fails, retry in the opposite order and keep that result instead if it
  // stems from a custom validator, whose own message is more informative
  // than a generic conflicting-values report. `error_depth` keeps this to
  // one retry per outermost call rather than one per recursive descent, so
  // a deeply nested struct unification does not redo the swapped attempt at
  // every level on the way back out.
  let depth = ctx.enter_error_context();
  let result = dispatch(ctx, a, b, checked);
  let result = if result.is_bottom() && depth == 1 {
    let swapped = dispatch(ctx, b, a, checked);
    if is_custom_validator_failure(&swapped) && !is_custom_validator_failure(&result) { swapped } else { result }
  } else {
    result
  };
  ctx.exit_error_context();
  result
}

fn conflicting_values(a: &Value, b: &Value) -> Value {
  Value::bottom(
    BottomVal::type_error(format!("conflicting values {a:?} and {b:?}"))
      .with_offending(a.clone()),
  )
}

fn unsupported(a: &Value, b: &Value) -> Value {
  Value::bottom(BottomVal::type_error(format!(
    "unsupported op: {:?} & {:?}", a.kind(), b.kind())))
}

#[allow(clippy::too_many_lines)]
fn dispatch(ctx: &mut EvalContext, a: &Value, b: &Value, checked: Checked) -> Value {
  match (&a.node, &b.node) {
    // Struct × Struct (covers lists, which are structs with integer arcs).
    (ValueKind::Struct(sa), ValueKind::Struct(sb)) => unify_structs(ctx, sa, sb, checked),

    // Lambda × Lambda.
    (ValueKind::Lambda(la), ValueKind::Lambda(lb)) => {
      if la.params.len() != lb.params.len() {
        return Value::bottom(BottomVal::type_error("lambda arity mismatch"));
      }
      // Bodies and parameter constraints are unified lazily at call time in
      // a copy-retargeted environment (§4.4); here we only check the shape
      // and keep the left lambda as representative, matching idempotence
      // for `unify(v, v)`.
      a.clone()
    }

    // Bound × Bound.
    (ValueKind::Bound(ba), ValueKind::Bound(bb)) => match bound::simplify(ba, bb) {
      Simplified::One(bnd) => Value::atom(ValueKind::Bound(bnd)),
      Simplified::Ground(v) => v,
      Simplified::Both(x, y) => Value::atom(ValueKind::Unification(Rc::new(
        crate::types::value::UnificationVal { members: smallvec::smallvec![Value::atom(ValueKind::Bound(x)), Value::atom(ValueKind::Bound(y))] },
      ))),
      Simplified::Conflict(msg) => Value::bottom(BottomVal::type_error(msg)),
    },

    // Bound × concrete atom (either order).
    (ValueKind::Bound(bnd), _) if is_concrete_atom(b) => unify_bound_atom(bnd, b),
    (_, ValueKind::Bound(bnd)) if is_concrete_atom(a) => unify_bound_atom(bnd, a),

    // BasicType × concrete atom (either order): kind membership + subkind
    // narrowing for numbers (§4.2, §4.4).
    (ValueKind::BasicType(k), _) if is_concrete_atom(b) => unify_basic_type_atom(*k, b),
    (_, ValueKind::BasicType(k)) if is_concrete_atom(a) => unify_basic_type_atom(*k, a),

    // BasicType × BasicType: kind-level unification; bottom if disjoint.
    (ValueKind::BasicType(k1), ValueKind::BasicType(k2)) => {
      let result = k1.unify(*k2);
      if result.shape().is_empty() { unsupported(a, b) } else { Value::basic_type(result.shape()) }
    }

    // BasicType × Bound: kind compatibility, plus integer-bound tightening
    // when the basic type narrows to `int` (§4.2: `>3.4 & int` -> `>=4`).
    (ValueKind::BasicType(k), ValueKind::Bound(bnd)) | (ValueKind::Bound(bnd), ValueKind::BasicType(k)) => {
      if !bnd.kind_mask.shape().intersects(k.shape()) { return unsupported(a, b) }
      if k.shape() == Kind::INT && bnd.kind_mask.shape() != Kind::INT {
        Value::atom(ValueKind::Bound(bound::tighten_to_int(bnd)))
      } else {
        Value::atom(ValueKind::Bound(bnd.clone()))
      }
    }

    // CustomValidator × concrete atom: invoke through the builtin protocol.
    (ValueKind::CustomValidator(cv), _) if is_concrete_atom(b) => invoke_validator(ctx, cv, b),
    (_, ValueKind::CustomValidator(cv)) if is_concrete_atom(a) => invoke_validator(ctx, cv, a),

    // Two concrete atoms of the same shape: value equality (§4.4 "Concrete
    // atoms"). Differing numeric subkinds still compare by value.
    _ if is_concrete_atom(a) && is_concrete_atom(b) => {
      if a.kind().shape() != b.kind().shape() && !(a.kind().shape().intersects(Kind::NUMBER) && b.kind().shape().intersects(Kind::NUMBER)) {
        return conflicting_values(a, b);
      }
      if value_eq(a, b) { a.clone() } else { conflicting_values(a, b) }
    }

    _ => unsupported(a, b),
  }
}

fn is_concrete_atom(v: &Value) -> bool {
  matches!(v.node, ValueKind::Null | ValueKind::Bool(_) | ValueKind::String(_) | ValueKind::Bytes(_)
    | ValueKind::Num(_) | ValueKind::Duration(_))
}

fn unify_bound_atom(bnd: &Rc<BoundVal>, atom: &Value) -> Value {
  if !bnd.kind_mask.shape().intersects(atom.kind().shape()) { return unsupported(&Value::atom(ValueKind::Bound(bnd.clone())), atom) }
  if bound::satisfies(bnd, atom) { atom.clone() } else {
    Value::bottom(BottomVal::type_error(format!("invalid value {atom:?} (out of bound {})", bnd.op.symbol())))
  }
}

fn unify_basic_type_atom(k: Kind, atom: &Value) -> Value {
  if !k.shape().intersects(atom.kind().shape()) {
    // Try narrowing: e.g. `int & 3.0` where `3.0` is whole-valued.
    if k.shape() == Kind::INT {
      if let ValueKind::Num(n) = &atom.node {
        if let Some(narrowed) = n.narrow_to_int() {
          return Value::num(narrowed);
        }
      }
    }
    return conflicting_values(&Value::basic_type(k), atom);
  }
  atom.clone()
}

fn invoke_validator(ctx: &mut EvalContext, cv: &Rc<crate::types::value::CustomValidator>, atom: &Value) -> Value {
  let Some(registry) = ctx.builtins.clone() else {
    return Value::bottom(BottomVal::new(crate::error::ErrorCode::Fatal, "no builtin registry configured"));
  };
  let mut args = cv.args.clone();
  args.push(atom.clone());
  // The package is implied by the validator's symbol in this simplified
  // protocol surface; a real host threads package+name through separately.
  let result = registry.call(ctx, cv.builtin, cv.builtin, &args);
  match &result.node {
    ValueKind::Bottom(b) if !b.from_custom_validator => {
      Value::bottom(b.as_ref().clone().from_custom_validator())
    }
    _ => result,
  }
}

#[must_use] fn is_custom_validator_failure(v: &Value) -> bool {
  matches!(&v.node, ValueKind::Bottom(b) if b.from_custom_validator)
}

/// Add `other` to an unreducible [`crate::types::value::UnificationVal`]
/// (§4.4 step 6). `other` is unified against every member independently
/// first — not threaded through a single running fold — so that e.g. an
/// incoming `int` basic type narrows *each* bound in the set (§4.2) before
/// the narrowed members are reduced pairwise against each other.
fn accumulate(ctx: &mut EvalContext, u: &Rc<crate::types::value::UnificationVal>, other: &Value, checked: Checked) -> Value {
  let mut narrowed: Vec<Value> = Vec::with_capacity(u.members.len());
  for m in &u.members {
    let r = unify_inner(ctx, m, other, checked);
    if r.is_bottom() { return r }
    narrowed.push(r);
  }
  let Some(mut acc) = narrowed.first().cloned() else { return other.clone() };
  let mut rest = narrowed[1..].to_vec();
  let mut i = 0;
  while i < rest.len() {
    let r = unify_inner(ctx, &acc, &rest[i], checked);
    if r.is_bottom() { return r }
    if matches!(r.node, ValueKind::Unification(_)) {
      i += 1;
      continue;
    }
    acc = r;
    rest.remove(i);
  }
  if rest.is_empty() { acc } else {
    let mut members = vec![acc];
    members.extend(rest);
    Value::atom(ValueKind::Unification(Rc::new(crate::types::value::UnificationVal {
      members: members.into_iter().collect(),
    })))
  }
}

/// Struct × Struct (§4.4), covering both plain structs and lists (structs
/// with integer arcs).
fn unify_structs(ctx: &mut EvalContext, sa: &Rc<StructVal>, sb: &Rc<StructVal>, checked: Checked) -> Value {
  if sa.is_list != sb.is_list {
    return unsupported(&Value::atom(ValueKind::Struct(sa.clone())), &Value::atom(ValueKind::Struct(sb.clone())));
  }
  if sa.is_list { return unify_lists(ctx, sa, sb, checked) }

  let arcs_a = sa.arcs.borrow();
  let arcs_b = sb.arcs.borrow();
  let mut merged: Vector<FieldArc> = Vector::new();

  for pair in arcs_a.iter().cloned().sorted_by_key(FieldArc::label)
    .merge_join_by(arcs_b.iter().cloned().sorted_by_key(FieldArc::label), |x, y| x.label().cmp(&y.label()))
  {
    match pair {
      EitherOrBoth::Both(x, y) => merged.push_back(merge_arc_pair(&x, &y)),
      EitherOrBoth::Left(x) => {
        // `sa` (the side `x` comes from) being itself closed means `x` is
        // one of its own schema's legitimate fields, not a stray literal
        // field being grafted into `sb`; two closed structs merge into the
        // union of their explicit labels (§4.7) rather than rejecting each
        // other's fields, so the admission check only applies when `sa` is
        // an ordinary open struct encroaching on a closed `sb`.
        let would_violate = checked == Checked::Checked && sb.is_closed() && !sa.is_closed() && !admits(sb, x.label());
        if would_violate {
          // An optional field that would violate closedness is silently
          // dropped, never reported as an error (§4.7).
          if x.is_optional() { continue }
          return Value::bottom(BottomVal::type_error(format!(
            "field \"{}\" not allowed in closed struct", x.label().as_feature_string())));
        }
        merged.push_back(x);
      }
      EitherOrBoth::Right(y) => {
        let would_violate = checked == Checked::Checked && sa.is_closed() && !sb.is_closed() && !admits(sa, y.label());
        if would_violate {
          if y.is_optional() { continue }
          return Value::bottom(BottomVal::type_error(format!(
            "field \"{}\" not allowed in closed struct", y.label().as_feature_string())));
        }
        merged.push_back(y);
      }
    }
  }

  let result = StructVal::open_struct(merged);
  // Checked merges OR the two operands' closedness (§4.7). Unchecked is the
  // embed primitive: embedding a closed struct must not itself close the
  // struct doing the embedding, so the result keeps only `sa`'s decision
  // (the caller always passes the embedding/host struct as `sa`).
  result.close_status.set(match checked {
    Checked::Checked => sa.close_status.get().merge(sb.close_status.get()),
    Checked::Unchecked => sa.close_status.get(),
  });
  *result.env.borrow_mut() = sa.env.borrow().clone().or_else(|| sb.env.borrow().clone());
  *result.comprehensions.borrow_mut() = sa.comprehensions.borrow().iter().cloned()
    .chain(sb.comprehensions.borrow().iter().cloned()).collect();
  let merged_template = match (sa.template.borrow().clone(), sb.template.borrow().clone()) {
    (Some(t1), Some(t2)) => Some(unify_inner(ctx, &t1, &t2, checked)),
    (Some(t), None) | (None, Some(t)) => Some(t),
    (None, None) => None,
  };
  *result.template.borrow_mut() = merged_template;
  Value::atom(ValueKind::Struct(result))
}

fn admits(s: &StructVal, label: Label) -> bool {
  // A template/regex-pattern may admit labels not explicitly present; the
  // core can only check this once it has evaluated the template, which
  // requires a context. Conservatively, a struct with a template admits
  // every label (the template's own unification will reject an
  // incompatible value later); a struct with no template admits only what
  // it explicitly lists.
  s.template.borrow().is_some() || s.explicitly_has(label)
}

fn merge_arc_pair(a: &FieldArc, b: &FieldArc) -> FieldArc {
  use crate::types::expr::{Expr as ExprTy, ExprExt, ExprKind};
  let merged_expr: ExprTy = ExprTy::new(ExprKind::Conjunction(a.0.expr.clone(), b.0.expr.clone()));
  let flags = a.flags() | b.flags();
  let mut attrs = a.0.attrs.clone();
  attrs.extend(b.0.attrs.iter().cloned());
  let doc = a.0.doc.clone().or_else(|| b.0.doc.clone());
  FieldArc::new(a.label(), merged_expr, flags, attrs, doc)
}

fn unify_lists(ctx: &mut EvalContext, sa: &Rc<StructVal>, sb: &Rc<StructVal>, checked: Checked) -> Value {
  use crate::types::expr::{Expr as ExprTy, ExprExt, ExprKind};

  let la = sa.len();
  let lb = sb.len();
  let (shorter, short_tail) = match la.cmp(&lb) {
    Ordering::Less => (sa.len(), sa.elem_type.clone()),
    _ => (sb.len(), sb.elem_type.clone()),
  };
  let longer = la.max(lb);
  if short_tail.is_none() && la != lb {
    return Value::bottom(BottomVal::type_error("incompatible list lengths"));
  }
  let mut merged: Vector<FieldArc> = Vector::new();
  for i in 0..longer {
    let ea = sa.arcs.borrow().get(i).cloned();
    let eb = sb.arcs.borrow().get(i).cloned();
    let arc = match (ea, eb) {
      (Some(x), Some(y)) => merge_arc_pair(&x, &y),
      (Some(x), None) if i >= shorter => {
        if let Some(tail) = &short_tail {
          let merged_expr: ExprTy = ExprTy::new(ExprKind::Conjunction(x.0.expr.clone(), tail.clone()));
          FieldArc::new(x.label(), merged_expr, x.flags(), x.0.attrs.clone(), x.0.doc.clone())
        } else {
          x
        }
      }
      (None, Some(y)) if i >= shorter => {
        if let Some(tail) = &short_tail {
          let merged_expr: ExprTy = ExprTy::new(ExprKind::Conjunction(tail.clone(), y.0.expr.clone()));
          FieldArc::new(y.label(), merged_expr, y.flags(), y.0.attrs.clone(), y.0.doc.clone())
        } else {
          y
        }
      }
      (Some(x), None) => x,
      (None, Some(y)) => y,
      (None, None) => unreachable!(),
    };
    merged.push_back(arc);
  }
  let _ = (checked, ctx);
  let result = Rc::new(StructVal {
    arcs: std::cell::RefCell::new(merged),
    emit: None,
    template: std::cell::RefCell::new(None),
    comprehensions: std::cell::RefCell::new(Vec::new()),
    close_status: std::cell::Cell::new(CloseStatus::Open),
    is_list: true,
    length: None,
    elem_type: if la >= lb { sa.elem_type.clone() } else { sb.elem_type.clone() },
    env: std::cell::RefCell::new(sa.env.borrow().clone().or_else(|| sb.env.borrow().clone())),
  });
  Value::atom(ValueKind::Struct(result))
}
