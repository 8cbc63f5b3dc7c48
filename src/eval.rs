//! Expression evaluation (§4.6 lazy field evaluation, §4.8 indexing,
//! slicing and calls, §4.9 delayed constraints, §4.10 comprehensions).
//! `eval` turns an [`Expr`] into a [`Value`], forcing exactly the
//! references the caller asks for and no more — the same "force on demand,
//! cache the result" discipline the teacher's `build_mir.rs` uses for its
//! lazily-lowered basic blocks.

use std::rc::Rc;

use crate::context::{EvalContext, Scope};
use crate::error::BottomVal;
use crate::types::expr::{Clause, Expr, ExprExt, ExprKind, InterpPart};
use crate::types::kind::{match_bin_op, BinOp, Kind};
use crate::types::num::Num;
use crate::types::structure::{Arc, ArcCache, Comprehension, Label, StructVal};
use crate::types::value::{Value, ValueExt, ValueKind};
use crate::unify::{unify, unify_unchecked};

/// Evaluate `expr` in `scope`. This is "eval_partial" (§4.6): the result
/// may still contain unforced struct fields; only what `expr` actually
/// touches gets evaluated.
pub fn eval(ctx: &mut EvalContext, scope: &Scope, expr: &Expr) -> Value {
  match &expr.kind {
    ExprKind::Lit(v) => v.clone(),
    ExprKind::Top => Value::top(),
    ExprKind::Bottom(msg) => Value::bottom(BottomVal::type_error(*msg)),
    ExprKind::NodeRef { up, label } => eval_node_ref(ctx, scope, *up, *label),
    ExprKind::Ident(name) => scope.lookup_binding(*name)
      .unwrap_or_else(|| Value::bottom(BottomVal::not_exist(format!("undefined: {name}")))),
    ExprKind::Selector(base, label) => {
      let b = eval(ctx, scope, base);
      select(ctx, &b, *label)
    }
    ExprKind::Index(base, idx) => {
      let b = eval(ctx, scope, base);
      let i = eval(ctx, scope, idx);
      index(ctx, &b, &i)
    }
    ExprKind::Slice(base, lo, hi) => {
      let b = eval(ctx, scope, base);
      let lo = lo.as_ref().map(|e| eval(ctx, scope, e));
      let hi = hi.as_ref().map(|e| eval(ctx, scope, e));
      slice(&b, lo.as_ref(), hi.as_ref())
    }
    ExprKind::Call(callee, args) => {
      let c = eval(ctx, scope, callee);
      let argv: Vec<Value> = args.iter().map(|a| eval(ctx, scope, a)).collect();
      call(ctx, &c, &argv)
    }
    ExprKind::Unary(op, e) => unary(ctx, scope, *op, e),
    ExprKind::Binary(op, l, r) => binary(ctx, scope, *op, l, r),
    ExprKind::Conjunction(l, r) => {
      let lv = eval(ctx, scope, l);
      let rv = eval(ctx, scope, r);
      unify(ctx, &lv, &rv)
    }
    ExprKind::Disjunction(parts) => eval_disjunction(ctx, scope, parts),
    ExprKind::Interpolation(parts) => eval_interpolation(ctx, scope, parts),
    ExprKind::StructLit(lit) => eval_struct_lit(ctx, scope, lit),
    ExprKind::ListLit(lit) => eval_list_lit(ctx, scope, lit),
    ExprKind::ListComprehension { clauses, body } => eval_list_comprehension(ctx, scope, clauses, body),
    // A bare field comprehension only has meaning expanded inside its
    // enclosing struct; evaluated standalone it contributes nothing.
    ExprKind::FieldComprehension { .. } => Value::top(),
  }
}

fn eval_node_ref(ctx: &mut EvalContext, scope: &Scope, up: u32, label: Label) -> Value {
  let Some(target_scope) = scope.ascend(up) else {
    return Value::bottom(BottomVal::not_exist("reference escapes root scope"));
  };
  let Some(arc) = target_scope.find_arc(label) else {
    return Value::bottom(BottomVal::not_exist(format!("field not found: {}", label.as_feature_string())));
  };
  force_arc(ctx, &target_scope, &arc)
}

/// Force a single arc's value, with cycle detection (§4.6) and
/// delayed-constraint draining once the outermost evaluation unwinds
/// (§4.9). `owner_scope` is the scope the arc's own expression is
/// evaluated in — i.e. the scope whose `structure()` is the struct `arc`
/// belongs to.
pub fn force_arc(ctx: &mut EvalContext, owner_scope: &Scope, arc: &Arc) -> Value {
  if let Some(v) = arc.cached() { return v }
  if ctx.is_on_cycle_stack(arc) {
    return Value::bottom(BottomVal::cycle(ctx.depth()).with_cyclic_arc(arc.clone()));
  }

  log::trace!("cycle-sentinel push at depth {} for {:?}", ctx.depth(), arc.label());
  ctx.push_cycle_sentinel(arc.clone());
  *arc.0.cache.borrow_mut() = ArcCache::Sentinel(Value::bottom(BottomVal::cycle(ctx.depth()).with_cyclic_arc(arc.clone())));
  let mut result = eval(ctx, owner_scope, &arc.0.expr);
  ctx.pop_cycle_sentinel();
  log::trace!("cycle-sentinel pop at depth {} for {:?}", ctx.depth(), arc.label());
  // A cycle-class result means some conjunct is still pending on another
  // field's value (§4.9); leave the cache empty so a later force can retry
  // once the delayed constraint resolves it, instead of freezing the
  // transient cycle error as this arc's permanent value.
  let pending = matches!(&result.node, ValueKind::Bottom(b) if b.code == crate::error::ErrorCode::Cycle);
  if !pending && !arc.is_hidden() && !arc.is_definition() {
    result = apply_template(ctx, owner_scope, arc, result);
  }
  if !pending { result = propagate_closedness(owner_scope, result) }
  *arc.0.cache.borrow_mut() = if pending { ArcCache::Empty } else { ArcCache::Done(result.clone()) };

  if ctx.depth() == 0 {
    ctx.drain_delayed(|c, dc| {
      let current = dc.target.cached().unwrap_or_else(Value::top);
      let merged = unify(c, &current, &dc.atom);
      *dc.target.0.cache.borrow_mut() = ArcCache::Done(merged.clone());
      merged
    });
  }
  result
}

/// §4.7: closedness propagates recursively through field values that do not
/// have their own explicit closedness decision. A struct-valued field of a
/// closed (or already-propagated) owner that is still `Open` — meaning
/// neither a `::` definition nor an earlier propagation has decided its
/// closedness — inherits the propagation bit rather than staying open.
fn propagate_closedness(owner_scope: &Scope, value: Value) -> Value {
  let Some(owner) = owner_scope.structure() else { return value };
  if !owner.is_closed() { return value }
  if let ValueKind::Struct(s) = &value.node {
    if s.close_status.get() == crate::types::structure::CloseStatus::Open {
      s.close_status.set(crate::types::structure::CloseStatus::ShouldFinalize);
    }
  }
  value
}

/// §4.6 "Apply template": when a field is first evaluated and its owning
/// struct carries a template lambda, call it with the field's label
/// (stringified) and unify the result into the field's value. A no-op
/// for structs with no template.
fn apply_template(ctx: &mut EvalContext, owner_scope: &Scope, arc: &Arc, value: Value) -> Value {
  let Some(s) = owner_scope.structure() else { return value };
  let Some(template) = s.template.borrow().clone() else { return value };
  let label_arg = Value::string(arc.label().as_feature_string());
  let applied = call(ctx, &template, &[label_arg]);
  unify(ctx, &value, &applied)
}

pub(crate) fn select(ctx: &mut EvalContext, base: &Value, label: Label) -> Value {
  match &base.node {
    ValueKind::Bottom(_) => base.clone(),
    ValueKind::Struct(s) => {
      let Some(arc) = s.find(label) else {
        return Value::bottom(BottomVal::not_exist(format!("field not found: {}", label.as_feature_string())));
      };
      if arc.is_definition() {
        return Value::bottom(BottomVal::not_exist("definitions are not selectable fields"));
      }
      let owner_scope = struct_scope(s);
      force_arc(ctx, &owner_scope, &arc)
    }
    _ => Value::bottom(BottomVal::type_error(format!("cannot select a field of {:?}", base.kind()))),
  }
}

/// The `Selector` counterpart that addresses a definition by label (§6
/// "Lookup by path"), which ordinary field selection refuses.
pub(crate) fn select_definition(ctx: &mut EvalContext, base: &Value, label: Label) -> Value {
  match &base.node {
    ValueKind::Bottom(_) => base.clone(),
    ValueKind::Struct(s) => {
      let Some(arc) = s.find(label) else {
        return Value::bottom(BottomVal::not_exist(format!("definition not found: {}", label.as_feature_string())));
      };
      if !arc.is_definition() {
        return Value::bottom(BottomVal::not_exist(format!("{} is not a definition", label.as_feature_string())));
      }
      let owner_scope = struct_scope(s);
      force_arc(ctx, &owner_scope, &arc)
    }
    _ => Value::bottom(BottomVal::type_error(format!("cannot select a definition of {:?}", base.kind()))),
  }
}

/// Recover (or synthesize) the lexical scope a struct's own fields should
/// evaluate references against.
pub(crate) fn struct_scope(s: &Rc<StructVal>) -> Scope {
  s.env.borrow().clone().unwrap_or_else(|| Scope::root(s.clone()))
}

pub(crate) fn index(ctx: &mut EvalContext, base: &Value, idx: &Value) -> Value {
  if base.is_bottom() { return base.clone() }
  if idx.is_bottom() { return idx.clone() }
  match (&base.node, &idx.node) {
    (ValueKind::String(s), ValueKind::Num(n)) => match n.to_i64() {
      Some(i) if i >= 0 => s.value.chars().nth(i as usize)
        .map_or_else(|| Value::bottom(BottomVal::not_exist("index out of range")), |c| Value::string(c.to_string())),
      _ => Value::bottom(BottomVal::type_error("index must be a non-negative integer")),
    },
    (ValueKind::Bytes(b), ValueKind::Num(n)) => match n.to_i64() {
      Some(i) if i >= 0 && (i as usize) < b.value.len() => Value::num(Num::from_i64(i64::from(b.value[i as usize]))),
      _ => Value::bottom(BottomVal::not_exist("index out of range")),
    },
    (ValueKind::Struct(s), ValueKind::Num(n)) if s.is_list => match n.to_i64() {
      Some(i) if i >= 0 => s.arcs.borrow().get(i as usize).cloned()
        .map_or_else(|| Value::bottom(BottomVal::not_exist("index out of range")), |arc| force_arc(ctx, &struct_scope(s), &arc)),
      _ => Value::bottom(BottomVal::type_error("index must be a non-negative integer")),
    },
    (ValueKind::Struct(s), ValueKind::String(str_idx)) if !s.is_list =>
      select(ctx, base, Label::Str(crate::symbol::intern(&str_idx.value))),
    _ => Value::bottom(BottomVal::type_error(format!("cannot index {:?} with {:?}", base.kind(), idx.kind()))),
  }
}

fn slice(base: &Value, lo: Option<&Value>, hi: Option<&Value>) -> Value {
  if base.is_bottom() { return base.clone() }
  let as_idx = |v: Option<&Value>, default: usize, len: usize| -> Option<usize> {
    match v {
      None => Some(default),
      Some(v) => if let ValueKind::Num(n) = &v.node { n.to_i64().filter(|i| *i >= 0 && *i as usize <= len).map(|i| i as usize) } else { None },
    }
  };
  match &base.node {
    ValueKind::String(s) => {
      let chars: Vec<char> = s.value.chars().collect();
      let (Some(l), Some(h)) = (as_idx(lo, 0, chars.len()), as_idx(hi, chars.len(), chars.len())) else {
        return Value::bottom(BottomVal::type_error("invalid slice bounds"));
      };
      if l > h { return Value::bottom(BottomVal::type_error("slice bounds out of order")) }
      Value::string(chars[l..h].iter().collect::<String>())
    }
    ValueKind::Struct(s) if s.is_list => {
      let len = s.len();
      let (Some(l), Some(h)) = (as_idx(lo, 0, len), as_idx(hi, len, len)) else {
        return Value::bottom(BottomVal::type_error("invalid slice bounds"));
      };
      if l > h { return Value::bottom(BottomVal::type_error("slice bounds out of order")) }
      let sliced: im::Vector<Arc> = s.arcs.borrow().iter().skip(l).take(h - l).cloned().collect();
      Value::atom(ValueKind::Struct(Rc::new(StructVal {
        arcs: std::cell::RefCell::new(sliced),
        emit: None,
        template: std::cell::RefCell::new(None),
        comprehensions: std::cell::RefCell::new(Vec::new()),
        close_status: std::cell::Cell::new(crate::types::structure::CloseStatus::Open),
        is_list: true,
        length: None,
        elem_type: s.elem_type.clone(),
        env: std::cell::RefCell::new(s.env.borrow().clone()),
      })))
    }
    _ => Value::bottom(BottomVal::type_error(format!("cannot slice {:?}", base.kind()))),
  }
}

fn call(ctx: &mut EvalContext, callee: &Value, args: &[Value]) -> Value {
  if callee.is_bottom() { return callee.clone() }
  match &callee.node {
    ValueKind::Lambda(lam) => {
      if lam.params.len() != args.len() {
        return Value::bottom(BottomVal::type_error("wrong number of arguments"));
      }
      let mut call_scope = lam.env.clone();
      for (param, arg) in lam.params.iter().zip(args) {
        let constrained = match &param.type_constraint {
          Some(tc) => unify(ctx, &eval(ctx, &call_scope, tc), arg),
          None => arg.clone(),
        };
        if constrained.is_bottom() { return constrained }
        if let Some(name) = param.label {
          call_scope = call_scope.bind(name, constrained);
        }
      }
      eval(ctx, &call_scope, &lam.body)
    }
    _ => Value::bottom(BottomVal::type_error(format!("cannot call a value of kind {:?}", callee.kind()))),
  }
}

fn unary(ctx: &mut EvalContext, scope: &Scope, op: crate::types::expr::UnaryOp, e: &Expr) -> Value {
  use crate::types::expr::UnaryOp;
  let v = eval(ctx, scope, e);
  if v.is_bottom() { return v }
  match (op, &v.node) {
    (UnaryOp::Pos, ValueKind::Num(_)) => v,
    (UnaryOp::Neg, ValueKind::Num(n)) => Value::num(n.neg()),
    (UnaryOp::Not, ValueKind::Bool(b)) => Value::bool(!b),
    _ => Value::bottom(BottomVal::type_error(format!("invalid operation: unary on {:?}", v.kind()))),
  }
}

fn binary(ctx: &mut EvalContext, scope: &Scope, op: BinOp, l: &Expr, r: &Expr) -> Value {
  let lv = eval(ctx, scope, l);
  let rv = eval(ctx, scope, r);
  if lv.is_bottom() { return lv }
  if rv.is_bottom() { return rv }

  if matches!(op, BinOp::And | BinOp::Or) {
    return match (&lv.node, &rv.node) {
      (ValueKind::Bool(a), ValueKind::Bool(b)) =>
        Value::bool(if op == BinOp::And { *a && *b } else { *a || *b }),
      _ => Value::bottom(BottomVal::type_error("invalid operation: expected bool operands")),
    };
  }

  if op.is_comparator() {
    let bound = crate::types::bound::make_bound(
      match op {
        BinOp::Lt => crate::types::bound::CmpOp::Lt,
        BinOp::Le => crate::types::bound::CmpOp::Le,
        BinOp::Gt => crate::types::bound::CmpOp::Gt,
        BinOp::Ge => crate::types::bound::CmpOp::Ge,
        BinOp::Ne => crate::types::bound::CmpOp::Ne,
        BinOp::ReMatch => crate::types::bound::CmpOp::ReMatch,
        BinOp::ReNotMatch => crate::types::bound::CmpOp::ReNotMatch,
        _ => unreachable!(),
      },
      rv.clone(), lv.kind() | rv.kind(),
    );
    return Value::bool(crate::types::bound::satisfies(&bound, &lv));
  }
  if op == BinOp::Eq { return Value::bool(crate::types::value::value_eq(&lv, &rv)) }

  if match_bin_op(op, lv.kind(), rv.kind()).is_err() {
    return Value::bottom(BottomVal::type_error(format!("invalid operation {} {} {}", op.symbol(), op.symbol(), op.symbol())));
  }

  match (op, &lv.node, &rv.node) {
    (BinOp::Add, ValueKind::Num(a), ValueKind::Num(b)) => Value::num(a.add(b)),
    (BinOp::Sub, ValueKind::Num(a), ValueKind::Num(b)) => Value::num(a.sub(b)),
    (BinOp::Mul, ValueKind::Num(a), ValueKind::Num(b)) => Value::num(a.mul(b)),
    (BinOp::Div, ValueKind::Num(a), ValueKind::Num(b)) => a.div(b).map_or_else(
      |e| Value::bottom(BottomVal::type_error(e)), Value::num),
    (BinOp::Quo, ValueKind::Num(a), ValueKind::Num(b)) => a.quo(b).map_or_else(
      |e| Value::bottom(BottomVal::type_error(e)), Value::num),
    (BinOp::Rem, ValueKind::Num(a), ValueKind::Num(b)) => a.rem(b).map_or_else(
      |e| Value::bottom(BottomVal::type_error(e)), Value::num),
    (BinOp::Mod, ValueKind::Num(a), ValueKind::Num(b)) => a.modulo(b).map_or_else(
      |e| Value::bottom(BottomVal::type_error(e)), Value::num),
    (BinOp::Add, ValueKind::String(a), ValueKind::String(b)) =>
      Value::string(format!("{}{}", a.value, b.value)),
    (BinOp::Add, ValueKind::Bytes(a), ValueKind::Bytes(b)) => {
      let mut out = a.value.to_vec();
      out.extend_from_slice(&b.value);
      Value::bytes(out)
    }
    (BinOp::Mul, ValueKind::String(s), ValueKind::Num(n)) | (BinOp::Mul, ValueKind::Num(n), ValueKind::String(s)) =>
      n.to_i64().filter(|i| *i >= 0).map_or_else(
        || Value::bottom(BottomVal::type_error("repeat count must be a non-negative integer")),
        |i| Value::string(s.value.repeat(i as usize))),
    _ => Value::bottom(BottomVal::type_error(format!("unsupported operation: {:?} {} {:?}", lv.kind(), op.symbol(), rv.kind()))),
  }
}

fn eval_disjunction(ctx: &mut EvalContext, scope: &Scope, parts: &[(Expr, bool)]) -> Value {
  let disjuncts: smallvec::SmallVec<[(Value, bool); 4]> = parts.iter()
    .map(|(e, marked)| (eval(ctx, scope, e), *marked)).collect();
  crate::disjunction::normalize(ctx, &Value::atom(ValueKind::Disjunction(Rc::new(
    crate::types::value::DisjunctionVal { has_defaults: disjuncts.iter().any(|(_, m)| *m), disjuncts },
  ))))
}

fn eval_interpolation(ctx: &mut EvalContext, scope: &Scope, parts: &[InterpPart]) -> Value {
  let mut out = String::new();
  for part in parts {
    match part {
      InterpPart::Str(s) => out.push_str(s),
      InterpPart::Expr(e) => {
        let v = eval(ctx, scope, e);
        if v.is_bottom() { return v }
        if !v.is_ground() {
          return Value::bottom(BottomVal::incomplete("interpolation requires a ground value"));
        }
        match v.as_match_text() {
          Some(s) => out.push_str(&s),
          None => return Value::bottom(BottomVal::type_error("value cannot be interpolated")),
        }
      }
    }
  }
  Value::string(out)
}

fn eval_struct_lit(ctx: &mut EvalContext, scope: &Scope, lit: &crate::types::expr::StructLit) -> Value {
  let arcs = build_arcs(&lit.fields);
  let template = lit.template.clone().map(|t| eval(ctx, scope, &t));
  let result = StructVal::open_struct(arcs);
  *result.template.borrow_mut() = template;
  *result.comprehensions.borrow_mut() = lit.comprehensions.clone();
  if lit.is_definition { result.close_status.set(crate::types::structure::CloseStatus::Closed) }
  let self_scope = scope.nested(result.clone());
  result.set_env(self_scope.clone());

  let mut out = Value::atom(ValueKind::Struct(result));
  for embed in &lit.embeds {
    let ev = eval(ctx, &self_scope, embed);
    // Embeds merge with the unchecked variant (§4.7): an embedded struct's
    // fields are admitted even if the enclosing struct is closed.
    out = unify_unchecked(ctx, &out, &ev);
    if out.is_bottom() { return out }
  }
  expand_comprehensions(ctx, &self_scope, &out)
}

/// Multiple declarations of the same label within one struct literal are
/// conjoined into a single arc (`x: >0; x: 5` means `x: >0 & 5`) instead of
/// the later declaration silently shadowing the earlier one — label order
/// in the result follows first occurrence.
fn build_arcs(fields: &[crate::types::expr::FieldDecl]) -> im::Vector<Arc> {
  use crate::types::structure::{ArcFlags, Attr};
  use std::collections::hash_map::Entry;
  use std::collections::HashMap;

  let mut order: Vec<Label> = Vec::new();
  let mut merged: HashMap<Label, (Expr, ArcFlags, Vec<Attr>, Option<Rc<str>>)> = HashMap::new();
  for f in fields {
    match merged.entry(f.label) {
      Entry::Vacant(e) => {
        order.push(f.label);
        e.insert((f.expr.clone(), f.flags, f.attrs.clone(), f.doc.clone()));
      }
      Entry::Occupied(mut e) => {
        let (expr, flags, attrs, doc) = e.get_mut();
        *expr = Expr::new(ExprKind::Conjunction(expr.clone(), f.expr.clone()));
        *flags |= f.flags;
        attrs.extend(f.attrs.iter().cloned());
        if doc.is_none() { doc.clone_from(&f.doc) }
      }
    }
  }
  order.into_iter().map(|label| {
    let (expr, flags, attrs, doc) = merged.remove(&label).expect("every queued label was inserted");
    Arc::new(label, expr, flags, attrs, doc)
  }).collect()
}

/// Run every comprehension attached to a struct once, folding generated
/// fields into the struct by unification (§4.10). This is the one-shot
/// `Expand` pass: comprehensions never re-fire once drained.
fn expand_comprehensions(ctx: &mut EvalContext, self_scope: &Scope, value: &Value) -> Value {
  let ValueKind::Struct(s) = &value.node else { return value.clone() };
  let comps: Vec<Comprehension> = s.comprehensions.borrow_mut().drain(..).collect();
  let mut out = value.clone();
  for comp in comps {
    out = run_comprehension(ctx, self_scope, &comp, &out);
    if out.is_bottom() { return out }
  }
  out
}

fn run_comprehension(ctx: &mut EvalContext, outer_scope: &Scope, comp: &Comprehension, acc: &Value) -> Value {
  fn go(ctx: &mut EvalContext, scope: &Scope, clauses: &[Clause], comp: &Comprehension, acc: Value) -> Value {
    let Some((clause, rest)) = clauses.split_first() else {
      let key_val = comp.key.as_ref().map(|k| eval(ctx, scope, k));
      let value = eval(ctx, scope, &comp.value);
      let Some(key_val) = key_val else { return acc };
      if key_val.is_bottom() { return key_val }
      if value.is_bottom() && !comp.optional { return value }
      let label = match &key_val.node {
        ValueKind::String(s) => Label::Str(crate::symbol::intern(&s.value)),
        _ => return Value::bottom(BottomVal::type_error("comprehension key must be a string")),
      };
      let flags = if comp.optional { crate::types::structure::ArcFlags::OPTIONAL } else { crate::types::structure::ArcFlags::empty() };
      let field = Value::atom(ValueKind::Struct(StructVal::open_struct(im::vector![
        Arc::new(label, crate::types::expr::Expr::new(ExprKind::Lit(value)), flags, vec![], None)
      ])));
      return unify(ctx, &acc, &field);
    };
    match clause {
      Clause::Guard { cond } => {
        let c = eval(ctx, scope, cond);
        match &c.node {
          ValueKind::Bool(true) => go(ctx, scope, rest, comp, acc),
          ValueKind::Bool(false) => acc,
          _ => Value::bottom(BottomVal::type_error("comprehension guard must be boolean")),
        }
      }
      Clause::Feed { key_binding, value_binding, source } => {
        let src = eval(ctx, scope, source);
        let ValueKind::Struct(s) = &src.node else {
          return Value::bottom(BottomVal::type_error("comprehension source must be a struct or list"));
        };
        let mut result = acc;
        let arcs: Vec<_> = s.arcs.borrow().iter().cloned().collect();
        for arc in arcs {
          if arc.is_hidden() || arc.is_definition() { continue }
          let item_scope = struct_scope(s);
          let v = force_arc(ctx, &item_scope, &arc);
          let mut bound_scope = scope.bind(*value_binding, v);
          if let Some(kb) = key_binding {
            bound_scope = bound_scope.bind(*kb, Value::string(arc.label().as_feature_string()));
          }
          result = go(ctx, &bound_scope, rest, comp, result);
          if result.is_bottom() { return result }
        }
        result
      }
    }
  }
  go(ctx, outer_scope, &comp.clauses, comp, acc.clone())
}

fn eval_list_lit(_ctx: &mut EvalContext, scope: &Scope, lit: &crate::types::expr::ListLit) -> Value {
  let mut arcs = im::Vector::new();
  for (i, e) in lit.elems.iter().enumerate() {
    #[allow(clippy::cast_possible_truncation)]
    let label = Label::Int(i as u32);
    arcs.push_back(Arc::new(label, e.clone(), crate::types::structure::ArcFlags::empty(), vec![], None));
  }
  let result = Rc::new(StructVal {
    arcs: std::cell::RefCell::new(arcs),
    emit: None,
    template: std::cell::RefCell::new(None),
    comprehensions: std::cell::RefCell::new(Vec::new()),
    close_status: std::cell::Cell::new(crate::types::structure::CloseStatus::Open),
    is_list: true,
    length: None,
    elem_type: lit.tail.clone(),
    env: std::cell::RefCell::new(None),
  });
  result.set_env(scope.nested(result.clone()));
  Value::atom(ValueKind::Struct(result))
}

fn eval_list_comprehension(ctx: &mut EvalContext, scope: &Scope, clauses: &[Clause], body: &Expr) -> Value {
  fn go(ctx: &mut EvalContext, scope: &Scope, clauses: &[Clause], body: &Expr, out: &mut Vec<Value>) -> Option<Value> {
    let Some((clause, rest)) = clauses.split_first() else {
      let v = eval(ctx, scope, body);
      if v.is_bottom() { return Some(v) }
      out.push(v);
      return None;
    };
    match clause {
      Clause::Guard { cond } => {
        let c = eval(ctx, scope, cond);
        match &c.node {
          ValueKind::Bool(true) => go(ctx, scope, rest, body, out),
          ValueKind::Bool(false) => None,
          _ => Some(Value::bottom(BottomVal::type_error("comprehension guard must be boolean"))),
        }
      }
      Clause::Feed { key_binding, value_binding, source } => {
        let src = eval(ctx, scope, source);
        let ValueKind::Struct(s) = &src.node else {
          return Some(Value::bottom(BottomVal::type_error("comprehension source must be a struct or list")));
        };
        let arcs: Vec<_> = s.arcs.borrow().iter().cloned().collect();
        for arc in arcs {
          if arc.is_hidden() || arc.is_definition() { continue }
          let item_scope = struct_scope(s);
          let v = force_arc(ctx, &item_scope, &arc);
          let mut bound_scope = scope.bind(*value_binding, v);
          if let Some(kb) = key_binding {
            bound_scope = bound_scope.bind(*kb, Value::string(arc.label().as_feature_string()));
          }
          if let Some(err) = go(ctx, &bound_scope, rest, body, out) { return Some(err) }
        }
        None
      }
    }
  }
  let mut elems = Vec::new();
  if let Some(err) = go(ctx, scope, clauses, body, &mut elems) { return err }
  let arcs: im::Vector<Arc> = elems.into_iter().enumerate().map(|(i, v)| {
    #[allow(clippy::cast_possible_truncation)]
    Arc::new(Label::Int(i as u32), Expr::new(ExprKind::Lit(v)), crate::types::structure::ArcFlags::empty(), vec![], None)
  }).collect();
  let result = StructVal::open_struct(arcs);
  result.set_env(scope.clone());
  // SAFETY-free: list construction never fails once every element is ground
  // or bottom (already propagated above), so there is no fallible path left.
  let list = Rc::new(StructVal {
    is_list: true,
    ..clone_struct_shell(&result)
  });
  Value::atom(ValueKind::Struct(list))
}

fn clone_struct_shell(s: &Rc<StructVal>) -> StructVal {
  StructVal {
    arcs: std::cell::RefCell::new(s.arcs.borrow().clone()),
    emit: s.emit.clone(),
    template: std::cell::RefCell::new(s.template.borrow().clone()),
    comprehensions: std::cell::RefCell::new(s.comprehensions.borrow().clone()),
    close_status: std::cell::Cell::new(s.close_status.get()),
    is_list: s.is_list,
    length: s.length.clone(),
    elem_type: s.elem_type.clone(),
    env: std::cell::RefCell::new(s.env.borrow().clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::Options;

  fn ctx() -> EvalContext { EvalContext::new(Options::empty()) }

  #[test] fn literal_evaluates_to_itself() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let e = Expr::new(ExprKind::Lit(Value::num(Num::from_i64(5))));
    let v = eval(&mut c, &root, &e);
    assert_eq!(v.kind(), Kind::INT);
  }

  #[test] fn arithmetic_adds_numbers() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let l = Expr::new(ExprKind::Lit(Value::num(Num::from_i64(2))));
    let r = Expr::new(ExprKind::Lit(Value::num(Num::from_i64(3))));
    let e = Expr::new(ExprKind::Binary(BinOp::Add, l, r));
    let v = eval(&mut c, &root, &e);
    if let ValueKind::Num(n) = &v.node { assert_eq!(n.to_i64(), Some(5)) } else { panic!("expected num") }
  }

  #[test] fn division_by_zero_is_bottom() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let l = Expr::new(ExprKind::Lit(Value::num(Num::from_i64(1))));
    let r = Expr::new(ExprKind::Lit(Value::num(Num::from_i64(0))));
    let e = Expr::new(ExprKind::Binary(BinOp::Div, l, r));
    assert!(eval(&mut c, &root, &e).is_bottom());
  }

  #[test] fn number_interpolates_to_its_decimal_text() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let parts = vec![
      InterpPart::Str("n=".into()),
      InterpPart::Expr(Expr::new(ExprKind::Lit(Value::num(Num::from_i64(7))))),
    ];
    let e = Expr::new(ExprKind::Interpolation(parts));
    let v = eval(&mut c, &root, &e);
    match &v.node {
      ValueKind::String(s) => assert_eq!(&*s.value, "n=7"),
      _ => panic!("expected string"),
    }
  }

  fn struct_lit(fields: Vec<crate::types::expr::FieldDecl>, embeds: Vec<Expr>, is_definition: bool) -> Expr {
    Expr::new(ExprKind::StructLit(crate::types::expr::StructLit {
      fields, embeds, emit: None, template: None, comprehensions: vec![], is_definition,
    }))
  }

  fn field(name: &str, expr: Expr) -> crate::types::expr::FieldDecl {
    crate::types::expr::FieldDecl {
      label: Label::Str(crate::symbol::intern(name)), expr,
      flags: crate::types::structure::ArcFlags::empty(), attrs: vec![], doc: None,
    }
  }

  #[test] fn embedding_a_closed_struct_does_not_reject_the_host_own_fields() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let foo = struct_lit(vec![field("field", Expr::new(ExprKind::Lit(Value::basic_type(Kind::INT))))], vec![], true);
    let foo_val = eval(&mut c, &root, &foo);
    assert!(!foo_val.is_bottom());

    let host = struct_lit(
      vec![field("feild", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(2)))))],
      vec![Expr::new(ExprKind::Lit(foo_val))],
      false,
    );
    let result = eval(&mut c, &root, &host);
    assert!(!result.is_bottom(), "embedding should not close the host struct's own fields");
    match &result.node {
      ValueKind::Struct(s) => assert!(!s.is_closed(), "embedding a closed struct must not close the host"),
      _ => panic!("expected struct"),
    }
  }

  /// §4.7: a plain (non-`::`) nested struct literal under a closing
  /// definition has no closedness decision of its own, so it inherits one
  /// from its enclosing definition and rejects unknown fields just as if it
  /// had been written with its own `::`.
  #[test] fn closedness_propagates_into_a_nested_struct_literal() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let inner = struct_lit(vec![field("x", Expr::new(ExprKind::Lit(Value::basic_type(Kind::INT))))], vec![], false);
    let outer = struct_lit(vec![field("nested", inner)], vec![], true);
    let result = eval(&mut c, &root, &outer);
    assert!(!result.is_bottom());
    let ValueKind::Struct(s) = &result.node else { panic!("expected struct") };
    let owner = struct_scope(s);
    let nested_arc = s.find(Label::Str(crate::symbol::intern("nested"))).unwrap();
    let nested_val = force_arc(&mut c, &owner, &nested_arc);
    match &nested_val.node {
      ValueKind::Struct(inner_s) => assert!(inner_s.is_closed(), "nested struct must inherit closedness from its enclosing definition"),
      _ => panic!("expected struct"),
    }

    let other = struct_lit(vec![field("y", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(1)))))], vec![], false);
    let other_val = eval(&mut c, &root, &other);
    let r = unify(&mut c, &nested_val, &other_val);
    assert!(r.is_bottom(), "the propagated closedness must reject fields the inherited schema does not list");
  }

  #[test] fn repeated_field_declarations_conjoin_instead_of_shadowing() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let lo = crate::types::bound::make_bound(crate::types::bound::CmpOp::Ge, Value::num(Num::from_i64(0)), Kind::INT);
    let lit = struct_lit(vec![
      field("x", Expr::new(ExprKind::Lit(Value::atom(ValueKind::Bound(lo))))),
      field("x", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(5))))),
    ], vec![], false);
    let result = eval(&mut c, &root, &lit);
    let ValueKind::Struct(s) = &result.node else { panic!("expected struct") };
    assert_eq!(s.len(), 1, "two declarations of the same label must merge into one arc");
    let owner = struct_scope(s);
    let arc = s.find(Label::Str(crate::symbol::intern("x"))).unwrap();
    let v = force_arc(&mut c, &owner, &arc);
    match &v.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(5)), _ => panic!("expected num, got {v:?}") }
  }

  /// §8 scenario: `a: b - 100; b: a + 100; b: 200` resolves to `a=100,
  /// b=200` — forcing `b` first lets its ground declaration settle
  /// immediately and schedules a delayed retry for the conjunct that
  /// depended on `a`, which resolves once `b` is known.
  #[test] fn delayed_constraint_resolves_mutual_arithmetic_recursion() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let up0 = |name: &str| Expr::new(ExprKind::NodeRef { up: 0, label: Label::Str(crate::symbol::intern(name)) });
    let hundred = || Expr::new(ExprKind::Lit(Value::num(Num::from_i64(100))));
    let a_expr = Expr::new(ExprKind::Binary(BinOp::Sub, up0("b"), hundred()));
    let b_expr = Expr::new(ExprKind::Binary(BinOp::Add, up0("a"), hundred()));
    let lit = struct_lit(vec![
      field("a", a_expr),
      field("b", b_expr),
      field("b", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(200))))),
    ], vec![], false);
    let result = eval(&mut c, &root, &lit);
    assert!(!result.is_bottom());
    let ValueKind::Struct(s) = &result.node else { panic!("expected struct") };
    let owner = struct_scope(s);

    let b_arc = s.find(Label::Str(crate::symbol::intern("b"))).unwrap();
    let b_val = force_arc(&mut c, &owner, &b_arc);
    match &b_val.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(200)), _ => panic!("expected num, got {b_val:?}") }

    let a_arc = s.find(Label::Str(crate::symbol::intern("a"))).unwrap();
    let a_val = force_arc(&mut c, &owner, &a_arc);
    match &a_val.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(100)), _ => panic!("expected num, got {a_val:?}") }
  }

  /// Same scenario as above, but forcing `a` first: the delayed-constraint
  /// target must be the frame actually being forced, not whichever ancestor
  /// the cycle bottom happens to name, so the result must not depend on
  /// which field a caller forces first (§4.9, §8 scenario 1).
  #[test] fn delayed_constraint_resolves_regardless_of_forcing_order() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let up0 = |name: &str| Expr::new(ExprKind::NodeRef { up: 0, label: Label::Str(crate::symbol::intern(name)) });
    let hundred = || Expr::new(ExprKind::Lit(Value::num(Num::from_i64(100))));
    let a_expr = Expr::new(ExprKind::Binary(BinOp::Sub, up0("b"), hundred()));
    let b_expr = Expr::new(ExprKind::Binary(BinOp::Add, up0("a"), hundred()));
    let lit = struct_lit(vec![
      field("a", a_expr),
      field("b", b_expr),
      field("b", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(200))))),
    ], vec![], false);
    let result = eval(&mut c, &root, &lit);
    assert!(!result.is_bottom());
    let ValueKind::Struct(s) = &result.node else { panic!("expected struct") };
    let owner = struct_scope(s);

    let a_arc = s.find(Label::Str(crate::symbol::intern("a"))).unwrap();
    let a_val = force_arc(&mut c, &owner, &a_arc);
    match &a_val.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(100)), _ => panic!("expected num, got {a_val:?}") }

    let b_arc = s.find(Label::Str(crate::symbol::intern("b"))).unwrap();
    let b_val = force_arc(&mut c, &owner, &b_arc);
    match &b_val.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(200)), _ => panic!("expected num, got {b_val:?}") }
  }

  /// §8 scenario 6: `{ "\(k)": v for k,v in {a:1,b:2,c:3} if v>1 }` ->
  /// `{b:2, c:3}`.
  #[test] fn field_comprehension_filters_and_renames_by_key() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    let source_lit = struct_lit(vec![
      field("a", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(1))))),
      field("b", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(2))))),
      field("c", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(3))))),
    ], vec![], false);

    let k = crate::symbol::intern("k");
    let v = crate::symbol::intern("v");
    let key_expr = Expr::new(ExprKind::Ident(k));
    let value_expr = Expr::new(ExprKind::Ident(v));
    let guard_expr = Expr::new(ExprKind::Binary(BinOp::Gt, value_expr.clone(), Expr::new(ExprKind::Lit(Value::num(Num::from_i64(1))))));

    let comp = Comprehension {
      clauses: vec![
        Clause::Feed { key_binding: Some(k), value_binding: v, source: source_lit.clone() },
        Clause::Guard { cond: guard_expr },
      ],
      is_template: false,
      key: Some(key_expr),
      value: value_expr,
      optional: false,
    };

    let host = StructVal::open_struct(im::Vector::new());
    host.set_env(root.clone());
    let acc = Value::atom(ValueKind::Struct(host));
    let result = run_comprehension(&mut c, &root, &comp, &acc);
    assert!(!result.is_bottom(), "comprehension should not fail: {result:?}");
    let ValueKind::Struct(s) = &result.node else { panic!("expected struct") };
    assert_eq!(s.len(), 2, "only b and c survive the v>1 guard");
    let owner = struct_scope(s);
    let b_arc = s.find(Label::Str(crate::symbol::intern("b"))).unwrap();
    let b_val = force_arc(&mut c, &owner, &b_arc);
    match &b_val.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(2)), _ => panic!("expected num, got {b_val:?}") }
    let c_arc = s.find(Label::Str(crate::symbol::intern("c"))).unwrap();
    let c_val = force_arc(&mut c, &owner, &c_arc);
    match &c_val.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(3)), _ => panic!("expected num, got {c_val:?}") }
  }

  #[test] fn template_is_applied_to_every_field() {
    let mut c = ctx();
    let root = Scope::root(StructVal::open_struct(im::Vector::new()));
    // A template lambda `(label) => int`: every field must narrow to `int`.
    let template = Value::atom(ValueKind::Lambda(std::rc::Rc::new(crate::types::value::LambdaVal {
      params: vec![crate::types::value::Param { label: None, type_constraint: None }],
      body: Expr::new(ExprKind::Lit(Value::basic_type(Kind::INT))),
      env: root.clone(),
    })));
    let lit = crate::types::expr::StructLit {
      fields: vec![field("x", Expr::new(ExprKind::Lit(Value::num(Num::from_i64(5)))))],
      embeds: vec![], emit: None,
      template: Some(Expr::new(ExprKind::Lit(template))),
      comprehensions: vec![], is_definition: false,
    };
    let result = eval(&mut c, &root, &Expr::new(ExprKind::StructLit(lit)));
    assert!(!result.is_bottom());
    let ValueKind::Struct(s) = &result.node else { panic!("expected struct") };
    let owner = struct_scope(s);
    let arc = s.find(Label::Str(crate::symbol::intern("x"))).unwrap();
    let v = force_arc(&mut c, &owner, &arc);
    match &v.node { ValueKind::Num(n) => assert_eq!(n.to_i64(), Some(5)), _ => panic!("expected num, got {v:?}") }
  }
}
