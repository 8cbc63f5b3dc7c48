//! Comparator bounds (`>=`, `<`, `!=`, `=~`, …) and their pairwise
//! simplification (§4.3).

use std::rc::Rc;

use if_chain::if_chain;

use super::kind::{BinOp, Kind};
use super::num::Num;
use super::value::{Value, ValueExt, ValueKind};

/// A directed comparator constraint. Regex bounds carry a lazily compiled
/// pattern cached on the underlying string value (see [`super::value::Str`]).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpOp { Lt, Le, Gt, Ge, Ne, ReMatch, ReNotMatch }

impl CmpOp {
  #[must_use] pub fn as_bin_op(self) -> BinOp {
    match self {
      CmpOp::Lt => BinOp::Lt, CmpOp::Le => BinOp::Le, CmpOp::Gt => BinOp::Gt, CmpOp::Ge => BinOp::Ge,
      CmpOp::Ne => BinOp::Ne, CmpOp::ReMatch => BinOp::ReMatch, CmpOp::ReNotMatch => BinOp::ReNotMatch,
    }
  }

  #[must_use] pub fn is_upper(self) -> bool { matches!(self, CmpOp::Lt | CmpOp::Le) }
  #[must_use] pub fn is_lower(self) -> bool { matches!(self, CmpOp::Gt | CmpOp::Ge) }
  #[must_use] pub fn is_directed(self) -> bool { self.is_upper() || self.is_lower() }
  #[must_use] pub fn strict(self) -> bool { matches!(self, CmpOp::Lt | CmpOp::Gt) }

  #[must_use] pub fn symbol(self) -> &'static str {
    match self {
      CmpOp::Lt => "<", CmpOp::Le => "<=", CmpOp::Gt => ">", CmpOp::Ge => ">=",
      CmpOp::Ne => "!=", CmpOp::ReMatch => "=~", CmpOp::ReNotMatch => "!~",
    }
  }
}

#[derive(Clone, Debug)]
pub struct BoundVal {
  pub op: CmpOp,
  pub operand: Value,
  pub kind_mask: Kind,
}

#[must_use] pub fn make_bound(op: CmpOp, operand: Value, kind_mask: Kind) -> Rc<BoundVal> {
  Rc::new(BoundVal { op, operand, kind_mask })
}

/// The result of combining two bounds from the same conjunction (§4.3).
pub enum Simplified {
  /// The pair reduces to a single bound.
  One(Rc<BoundVal>),
  /// The pair reduces to a concrete ground value (the `d = 0`/`d = 1` cases).
  Ground(Value),
  /// The pair cannot be reduced further; keep both as an unreducible
  /// conjunction.
  Both(Rc<BoundVal>, Rc<BoundVal>),
  /// The pair is contradictory.
  Conflict(&'static str),
}

fn as_num(v: &Value) -> Option<&Num> { if let ValueKind::Num(n) = &v.node { Some(n) } else { None } }

/// Simplify two bounds drawn from the same conjunction, per §4.3. `src` is
/// threaded through only so callers can attach a position to the bottom
/// value they synthesize from `Simplified::Conflict`; this function is pure.
#[allow(clippy::too_many_lines)]
pub fn simplify(a: &Rc<BoundVal>, b: &Rc<BoundVal>) -> Simplified {
  // `!=` against a directed bound: eliminate if implied, otherwise keep both.
  if a.op == CmpOp::Ne || b.op == CmpOp::Ne {
    let (ne, other) = if a.op == CmpOp::Ne { (a, b) } else { (b, a) };
    if other.op.is_directed() {
      if_chain! {
        if let (Some(nv), Some(ov)) = (as_num(&ne.operand), as_num(&other.operand));
        if nv.cmp(ov) == std::cmp::Ordering::Equal;
        if other.op.strict();
        then { return Simplified::One(other.clone()) }
      }
    }
    return Simplified::Both(a.clone(), b.clone());
  }

  // Regex bounds never combine structurally with anything else here; regex
  // matching itself happens when a concrete atom meets the bound (§4.4).
  if matches!(a.op, CmpOp::ReMatch | CmpOp::ReNotMatch) || matches!(b.op, CmpOp::ReMatch | CmpOp::ReNotMatch) {
    return Simplified::Both(a.clone(), b.clone());
  }

  let (Some(v1), Some(v2)) = (as_num(&a.operand), as_num(&b.operand)) else {
    return Simplified::Both(a.clone(), b.clone());
  };

  // Same category: keep the tighter bound.
  if a.op.is_upper() && b.op.is_upper() {
    return Simplified::One(tighter_upper(a, b, v1, v2));
  }
  if a.op.is_lower() && b.op.is_lower() {
    return Simplified::One(tighter_lower(a, b, v1, v2));
  }

  // Opposite categories with numeric endpoints.
  let (lower, upper, lv, uv) = if a.op.is_lower() { (a, b, v1, v2) } else { (b, a, v2, v1) };
  let ints = lv.is_int() && uv.is_int();
  let d = &uv.value - &lv.value;
  use bigdecimal::{BigDecimal, Signed as _};

  if d.is_negative() {
    return Simplified::Conflict("conflicting bounds");
  }
  let is_zero = d == BigDecimal::from(0);
  let is_one = d == BigDecimal::from(1);
  let is_two = d == BigDecimal::from(2);

  if is_zero && lower.op == CmpOp::Ge && upper.op == CmpOp::Le {
    return Simplified::Ground(Value::atom(lower.operand.node.clone()));
  }
  if is_zero {
    return Simplified::Conflict("conflicting bounds");
  }
  if ints && is_one && ((lower.op == CmpOp::Ge && upper.op == CmpOp::Lt) || (lower.op == CmpOp::Gt && upper.op == CmpOp::Le)) {
    let endpoint = if lower.op == CmpOp::Ge { lv.clone() } else { lv.add(&Num::from_i64(1)) };
    return Simplified::Ground(Value::num(endpoint));
  }
  if ints && is_two && lower.op == CmpOp::Gt && upper.op == CmpOp::Lt {
    return Simplified::Ground(Value::num(lv.add(&Num::from_i64(1))));
  }
  Simplified::Both(a.clone(), b.clone())
}

fn tighter_upper(a: &Rc<BoundVal>, b: &Rc<BoundVal>, v1: &Num, v2: &Num) -> Rc<BoundVal> {
  use std::cmp::Ordering;
  match v1.cmp(v2) {
    Ordering::Less => a.clone(),
    Ordering::Greater => b.clone(),
    Ordering::Equal => if a.op.strict() { a.clone() } else { b.clone() },
  }
}

fn tighter_lower(a: &Rc<BoundVal>, b: &Rc<BoundVal>, v1: &Num, v2: &Num) -> Rc<BoundVal> {
  use std::cmp::Ordering;
  match v1.cmp(v2) {
    Ordering::Greater => a.clone(),
    Ordering::Less => b.clone(),
    Ordering::Equal => if a.op.strict() { a.clone() } else { b.clone() },
  }
}

/// Narrow a directed bound's endpoint to the tightest integer value that
/// preserves the constraint (§4.2: `>3.4 & int` becomes `>=4`). Float bounds
/// (`=~`/`!~`, or a non-numeric operand) pass through unchanged.
#[must_use] pub fn tighten_to_int(bnd: &Rc<BoundVal>) -> Rc<BoundVal> {
  let Some(n) = as_num(&bnd.operand) else { return bnd.clone() };
  let mask = Kind::INT | (bnd.kind_mask & Kind::NON_GROUND);
  let (op, value) = match bnd.op {
    CmpOp::Ge => (CmpOp::Ge, n.ceil()),
    CmpOp::Gt if n.is_whole() => (CmpOp::Ge, n.add(&Num::from_i64(1))),
    CmpOp::Gt => (CmpOp::Ge, n.ceil()),
    CmpOp::Le => (CmpOp::Le, n.floor()),
    CmpOp::Lt if n.is_whole() => (CmpOp::Le, n.sub(&Num::from_i64(1))),
    CmpOp::Lt => (CmpOp::Le, n.floor()),
    _ => return bnd.clone(),
  };
  Rc::new(BoundVal { op, operand: Value::num(value), kind_mask: mask })
}

/// Does the concrete value satisfy this bound? (§4.4 "Bound × concrete".)
#[must_use] pub fn satisfies(bound: &BoundVal, v: &Value) -> bool {
  match bound.op {
    CmpOp::ReMatch | CmpOp::ReNotMatch => {
      let Some(re) = v.compiled_regex_of(&bound.operand) else { return false };
      let text = v.as_match_text();
      let Some(text) = text else { return false };
      let is_match = re.is_match(&text);
      if bound.op == CmpOp::ReMatch { is_match } else { !is_match }
    }
    _ => {
      let Some(ord) = v.partial_cmp_value(&bound.operand) else { return false };
      match bound.op {
        CmpOp::Lt => ord == std::cmp::Ordering::Less,
        CmpOp::Le => ord != std::cmp::Ordering::Greater,
        CmpOp::Gt => ord == std::cmp::Ordering::Greater,
        CmpOp::Ge => ord != std::cmp::Ordering::Less,
        CmpOp::Ne => ord != std::cmp::Ordering::Equal,
        CmpOp::ReMatch | CmpOp::ReNotMatch => unreachable!(),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::kind::Kind;

  fn int_bound(op: CmpOp, n: i64) -> Rc<BoundVal> {
    make_bound(op, Value::num(Num::from_i64(n)), Kind::INT)
  }

  #[test] fn closed_interval_collapses_to_endpoint() {
    let a = int_bound(CmpOp::Ge, 5);
    let b = int_bound(CmpOp::Le, 5);
    match simplify(&a, &b) {
      Simplified::Ground(v) => assert_eq!(as_num(&v).unwrap().to_i64(), Some(5)),
      _ => panic!("expected ground"),
    }
  }

  #[test] fn distance_one_collapses() {
    let a = int_bound(CmpOp::Ge, 4);
    let b = int_bound(CmpOp::Lt, 5);
    match simplify(&a, &b) {
      Simplified::Ground(v) => assert_eq!(as_num(&v).unwrap().to_i64(), Some(4)),
      _ => panic!("expected ground"),
    }
  }

  #[test] fn crossing_bounds_conflict() {
    let a = int_bound(CmpOp::Ge, 10);
    let b = int_bound(CmpOp::Le, 0);
    assert!(matches!(simplify(&a, &b), Simplified::Conflict(_)));
  }

  #[test] fn unrelated_distance_stays_unreduced() {
    let a = int_bound(CmpOp::Ge, 0);
    let b = int_bound(CmpOp::Le, 10);
    assert!(matches!(simplify(&a, &b), Simplified::Both(..)));
  }

  #[test] fn tighter_upper_bound_wins() {
    let a = int_bound(CmpOp::Lt, 10);
    let b = int_bound(CmpOp::Lt, 5);
    match simplify(&a, &b) {
      Simplified::One(bnd) => assert_eq!(as_num(&bnd.operand).unwrap().to_i64(), Some(5)),
      _ => panic!("expected one"),
    }
  }

  #[test] fn tighten_to_int_rounds_strict_bounds_inward() {
    let gt = make_bound(CmpOp::Gt, Value::num(Num::int(bigdecimal::BigDecimal::from(3))), Kind::NUMBER);
    let tightened = tighten_to_int(&gt);
    assert_eq!(tightened.op, CmpOp::Ge);
    assert_eq!(as_num(&tightened.operand).unwrap().to_i64(), Some(4));
  }

  #[test] fn tighten_to_int_of_fractional_endpoint() {
    use std::str::FromStr;
    let ge = make_bound(CmpOp::Ge, Value::num(Num::float(bigdecimal::BigDecimal::from_str("1.1").unwrap())), Kind::NUMBER);
    let le = make_bound(CmpOp::Le, Value::num(Num::float(bigdecimal::BigDecimal::from_str("1.3").unwrap())), Kind::NUMBER);
    let tg = tighten_to_int(&ge);
    let tl = tighten_to_int(&le);
    assert_eq!(as_num(&tg.operand).unwrap().to_i64(), Some(2));
    assert_eq!(as_num(&tl.operand).unwrap().to_i64(), Some(1));
    assert!(matches!(simplify(&tg, &tl), Simplified::Conflict(_)));
  }
}
