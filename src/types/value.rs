//! The runtime value representation (§3): every evaluated form is a tagged
//! [`ValueKind`] wrapped in [`Spanned`] and shared by `Rc`, mirroring the
//! teacher's own `type Ty = Rc<TyKind>` / `Spanned<T>` pattern in
//! `build_mir.rs`. Values other than `Struct` are immutable once built and
//! may be freely shared by pointer (§5).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use regex::Regex;
use smallvec::SmallVec;

use super::bound::BoundVal;
use super::kind::Kind;
use super::num::Num;
use super::structure::StructVal;
use crate::error::BottomVal;
use crate::symbol::Symbol;

/// Where a value came from: a position in the host's source text, or a
/// synthetic position recording the operator and operands that produced it
/// (used for values built by unification, arithmetic, etc. rather than
/// parsed directly).
#[derive(Clone, Debug)]
pub enum Base {
  /// Opaque to the core; the host interprets `file`/`start`/`end` however it
  /// likes (the core never needs more than identity and Debug rendering).
  Source { file: Symbol, start: u32, end: u32 },
  Computed { op: &'static str, operands: Vec<Base> },
  Synthetic,
}

impl Base {
  #[must_use] pub fn computed(op: &'static str, operands: impl IntoIterator<Item = Base>) -> Base {
    Base::Computed { op, operands: operands.into_iter().collect() }
  }
}

/// A node tagged with its originating position. This is the wrapper every
/// [`Value`] is built from.
#[derive(Clone, Debug)]
pub struct Spanned<T> {
  pub base: Base,
  pub node: T,
}

/// A lazily-compiled regex cache attached to a string or bytes atom, so that
/// using the same literal as the right-hand side of `=~`/`!~` repeatedly
/// does not recompile the pattern.
#[derive(Debug, Default)]
pub struct RegexCache(RefCell<Option<Rc<Regex>>>);

impl Clone for RegexCache {
  fn clone(&self) -> Self { RegexCache(RefCell::new(self.0.borrow().clone())) }
}

impl RegexCache {
  fn get_or_compile(&self, pattern: &str) -> Option<Rc<Regex>> {
    if let Some(re) = self.0.borrow().as_ref() { return Some(re.clone()) }
    let re = Rc::new(Regex::new(pattern).ok()?);
    *self.0.borrow_mut() = Some(re.clone());
    Some(re)
  }
}

#[derive(Clone, Debug)]
pub struct Str { pub value: Rc<str>, pub regex: RegexCache }
#[derive(Clone, Debug)]
pub struct Bytes { pub value: Rc<[u8]>, pub regex: RegexCache }

#[derive(Clone, Debug)]
pub struct CustomValidator {
  pub builtin: Symbol,
  pub args: SmallVec<[Value; 4]>,
}

#[derive(Clone, Debug)]
pub struct LambdaVal {
  pub params: Vec<Param>,
  pub body: crate::types::expr::Expr,
  /// The lexical scope the lambda closes over (for templates and user
  /// functions alike).
  pub env: crate::context::Scope,
}

#[derive(Clone, Debug)]
pub struct Param {
  pub label: Option<Symbol>,
  pub type_constraint: Option<crate::types::expr::Expr>,
}

#[derive(Clone, Debug)]
pub struct DisjunctionVal {
  pub disjuncts: SmallVec<[(Value, bool); 4]>,
  pub has_defaults: bool,
}

#[derive(Clone, Debug)]
pub struct UnificationVal {
  pub members: SmallVec<[Value; 2]>,
}

/// The tagged variant every runtime value is one of (§3).
#[derive(Clone, Debug)]
pub enum ValueKind {
  Null,
  Bool(bool),
  String(Str),
  Bytes(Bytes),
  Num(Num),
  Duration(i64),
  Top,
  Bottom(Rc<BottomVal>),
  BasicType(Kind),
  Bound(Rc<BoundVal>),
  CustomValidator(Rc<CustomValidator>),
  Struct(Rc<StructVal>),
  Lambda(Rc<LambdaVal>),
  Disjunction(Rc<DisjunctionVal>),
  Unification(Rc<UnificationVal>),
}

/// A fully (or partially) evaluated runtime value. Cheap to clone: the
/// wrapper is itself behind an `Rc`.
pub type Value = Rc<Spanned<ValueKind>>;

/// Constructors and accessors, implemented as an extension trait over the
/// `Rc<Spanned<ValueKind>>` alias so call sites read as `Value::null()` etc.
pub trait ValueExt {
  fn with_base(node: ValueKind, base: Base) -> Value;
  fn atom(node: ValueKind) -> Value;
  fn null() -> Value;
  fn bool(b: bool) -> Value;
  fn num(n: Num) -> Value;
  fn string(s: impl Into<Rc<str>>) -> Value;
  fn bytes(b: impl Into<Rc<[u8]>>) -> Value;
  fn duration(nanos: i64) -> Value;
  fn top() -> Value;
  fn bottom(b: BottomVal) -> Value;
  fn basic_type(k: Kind) -> Value;

  fn kind(&self) -> Kind;
  fn is_ground(&self) -> bool;
  fn is_bottom(&self) -> bool;
  fn is_top(&self) -> bool;
  fn compiled_regex_of(&self, pattern_value: &Value) -> Option<Rc<Regex>>;
  fn as_match_text(&self) -> Option<String>;
  fn partial_cmp_value(&self, other: &Value) -> Option<Ordering>;
}

impl ValueExt for Value {
  fn with_base(node: ValueKind, base: Base) -> Value { Rc::new(Spanned { base, node }) }
  fn atom(node: ValueKind) -> Value { Value::with_base(node, Base::Synthetic) }
  fn null() -> Value { Value::atom(ValueKind::Null) }
  fn bool(b: bool) -> Value { Value::atom(ValueKind::Bool(b)) }
  fn num(n: Num) -> Value { Value::atom(ValueKind::Num(n)) }
  fn string(s: impl Into<Rc<str>>) -> Value {
    Value::atom(ValueKind::String(Str { value: s.into(), regex: RegexCache::default() }))
  }
  fn bytes(b: impl Into<Rc<[u8]>>) -> Value {
    Value::atom(ValueKind::Bytes(Bytes { value: b.into(), regex: RegexCache::default() }))
  }
  fn duration(nanos: i64) -> Value { Value::atom(ValueKind::Duration(nanos)) }
  fn top() -> Value { Value::atom(ValueKind::Top) }
  fn bottom(b: BottomVal) -> Value { Value::atom(ValueKind::Bottom(Rc::new(b))) }
  fn basic_type(k: Kind) -> Value { Value::atom(ValueKind::BasicType(k | Kind::NON_GROUND)) }

  fn kind(&self) -> Kind {
    match &self.node {
      ValueKind::Null => Kind::NULL,
      ValueKind::Bool(_) => Kind::BOOL,
      ValueKind::String(_) => Kind::STRING,
      ValueKind::Bytes(_) => Kind::BYTES,
      ValueKind::Num(n) => if n.is_int() { Kind::INT } else { Kind::FLOAT },
      ValueKind::Duration(_) => Kind::DURATION,
      ValueKind::Top => Kind::TOP | Kind::NON_GROUND,
      ValueKind::Bottom(_) => Kind::BOTTOM,
      ValueKind::BasicType(k) => *k,
      ValueKind::Bound(b) => b.kind_mask | Kind::NON_GROUND,
      ValueKind::CustomValidator(_) => Kind::NON_GROUND,
      ValueKind::Struct(s) => if s.is_list { Kind::LIST } else { Kind::STRUCT },
      ValueKind::Lambda(_) => Kind::LAMBDA,
      ValueKind::Disjunction(_) => Kind::NON_GROUND,
      ValueKind::Unification(_) => Kind::NON_GROUND,
    }
  }

  fn is_ground(&self) -> bool { self.kind().is_ground() }
  fn is_bottom(&self) -> bool { matches!(self.node, ValueKind::Bottom(_)) }
  fn is_top(&self) -> bool { matches!(self.node, ValueKind::Top) }

  fn compiled_regex_of(&self, pattern_value: &Value) -> Option<Rc<Regex>> {
    match &pattern_value.node {
      ValueKind::String(s) => s.regex.get_or_compile(&s.value),
      ValueKind::Bytes(b) => b.regex.get_or_compile(&String::from_utf8_lossy(&b.value)),
      _ => None,
    }
  }

  /// Render a value's text form for interpolation (§4.8: string, bytes,
  /// int, float, duration parts) and for `=~`/`!~` regex matching.
  fn as_match_text(&self) -> Option<String> {
    match &self.node {
      ValueKind::String(s) => Some(s.value.to_string()),
      ValueKind::Bytes(b) => Some(String::from_utf8_lossy(&b.value).into_owned()),
      ValueKind::Num(n) => Some(n.to_string()),
      ValueKind::Duration(ns) => Some(format!("{ns}ns")),
      _ => None,
    }
  }

  fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
    match (&self.node, &other.node) {
      (ValueKind::Num(a), ValueKind::Num(b)) => Some(a.cmp(b)),
      (ValueKind::String(a), ValueKind::String(b)) => Some(a.value.cmp(&b.value)),
      (ValueKind::Bytes(a), ValueKind::Bytes(b)) => Some(a.value.cmp(&b.value)),
      (ValueKind::Duration(a), ValueKind::Duration(b)) => Some(a.cmp(b)),
      _ => None,
    }
  }
}

/// Structural (not pointer) equality used by "two atoms of the same subkind
/// unify iff they are value-equal" (§4.4) and by bound/disjunct subsumption.
#[must_use] pub fn value_eq(a: &Value, b: &Value) -> bool {
  match (&a.node, &b.node) {
    (ValueKind::Null, ValueKind::Null) | (ValueKind::Top, ValueKind::Top) => true,
    (ValueKind::Bool(x), ValueKind::Bool(y)) => x == y,
    (ValueKind::Num(x), ValueKind::Num(y)) => x == y,
    (ValueKind::String(x), ValueKind::String(y)) => x.value == y.value,
    (ValueKind::Bytes(x), ValueKind::Bytes(y)) => x.value == y.value,
    (ValueKind::Duration(x), ValueKind::Duration(y)) => x == y,
    (ValueKind::BasicType(x), ValueKind::BasicType(y)) => x == y,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn atoms_carry_the_expected_kind() {
    assert_eq!(Value::null().kind(), Kind::NULL);
    assert_eq!(Value::bool(true).kind(), Kind::BOOL);
    assert_eq!(Value::num(Num::from_i64(3)).kind(), Kind::INT);
  }

  #[test] fn top_and_bottom_are_recognized() {
    assert!(Value::top().is_top());
    assert!(!Value::null().is_top());
  }

  #[test] fn value_eq_is_structural() {
    let a = Value::string("hi");
    let b = Value::string("hi");
    assert!(value_eq(&a, &b));
    assert!(!std::rc::Rc::ptr_eq(&a, &b));
  }
}
