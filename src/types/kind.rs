//! The kind lattice (§4.1): a bitmask over runtime value shapes plus two
//! modifier bits. `unify` on kinds is bitwise intersection; the binary
//! operator match table that drives arithmetic/comparison type errors lives
//! here too, since every operator's result kind is a function of its
//! operands' kinds alone.

use bitflags::bitflags;

bitflags! {
  /// A set of possible runtime shapes a value may take, plus `NON_GROUND`
  /// (the value itself is a type/constraint, not a concrete instance) and
  /// `REFERENCE` (the value has not yet been dereferenced).
  #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
  pub struct Kind: u32 {
    const NULL      = 1 << 0;
    const BOOL      = 1 << 1;
    const INT       = 1 << 2;
    const FLOAT     = 1 << 3;
    const STRING    = 1 << 4;
    const BYTES     = 1 << 5;
    const DURATION  = 1 << 6;
    const LIST      = 1 << 7;
    const STRUCT    = 1 << 8;
    const LAMBDA    = 1 << 9;
    const TOP       = 1 << 10;
    const BOTTOM    = 1 << 11;

    const NON_GROUND = 1 << 16;
    const REFERENCE  = 1 << 17;

    /// `int | float`.
    const NUMBER = Self::INT.bits() | Self::FLOAT.bits();
    /// The ground scalar subset: everything a `concrete` atom may be.
    const SCALAR = Self::NULL.bits() | Self::BOOL.bits() | Self::NUMBER.bits()
      | Self::STRING.bits() | Self::BYTES.bits() | Self::DURATION.bits();
    const SHAPE_MASK = (1 << 16) - 1;
  }
}

impl Kind {
  /// `ground(k)` — true iff no non-ground modifier bit is set.
  #[must_use] pub fn is_ground(self) -> bool { !self.contains(Kind::NON_GROUND) }

  /// The ground scalar subset of `self`, with modifier bits stripped.
  #[must_use] pub fn concrete_shape(self) -> Kind { self & Kind::SCALAR }

  /// `unify(k1, k2)` — bitwise intersection, preserving modifiers.
  #[must_use] pub fn unify(self, other: Kind) -> Kind { self & other }

  #[must_use] pub fn shape(self) -> Kind { self & Kind::SHAPE_MASK }
}

/// Binary operators dispatched through the kind match table. Bound
/// comparators (`<`,`<=`,`>`,`>=`,`!=`,`=~`,`!~`) are a subset of this set so
/// that `matchBinOp` can serve both bound simplification and general binary
/// expression evaluation with one table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
  Add, Sub, Mul, Div, Quo, Mod, Rem,
  Lt, Le, Gt, Ge, Eq, Ne,
  ReMatch, ReNotMatch,
  And, Or,
  Concat, Repeat,
}

impl BinOp {
  #[must_use] pub fn is_comparator(self) -> bool {
    matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Ne
      | BinOp::ReMatch | BinOp::ReNotMatch)
  }

  #[must_use] pub fn symbol(self) -> &'static str {
    match self {
      BinOp::Add => "+", BinOp::Sub => "-", BinOp::Mul => "*", BinOp::Div => "/",
      BinOp::Quo => "quo", BinOp::Mod => "mod", BinOp::Rem => "rem",
      BinOp::Lt => "<", BinOp::Le => "<=", BinOp::Gt => ">", BinOp::Ge => ">=",
      BinOp::Eq => "==", BinOp::Ne => "!=",
      BinOp::ReMatch => "=~", BinOp::ReNotMatch => "!~",
      BinOp::And => "&&", BinOp::Or => "||",
      BinOp::Concat => "+", BinOp::Repeat => "*",
    }
  }
}

/// Outcome of looking up `(op, k1, k2)` in the match table: the result kind,
/// whether the table entry was written for the reversed operand order (so
/// the caller knows whether it handled `(k1, k2)` or had to canonicalize to
/// `(k2, k1)`), and a diagnostic template used to render "unsupported
/// operator" / "mismatched types" errors uniformly.
#[derive(Clone, Copy, Debug)]
pub struct BinOpMatch {
  pub result: Kind,
  pub invert: bool,
  pub template: &'static str,
}

/// `matchBinOp(op, k1, k2)`: the single table that drives every
/// type-error diagnostic in the crate. Returns `Err(template)` when no
/// combination of the two kinds supports `op`.
pub fn match_bin_op(op: BinOp, k1: Kind, k2: Kind) -> Result<BinOpMatch, &'static str> {
  let s1 = k1.concrete_shape();
  let s2 = k2.concrete_shape();
  let invert = false;
  match op {
    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Quo | BinOp::Mod | BinOp::Rem
      if s1.intersects(Kind::NUMBER) && s2.intersects(Kind::NUMBER) =>
    {
      let result = if matches!(op, BinOp::Div) { Kind::FLOAT }
        else if s1.intersects(Kind::FLOAT) || s2.intersects(Kind::FLOAT) { Kind::FLOAT }
        else { Kind::INT };
      Ok(BinOpMatch { result, invert, template: "invalid operation %s %s %s (mismatched types %s and %s)" })
    }
    BinOp::Add if s1.contains(Kind::STRING) && s2.contains(Kind::STRING) =>
      Ok(BinOpMatch { result: Kind::STRING, invert, template: "invalid operation: %s on strings" }),
    BinOp::Add if s1.contains(Kind::BYTES) && s2.contains(Kind::BYTES) =>
      Ok(BinOpMatch { result: Kind::BYTES, invert, template: "invalid operation: %s on bytes" }),
    BinOp::Add if s1.contains(Kind::LIST) && s2.contains(Kind::LIST) =>
      Ok(BinOpMatch { result: Kind::LIST, invert, template: "invalid operation: %s on lists" }),
    BinOp::Mul if (s1.contains(Kind::STRING) && s2.intersects(Kind::INT))
      || (s2.contains(Kind::STRING) && s1.intersects(Kind::INT)) =>
      Ok(BinOpMatch { result: Kind::STRING, invert: s2.contains(Kind::STRING), template: "invalid operation: repeat" }),
    BinOp::Mul if (s1.contains(Kind::LIST) && s2.intersects(Kind::INT))
      || (s2.contains(Kind::LIST) && s1.intersects(Kind::INT)) =>
      Ok(BinOpMatch { result: Kind::LIST, invert: s2.contains(Kind::LIST), template: "invalid operation: repeat" }),
    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
      if s1.intersects(Kind::NUMBER | Kind::STRING | Kind::BYTES | Kind::DURATION)
        && s2.intersects(Kind::NUMBER | Kind::STRING | Kind::BYTES | Kind::DURATION) =>
      Ok(BinOpMatch { result: Kind::BOOL | Kind::NON_GROUND, invert, template: "invalid operation: %s %s %s" }),
    BinOp::Eq | BinOp::Ne =>
      Ok(BinOpMatch { result: Kind::BOOL | Kind::NON_GROUND, invert, template: "invalid operation: %s %s %s" }),
    BinOp::ReMatch | BinOp::ReNotMatch
      if s1.intersects(Kind::STRING | Kind::BYTES) && s2.contains(Kind::STRING) =>
      Ok(BinOpMatch { result: Kind::BOOL | Kind::NON_GROUND, invert, template: "invalid operation: %s %s %s" }),
    BinOp::And | BinOp::Or if s1.contains(Kind::BOOL) && s2.contains(Kind::BOOL) =>
      Ok(BinOpMatch { result: Kind::BOOL, invert, template: "invalid operation: %s %s %s" }),
    _ => Err("invalid operation %s %s %s (mismatched types %s and %s)"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn unify_is_bitwise_and() {
    let a = Kind::INT | Kind::FLOAT;
    let b = Kind::INT | Kind::NON_GROUND;
    assert_eq!(a.unify(b), Kind::INT | Kind::NON_GROUND);
  }

  #[test] fn ground_requires_no_modifier_bit() {
    assert!(Kind::INT.is_ground());
    assert!(!(Kind::INT | Kind::NON_GROUND).is_ground());
  }

  #[test] fn arithmetic_requires_numeric_operands() {
    assert!(match_bin_op(BinOp::Add, Kind::INT, Kind::FLOAT).is_ok());
    assert!(match_bin_op(BinOp::Add, Kind::INT, Kind::STRING).is_err());
  }

  #[test] fn division_is_always_float() {
    let m = match_bin_op(BinOp::Div, Kind::INT, Kind::INT).unwrap();
    assert_eq!(m.result, Kind::FLOAT);
  }
}
