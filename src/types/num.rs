//! Arbitrary-precision decimal numbers with an int/float subkind (§4.2).
//!
//! The teacher's own `Cargo.toml` already pulls in `num` for exact integer
//! arithmetic; the closest sibling in the retrieval pack that models an
//! embedded query language (`surrealdb`) reaches for `bigdecimal` for the
//! same "numbers that must never silently lose precision" requirement, so
//! that crate backs [`Num`] here.

use std::cmp::Ordering;
use std::fmt;

use bigdecimal::{BigDecimal, RoundingMode, Signed, Zero};
use num::ToPrimitive;

/// Which Go-style literal form produced a number, kept only for rendering —
/// arithmetic never consults it.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ReprHint {
  #[default]
  Decimal,
  Hex,
  Octal,
  Binary,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NumKind { Int, Float }

/// A single arbitrary-precision number, carrying the subkind the literal (or
/// the operation that produced it) was tagged with.
#[derive(Clone, Debug)]
pub struct Num {
  pub value: BigDecimal,
  pub subkind: NumKind,
  pub repr: ReprHint,
}

impl PartialEq for Num {
  fn eq(&self, other: &Self) -> bool { self.value == other.value }
}

impl Num {
  #[must_use] pub fn int(value: BigDecimal) -> Self { Num { value, subkind: NumKind::Int, repr: ReprHint::Decimal } }
  #[must_use] pub fn float(value: BigDecimal) -> Self { Num { value, subkind: NumKind::Float, repr: ReprHint::Decimal } }

  #[must_use] pub fn from_i64(n: i64) -> Self { Num::int(BigDecimal::from(n)) }

  #[must_use] pub fn is_int(&self) -> bool { self.subkind == NumKind::Int }

  /// Whether `self.value` has a zero fractional part, regardless of subkind.
  #[must_use] pub fn is_whole(&self) -> bool {
    self.value == self.value.with_scale(0)
  }

  /// Attempt to narrow a float-subkind value to int: succeeds only when the
  /// value has no fractional part. Used when a numeric atom meets the
  /// `int` basic type (§4.2, §4.4 "subkind narrowing").
  #[must_use] pub fn narrow_to_int(&self) -> Option<Num> {
    if self.is_whole() { Some(Num::int(self.value.with_scale(0))) } else { None }
  }

  #[must_use] pub fn is_zero(&self) -> bool { self.value.is_zero() }
  #[must_use] pub fn is_negative(&self) -> bool { self.value.is_negative() }

  /// Smallest integer `>= self` (§4.2 "integer bounds are tightened").
  #[must_use] pub fn ceil(&self) -> Num { Num::int(self.value.with_scale_round(0, RoundingMode::Ceiling)) }
  /// Largest integer `<= self`.
  #[must_use] pub fn floor(&self) -> Num { Num::int(self.value.with_scale_round(0, RoundingMode::Floor)) }

  #[must_use] pub fn neg(&self) -> Num { Num { value: -self.value.clone(), subkind: self.subkind, repr: self.repr } }

  fn result_subkind(a: &Num, b: &Num) -> NumKind {
    if a.subkind == NumKind::Float || b.subkind == NumKind::Float { NumKind::Float } else { NumKind::Int }
  }

  #[must_use] pub fn add(&self, other: &Num) -> Num {
    Num { value: &self.value + &other.value, subkind: Self::result_subkind(self, other), repr: ReprHint::Decimal }
  }
  #[must_use] pub fn sub(&self, other: &Num) -> Num {
    Num { value: &self.value - &other.value, subkind: Self::result_subkind(self, other), repr: ReprHint::Decimal }
  }
  #[must_use] pub fn mul(&self, other: &Num) -> Num {
    Num { value: &self.value * &other.value, subkind: Self::result_subkind(self, other), repr: ReprHint::Decimal }
  }

  /// `/` always yields float (§4.2).
  pub fn div(&self, other: &Num) -> Result<Num, &'static str> {
    if other.is_zero() { return Err("division by zero") }
    let quotient = (&self.value / &other.value).with_scale_round(34, RoundingMode::HalfEven);
    Ok(Num::float(quotient))
  }

  /// Truncating integer division; operands must both be integers.
  pub fn quo(&self, other: &Num) -> Result<Num, &'static str> {
    if !self.is_int() || !other.is_int() { return Err("mismatched types") }
    if other.is_zero() { return Err("division by zero") }
    let (int_part, _) = self.value.with_scale(0).as_bigint_and_exponent();
    let (other_part, _) = other.value.with_scale(0).as_bigint_and_exponent();
    Ok(Num::int(BigDecimal::from(int_part / other_part)))
  }

  /// Euclidean-style remainder matching `quo` (C-style truncating division).
  pub fn rem(&self, other: &Num) -> Result<Num, &'static str> {
    if !self.is_int() || !other.is_int() { return Err("mismatched types") }
    if other.is_zero() { return Err("division by zero") }
    let (int_part, _) = self.value.with_scale(0).as_bigint_and_exponent();
    let (other_part, _) = other.value.with_scale(0).as_bigint_and_exponent();
    Ok(Num::int(BigDecimal::from(int_part % other_part)))
  }

  /// Floored modulo (always has the sign of the divisor), matching CUE's
  /// `mod` rather than Rust's `%`.
  pub fn modulo(&self, other: &Num) -> Result<Num, &'static str> {
    let r = self.rem(other)?;
    if !r.is_zero() && r.is_negative() != other.is_negative() { Ok(r.add(other)) } else { Ok(r) }
  }

  #[must_use] pub fn cmp(&self, other: &Num) -> Ordering { self.value.cmp(&other.value) }

  /// Integer-aware rounding used by bound simplification (§4.3): rounds a
  /// non-integer delta toward negative infinity when both endpoints are
  /// integer-kinded, otherwise returns the value unchanged.
  #[must_use] pub fn floor_if_int(&self) -> BigDecimal {
    if self.is_int() { self.value.with_scale_round(0, RoundingMode::Floor) } else { self.value.clone() }
  }

  #[must_use] pub fn to_i64(&self) -> Option<i64> { self.value.to_i64() }
}

impl fmt::Display for Num {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.value) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::str::FromStr;

  fn n(s: &str, k: NumKind) -> Num { Num { value: BigDecimal::from_str(s).unwrap(), subkind: k, repr: ReprHint::Decimal } }

  #[test] fn division_is_always_float() {
    let a = n("7", NumKind::Int);
    let b = n("2", NumKind::Int);
    let r = a.div(&b).unwrap();
    assert_eq!(r.subkind, NumKind::Float);
  }

  #[test] fn division_by_zero_is_an_error() {
    let a = n("7", NumKind::Int);
    let z = n("0", NumKind::Int);
    assert!(a.div(&z).is_err());
    assert!(a.quo(&z).is_err());
  }

  #[test] fn quo_requires_integers() {
    let a = n("7", NumKind::Float);
    let b = n("2", NumKind::Int);
    assert!(a.quo(&b).is_err());
  }

  #[test] fn narrow_to_int_requires_whole_value() {
    let whole = n("3.0", NumKind::Float);
    let frac = n("3.4", NumKind::Float);
    assert!(whole.narrow_to_int().is_some());
    assert!(frac.narrow_to_int().is_none());
  }

  #[test] fn ceil_and_floor_round_away_from_and_toward_zero_respectively() {
    let v = n("1.1", NumKind::Float);
    assert_eq!(v.ceil().to_i64(), Some(2));
    assert_eq!(v.floor().to_i64(), Some(1));
    let whole = n("3", NumKind::Int);
    assert_eq!(whole.ceil().to_i64(), Some(3));
    assert_eq!(whole.floor().to_i64(), Some(3));
  }

  #[test] fn modulo_takes_divisor_sign() {
    let a = n("-7", NumKind::Int);
    let b = n("3", NumKind::Int);
    let r = a.modulo(&b).unwrap();
    assert_eq!(r.value, BigDecimal::from_str("2").unwrap());
  }
}
