//! Dense string interning for labels, builtin names, and package paths.
//!
//! Mirrors the teacher's own `Symbol`/`intern`/`init_dense_symbol_map` trio
//! (see `entity.rs`'s keyword tables) but backs the general case with a
//! process-global table instead of a fixed compile-time keyword set.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::{LazyLock, Mutex};

use hashbrown::HashMap;

/// An interned string. Two symbols compare equal iff they were interned
/// from equal strings, which is what makes arc-label comparison cheap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(NonZeroU32);

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Symbol({:?})", self.as_str())
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.as_str()) }
}

impl Symbol {
  /// Index into the dense reverse table used by [`init_dense_symbol_map`].
  #[must_use] pub fn into_usize(self) -> usize { (self.0.get() - 1) as usize }

  /// Clone out the underlying string. Cheap but not free; prefer comparing
  /// symbols directly where possible.
  #[must_use] pub fn as_str(self) -> String {
    INTERNER.lock().unwrap_or_else(|e| e.into_inner()).names[self.into_usize()].to_string()
  }
}

#[derive(Default)]
struct InternerTable {
  names: Vec<Box<str>>,
  map: HashMap<Box<str>, Symbol>,
}

static INTERNER: LazyLock<Mutex<InternerTable>> = LazyLock::new(|| Mutex::new(InternerTable::default()));

/// Intern a string, returning a stable [`Symbol`]. Interning the same string
/// twice returns the same symbol.
pub fn intern(s: &str) -> Symbol {
  let mut table = INTERNER.lock().unwrap_or_else(|e| e.into_inner());
  if let Some(&sym) = table.map.get(s) { return sym }
  let idx = table.names.len();
  #[allow(clippy::cast_possible_truncation)]
  let sym = Symbol(NonZeroU32::new(idx as u32 + 1).expect("symbol table overflow"));
  table.names.push(s.into());
  table.map.insert(s.into(), sym);
  sym
}

/// Build a dense array-backed reverse map for a small closed set of symbols
/// (operator names, builtin identifiers, error-code names), so that mapping
/// a [`Symbol`] back to its enum value is an array index rather than a hash
/// lookup. Entries not present in `pairs` map to `None`.
pub fn init_dense_symbol_map<T: Copy>(pairs: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let len = pairs.iter().map(|(s, _)| s.into_usize() + 1).max().unwrap_or(0);
  let mut map = vec![None; len].into_boxed_slice();
  for &(s, v) in pairs { map[s.into_usize()] = Some(v) }
  map
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn interning_is_stable() {
    let a = intern("foo");
    let b = intern("foo");
    let c = intern("bar");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.as_str(), "foo");
  }

  #[test] fn dense_map_round_trips() {
    let foo = intern("dense-foo");
    let bar = intern("dense-bar");
    let map = init_dense_symbol_map(&[(foo, 1u8), (bar, 2u8)]);
    assert_eq!(map[foo.into_usize()], Some(1));
    assert_eq!(map[bar.into_usize()], Some(2));
  }
}
