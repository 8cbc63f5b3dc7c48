//! Structs, arcs, lists, templates, comprehensions, and closedness (§3,
//! §4.6, §4.7). A `Struct` is an ordered collection of `Arc`s; a `List` is
//! represented as a `Struct` whose arcs carry integer labels (§9, resolving
//! the "two historical revisions of list representation" open question in
//! favor of the later struct-based form).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bitflags::bitflags;
use im::Vector;

use crate::symbol::Symbol;
use crate::types::expr::{Clause, Expr};
use crate::types::value::Value;

/// A field label: either an interned string feature or a small integer
/// (list index). Comparisons are cheap integer/symbol comparisons.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Label {
  Str(Symbol),
  Int(u32),
}

impl Label {
  #[must_use] pub fn as_feature_string(self) -> String {
    match self {
      Label::Str(s) => s.as_str(),
      Label::Int(i) => i.to_string(),
    }
  }
}

bitflags! {
  #[derive(Clone, Copy, PartialEq, Eq, Debug)]
  pub struct ArcFlags: u8 {
    const OPTIONAL   = 1 << 0;
    const DEFINITION = 1 << 1;
    const HIDDEN     = 1 << 2;
  }
}

#[derive(Clone, Debug)]
pub struct Attr { pub name: Symbol, pub args: Vec<Rc<str>> }

/// What occupies an arc's cache slot: nothing yet, a cycle sentinel pushed
/// while the field is being evaluated (§4.6), or the finished value.
#[derive(Clone, Debug)]
pub enum ArcCache {
  Empty,
  Sentinel(Value),
  Done(Value),
}

#[derive(Debug)]
pub struct ArcData {
  pub label: Label,
  pub expr: Expr,
  pub cache: RefCell<ArcCache>,
  pub flags: Cell<ArcFlags>,
  pub attrs: Vec<Attr>,
  pub doc: Option<Rc<str>>,
}

/// An `Rc`-shared handle to an arc. Two handles compare by pointer identity
/// via [`Arc::ptr_eq`], which is what the cycle-detection stack (§4.6) and
/// the delayed-constraint queue (§4.9) key on.
#[derive(Clone, Debug)]
pub struct Arc(pub Rc<ArcData>);

impl Arc {
  #[must_use] pub fn new(label: Label, expr: Expr, flags: ArcFlags, attrs: Vec<Attr>, doc: Option<Rc<str>>) -> Arc {
    Arc(Rc::new(ArcData { label, expr, cache: RefCell::new(ArcCache::Empty), flags: Cell::new(flags), attrs, doc }))
  }

  #[must_use] pub fn ptr_eq(a: &Arc, b: &Arc) -> bool { Rc::ptr_eq(&a.0, &b.0) }
  #[must_use] pub fn label(&self) -> Label { self.0.label }
  #[must_use] pub fn flags(&self) -> ArcFlags { self.0.flags.get() }
  #[must_use] pub fn is_hidden(&self) -> bool { self.flags().contains(ArcFlags::HIDDEN) }
  #[must_use] pub fn is_optional(&self) -> bool { self.flags().contains(ArcFlags::OPTIONAL) }
  #[must_use] pub fn is_definition(&self) -> bool { self.flags().contains(ArcFlags::DEFINITION) }

  #[must_use] pub fn cached(&self) -> Option<Value> {
    match &*self.0.cache.borrow() {
      ArcCache::Done(v) => Some(v.clone()),
      _ => None,
    }
  }
}

/// The three-state closedness lattice (§4.7).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CloseStatus {
  #[default]
  Open,
  Closed,
  /// Propagation bit: this struct is not itself closed but is nested under
  /// a definition and must finalize to closed once merged.
  ShouldFinalize,
}

impl CloseStatus {
  /// `ShouldFinalize` enforces closedness exactly like `Closed` once it has
  /// been pushed down onto a struct (§4.7) — the distinction between the two
  /// only matters for deciding whether to push the bit further down into a
  /// struct that has not yet made its own explicit closedness decision.
  #[must_use] pub fn is_closed(self) -> bool { matches!(self, CloseStatus::Closed | CloseStatus::ShouldFinalize) }

  /// The closedness of the result of unifying two structs (§4.7): OR of the
  /// operands modulo the `ShouldFinalize` propagation bit.
  #[must_use] pub fn merge(self, other: CloseStatus) -> CloseStatus {
    use CloseStatus::{Closed, Open, ShouldFinalize};
    match (self, other) {
      (Closed, _) | (_, Closed) => Closed,
      (ShouldFinalize, _) | (_, ShouldFinalize) => ShouldFinalize,
      (Open, Open) => Open,
    }
  }
}

#[derive(Clone, Debug)]
pub struct Comprehension {
  pub clauses: Vec<Clause>,
  pub is_template: bool,
  pub key: Option<Expr>,
  pub value: Expr,
  pub optional: bool,
}

#[derive(Debug)]
pub struct StructVal {
  pub arcs: RefCell<Vector<Arc>>,
  /// The optional emit-expression: a struct value that isn't a field but is
  /// the struct's own embedded scalar (`{ 3, x: 1 }`'s `3`).
  pub emit: Option<Expr>,
  pub template: RefCell<Option<Value>>,
  pub comprehensions: RefCell<Vec<Comprehension>>,
  pub close_status: Cell<CloseStatus>,
  pub is_list: bool,
  pub length: Option<Expr>,
  pub elem_type: Option<Expr>,
  /// The lexical scope this struct was built in, captured so a field's
  /// `NodeRef { up, .. }` can walk back out through enclosing structs even
  /// after the field is forced outside of its original evaluation call.
  /// `None` for structs assembled purely by unification, which never
  /// introduce new lexical nesting of their own.
  pub env: RefCell<Option<crate::context::Scope>>,
}

impl StructVal {
  #[must_use] pub fn open_struct(arcs: Vector<Arc>) -> Rc<StructVal> {
    Rc::new(StructVal {
      arcs: RefCell::new(arcs), emit: None, template: RefCell::new(None),
      comprehensions: RefCell::new(Vec::new()), close_status: Cell::new(CloseStatus::Open),
      is_list: false, length: None, elem_type: None, env: RefCell::new(None),
    })
  }

  pub fn set_env(&self, scope: crate::context::Scope) { *self.env.borrow_mut() = Some(scope) }

  #[must_use] pub fn is_closed(&self) -> bool { self.close_status.get().is_closed() }

  /// Linear, label-order scan (§4.6 "Lookup"): arcs are kept sorted by
  /// label, so callers needing stability can rely on scan order.
  #[must_use] pub fn find(&self, label: Label) -> Option<Arc> {
    self.arcs.borrow().iter().find(|a| a.label() == label).cloned()
  }

  /// Whether `label` is allowed by this struct's closedness: present
  /// explicitly, or admitted by a template/pattern. The template/pattern
  /// admission check itself lives in the unifier (it needs to invoke the
  /// template), so this only covers the "explicitly present" half.
  #[must_use] pub fn explicitly_has(&self, label: Label) -> bool {
    self.arcs.borrow().iter().any(|a| a.label() == label)
  }

  #[must_use] pub fn len(&self) -> usize { self.arcs.borrow().len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::expr::{ExprExt, ExprKind};
  use crate::symbol::intern;

  fn leaf() -> Expr { Expr::new(ExprKind::Top) }

  #[test] fn lookup_finds_by_label() {
    let label = Label::Str(intern("x"));
    let arc = Arc::new(label, leaf(), ArcFlags::empty(), vec![], None);
    let s = StructVal::open_struct(im::vector![arc]);
    assert!(s.find(label).is_some());
    assert!(s.find(Label::Str(intern("y"))).is_none());
  }

  #[test] fn closedness_merge_prefers_closed() {
    assert_eq!(CloseStatus::Open.merge(CloseStatus::Closed), CloseStatus::Closed);
    assert_eq!(CloseStatus::Closed.merge(CloseStatus::Open), CloseStatus::Closed);
    assert_eq!(CloseStatus::Open.merge(CloseStatus::Open), CloseStatus::Open);
  }
}
