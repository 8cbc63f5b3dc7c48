//! The evaluation context (§5, §6 "Options", §4.9 delayed constraints): the
//! one mutable, non-shareable piece of state a single evaluation owns — the
//! label interner is process-global (symbol.rs) but the cycle stack,
//! delayed-constraint queue, and error-depth counter are per-context.

use std::rc::Rc;

use bitflags::bitflags;
use im::HashMap;

use crate::builtin::BuiltinRegistry;
use crate::symbol::Symbol;
use crate::types::structure::{Arc, Label, StructVal};
use crate::types::value::Value;

bitflags! {
  /// Options recognized at evaluation (§6).
  #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
  pub struct Options: u16 {
    /// Require all exported values to be ground.
    const CONCRETE        = 1 << 0;
    const OMIT_OPTIONAL    = 1 << 1;
    const OMIT_DEFINITIONS = 1 << 2;
    const OMIT_HIDDEN      = 1 << 3;
    const OMIT_ATTRS       = 1 << 4;
    /// Suppress default selection and incomplete-error promotion.
    const RAW              = 1 << 5;
  }
}

/// A lexical scope: the struct whose fields are visible plus any
/// comprehension-bound variables introduced at this level, and a link to
/// the lexically enclosing scope for `NodeRef { up, .. }` resolution.
#[derive(Clone, Debug)]
pub struct Scope(Rc<ScopeData>);

#[derive(Debug)]
struct ScopeData {
  structure: Option<Rc<StructVal>>,
  bindings: HashMap<Symbol, Value>,
  parent: Option<Scope>,
}

impl Scope {
  #[must_use] pub fn root(structure: Rc<StructVal>) -> Scope {
    Scope(Rc::new(ScopeData { structure: Some(structure), bindings: HashMap::new(), parent: None }))
  }

  /// A synthetic child scope introduced by a comprehension `Feed` clause,
  /// binding `name` to `value` without exposing any struct fields of its
  /// own.
  #[must_use] pub fn bind(&self, name: Symbol, value: Value) -> Scope {
    Scope(Rc::new(ScopeData {
      structure: None,
      bindings: HashMap::unit(name, value),
      parent: Some(self.clone()),
    }))
  }

  /// A child scope for entering a nested struct literal, keeping the
  /// binding chain for outer references.
  #[must_use] pub fn nested(&self, structure: Rc<StructVal>) -> Scope {
    Scope(Rc::new(ScopeData { structure: Some(structure), bindings: HashMap::new(), parent: Some(self.clone()) }))
  }

  #[must_use] pub fn structure(&self) -> Option<&Rc<StructVal>> { self.0.structure.as_ref() }

  #[must_use] pub fn ascend(&self, up: u32) -> Option<Scope> {
    let mut cur = self.clone();
    for _ in 0..up {
      cur = cur.0.parent.clone()?;
    }
    Some(cur)
  }

  /// Resolve a bare identifier (used by comprehension variables) by walking
  /// outward through binding frames.
  #[must_use] pub fn lookup_binding(&self, name: Symbol) -> Option<Value> {
    if let Some(v) = self.0.bindings.get(&name) { return Some(v.clone()) }
    self.0.parent.as_ref().and_then(|p| p.lookup_binding(name))
  }

  #[must_use] pub fn find_arc(&self, label: Label) -> Option<Arc> {
    self.0.structure.as_ref().and_then(|s| s.find(label))
  }
}

/// A constraint scheduled because unifying a reference with an atom would
/// force the reference's value before it is evaluable (§4.9).
#[derive(Clone, Debug)]
pub struct DelayedConstraint {
  pub target: Arc,
  pub atom: Value,
}

/// Per-evaluation mutable state: the cycle-sentinel stack, the
/// delayed-constraint queue, and bookkeeping for the "better error" retry
/// rule and disjunction normalization's early-exit hook.
#[derive(Default)]
pub struct EvalContext {
  cycle_stack: Vec<Arc>,
  delayed: Vec<DelayedConstraint>,
  error_depth: u32,
  pub options: Options,
  /// §4.5/§9: stop distributing a disjunction over unification as soon as a
  /// single unmarked-subsuming default remains. Disabled by default so
  /// results match the (exponential but exhaustive) reference algorithm;
  /// a host may opt in for performance.
  pub stop_on_decisive_default: bool,
  draining_delayed: bool,
  pub builtins: Option<Rc<BuiltinRegistry>>,
}

impl EvalContext {
  #[must_use] pub fn new(options: Options) -> EvalContext {
    EvalContext { options, ..Default::default() }
  }

  #[must_use] pub fn with_builtins(mut self, builtins: Rc<BuiltinRegistry>) -> EvalContext {
    self.builtins = Some(builtins);
    self
  }

  pub fn push_cycle_sentinel(&mut self, arc: Arc) { self.cycle_stack.push(arc) }
  pub fn pop_cycle_sentinel(&mut self) -> Option<Arc> { self.cycle_stack.pop() }

  #[must_use] pub fn is_on_cycle_stack(&self, arc: &Arc) -> bool {
    self.cycle_stack.iter().any(|a| Arc::ptr_eq(a, arc))
  }

  /// The arc whose expression is currently being forced — the frame a
  /// `Conjunction` node's `unify` call is always evaluated inside of,
  /// regardless of which ancestor frame the cycle bottom it is unifying
  /// against happens to name (§4.9). Delayed-constraint scheduling targets
  /// this frame rather than the bottom's own `cyclic_arc`, so the schedule
  /// is correct irrespective of which field a caller happened to force
  /// first (forcing `a` before `b` must resolve identically to forcing `b`
  /// before `a`).
  #[must_use] pub fn innermost_arc(&self) -> Option<Arc> {
    self.cycle_stack.last().cloned()
  }

  #[must_use] pub fn depth(&self) -> u32 { self.cycle_stack.len() as u32 }

  pub fn schedule_delayed(&mut self, c: DelayedConstraint) {
    log::debug!("scheduling delayed constraint against {:?}", c.target.label());
    self.delayed.push(c)
  }

  /// Drain the delayed-constraint queue once the outermost field evaluation
  /// completes (§4.9). Guards against re-entrant draining, as the design
  /// notes (§9) require.
  pub fn drain_delayed(&mut self, mut apply: impl FnMut(&mut EvalContext, &DelayedConstraint) -> Value) {
    if self.draining_delayed || self.depth() != 0 { return }
    if self.delayed.is_empty() { return }
    self.draining_delayed = true;
    log::debug!("draining {} delayed constraint(s)", self.delayed.len());
    while let Some(c) = self.delayed.pop() {
      let result = apply(self, &c);
      if result.is_bottom() {
        log::warn!("delayed constraint against {:?} failed", c.target.label());
        *c.target.0.cache.borrow_mut() = crate::types::structure::ArcCache::Done(result);
      }
    }
    self.draining_delayed = false;
  }

  pub fn enter_error_context(&mut self) -> u32 { self.error_depth += 1; self.error_depth }
  pub fn exit_error_context(&mut self) { self.error_depth = self.error_depth.saturating_sub(1) }
}

use crate::types::value::ValueExt as _;

#[cfg(test)]
mod tests {
  use super::*;

  #[test] fn error_context_tracks_nesting_depth() {
    let mut ctx = EvalContext::new(Options::empty());
    assert_eq!(ctx.enter_error_context(), 1);
    assert_eq!(ctx.enter_error_context(), 2);
    ctx.exit_error_context();
    assert_eq!(ctx.enter_error_context(), 2);
    ctx.exit_error_context();
    ctx.exit_error_context();
    // Exiting past zero saturates rather than underflowing.
    ctx.exit_error_context();
    assert_eq!(ctx.enter_error_context(), 1);
  }
}
