//! The builtin protocol (§6): the core never hard-codes a function body, it
//! only enforces arity and per-argument kind compatibility before invoking
//! whatever a host registered.

use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::context::EvalContext;
use crate::error::BottomVal;
use crate::symbol::Symbol;
use crate::types::kind::Kind;
use crate::types::value::{Value, ValueExt};

pub type BuiltinImpl = Rc<dyn Fn(&mut EvalContext, &[Value]) -> Value>;

#[derive(Clone)]
pub struct Builtin {
  pub name: Symbol,
  pub package: Symbol,
  pub params: Vec<Kind>,
  pub result: Kind,
  pub imp: BuiltinImpl,
}

impl fmt::Debug for Builtin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Builtin").field("name", &self.name).field("package", &self.package).finish()
  }
}

#[derive(Default)]
pub struct BuiltinRegistry {
  builtins: HashMap<(Symbol, Symbol), Builtin>,
}

impl BuiltinRegistry {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn register(&mut self, b: Builtin) { self.builtins.insert((b.package, b.name), b); }

  #[must_use] pub fn get(&self, package: Symbol, name: Symbol) -> Option<&Builtin> {
    self.builtins.get(&(package, name))
  }

  /// Enforce arity and per-argument kind compatibility, then invoke. This is
  /// the one call site every `Call` expression (and every `CustomValidator`
  /// invocation) funnels through.
  pub fn call(&self, ctx: &mut EvalContext, package: Symbol, name: Symbol, args: &[Value]) -> Value {
    let Some(b) = self.get(package, name) else {
      return Value::bottom(BottomVal::not_exist(format!("builtin {name} not found in package {package}")));
    };
    if args.len() != b.params.len() {
      return Value::bottom(BottomVal::type_error(format!(
        "wrong number of arguments for {name}: expected {}, got {}", b.params.len(), args.len())));
    }
    for (arg, expected) in args.iter().zip(&b.params) {
      if !arg.kind().shape().intersects(expected.shape()) {
        return Value::bottom(BottomVal::type_error(format!(
          "argument to {name} has wrong type: expected {expected:?}, got {:?}", arg.kind())));
      }
    }
    (b.imp)(ctx, args)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::num::Num;

  #[test] fn arity_mismatch_is_a_bottom() {
    let mut reg = BuiltinRegistry::new();
    reg.register(Builtin {
      name: intern("len"), package: intern("strings"),
      params: vec![Kind::STRING], result: Kind::INT,
      imp: Rc::new(|_, args| Value::num(Num::from_i64(args[0].as_match_text().map_or(0, |s| s.len() as i64)))),
    });
    let mut ctx = EvalContext::new(Default::default());
    let result = reg.call(&mut ctx, intern("strings"), intern("len"), &[]);
    assert!(result.is_bottom());
  }

  #[test] fn correct_call_invokes_the_impl() {
    let mut reg = BuiltinRegistry::new();
    reg.register(Builtin {
      name: intern("len2"), package: intern("strings"),
      params: vec![Kind::STRING], result: Kind::INT,
      imp: Rc::new(|_, args| Value::num(Num::from_i64(args[0].as_match_text().map_or(0, |s| s.len() as i64)))),
    });
    let mut ctx = EvalContext::new(Default::default());
    let result = reg.call(&mut ctx, intern("strings"), intern("len2"), &[Value::string("hello")]);
    assert!(!result.is_bottom());
  }
}
