//! The expression tree the host (parser + import resolver) builds and hands
//! to the core (§3 "References & expressions"). Expressions are immutable
//! once built and `Rc`-shared, exactly like the teacher's own
//! `type Ty = Rc<TyKind>` / `type Expr = Rc<ExprKind>` mir representation.

use std::rc::Rc;

use crate::symbol::Symbol;
use crate::types::kind::BinOp;
use crate::types::structure::{Attr, ArcFlags, Label};
use crate::types::value::{Base, Value};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp { Pos, Neg, Not }

/// A feed/guard clause in a comprehension. `Yield` is folded into the
/// enclosing [`crate::types::structure::Comprehension`]'s `key`/`value`
/// fields rather than kept as a third clause kind, which is an
/// implementation simplification over §3's Feed/Guard/Yield clause tree:
/// every comprehension clause list still terminates in exactly one yield,
/// so the flattened list plus a trailing key/value pair is equivalent.
///
/// `for value in source` binds only `value_binding` to each iterated
/// element; `for key, value in source` additionally binds `key_binding` to
/// the element's label, stringified — the form the §8 scenario 6 example
/// (`for k,v in {a:1,b:2,c:3} if v>1`) needs.
#[derive(Clone, Debug)]
pub enum Clause {
  Feed { key_binding: Option<Symbol>, value_binding: Symbol, source: Expr },
  Guard { cond: Expr },
}

#[derive(Clone, Debug)]
pub enum InterpPart {
  Str(Rc<str>),
  Expr(Expr),
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
  pub label: Label,
  pub expr: Expr,
  pub flags: ArcFlags,
  pub attrs: Vec<Attr>,
  pub doc: Option<Rc<str>>,
}

#[derive(Clone, Debug)]
pub struct StructLit {
  pub fields: Vec<FieldDecl>,
  pub embeds: Vec<Expr>,
  pub emit: Option<Expr>,
  pub template: Option<Expr>,
  pub comprehensions: Vec<crate::types::structure::Comprehension>,
  pub is_definition: bool,
}

#[derive(Clone, Debug)]
pub struct ListLit {
  pub elems: Vec<Expr>,
  /// Present for an open list (`[...T]`): the trailing element-type
  /// expression and, separately, a minimum-length bound.
  pub tail: Option<Expr>,
}

/// The tagged expression-tree node (§3).
#[derive(Clone, Debug)]
pub enum ExprKind {
  /// A literal that is already a fully- or partially-built [`Value`] (the
  /// leaves the parser hands down: atoms, basic types, bounds).
  Lit(Value),
  Top,
  Bottom(&'static str),
  /// `NodeRef(target scope, label)`: `up` counts lexical scope hops (0 =
  /// the innermost enclosing struct), matching the de Bruijn-style
  /// addressing the parser naturally produces for statically resolved
  /// references.
  NodeRef { up: u32, label: Label },
  Ident(Symbol),
  Selector(Expr, Label),
  Index(Expr, Expr),
  Slice(Expr, Option<Expr>, Option<Expr>),
  Call(Expr, Vec<Expr>),
  Unary(UnaryOp, Expr),
  Binary(BinOp, Expr, Expr),
  /// Explicit structural conjunction (`A & B` as it appears in source,
  /// distinct from the runtime `Unification` value built when a conjunction
  /// cannot reduce immediately).
  Conjunction(Expr, Expr),
  Disjunction(Vec<(Expr, bool)>),
  Interpolation(Vec<InterpPart>),
  StructLit(StructLit),
  ListLit(ListLit),
  ListComprehension { clauses: Vec<Clause>, body: Expr },
  FieldComprehension { clauses: Vec<Clause>, is_template: bool, key: Option<Expr>, value: Expr, optional: bool },
}

#[derive(Debug)]
pub struct ExprNode {
  pub base: Base,
  pub kind: ExprKind,
}

/// An `Rc`-shared, immutable expression-tree handle.
pub type Expr = Rc<ExprNode>;

#[must_use] pub fn expr_with_base(kind: ExprKind, base: Base) -> Expr { Rc::new(ExprNode { base, kind }) }

/// Build a synthetic-position expression node; used throughout the
/// unifier/evaluator for nodes built from already-evaluated operands rather
/// than parsed text.
pub trait ExprExt { fn new(kind: ExprKind) -> Expr; }
impl ExprExt for Expr {
  fn new(kind: ExprKind) -> Expr { expr_with_base(kind, Base::Synthetic) }
}
