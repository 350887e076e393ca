use crate::univ::Level;
use serde_derive::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

/// A trait for newtyped integers, that can be used as index types in vectors and sets.
pub trait Idx: Copy + Eq + std::hash::Hash + Ord {
  /// Convert from `T` to `usize`
  fn into_usize(self) -> usize;
  /// Convert from `usize` to `T`
  fn from_usize(_: usize) -> Self;
}

impl Idx for usize {
  fn into_usize(self) -> usize { self }
  fn from_usize(n: usize) -> Self { n }
}
impl Idx for u32 {
  fn into_usize(self) -> usize { self as _ }
  fn from_usize(n: usize) -> Self { n as _ }
}

/// A vector indexed by a custom indexing type `I`, usually a newtyped integer.
pub struct IdxVec<I, T>(pub Vec<T>, PhantomData<I>);

impl<I, T: std::fmt::Debug> std::fmt::Debug for IdxVec<I, T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

impl<I, T: Clone> Clone for IdxVec<I, T> {
  fn clone(&self) -> Self { Self(self.0.clone(), PhantomData) }
}

impl<I, T: PartialEq> PartialEq for IdxVec<I, T> {
  fn eq(&self, other: &Self) -> bool { self.0 == other.0 }
}

impl<I, T> IdxVec<I, T> {
  /// Construct a new empty [`IdxVec`].
  #[must_use]
  pub const fn new() -> Self { Self(vec![], PhantomData) }

  /// The number of elements in the [`IdxVec`].
  #[must_use]
  pub fn len(&self) -> usize { self.0.len() }

  /// Get a value by index into the vector.
  pub fn get(&self, index: I) -> Option<&T>
  where I: Idx {
    self.0.get(I::into_usize(index))
  }

  /// Get a value by index into the vector.
  pub fn get_mut(&mut self, index: I) -> Option<&mut T>
  where I: Idx {
    self.0.get_mut(I::into_usize(index))
  }

  /// Returns the value that would be returned by the next call to `push`.
  pub fn peek(&self) -> I
  where I: Idx {
    I::from_usize(self.0.len())
  }

  /// Insert a new value at the end of the vector.
  pub fn push(&mut self, val: T) -> I
  where I: Idx {
    let id = self.peek();
    self.0.push(val);
    id
  }

  /// An iterator including the indexes, like `iter().enumerate()`.
  pub fn enum_iter(&self) -> impl Iterator<Item = (I, &T)>
  where I: Idx {
    self.0.iter().enumerate().map(|(n, val)| (I::from_usize(n), val))
  }

  /// An iterator including the indexes, like `iter_mut().enumerate()`.
  pub fn enum_iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)>
  where I: Idx {
    self.0.iter_mut().enumerate().map(|(n, val)| (I::from_usize(n), val))
  }

  /// Returns `true` if the vector contains no elements.
  #[must_use]
  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<I, T> From<Vec<T>> for IdxVec<I, T> {
  fn from(vec: Vec<T>) -> Self { Self(vec, PhantomData) }
}

impl<I, T> std::iter::FromIterator<T> for IdxVec<I, T> {
  fn from_iter<J: IntoIterator<Item = T>>(iter: J) -> Self { Vec::from_iter(iter).into() }
}

impl<I, T> Default for IdxVec<I, T> {
  fn default() -> Self { vec![].into() }
}

impl<I: Idx, T> Index<I> for IdxVec<I, T> {
  type Output = T;
  fn index(&self, index: I) -> &Self::Output { &self.0[I::into_usize(index)] }
}

impl<I: Idx, T> IndexMut<I> for IdxVec<I, T> {
  fn index_mut(&mut self, index: I) -> &mut Self::Output { &mut self.0[I::into_usize(index)] }
}

#[macro_export]
macro_rules! mk_id {
  ($($id:ident,)*) => {
    $(
      #[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
      pub struct $id(pub u32);
      impl $crate::types::Idx for $id {
        fn from_usize(n: usize) -> Self { Self(n as u32) }
        fn into_usize(self) -> usize { self.0 as usize }
      }
      impl std::fmt::Debug for $id {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
      }
    )*
  };
}

mk_id! {
  MetaId,
  ConstId,
}

/// An identifier. Cheap to clone.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Id(Arc<str>);

impl Id {
  pub fn new(s: &str) -> Self { Id(s.into()) }
  pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for Id {
  fn from(s: &str) -> Self { Id::new(s) }
}

impl std::fmt::Debug for Id {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}
impl std::fmt::Display for Id {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// A module path, outermost module first. The empty path is the toplevel.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ModPath(pub Vec<Id>);

impl ModPath {
  pub const TOP: ModPath = ModPath(Vec::new());

  pub fn qualify(&self, label: Id) -> ConstAddr { ConstAddr { path: self.clone(), label } }

  /// This path and all its ancestors, innermost first.
  pub fn ancestors(&self) -> impl Iterator<Item = ModPath> + '_ {
    (0..=self.0.len()).rev().map(|n| ModPath(self.0[..n].to_vec()))
  }

  /// The key prefix shared by every constant declared directly or transitively in this module.
  pub fn key_prefix(&self) -> String {
    let mut s = String::new();
    for m in &self.0 {
      s.push_str(m.as_str());
      s.push('.');
    }
    s
  }
}

impl std::fmt::Debug for ModPath {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Display::fmt(self, f) }
}
impl std::fmt::Display for ModPath {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &*self.0 {
      [] => f.write_str("<top>"),
      [first, rest @ ..] => {
        write!(f, "{first}")?;
        rest.iter().try_for_each(|m| write!(f, ".{m}"))
      }
    }
  }
}

/// The fully qualified address of a constant.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConstAddr {
  pub path: ModPath,
  pub label: Id,
}

impl ConstAddr {
  /// The dotted path used as the registry key, e.g. `A.B.foo`.
  pub fn key(&self) -> String {
    let mut s = self.path.key_prefix();
    s.push_str(self.label.as_str());
    s
  }
}

impl std::fmt::Debug for ConstAddr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.key()) }
}
impl std::fmt::Display for ConstAddr {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.key()) }
}

/// Terms are locally nameless: binders are referenced by de Bruijn index through `Rel`,
/// hypotheses and section variables by name through `Var`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Term {
  Rel(u32),
  Var(Id),
  Sort(Level),
  Const(ConstAddr),
  /// A placeholder, together with an instance for the hypotheses of its context.
  /// The instance may be shorter than the context, missing entries are the identity.
  Meta(MetaId, Box<[Term]>),
  App(Box<Term>, Box<[Term]>),
  Lambda { name: Id, ty: Box<Term>, body: Box<Term> },
  Pi { name: Id, ty: Box<Term>, body: Box<Term> },
  LetIn { name: Id, val: Box<Term>, ty: Box<Term>, body: Box<Term> },
}

impl Default for Term {
  fn default() -> Self { Term::Sort(Level::Set) }
}

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW: usize = 1024 * 1024;

pub trait Visitable<V> {
  fn visit_d(&mut self, v: &mut V, depth: u32);
  fn visit(&mut self, v: &mut V) { self.visit_d(v, 0) }
  fn visit_cloned(&self, v: &mut V) -> Self
  where Self: Clone {
    let mut t = self.clone();
    t.visit(v);
    t
  }
}

impl<V, T: Visitable<V>> Visitable<V> for Box<T> {
  fn visit_d(&mut self, v: &mut V, d: u32) { (**self).visit_d(v, d) }
}
impl<V, T: Visitable<V>> Visitable<V> for Option<T> {
  fn visit_d(&mut self, v: &mut V, d: u32) { self.iter_mut().for_each(|t| t.visit_d(v, d)) }
}
impl<V, T: Visitable<V>> Visitable<V> for Vec<T> {
  fn visit_d(&mut self, v: &mut V, d: u32) { self.iter_mut().for_each(|t| t.visit_d(v, d)) }
}

impl<V: VisitMut> Visitable<V> for Term {
  fn visit_d(&mut self, v: &mut V, d: u32) { v.visit_term(self, d) }
}

/// An in-place term rewriter. `depth` is the number of binders crossed so far.
pub trait VisitMut {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) { self.super_visit_term(tm, depth) }

  fn super_visit_term(&mut self, tm: &mut Term, depth: u32) {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW, || match tm {
      Term::Rel(_) | Term::Var(_) | Term::Sort(_) | Term::Const(_) => {}
      Term::Meta(_, inst) => inst.iter_mut().for_each(|t| self.visit_term(t, depth)),
      Term::App(f, args) => {
        self.visit_term(f, depth);
        args.iter_mut().for_each(|t| self.visit_term(t, depth))
      }
      Term::Lambda { ty, body, .. } | Term::Pi { ty, body, .. } => {
        self.visit_term(ty, depth);
        self.visit_term(body, depth + 1)
      }
      Term::LetIn { val, ty, body, .. } => {
        self.visit_term(val, depth);
        self.visit_term(ty, depth);
        self.visit_term(body, depth + 1)
      }
    })
  }
}

struct Lift(u32);
impl VisitMut for Lift {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) {
    match tm {
      Term::Rel(i) if *i >= depth => *i += self.0,
      _ => self.super_visit_term(tm, depth),
    }
  }
}

struct SubstRel<'a>(&'a Term);
impl VisitMut for SubstRel<'_> {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) {
    match tm {
      Term::Rel(i) if *i == depth => *tm = self.0.lifted(depth),
      Term::Rel(i) if *i > depth => *i -= 1,
      _ => self.super_visit_term(tm, depth),
    }
  }
}

struct AbstractVar<'a>(&'a Id);
impl VisitMut for AbstractVar<'_> {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) {
    match tm {
      Term::Rel(i) if *i >= depth => *i += 1,
      Term::Var(x) if x == self.0 => *tm = Term::Rel(depth),
      _ => self.super_visit_term(tm, depth),
    }
  }
}

struct AbstractConst<'a>(&'a ConstAddr);
impl VisitMut for AbstractConst<'_> {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) {
    match tm {
      Term::Rel(i) if *i >= depth => *i += 1,
      Term::Const(c) if c == self.0 => *tm = Term::Rel(depth),
      _ => self.super_visit_term(tm, depth),
    }
  }
}

struct SubstVars<'a>(&'a HashMap<Id, Term>);
impl VisitMut for SubstVars<'_> {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) {
    match tm {
      Term::Var(x) =>
        if let Some(t) = self.0.get(x) {
          *tm = t.lifted(depth)
        },
      _ => self.super_visit_term(tm, depth),
    }
  }
}

impl Term {
  pub fn meta(id: MetaId) -> Term { Term::Meta(id, Box::new([])) }

  pub fn app(f: Term, args: Vec<Term>) -> Term {
    if args.is_empty() {
      return f
    }
    match f {
      Term::App(g, args0) => {
        let mut all = args0.into_vec();
        all.extend(args);
        Term::App(g, all.into())
      }
      f => Term::App(Box::new(f), args.into()),
    }
  }

  pub fn pi(name: Id, ty: Term, body: Term) -> Term {
    Term::Pi { name, ty: Box::new(ty), body: Box::new(body) }
  }

  pub fn lambda(name: Id, ty: Term, body: Term) -> Term {
    Term::Lambda { name, ty: Box::new(ty), body: Box::new(body) }
  }

  pub fn let_in(name: Id, val: Term, ty: Term, body: Term) -> Term {
    Term::LetIn { name, val: Box::new(val), ty: Box::new(ty), body: Box::new(body) }
  }

  /// Non-dependent product `a -> b`, where `b` does not see the new binder.
  pub fn arrow(a: Term, b: Term) -> Term { Term::pi(Id::new("_"), a, b.lifted(1)) }

  /// Shift free de Bruijn indices by `n`.
  pub fn lifted(&self, n: u32) -> Term {
    if n == 0 {
      return self.clone()
    }
    self.visit_cloned(&mut Lift(n))
  }

  /// Instantiate the outermost bound variable of a binder body with `val`.
  pub fn subst1(&self, val: &Term) -> Term { self.visit_cloned(&mut SubstRel(val)) }

  /// Turn the free occurrences of `Var(x)` into the innermost bound variable.
  pub fn abstract_var(&self, x: &Id) -> Term { self.visit_cloned(&mut AbstractVar(x)) }

  /// Turn the occurrences of `Const(c)` into the innermost bound variable.
  pub fn abstract_const(&self, c: &ConstAddr) -> Term { self.visit_cloned(&mut AbstractConst(c)) }

  /// Simultaneous substitution of named variables.
  pub fn subst_vars(&self, map: &HashMap<Id, Term>) -> Term {
    if map.is_empty() {
      return self.clone()
    }
    self.visit_cloned(&mut SubstVars(map))
  }

  /// Calls `f` on every subterm, with the number of binders crossed.
  pub fn walk(&self, depth: u32, f: &mut impl FnMut(&Term, u32)) {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW, || {
      f(self, depth);
      match self {
        Term::Rel(_) | Term::Var(_) | Term::Sort(_) | Term::Const(_) => {}
        Term::Meta(_, inst) => inst.iter().for_each(|t| t.walk(depth, f)),
        Term::App(g, args) => {
          g.walk(depth, f);
          args.iter().for_each(|t| t.walk(depth, f))
        }
        Term::Lambda { ty, body, .. } | Term::Pi { ty, body, .. } => {
          ty.walk(depth, f);
          body.walk(depth + 1, f)
        }
        Term::LetIn { val, ty, body, .. } => {
          val.walk(depth, f);
          ty.walk(depth, f);
          body.walk(depth + 1, f)
        }
      }
    })
  }

  pub fn free_vars(&self) -> BTreeSet<Id> {
    let mut out = BTreeSet::new();
    self.walk(0, &mut |t, _| {
      if let Term::Var(x) = t {
        out.insert(x.clone());
      }
    });
    out
  }

  pub fn metas(&self) -> BTreeSet<MetaId> {
    let mut out = BTreeSet::new();
    self.walk(0, &mut |t, _| {
      if let Term::Meta(m, _) = t {
        out.insert(*m);
      }
    });
    out
  }

  pub fn has_metas(&self) -> bool {
    let mut found = false;
    self.walk(0, &mut |t, _| found |= matches!(t, Term::Meta(..)));
    found
  }

  pub fn consts(&self) -> BTreeSet<ConstAddr> {
    let mut out = BTreeSet::new();
    self.walk(0, &mut |t, _| {
      if let Term::Const(c) = t {
        out.insert(c.clone());
      }
    });
    out
  }

  pub fn mentions_const(&self, c: &ConstAddr) -> bool {
    let mut found = false;
    self.walk(0, &mut |t, _| found |= matches!(t, Term::Const(c2) if c2 == c));
    found
  }

  /// Equality up to the names of binders.
  pub fn alpha_eq(&self, other: &Term) -> bool {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW, || match (self, other) {
      (Term::Meta(m1, i1), Term::Meta(m2, i2)) =>
        m1 == m2 && i1.len() == i2.len() && i1.iter().zip(&**i2).all(|(a, b)| a.alpha_eq(b)),
      (Term::App(f1, a1), Term::App(f2, a2)) =>
        f1.alpha_eq(f2) && a1.len() == a2.len() && a1.iter().zip(&**a2).all(|(a, b)| a.alpha_eq(b)),
      (Term::Lambda { ty: t1, body: b1, .. }, Term::Lambda { ty: t2, body: b2, .. })
      | (Term::Pi { ty: t1, body: b1, .. }, Term::Pi { ty: t2, body: b2, .. }) =>
        t1.alpha_eq(t2) && b1.alpha_eq(b2),
      (
        Term::LetIn { val: v1, ty: t1, body: b1, .. },
        Term::LetIn { val: v2, ty: t2, body: b2, .. },
      ) => v1.alpha_eq(v2) && t1.alpha_eq(t2) && b1.alpha_eq(b2),
      _ => self == other,
    })
  }
}

/// A hypothesis: a local assumption, or a local definition when `body` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct Hyp {
  pub name: Id,
  pub ty: Term,
  pub body: Option<Term>,
}

impl Hyp {
  /// The section variables this hypothesis directly depends on.
  pub fn deps(&self) -> BTreeSet<Id> {
    let mut deps = self.ty.free_vars();
    if let Some(body) = &self.body {
      deps.extend(body.free_vars())
    }
    deps
  }
}

/// An ordered context of named hypotheses, oldest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamedContext(pub Vec<Hyp>);

impl NamedContext {
  pub fn len(&self) -> usize { self.0.len() }
  pub fn is_empty(&self) -> bool { self.0.is_empty() }
  pub fn iter(&self) -> std::slice::Iter<'_, Hyp> { self.0.iter() }

  pub fn push_assum(&mut self, name: Id, ty: Term) { self.0.push(Hyp { name, ty, body: None }) }

  pub fn push_def(&mut self, name: Id, val: Term, ty: Term) {
    self.0.push(Hyp { name, ty, body: Some(val) })
  }

  pub fn lookup(&self, x: &Id) -> Option<&Hyp> { self.0.iter().rev().find(|h| h.name == *x) }

  pub fn contains(&self, x: &Id) -> bool { self.lookup(x).is_some() }

  pub fn names(&self) -> impl Iterator<Item = &Id> { self.0.iter().map(|h| &h.name) }

  /// The hypotheses of `self` not present in `other`, in order.
  pub fn without(&self, other: &NamedContext) -> NamedContext {
    NamedContext(self.0.iter().filter(|h| !other.contains(&h.name)).cloned().collect())
  }

  /// The variables standing for the local assumptions, in order.
  pub fn instance(&self) -> Vec<Term> {
    self.0.iter().filter(|h| h.body.is_none()).map(|h| Term::Var(h.name.clone())).collect()
  }

  /// Close `concl` over this context, innermost hypothesis last: `forall (h1: T1) .. , concl`.
  pub fn generalize(&self, concl: Term) -> Term {
    self.0.iter().rev().fold(concl, |acc, h| {
      let body = acc.abstract_var(&h.name);
      match &h.body {
        None => Term::pi(h.name.clone(), h.ty.clone(), body),
        Some(val) => Term::let_in(h.name.clone(), val.clone(), h.ty.clone(), body),
      }
    })
  }
}

impl<'a> IntoIterator for &'a NamedContext {
  type Item = &'a Hyp;
  type IntoIter = std::slice::Iter<'a, Hyp>;
  fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(s: &str) -> Term { Term::Var(Id::new(s)) }

  #[test]
  fn subst1_lowers_outer_indices() {
    // (fun x => #0 #1)[x := a] at the body level
    let body = Term::app(Term::Rel(0), vec![Term::Rel(1)]);
    assert_eq!(body.subst1(&v("a")), Term::app(v("a"), vec![Term::Rel(0)]));
  }

  #[test]
  fn abstract_then_subst_is_identity() {
    let t = Term::arrow(v("x"), Term::app(v("f"), vec![v("x")]));
    let abs = t.abstract_var(&Id::new("x"));
    assert!(!abs.free_vars().contains(&Id::new("x")));
    assert_eq!(abs.subst1(&v("x")), t);
  }

  #[test]
  fn generalize_binds_hypotheses() {
    let mut ctx = NamedContext::default();
    ctx.push_assum(Id::new("A"), Term::Sort(Level::Set));
    ctx.push_assum(Id::new("a"), v("A"));
    let t = ctx.generalize(v("A"));
    assert!(t.free_vars().is_empty());
    let Term::Pi { body, .. } = &t else { panic!("expected a product") };
    let Term::Pi { ty, body, .. } = &**body else { panic!("expected a product") };
    assert_eq!(**ty, Term::Rel(0));
    assert_eq!(**body, Term::Rel(1));
  }

  #[test]
  fn alpha_eq_ignores_binder_names() {
    let a = Term::pi(Id::new("x"), v("A"), Term::Rel(0));
    let b = Term::pi(Id::new("y"), v("A"), Term::Rel(0));
    assert!(a.alpha_eq(&b));
    assert_ne!(a, b);
  }
}
