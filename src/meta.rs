use crate::entry::SideEffects;
use crate::env::Env;
use crate::types::{Id, IdxVec, MetaId, NamedContext, Term, VisitMut, Visitable};
use crate::univ::UState;
use std::collections::{BTreeSet, HashMap};

/// A placeholder: a conclusion to prove in a named context, and its solution once known.
#[derive(Clone, Debug)]
pub struct MetaInfo {
  pub ctx: NamedContext,
  pub concl: Term,
  pub body: Option<Term>,
}

/// The metavariable assignment shared by the goals of a proof, together with the universe
/// state and the private constants declared so far.
#[derive(Clone, Debug, Default)]
pub struct MetaState {
  pub metas: IdxVec<MetaId, MetaInfo>,
  pub ustate: UState,
  pub effects: SideEffects,
}

struct Instantiate<'a>(&'a MetaState);

impl VisitMut for Instantiate<'_> {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) {
    self.super_visit_term(tm, depth);
    if let Term::Meta(m, inst) = tm {
      let info = &self.0.metas[*m];
      if let Some(body) = &info.body {
        let body = self.0.instantiate(body);
        let map: HashMap<Id, Term> =
          info.ctx.names().cloned().zip(inst.iter().cloned()).collect();
        // the body lives in the meta's context and has no loose de Bruijn indices
        *tm = body.subst_vars(&map)
      }
    }
  }
}

impl MetaState {
  pub fn new(env: &Env) -> Self {
    let ustate = UState::with_local(env.universes().clone(), env.poly_univs().clone());
    MetaState { metas: IdxVec::new(), ustate, effects: SideEffects::new() }
  }

  pub fn new_meta(&mut self, ctx: NamedContext, concl: Term) -> MetaId {
    self.metas.push(MetaInfo { ctx, concl, body: None })
  }

  pub fn info(&self, m: MetaId) -> &MetaInfo { &self.metas[m] }

  pub fn is_defined(&self, m: MetaId) -> bool { self.metas[m].body.is_some() }

  pub fn define(&mut self, m: MetaId, body: Term) {
    let info = &mut self.metas[m];
    assert!(info.body.is_none(), "metavariable {m:?} defined twice");
    info.body = Some(body)
  }

  /// Replace every solved metavariable by its solution, recursively.
  pub fn instantiate(&self, t: &Term) -> Term {
    if !t.has_metas() {
      return t.clone()
    }
    t.visit_cloned(&mut Instantiate(self))
  }

  /// Whether `m` appears in `t` once the solved metavariables are unfolded.
  pub fn occurs(&self, m: MetaId, t: &Term) -> bool {
    let mut seen = BTreeSet::new();
    let mut todo: Vec<MetaId> = t.metas().into_iter().collect();
    while let Some(n) = todo.pop() {
      if n == m {
        return true
      }
      if seen.insert(n) {
        if let Some(body) = &self.metas[n].body {
          todo.extend(body.metas())
        }
      }
    }
    false
  }

  /// The metavariables still waiting for a solution.
  pub fn undefined(&self) -> Vec<MetaId> {
    self.metas.enum_iter().filter(|(_, info)| info.body.is_none()).map(|(m, _)| m).collect()
  }

  /// Store the instantiated form of every solution, so that later lookups do not chase chains.
  pub fn normalize(&mut self) {
    let bodies: Vec<_> =
      self.metas.enum_iter().map(|(_, info)| info.body.as_ref().map(|b| self.instantiate(b))).collect();
    for ((_, info), body) in self.metas.enum_iter_mut().zip(bodies) {
      info.body = body
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::univ::Level;

  fn v(s: &str) -> Term { Term::Var(Id::new(s)) }

  #[test]
  fn instantiate_applies_instances() {
    let mut ms = MetaState::default();
    let mut ctx = NamedContext::default();
    ctx.push_assum(Id::new("h"), Term::Sort(Level::Set));
    let m = ms.new_meta(ctx.clone(), Term::Sort(Level::Set));
    let outer = ms.new_meta(ctx, Term::Sort(Level::Set));
    ms.define(m, v("h"));
    // ?outer := fun x => ?m[h := x]
    ms.define(outer, Term::lambda(Id::new("x"), v("A"), Term::Meta(m, Box::new([Term::Rel(0)]))));
    let t = ms.instantiate(&Term::meta(outer));
    assert_eq!(t, Term::lambda(Id::new("x"), v("A"), Term::Rel(0)));
    assert!(ms.undefined().is_empty());
  }

  #[test]
  fn short_instance_is_identity() {
    let mut ms = MetaState::default();
    let mut ctx = NamedContext::default();
    ctx.push_assum(Id::new("h"), Term::Sort(Level::Set));
    let m = ms.new_meta(ctx, Term::Sort(Level::Set));
    ms.define(m, Term::app(v("f"), vec![v("h")]));
    assert_eq!(ms.instantiate(&Term::meta(m)), Term::app(v("f"), vec![v("h")]));
  }
}
