use crate::entry::{ProofEntry, SideEffect, SideEffects};
use crate::env::Env;
use crate::error::DeclError;
use crate::types::{ConstAddr, Term};
use crate::univ::{ContextSet, Level, UState, UnivEntry};
use crate::{stat, vprintln};
use std::collections::BTreeSet;

fn lookup<'a>(effects: &'a SideEffects, env: &'a Env, c: &ConstAddr) -> Option<&'a SideEffect> {
  effects.get(c).or_else(|| env.private_constant(c))
}

/// The private constants `t` refers to, directly or through other private constants, each
/// listed once and after the ones its body needs.
pub(crate) fn private_closure<'a>(t: &Term, effects: &'a SideEffects, env: &'a Env) -> Vec<&'a SideEffect> {
  // explicit stack of (constant, dependencies already pushed)
  let mut order = vec![];
  let mut seen = BTreeSet::new();
  let mut stack: Vec<(&SideEffect, bool)> =
    t.consts().iter().rev().filter_map(|c| lookup(effects, env, c)).map(|e| (e, false)).collect();
  while let Some((eff, expanded)) = stack.pop() {
    if expanded {
      order.push(eff);
      continue
    }
    if !seen.insert(eff.addr.clone()) {
      continue
    }
    stack.push((eff, true));
    let deps = eff.body.consts().into_iter().chain(eff.ty.consts());
    let deps: Vec<_> = deps.filter_map(|c| lookup(effects, env, &c)).collect();
    stack.extend(deps.into_iter().rev().filter(|e| !seen.contains(&e.addr)).map(|e| (e, false)));
  }
  order
}

pub(crate) fn univ_context(univs: &UnivEntry) -> ContextSet {
  match univs {
    UnivEntry::Monomorphic(cs) => cs.clone(),
    UnivEntry::Polymorphic(uctx) => {
      let mut cs = ContextSet::with_levels(uctx.names.iter().cloned().map(Level::Var));
      uctx.constraints.iter().cloned().for_each(|c| cs.add_constraint(c));
      cs
    }
  }
}

/// Replace the references of the body of `entry` to private constants by let-bindings of
/// their bodies, and merge their universe contexts and those of the body into `ustate`. Every private constant is
/// bound once, however often it is used.
pub fn inline_private_constants(
  mut ustate: UState, env: &Env, entry: &ProofEntry,
) -> Result<(Term, UState), DeclError> {
  let body = entry.force_body()?;
  ustate.merge_context_set(&body.body_ucst)?;
  let order = private_closure(&body.term, &body.effects, env);
  if order.is_empty() {
    return Ok((body.term, ustate))
  }
  for eff in &order {
    ustate.merge_context_set(&univ_context(&eff.univs))?;
  }
  let term = order.iter().rev().fold(body.term, |acc, eff| {
    stat("private constant inlined");
    vprintln!("inlining {}", eff.addr);
    Term::let_in(eff.addr.label.clone(), eff.body.clone(), eff.ty.clone(), acc.abstract_const(&eff.addr))
  });
  Ok((term, ustate))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entry::{BodyOutput, SideEffectRole};
  use crate::types::{Id, ModPath};
  use crate::univ::UGraph;

  fn eff(name: &str, body: Term) -> SideEffect {
    SideEffect {
      addr: ModPath::TOP.qualify(Id::new(name)),
      body,
      ty: Term::Var(Id::new("T")),
      univs: UnivEntry::default(),
      opaque: crate::entry::Opacity::Opaque,
      role: SideEffectRole::Subproof,
    }
  }

  #[test]
  fn dependencies_come_first() {
    let env = Env::new(crate::Config::DEFAULT);
    let p1 = eff("p1", Term::Var(Id::new("t")));
    let p2 = eff("p2", Term::Const(p1.addr.clone()));
    let mut effects = SideEffects::new();
    effects.push(p2.clone());
    effects.push(p1.clone());
    let t = Term::app(Term::Const(p2.addr.clone()), vec![Term::Const(p2.addr.clone())]);
    let order: Vec<_> = private_closure(&t, &effects, &env).into_iter().map(|e| e.addr.clone()).collect();
    assert_eq!(order, vec![p1.addr.clone(), p2.addr.clone()]);
    let entry = ProofEntry::from_output(BodyOutput { term: t, effects, ..Default::default() });
    let (term, _) = inline_private_constants(UState::new(UGraph::new()), &env, &entry).unwrap();
    assert!(term.consts().is_empty());
    // let p1 := t in let p2 := p1 in p2 p2
    let expected = Term::let_in(
      Id::new("p1"),
      Term::Var(Id::new("t")),
      Term::Var(Id::new("T")),
      Term::let_in(
        Id::new("p2"),
        Term::Rel(0),
        Term::Var(Id::new("T")),
        Term::app(Term::Rel(0), vec![Term::Rel(0)]),
      ),
    );
    assert_eq!(term, expected);
  }

  #[test]
  fn body_universes_are_kept() {
    let env = Env::new(crate::Config::DEFAULT);
    let (u, v) = (Level::var("u"), Level::var("v"));
    let mut body_ucst = ContextSet::new();
    body_ucst.add_constraint(crate::univ::Constraint::le(u.clone(), v.clone()));
    let mut effects = SideEffects::new();
    let mut p = eff("p", Term::Var(Id::new("t")));
    p.univs = UnivEntry::Monomorphic(ContextSet::with_levels([Level::var("w")]));
    effects.push(p.clone());
    // with and without private constants to inline
    for effects in [SideEffects::new(), effects] {
      let out = BodyOutput { term: Term::Const(p.addr.clone()), body_ucst: body_ucst.clone(), effects };
      let entry = ProofEntry::from_output(out);
      let (_, ust) = inline_private_constants(UState::new(UGraph::new()), &env, &entry).unwrap();
      assert!(body_ucst.is_subset(ust.context_set()));
    }
  }
}
