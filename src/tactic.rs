//! A small goal-directed tactic engine. A tactic works on the first goal of a [`Proofview`],
//! replacing it with its subgoals.

use crate::abstraction::{declare_abstract, AbstractRequest};
use crate::entry::{DeclKind, Opacity};
use crate::env::Env;
use crate::error::DeclError;
use crate::meta::MetaState;
use crate::types::{Id, MetaId, NamedContext, Term};
use crate::vprintln;

/// The goals of a proof, over a shared metavariable assignment.
#[derive(Clone, Debug)]
pub struct Proofview {
  pub name: Id,
  pub poly: bool,
  /// Open goals, the focused one first.
  pub goals: Vec<MetaId>,
  pub metas: MetaState,
  /// Set by tactics that skip checking their result.
  pub unsafe_step: bool,
}

impl Proofview {
  pub fn first_goal(&self) -> Result<MetaId, DeclError> {
    self.goals.first().copied().ok_or_else(|| DeclError::tactic("focus", "no goals"))
  }

  pub fn goal(&self, m: MetaId) -> (&NamedContext, &Term) {
    let info = self.metas.info(m);
    (&info.ctx, &info.concl)
  }

  /// Solve `g` with `t`, which may mention new goals `subgoals`; they take `g`'s place.
  /// Fails if `t` mentions `g`, even through solved metavariables.
  pub fn refine(&mut self, g: MetaId, t: Term, subgoals: Vec<MetaId>) -> Result<(), DeclError> {
    if self.metas.occurs(g, &t) {
      return Err(DeclError::tactic("refine", format!("?{} occurs in its own solution", g.0)))
    }
    self.metas.define(g, t);
    match self.goals.iter().position(|&h| h == g) {
      Some(pos) => drop(self.goals.splice(pos..=pos, subgoals)),
      None => self.goals.extend(subgoals),
    }
    Ok(())
  }

  /// The goals not solved yet, in order.
  pub fn open_goals(&self) -> Vec<MetaId> {
    self.goals.iter().copied().filter(|&g| !self.metas.is_defined(g)).collect()
  }
}

pub trait Tactic: Send + Sync {
  fn name(&self) -> &'static str;
  fn run(&self, env: &mut Env, pv: &mut Proofview) -> Result<(), DeclError>;
}

pub struct Idtac;
impl Tactic for Idtac {
  fn name(&self) -> &'static str { "idtac" }
  fn run(&self, _: &mut Env, _: &mut Proofview) -> Result<(), DeclError> { Ok(()) }
}

pub struct Fail(pub String);
impl Tactic for Fail {
  fn name(&self) -> &'static str { "fail" }
  fn run(&self, _: &mut Env, _: &mut Proofview) -> Result<(), DeclError> {
    Err(DeclError::tactic("fail", self.0.clone()))
  }
}

/// Run the first tactic, then the second on the resulting first goal.
pub struct Then(pub Box<dyn Tactic>, pub Box<dyn Tactic>);
impl Tactic for Then {
  fn name(&self) -> &'static str { "then" }
  fn run(&self, env: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    self.0.run(env, pv)?;
    self.1.run(env, pv)
  }
}

/// Introduce the head product or let-binding of the goal as a hypothesis.
pub struct Intro(pub Id);
impl Tactic for Intro {
  fn name(&self) -> &'static str { "intro" }
  fn run(&self, _: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    let g = pv.first_goal()?;
    let (ctx, concl) = pv.goal(g);
    let x = &self.0;
    if ctx.contains(x) {
      return Err(DeclError::tactic("intro", format!("{x} is already used")))
    }
    let mut ctx2 = ctx.clone();
    // the new goal sees the old hypotheses unchanged, and the binder as `x`
    let mut inst: Vec<Term> = ctx.names().cloned().map(Term::Var).collect();
    inst.push(Term::Rel(0));
    let (new_concl, mk): (Term, Box<dyn FnOnce(Term) -> Term>) = match concl {
      Term::Pi { ty, body, .. } => {
        ctx2.push_assum(x.clone(), (**ty).clone());
        let ty = (**ty).clone();
        let x = x.clone();
        (body.subst1(&Term::Var(x.clone())), Box::new(move |b| Term::lambda(x, ty, b)))
      }
      Term::LetIn { val, ty, body, .. } => {
        ctx2.push_def(x.clone(), (**val).clone(), (**ty).clone());
        let (val, ty) = ((**val).clone(), (**ty).clone());
        let x = x.clone();
        (body.subst1(&Term::Var(x.clone())), Box::new(move |b| Term::let_in(x, val, ty, b)))
      }
      _ => return Err(DeclError::tactic("intro", "no product to introduce")),
    };
    let g2 = pv.metas.new_meta(ctx2, new_concl);
    pv.refine(g, mk(Term::Meta(g2, inst.into())), vec![g2])
  }
}

/// `Intro` for each name in turn.
pub struct Intros(pub Vec<Id>);
impl Tactic for Intros {
  fn name(&self) -> &'static str { "intros" }
  fn run(&self, env: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    self.0.iter().try_for_each(|x| Intro(x.clone()).run(env, pv))
  }
}

/// Close the goal with a hypothesis of the same type.
pub struct Assumption;
impl Tactic for Assumption {
  fn name(&self) -> &'static str { "assumption" }
  fn run(&self, _: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    let g = pv.first_goal()?;
    let (ctx, concl) = pv.goal(g);
    let concl = pv.metas.instantiate(concl);
    let hyp = ctx.iter().rev().find(|h| pv.metas.instantiate(&h.ty).alpha_eq(&concl));
    let Some(hyp) = hyp else { return Err(DeclError::tactic("assumption", "no such assumption")) };
    let t = Term::Var(hyp.name.clone());
    pv.refine(g, t, vec![])
  }
}

/// The type of `t` when it can be read off syntactically: hypotheses, constants, and their
/// applications.
fn type_of(env: &Env, metas: &MetaState, ctx: &NamedContext, t: &Term) -> Option<Term> {
  match t {
    Term::Var(x) => Some(ctx.lookup(x).or_else(|| env.section_context().lookup(x))?.ty.clone()),
    Term::Const(c) => env.constant_type(c).cloned(),
    Term::Meta(m, inst) if inst.is_empty() => Some(metas.info(*m).concl.clone()),
    Term::App(f, args) => {
      let mut ty = metas.instantiate(&type_of(env, metas, ctx, f)?);
      for arg in &**args {
        let Term::Pi { ty: dom, body, .. } = ty else { return None };
        if !metas.instantiate(&type_of(env, metas, ctx, arg)?).alpha_eq(&metas.instantiate(&dom)) {
          return None
        }
        ty = body.subst1(arg)
      }
      Some(ty)
    }
    _ => None,
  }
}

/// Close the goal with a term whose type matches the goal.
pub struct Exact(pub Term);
impl Tactic for Exact {
  fn name(&self) -> &'static str { "exact" }
  fn run(&self, env: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    let g = pv.first_goal()?;
    let (ctx, concl) = pv.goal(g);
    match type_of(env, &pv.metas, ctx, &self.0) {
      Some(ty) if pv.metas.instantiate(&ty).alpha_eq(&pv.metas.instantiate(concl)) => {}
      Some(ty) => return Err(DeclError::tactic("exact", format!("{} has type {ty}, not {concl}", self.0))),
      None => return Err(DeclError::tactic("exact", format!("cannot compute the type of {}", self.0))),
    }
    pv.refine(g, self.0.clone(), vec![])
  }
}

/// Close the goal with a term, without checking it. Unsafe.
pub struct ExactNoCheck(pub Term);
impl Tactic for ExactNoCheck {
  fn name(&self) -> &'static str { "exact_no_check" }
  fn run(&self, _: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    let g = pv.first_goal()?;
    pv.refine(g, self.0.clone(), vec![])?;
    pv.unsafe_step = true;
    Ok(())
  }
}

/// Solve the goal with the given tactic in a separate lemma, and use that lemma.
pub struct Abstract(pub Box<dyn Tactic>);
impl Tactic for Abstract {
  fn name(&self) -> &'static str { "abstract" }
  fn run(&self, env: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    let g = pv.first_goal()?;
    let (ctx, concl) = pv.goal(g);
    let name = Id::new(&format!("{}{}", pv.name, env.cfg.abstract_suffix));
    let req = AbstractRequest {
      name,
      poly: pv.poly,
      kind: DeclKind::Lemma,
      sign: ctx.clone(),
      secsign: env.section_context().clone(),
      opaque: Opacity::Opaque,
      tac: &*self.0,
      metas: pv.metas.clone(),
      concl: pv.metas.instantiate(concl),
    };
    let out = declare_abstract(env, req)?;
    vprintln!("abstract: {} solved by {}", pv.name, out.term);
    pv.metas = out.metas;
    pv.refine(g, out.term, vec![])?;
    pv.unsafe_step |= !out.safe;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::feedback::Silent;
  use crate::univ::Level;
  use crate::Config;
  use std::sync::Arc;

  fn setup(concl: Term) -> (Env, Proofview) {
    let env = Env::with_feedback(Config::DEFAULT, Arc::new(Silent));
    let mut metas = MetaState::new(&env);
    let mut ctx = NamedContext::default();
    ctx.push_assum(Id::new("A"), Term::Sort(Level::Set));
    let g = metas.new_meta(ctx, concl);
    (env, Proofview { name: Id::new("t"), poly: false, goals: vec![g], metas, unsafe_step: false })
  }

  fn a() -> Term { Term::Var(Id::new("A")) }

  #[test]
  fn intro_then_assumption_builds_identity() {
    let (mut env, mut pv) = setup(Term::arrow(a(), a()));
    let root = pv.goals[0];
    Then(Box::new(Intro(Id::new("x"))), Box::new(Assumption)).run(&mut env, &mut pv).unwrap();
    assert!(pv.open_goals().is_empty());
    let t = pv.metas.instantiate(&Term::meta(root));
    assert_eq!(t, Term::lambda(Id::new("x"), a(), Term::Rel(0)));
    assert!(!pv.unsafe_step);
  }

  #[test]
  fn exact_checks_types() {
    let (mut env, mut pv) = setup(Term::arrow(a(), a()));
    assert!(Exact(a()).run(&mut env, &mut pv).is_err());
    assert_eq!(pv.open_goals().len(), 1);
    ExactNoCheck(a()).run(&mut env, &mut pv).unwrap();
    assert!(pv.unsafe_step);
    assert!(pv.open_goals().is_empty());
  }

  #[test]
  fn goals_cannot_solve_themselves() {
    let (mut env, mut pv) = setup(Term::arrow(a(), a()));
    let root = pv.goals[0];
    assert!(Exact(Term::meta(root)).run(&mut env, &mut pv).is_err());
    assert!(ExactNoCheck(Term::meta(root)).run(&mut env, &mut pv).is_err());
    assert!(!pv.unsafe_step);
    // nor through a solved goal standing for them
    Intro(Id::new("x")).run(&mut env, &mut pv).unwrap();
    let sub = pv.goals[0];
    assert!(ExactNoCheck(Term::meta(root)).run(&mut env, &mut pv).is_err());
    assert_eq!(pv.open_goals(), vec![sub]);
    Assumption.run(&mut env, &mut pv).unwrap();
    let t = pv.metas.instantiate(&Term::meta(root));
    assert_eq!(t, Term::lambda(Id::new("x"), a(), Term::Rel(0)));
  }

  #[test]
  fn intro_refuses_used_names() {
    let (mut env, mut pv) = setup(Term::arrow(a(), a()));
    assert!(Intro(Id::new("A")).run(&mut env, &mut pv).is_err());
    assert!(Intro(Id::new("x")).run(&mut env, &mut pv).is_ok());
    assert!(Intro(Id::new("y")).run(&mut env, &mut pv).is_err());
  }
}
