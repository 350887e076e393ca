use crate::env::Env;
use crate::error::DeclError;
use crate::meta::MetaState;
use crate::proof::ProofState;
use crate::tactic::Tactic;
use crate::types::{Id, NamedContext, Term};
use crate::univ::UState;
use crate::vprintln;

#[derive(Debug)]
struct Pending {
  ps: ProofState,
  /// False once any step of the proof was unsafe.
  safe: bool,
}

/// The proofs in progress, the focused one last.
#[derive(Debug, Default)]
pub struct ProofStack {
  stack: Vec<Pending>,
  /// The universe state of the last proof that left the stack.
  last_ustate: Option<UState>,
}

impl ProofStack {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize { self.stack.len() }
  pub fn is_empty(&self) -> bool { self.stack.is_empty() }

  /// Focus a new proof.
  pub fn push(&mut self, ps: ProofState) {
    vprintln!("focus {}", ps.name());
    self.stack.push(Pending { ps, safe: true })
  }

  /// Remove the focused proof, returning it and whether all its steps were safe.
  pub fn pop(&mut self) -> Result<(ProofState, bool), DeclError> {
    let Pending { ps, safe } = self.stack.pop().ok_or(DeclError::NoFocusedProof)?;
    self.last_ustate = Some(ps.metas().ustate.clone());
    Ok((ps, safe))
  }

  /// Abandon the proof named `name`, wherever it is on the stack.
  pub fn discard(&mut self, name: &Id) -> Result<(), DeclError> {
    let i = self.stack.iter().rposition(|p| p.ps.name() == name);
    let i = i.ok_or_else(|| DeclError::NoSuchProof(name.clone()))?;
    let Pending { ps, .. } = self.stack.remove(i);
    vprintln!("discard {}", ps.name());
    self.last_ustate = Some(ps.metas().ustate.clone());
    Ok(())
  }

  pub fn current(&self) -> Option<&ProofState> { self.stack.last().map(|p| &p.ps) }

  /// Run `f` on the focused proof.
  pub fn with_current_proof<R>(
    &mut self, f: impl FnOnce(&mut ProofState) -> Result<R, DeclError>,
  ) -> Result<R, DeclError> {
    f(&mut self.stack.last_mut().ok_or(DeclError::NoFocusedProof)?.ps)
  }

  /// Apply `tac` to the first goal of the focused proof. The proof stays unsafe once a step
  /// was.
  pub fn by(&mut self, env: &mut Env, tac: &dyn Tactic) -> Result<bool, DeclError> {
    let p = self.stack.last_mut().ok_or(DeclError::NoFocusedProof)?;
    let step_safe = p.ps.by(env, tac)?;
    p.safe &= step_safe;
    Ok(step_safe)
  }

  /// Whether every step of the focused proof so far was safe.
  pub fn is_safe(&self) -> Result<bool, DeclError> {
    Ok(self.stack.last().ok_or(DeclError::NoFocusedProof)?.safe)
  }

  /// Refresh the focused proof after a declaration made while it was focused.
  pub fn update_global_env(&mut self, env: &Env) -> Result<(), DeclError> {
    self.with_current_proof(|ps| {
      ps.update_global_env(env);
      Ok(())
    })
  }

  /// The assignment and context of goal `i` (from 1) of the focused proof.
  pub fn get_goal_context(&self, i: usize) -> Result<(&MetaState, &NamedContext, &Term), DeclError> {
    let ps = self.current().ok_or(DeclError::NoFocusedProof)?;
    let (ctx, concl) = ps.goal_context(i)?;
    Ok((ps.metas(), ctx, concl))
  }

  pub fn get_current_goal_context(&self) -> Result<(&MetaState, &NamedContext, &Term), DeclError> {
    self.get_goal_context(1)
  }

  /// The assignment and context to elaborate terms in: those of the first goal, or failing
  /// that, the focused proof's assignment with the section variables, or failing that, a
  /// fresh assignment that keeps the universes of the last proof.
  pub fn get_current_context(&self, env: &Env) -> (MetaState, NamedContext) {
    match self.current() {
      Some(ps) => match ps.goal_context(1) {
        Ok((ctx, _)) => (ps.metas().clone(), ctx.clone()),
        Err(_) => (ps.metas().clone(), env.section_context().clone()),
      },
      None => {
        let mut metas = MetaState::new(env);
        if let Some(last) = &self.last_ustate {
          let mut ustate = last.clone();
          ustate.set_ambient(env.universes().clone());
          metas.ustate = ustate
        }
        (metas, env.section_context().clone())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::feedback::Silent;
  use crate::tactic::{ExactNoCheck, Intro};
  use crate::univ::{Level, UnivDecl};
  use crate::Config;
  use std::sync::Arc;

  fn setup() -> Env { Env::with_feedback(Config::DEFAULT, Arc::new(Silent)) }

  fn start(env: &Env, name: &str) -> ProofState {
    let goal = Term::pi(Id::new("x"), Term::Sort(Level::Set), Term::Sort(Level::Set));
    let (metas, goals) = (MetaState::new(env), vec![(NamedContext::default(), goal)]);
    ProofState::start(env, Id::new(name), UnivDecl::default(), false, metas, goals).unwrap()
  }

  #[test]
  fn empty_stack_errors() {
    let mut env = setup();
    let mut stack = ProofStack::new();
    assert!(matches!(stack.pop(), Err(DeclError::NoFocusedProof)));
    assert!(matches!(stack.by(&mut env, &Intro(Id::new("x"))), Err(DeclError::NoFocusedProof)));
    assert!(matches!(stack.update_global_env(&env), Err(DeclError::NoFocusedProof)));
    assert!(matches!(stack.get_current_goal_context(), Err(DeclError::NoFocusedProof)));
    assert!(matches!(stack.discard(&Id::new("p")), Err(DeclError::NoSuchProof(_))));
  }

  #[test]
  fn safety_is_folded() {
    let mut env = setup();
    let mut stack = ProofStack::new();
    stack.push(start(&env, "p"));
    assert!(stack.by(&mut env, &Intro(Id::new("x"))).unwrap());
    assert!(stack.is_safe().unwrap());
    assert!(!stack.by(&mut env, &ExactNoCheck(Term::Sort(Level::Set))).unwrap());
    assert!(!stack.is_safe().unwrap());
    let (ps, safe) = stack.pop().unwrap();
    assert!(ps.is_done() && !safe);
  }

  #[test]
  fn goal_contexts() {
    let mut env = setup();
    let mut stack = ProofStack::new();
    stack.push(start(&env, "p"));
    stack.by(&mut env, &Intro(Id::new("x"))).unwrap();
    let (_, ctx, concl) = stack.get_current_goal_context().unwrap();
    assert_eq!(ctx.len(), 1);
    assert_eq!(*concl, Term::Sort(Level::Set));
    assert!(matches!(stack.get_goal_context(2), Err(DeclError::NoSuchGoal(2))));
    let (_, ctx) = stack.get_current_context(&env);
    assert!(ctx.contains(&Id::new("x")));
    // a finished proof falls back to the section context
    stack.by(&mut env, &ExactNoCheck(Term::Var(Id::new("x")))).unwrap();
    let (metas, ctx) = stack.get_current_context(&env);
    assert!(ctx.is_empty());
    assert!(metas.undefined().is_empty());
  }

  #[test]
  fn no_proof_keeps_the_last_universes() {
    let env = setup();
    let mut stack = ProofStack::new();
    let mut ps = start(&env, "p");
    let u = ps.view.metas.ustate.new_level("u");
    stack.push(ps);
    stack.push(start(&env, "q"));
    stack.discard(&Id::new("q")).unwrap();
    assert_eq!(stack.current().map(|ps| ps.name().as_str()), Some("p"));
    stack.pop().unwrap();
    assert!(stack.is_empty());
    // assumed: with no proof left, the universes of the last one carry over rather than reset
    let (metas, ctx) = stack.get_current_context(&env);
    assert!(ctx.is_empty());
    assert!(metas.ustate.context_set().levels.contains(&u));
  }
}
