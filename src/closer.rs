use crate::entry::{BodyOutput, Opacity, ProofEntry, ProofObject, SideEffects};
use crate::env::Env;
use crate::error::DeclError;
use crate::feedback::{partial_proof_warning, FeedbackId};
use crate::future::Deferred;
use crate::inline::inline_private_constants;
use crate::meta::MetaState;
use crate::proof::ProofState;
use crate::tactic::Tactic;
use crate::types::{Id, MetaId, NamedContext, Term};
use crate::univ::{ContextSet, UState, UnivDecl, UnivEntry};
use crate::{stat, vprintln};

/// The terms of a closed proof, one per initial goal, with the final universe state.
#[derive(Clone, Debug)]
pub struct ClosedProofOutput {
  pub output: Vec<(Term, SideEffects)>,
  pub ustate: UState,
  /// The number of goals left open. Zero unless the output was built by
  /// [`return_partial_proof`].
  pub open: usize,
}

fn instantiated_output(ps: &ProofState) -> Vec<(Term, SideEffects)> {
  let metas = &ps.view.metas;
  ps.entry.iter().map(|&(m, _)| (metas.instantiate(&Term::meta(m)), metas.effects.clone())).collect()
}

/// Package a finished proof. Fails if a goal is still open.
pub fn return_proof(ps: &ProofState) -> Result<ClosedProofOutput, DeclError> {
  let open = ps.open_goals();
  if open > 0 {
    return Err(DeclError::IncompleteProof { name: ps.name.clone(), open })
  }
  let output = instantiated_output(ps);
  let metas: Vec<MetaId> = output.iter().flat_map(|(t, _)| t.metas()).collect();
  if !metas.is_empty() {
    return Err(DeclError::UnresolvedMetavariables { name: ps.name.clone(), metas })
  }
  Ok(ClosedProofOutput { output, ustate: ps.view.metas.ustate.normalize(), open: 0 })
}

/// Package a proof, leaving the unsolved goals as placeholders in the terms. Warns if any goal
/// is open.
pub fn return_partial_proof(ps: &ProofState, env: &Env) -> ClosedProofOutput {
  let open = ps.open_goals();
  if open > 0 {
    stat("partial proof");
    if env.cfg.warn_partial_proofs {
      partial_proof_warning(env.feedback(), None, &ps.name, open)
    }
  }
  ClosedProofOutput { output: instantiated_output(ps), ustate: ps.view.metas.ustate.normalize(), open }
}

/// The public universes of the declaration, and the ones needed by its body alone. The
/// section's polymorphic universes stay out of a monomorphic declaration.
fn split_univs(
  env: &Env, ps: &ProofState, keep_body_ucst_separate: bool, fin: &UState,
) -> Result<(UnivEntry, ContextSet), DeclError> {
  if ps.poly {
    return Ok((fin.check_univ_decl(&ps.udecl, true)?, ContextSet::new()))
  }
  let fin = fin.unbind(env.poly_univs())?;
  if !keep_body_ucst_separate {
    return Ok((fin.check_univ_decl(&ps.udecl, false)?, ContextSet::new()))
  }
  let initial = ps.initial_ustate.unbind(env.poly_univs())?;
  let univs = initial.normalize().check_univ_decl(&ps.udecl, false)?;
  let body_ucst = fin.context_set().diff(initial.context_set());
  Ok((univs, body_ucst))
}

/// Close a finished proof, producing one entry per initial goal with the given opacity.
pub fn close_proof(
  env: &Env, opacity: Opacity, keep_body_ucst_separate: bool, ps: ProofState,
) -> Result<ProofObject, DeclError> {
  if let Some(vars) = &ps.section_vars {
    if let Some(x) = vars.iter().find(|x| !env.section_context().contains(x)) {
      return Err(DeclError::UnknownSectionVariable(x.clone()))
    }
  }
  let out = return_proof(&ps)?;
  let (univs, body_ucst) = split_univs(env, &ps, keep_body_ucst_separate, &out.ustate)?;
  let metas = &ps.view.metas;
  let entries = (ps.entry.iter().zip(out.output))
    .map(|(&(_, ref ty), (term, effects))| {
      let entry = ProofEntry::from_output(BodyOutput { term, body_ucst: body_ucst.clone(), effects })
        .with_type(metas.instantiate(ty))
        .with_univs(univs.clone())
        .with_opacity(opacity);
      match &ps.section_vars {
        Some(vars) => entry.with_section_vars(vars.clone()),
        None => entry,
      }
    })
    .collect();
  vprintln!("closed {} ({opacity:?})", ps.name);
  stat("proof closed");
  Ok(ProofObject { name: ps.name, poly: ps.poly, entries, ustate: out.ustate })
}

/// A deferred computation of the output of `ps`, as a worker checking the proof would run it.
pub fn deferred_output(ps: ProofState) -> Deferred<ClosedProofOutput> {
  let tag = ps.name.to_string();
  Deferred::pending(tag, move || return_proof(&ps))
}

/// Close a proof whose terms will be produced later by `fpl`. The entries are opaque and
/// carry unresolved bodies; a failure while forcing one of them is reported under
/// `feedback_id` and returned as [`DeclError::Deferred`].
pub fn close_future_proof(
  env: &Env, feedback_id: FeedbackId, ps: ProofState, fpl: Deferred<ClosedProofOutput>,
) -> Result<ProofObject, DeclError> {
  let univs = if ps.poly {
    ps.initial_ustate.check_univ_decl(&ps.udecl, true)?
  } else {
    ps.initial_ustate.unbind(env.poly_univs())?.normalize().check_univ_decl(&ps.udecl, false)?
  };
  let metas = &ps.view.metas;
  let n = ps.entry.len();
  let entries = (ps.entry.iter().enumerate())
    .map(|(i, (_, ty))| {
      let fpl = fpl.clone();
      let fb = env.feedback_handle();
      let (name, initial) = (ps.name.clone(), ps.initial_ustate.context_set().clone());
      let body = Deferred::pending(format!("{}#{i}", ps.name), move || {
        let res = fpl.force().and_then(|out| {
          if out.open > 0 {
            return Err(DeclError::IncompleteProof { name: name.clone(), open: out.open })
          }
          if out.output.len() != n {
            return Err(DeclError::NameCountMismatch { expected: n, got: out.output.len() })
          }
          let (term, effects) = out.output[i].clone();
          Ok(BodyOutput { term, body_ucst: out.ustate.context_set().diff(&initial), effects })
        });
        res.map_err(|e| {
          let e = DeclError::Deferred { feedback_id, source: Box::new(e) };
          e.report(&*fb, Some(feedback_id));
          e
        })
      });
      let entry = ProofEntry::deferred(body)
        .with_type(metas.instantiate(ty))
        .with_univs(univs.clone())
        .with_opacity(Opacity::Opaque)
        .with_feedback_id(feedback_id);
      match &ps.section_vars {
        Some(vars) => entry.with_section_vars(vars.clone()),
        None => entry,
      }
    })
    .collect();
  stat("proof closed (deferred)");
  Ok(ProofObject { name: ps.name, poly: ps.poly, entries, ustate: ps.initial_ustate })
}

/// Prove `ty` in context `sign` with a single tactic, and return the transparent entry, the
/// safety of the tactic and the final universe state.
#[allow(clippy::too_many_arguments)]
pub fn build_constant_by_tactic(
  env: &mut Env, name: Id, udecl: UnivDecl, poly: bool, ustate: UState, sign: NamedContext, ty: Term,
  tac: &dyn Tactic,
) -> Result<(ProofEntry, bool, UState), DeclError> {
  let metas = MetaState { ustate, ..MetaState::new(env) };
  let mut ps = ProofState::start(env, name, udecl, poly, metas, vec![(sign, ty)])?;
  let safe = ps.by(env, tac)?;
  let mut pobj = close_proof(env, Opacity::Transparent, false, ps)?;
  let entry = pobj.entries.pop().ok_or(DeclError::NameCountMismatch { expected: 1, got: 0 })?;
  Ok((entry, safe, pobj.ustate))
}

/// Build a closed term of type `ty` in context `sign` by running `tac`. Private constants
/// created along the way are inlined.
pub fn build_by_tactic(
  env: &mut Env, sign: NamedContext, poly: bool, ty: Term, tac: &dyn Tactic,
) -> Result<(Term, UState, bool), DeclError> {
  let ustate = UState::with_local(env.universes().clone(), env.poly_univs().clone());
  let name = Id::new("temporary_proof");
  let (entry, safe, ustate) =
    build_constant_by_tactic(env, name, UnivDecl::default(), poly, ustate, sign, ty, tac)?;
  let (term, ustate) = inline_private_constants(ustate, env, &entry)?;
  Ok((term, ustate, safe))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::feedback::{MsgLevel, Recorder};
  use crate::tactic::{Assumption, Intro, Then};
  use crate::types::Hyp;
  use crate::univ::Level;
  use crate::Config;
  use std::sync::Arc;

  fn setup() -> (Env, Arc<Recorder>) {
    let rec = Arc::new(Recorder::default());
    let mut env = Env::with_feedback(Config::DEFAULT, rec.clone());
    env.open_section(Id::new("S"));
    env.push_section_var(Hyp { name: Id::new("A"), ty: Term::Sort(Level::Set), body: None }, false);
    (env, rec)
  }

  fn a() -> Term { Term::Var(Id::new("A")) }

  fn start(env: &Env) -> ProofState {
    let goal = (env.section_context().clone(), Term::arrow(a(), a()));
    ProofState::start(env, Id::new("foo"), UnivDecl::default(), false, MetaState::new(env), vec![goal])
      .unwrap()
  }

  fn solve(env: &mut Env, ps: &mut ProofState) {
    ps.by(env, &Then(Box::new(Intro(Id::new("x"))), Box::new(Assumption))).unwrap();
  }

  #[test]
  fn strict_and_partial_agree_on_finished_proofs() {
    let (mut env, rec) = setup();
    let mut ps = start(&env);
    solve(&mut env, &mut ps);
    let strict = return_proof(&ps).unwrap();
    let partial = return_partial_proof(&ps, &env);
    assert_eq!(strict.output.len(), 1);
    assert_eq!(strict.output[0].0, partial.output[0].0);
    assert_eq!(rec.count(MsgLevel::Warning), 0);
  }

  #[test]
  fn open_goals_make_the_strict_close_fail() {
    let (env, rec) = setup();
    let ps = start(&env);
    assert!(matches!(return_proof(&ps), Err(DeclError::IncompleteProof { open: 1, .. })));
    let partial = return_partial_proof(&ps, &env);
    assert_eq!(partial.open, 1);
    assert!(partial.output[0].0.has_metas());
    assert_eq!(rec.count(MsgLevel::Warning), 1);
  }

  #[test]
  fn close_proof_applies_opacity() {
    let (mut env, _) = setup();
    let mut ps = start(&env);
    solve(&mut env, &mut ps);
    let pobj = close_proof(&env, Opacity::Opaque, false, ps).unwrap();
    assert_eq!(pobj.entries.len(), 1);
    let entry = &pobj.entries[0];
    assert_eq!(entry.opaque, Opacity::Opaque);
    assert_eq!(entry.ty, Some(Term::arrow(a(), a())));
    assert_eq!(entry.force_body().unwrap().term, Term::lambda(Id::new("x"), a(), Term::Rel(0)));
  }

  #[test]
  fn body_universes_can_stay_private() {
    let (mut env, _) = setup();
    let mut ps = start(&env);
    solve(&mut env, &mut ps);
    // a universe that only the proof term needs
    let w = ps.view.metas.ustate.new_level("w");
    let has_w = |univs: &UnivEntry| univs.monomorphic().is_some_and(|cs| cs.levels.contains(&w));
    let shared = close_proof(&env, Opacity::Opaque, false, ps.clone()).unwrap();
    assert!(has_w(&shared.entries[0].univs));
    assert!(shared.entries[0].force_body().unwrap().body_ucst.is_empty());
    let split = close_proof(&env, Opacity::Opaque, true, ps.clone()).unwrap();
    assert!(!has_w(&split.entries[0].univs));
    assert!(split.entries[0].force_body().unwrap().body_ucst.levels.contains(&w));
    // a deferred close only knows the initial universes up front
    let fpl = deferred_output(ps.clone());
    let deferred = close_future_proof(&env, FeedbackId(1), ps, fpl).unwrap();
    assert!(!has_w(&deferred.entries[0].univs));
    assert!(deferred.entries[0].force_body().unwrap().body_ucst.levels.contains(&w));
  }

  #[test]
  fn section_universes_are_not_exported() {
    let (mut env, _) = setup();
    let u = Level::var("u");
    crate::declare::declare_universe_context(&mut env, true, ContextSet::with_levels([u.clone()]))
      .unwrap();
    let mut ps = start(&env);
    assert!(ps.initial_ustate.context_set().levels.contains(&u));
    solve(&mut env, &mut ps);
    for keep_separate in [false, true] {
      let pobj = close_proof(&env, Opacity::Transparent, keep_separate, ps.clone()).unwrap();
      let entry = &pobj.entries[0];
      assert_eq!(entry.univs, UnivEntry::Monomorphic(ContextSet::new()));
      assert!(entry.force_body().unwrap().body_ucst.is_empty());
    }
    // a monomorphic constraint on a section universe cannot be exported
    let v = ps.view.metas.ustate.new_level("v");
    let mut cs = ContextSet::new();
    cs.add_constraint(crate::univ::Constraint::le(u, v));
    ps.view.metas.ustate.merge_context_set(&cs).unwrap();
    let res = close_proof(&env, Opacity::Transparent, false, ps);
    assert!(matches!(res, Err(DeclError::UnexpectedConstraints(_))));
  }

  #[test]
  fn deferred_failures_are_tagged() {
    let (env, rec) = setup();
    let ps = start(&env);
    // nothing was solved, so forcing the body fails
    let fpl = deferred_output(ps.clone());
    let pobj = close_future_proof(&env, FeedbackId(3), ps, fpl).unwrap();
    let entry = &pobj.entries[0];
    assert!(!entry.is_resolved());
    let Err(DeclError::Deferred { feedback_id, source }) = entry.force_body() else {
      panic!("expected a deferred failure")
    };
    assert_eq!(feedback_id, FeedbackId(3));
    assert!(matches!(*source, DeclError::IncompleteProof { .. }));
    let errors = rec.events().into_iter().filter(|ev| ev.level == MsgLevel::Error).collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].id, Some(FeedbackId(3)));
    // forcing again reuses the memoized failure without reporting twice
    assert!(entry.force_body().is_err());
    assert_eq!(rec.count(MsgLevel::Error), 1);
  }
}
