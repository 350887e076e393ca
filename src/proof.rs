use crate::env::Env;
use crate::error::DeclError;
use crate::meta::MetaState;
use crate::tactic::{Proofview, Tactic};
use crate::types::{Id, MetaId, NamedContext, Term};
use crate::univ::{UState, UnivDecl};
use crate::{stat, vprintln};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which goals a tactic step applies to. Goals are numbered from 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GoalSelector {
  Nth(usize),
  All,
}

/// Goals whose statements may mention the solutions of earlier goals. Each step receives the
/// placeholder standing for the solution of the goal it introduced.
pub enum Telescope {
  Nil,
  Cons { ctx: NamedContext, ty: Term, next: Box<dyn FnOnce(&MetaState, Term) -> Telescope> },
}

/// A proof in progress.
#[derive(Clone)]
pub struct ProofState {
  pub(crate) name: Id,
  pub(crate) udecl: UnivDecl,
  pub(crate) poly: bool,
  pub(crate) view: Proofview,
  /// The goals the proof was started with, and their statements.
  pub(crate) entry: Vec<(MetaId, Term)>,
  pub(crate) section_vars: Option<BTreeSet<Id>>,
  pub(crate) endline: Option<Arc<dyn Tactic>>,
  pub(crate) initial_ustate: UState,
  pub(crate) env_stamp: u64,
}

impl std::fmt::Debug for ProofState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProofState")
      .field("name", &self.name)
      .field("poly", &self.poly)
      .field("goals", &self.view.goals)
      .field("section_vars", &self.section_vars)
      .finish()
  }
}

impl ProofState {
  fn check_udecl(env: &Env, metas: &MetaState, udecl: &UnivDecl, poly: bool) -> Result<(), DeclError> {
    if poly {
      metas.ustate.check_univ_decl(udecl, true)?;
    } else {
      metas.ustate.unbind(env.poly_univs())?.check_univ_decl(udecl, false)?;
    }
    let declared = udecl.context_set().union(metas.ustate.context_set());
    metas.ustate.ambient().merge(&declared)?;
    Ok(())
  }

  fn new(
    env: &Env, name: Id, udecl: UnivDecl, poly: bool, metas: MetaState, entry: Vec<(MetaId, Term)>,
  ) -> Self {
    stat("proof started");
    vprintln!("start proof {name} with {} goal(s)", entry.len());
    ProofState {
      initial_ustate: metas.ustate.clone(),
      view: Proofview {
        name: name.clone(),
        poly,
        goals: entry.iter().map(|e| e.0).collect(),
        metas,
        unsafe_step: false,
      },
      name,
      udecl,
      poly,
      entry,
      section_vars: None,
      endline: None,
      env_stamp: env.stamp(),
    }
  }

  /// Start a proof of the given goals, which share the metavariable assignment `metas`.
  pub fn start(
    env: &Env, name: Id, udecl: UnivDecl, poly: bool, mut metas: MetaState,
    goals: Vec<(NamedContext, Term)>,
  ) -> Result<ProofState, DeclError> {
    Self::check_udecl(env, &metas, &udecl, poly)?;
    let entry = goals.into_iter().map(|(ctx, ty)| (metas.new_meta(ctx, ty.clone()), ty)).collect();
    Ok(Self::new(env, name, udecl, poly, metas, entry))
  }

  /// Start a proof whose later goals depend on the solutions of earlier ones.
  pub fn start_dependent(
    env: &Env, name: Id, udecl: UnivDecl, poly: bool, mut metas: MetaState, mut tele: Telescope,
  ) -> Result<ProofState, DeclError> {
    Self::check_udecl(env, &metas, &udecl, poly)?;
    let mut entry = vec![];
    while let Telescope::Cons { ctx, ty, next } = tele {
      let m = metas.new_meta(ctx, ty.clone());
      entry.push((m, ty));
      tele = next(&metas, Term::meta(m));
    }
    Ok(Self::new(env, name, udecl, poly, metas, entry))
  }

  pub fn name(&self) -> &Id { &self.name }
  pub fn poly(&self) -> bool { self.poly }
  pub fn udecl(&self) -> &UnivDecl { &self.udecl }
  pub fn view(&self) -> &Proofview { &self.view }
  pub fn metas(&self) -> &MetaState { &self.view.metas }
  pub fn initial_ustate(&self) -> &UState { &self.initial_ustate }
  pub fn used_variables(&self) -> Option<&BTreeSet<Id>> { self.section_vars.as_ref() }
  pub fn endline_tactic(&self) -> Option<&Arc<dyn Tactic>> { self.endline.as_ref() }
  pub fn env_stamp(&self) -> u64 { self.env_stamp }

  /// The goals the proof was started with and their statements.
  pub fn entry(&self) -> &[(MetaId, Term)] { &self.entry }

  /// The unsolved goals, focused first.
  pub fn goals(&self) -> Vec<MetaId> { self.view.open_goals() }

  pub fn open_goals(&self) -> usize { self.view.open_goals().len() }

  pub fn is_done(&self) -> bool { self.open_goals() == 0 }

  /// The context and statement of goal `i`, counting from 1.
  pub fn goal_context(&self, i: usize) -> Result<(&NamedContext, &Term), DeclError> {
    let goals = self.view.open_goals();
    let g = *goals.get(i.wrapping_sub(1)).ok_or(DeclError::NoSuchGoal(i))?;
    Ok(self.view.goal(g))
  }

  /// Fix the section variables the proof may use: the requested ones, and everything their
  /// types and bodies depend on. Returns that closure.
  pub fn set_used_variables(&mut self, env: &Env, vars: &[Id]) -> Result<BTreeSet<Id>, DeclError> {
    if self.section_vars.is_some() {
      return Err(DeclError::UsedVariablesAlreadySet)
    }
    let sec = env.section_context();
    if let Some(x) = vars.iter().find(|x| !sec.contains(x)) {
      return Err(DeclError::UnknownSectionVariable(x.clone()))
    }
    let mut closure: BTreeSet<Id> = vars.iter().cloned().collect();
    let mut worklist: Vec<Id> = closure.iter().cloned().collect();
    while let Some(x) = worklist.pop() {
      let Some(hyp) = sec.lookup(&x) else { continue };
      for dep in hyp.deps() {
        if sec.contains(&dep) && closure.insert(dep.clone()) {
          worklist.push(dep)
        }
      }
    }
    vprintln!("{}: using section variables {closure:?}", self.name);
    self.section_vars = Some(closure.clone());
    Ok(closure)
  }

  pub fn set_endline_tactic(&mut self, tac: Arc<dyn Tactic>) { self.endline = Some(tac) }

  /// Run `tac` on the goals chosen by `sel`. The proof is left unchanged if the tactic fails.
  /// Returns false if the tactic took an unsafe step.
  pub fn solve(
    &mut self, env: &mut Env, sel: GoalSelector, tac: &dyn Tactic, with_end_tac: bool,
  ) -> Result<bool, DeclError> {
    let mut pv = self.view.clone();
    pv.unsafe_step = false;
    let goals = pv.open_goals();
    let targets = match sel {
      GoalSelector::Nth(i) => vec![*goals.get(i.wrapping_sub(1)).ok_or(DeclError::NoSuchGoal(i))?],
      GoalSelector::All => goals.clone(),
    };
    let endline = if with_end_tac { self.endline.clone() } else { None };
    let mut result = vec![];
    for g in &goals {
      if !targets.contains(g) || pv.metas.is_defined(*g) {
        if !pv.metas.is_defined(*g) {
          result.push(*g)
        }
        continue
      }
      pv.goals = vec![*g];
      tac.run(env, &mut pv)?;
      if let Some(end) = &endline {
        if !pv.open_goals().is_empty() {
          end.run(env, &mut pv)?
        }
      }
      result.extend(pv.open_goals())
    }
    pv.goals = result;
    stat("tactic step");
    vprintln!("{}: {} by {}, {} goal(s) left", self.name, sel_name(sel), tac.name(), pv.goals.len());
    let safe = !pv.unsafe_step;
    self.view = pv;
    Ok(safe)
  }

  /// Apply `tac` to the first goal.
  pub fn by(&mut self, env: &mut Env, tac: &dyn Tactic) -> Result<bool, DeclError> {
    self.solve(env, GoalSelector::Nth(1), tac, false)
  }

  /// Drop solved goals and normalize the assignment. The open goals are unchanged.
  pub fn compact(&mut self) {
    self.view.metas.normalize();
    let open = self.view.open_goals();
    self.view.goals = open;
  }

  /// Refresh the view of the global environment after a declaration made inside this proof.
  pub fn update_global_env(&mut self, env: &Env) {
    self.view.metas.ustate.set_ambient(env.universes().clone());
    self.env_stamp = env.stamp();
  }
}

fn sel_name(sel: GoalSelector) -> String {
  match sel {
    GoalSelector::Nth(i) => format!("goal {i}"),
    GoalSelector::All => "all goals".into(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::feedback::Silent;
  use crate::tactic::{Assumption, Exact, Fail, Intro};
  use crate::univ::{Constraint, Level};
  use crate::Config;

  fn env_with_section() -> Env {
    let mut env = Env::with_feedback(Config::DEFAULT, Arc::new(Silent));
    env.open_section(Id::new("S"));
    let set = Term::Sort(Level::Set);
    for (x, ty) in [("A", set.clone()), ("a", Term::Var(Id::new("A"))), ("B", set)] {
      env.push_section_var(crate::types::Hyp { name: Id::new(x), ty, body: None }, false)
    }
    env
  }

  fn v(s: &str) -> Term { Term::Var(Id::new(s)) }

  fn start(env: &Env, goals: Vec<Term>) -> ProofState {
    let ctx = env.section_context().clone();
    let goals = goals.into_iter().map(|g| (ctx.clone(), g)).collect();
    ProofState::start(env, Id::new("p"), UnivDecl::default(), false, MetaState::new(env), goals).unwrap()
  }

  #[test]
  fn used_variables_are_closed_under_dependencies() {
    let env = env_with_section();
    let mut ps = start(&env, vec![v("A")]);
    let vars = ps.set_used_variables(&env, &[Id::new("a")]).unwrap();
    assert_eq!(vars, [Id::new("A"), Id::new("a")].into_iter().collect());
    assert!(matches!(ps.set_used_variables(&env, &[]), Err(DeclError::UsedVariablesAlreadySet)));
    let mut ps = start(&env, vec![v("A")]);
    assert!(matches!(
      ps.set_used_variables(&env, &[Id::new("z")]),
      Err(DeclError::UnknownSectionVariable(_))
    ));
  }

  #[test]
  fn failed_steps_leave_the_proof_alone() {
    let mut env = env_with_section();
    let mut ps = start(&env, vec![Term::arrow(v("A"), v("A"))]);
    assert!(ps.by(&mut env, &Fail("nope".into())).is_err());
    assert!(ps.by(&mut env, &Assumption).is_err());
    assert_eq!(ps.open_goals(), 1);
    assert!(ps.by(&mut env, &Intro(Id::new("x"))).unwrap());
    assert_eq!(ps.goal_context(1).unwrap().1, &v("A"));
  }

  #[test]
  fn selectors_pick_goals() {
    let mut env = env_with_section();
    let mut ps = start(&env, vec![v("B"), v("A"), v("A")]);
    let res = ps.solve(&mut env, GoalSelector::Nth(4), &Assumption, false);
    assert!(matches!(res, Err(DeclError::NoSuchGoal(4))));
    assert!(ps.by(&mut env, &Assumption).is_err());
    // `a : A` does not prove B, so the whole step fails
    assert!(ps.solve(&mut env, GoalSelector::All, &Exact(v("a")), false).is_err());
    assert_eq!(ps.open_goals(), 3);
    assert!(ps.solve(&mut env, GoalSelector::Nth(2), &Exact(v("a")), false).unwrap());
    assert!(ps.solve(&mut env, GoalSelector::Nth(2), &Exact(v("a")), false).unwrap());
    assert_eq!(ps.open_goals(), 1);
    assert_eq!(ps.goal_context(1).unwrap().1, &v("B"));
  }

  #[test]
  fn endline_tactic_runs_when_asked() {
    let mut env = env_with_section();
    let mut ps = start(&env, vec![Term::arrow(v("A"), v("A"))]);
    ps.set_endline_tactic(Arc::new(Assumption));
    ps.solve(&mut env, GoalSelector::Nth(1), &Intro(Id::new("x")), false).unwrap();
    assert_eq!(ps.open_goals(), 1);
    let mut ps = start(&env, vec![Term::arrow(v("A"), v("A"))]);
    ps.set_endline_tactic(Arc::new(Assumption));
    ps.solve(&mut env, GoalSelector::Nth(1), &Intro(Id::new("x")), true).unwrap();
    assert!(ps.is_done());
  }

  #[test]
  fn compact_keeps_open_goals() {
    let mut env = env_with_section();
    let mut ps = start(&env, vec![Term::arrow(v("A"), v("A")), v("B")]);
    ps.by(&mut env, &Intro(Id::new("x"))).unwrap();
    let before: Vec<_> = (1..=ps.open_goals()).map(|i| ps.goal_context(i).unwrap().1.clone()).collect();
    ps.compact();
    let after: Vec<_> = (1..=ps.open_goals()).map(|i| ps.goal_context(i).unwrap().1.clone()).collect();
    assert_eq!(before, after);
  }

  #[test]
  fn dependent_goals_mention_earlier_placeholders() {
    let env = env_with_section();
    let ctx = env.section_context().clone();
    let tele = Telescope::Cons {
      ctx: ctx.clone(),
      ty: Term::Sort(Level::Set),
      next: Box::new(move |_, hole| Telescope::Cons {
        ctx,
        ty: hole,
        next: Box::new(|_, _| Telescope::Nil),
      }),
    };
    let metas = MetaState::new(&env);
    let ps =
      ProofState::start_dependent(&env, Id::new("p"), UnivDecl::default(), false, metas, tele).unwrap();
    assert_eq!(ps.open_goals(), 2);
    let first = ps.entry()[0].0;
    assert_eq!(ps.entry()[1].1, Term::meta(first));
  }

  #[test]
  fn inconsistent_declarations_cannot_start() {
    let env = env_with_section();
    let (u, w) = (Level::var("u"), Level::var("w"));
    let udecl = UnivDecl {
      constraints: vec![Constraint::lt(u.clone(), w.clone()), Constraint::lt(w, u)],
      ..UnivDecl::default()
    };
    let res = ProofState::start(&env, Id::new("p"), udecl, false, MetaState::new(&env), vec![]);
    assert!(matches!(res, Err(DeclError::InconsistentUniverses(_))));
  }
}
