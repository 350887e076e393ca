use crate::closer::build_constant_by_tactic;
use crate::declare::declare_private_constant;
use crate::entry::{DeclKind, Opacity, SideEffectRole, SideEffects};
use crate::env::Env;
use crate::error::DeclError;
use crate::meta::MetaState;
use crate::tactic::{Intro, Proofview, Tactic};
use crate::types::{Id, NamedContext, Term};
use crate::univ::UnivDecl;
use crate::{stat, vprintln};

/// A goal to be factored out into a private lemma.
pub struct AbstractRequest<'a> {
  /// The base name of the lemma; a fresh variant of it is used.
  pub name: Id,
  pub poly: bool,
  pub kind: DeclKind,
  /// The context of the goal.
  pub sign: NamedContext,
  /// The section variables. The lemma is closed over the hypotheses of `sign` not among them.
  pub secsign: NamedContext,
  pub opaque: Opacity,
  pub tac: &'a dyn Tactic,
  pub metas: MetaState,
  pub concl: Term,
}

pub struct AbstractOutput {
  /// The private constants to carry along, the new lemma last.
  pub effects: SideEffects,
  pub metas: MetaState,
  /// The lemma applied to `args`; it has type `concl` in `sign`.
  pub term: Term,
  pub args: Vec<Term>,
  pub safe: bool,
}

/// Reintroduce the local hypotheses the lemma statement quantifies over, then run the tactic.
struct IntroThen<'a>(Vec<Id>, &'a dyn Tactic);

impl Tactic for IntroThen<'_> {
  fn name(&self) -> &'static str { "abstract" }
  fn run(&self, env: &mut Env, pv: &mut Proofview) -> Result<(), DeclError> {
    for x in &self.0 {
      Intro(x.clone()).run(env, pv)?
    }
    self.1.run(env, pv)
  }
}

/// Prove `concl` with `tac` as a separate private lemma and return the lemma applied to the
/// local hypotheses. Fails if the tactic does not solve the goal completely.
pub fn declare_abstract(env: &mut Env, req: AbstractRequest<'_>) -> Result<AbstractOutput, DeclError> {
  let AbstractRequest { name, poly, kind, sign, secsign, opaque, tac, mut metas, concl } = req;
  let local = sign.without(&secsign);
  let ty = local.generalize(concl);
  let name = env.fresh_name(&name);
  let intros = IntroThen(local.names().cloned().collect(), tac);
  let ustate = metas.ustate.clone();
  let res =
    build_constant_by_tactic(env, name.clone(), UnivDecl::default(), poly, ustate, secsign, ty, &intros);
  let (entry, safe, ustate) = match res {
    Ok(res) => res,
    Err(DeclError::IncompleteProof { .. }) => {
      stat("abstract failed");
      return Err(DeclError::UnresolvedMetavariables { name, metas: vec![] })
    }
    Err(DeclError::UnresolvedMetavariables { metas, .. }) => {
      stat("abstract failed");
      return Err(DeclError::UnresolvedMetavariables { name, metas })
    }
    Err(e) => return Err(e),
  };
  let (addr, effects) =
    declare_private_constant(env, SideEffectRole::Subproof, name, kind, entry.with_opacity(opaque))?;
  let args = local.instance();
  let term = Term::app(Term::Const(addr.clone()), args.clone());
  vprintln!("abstract: declared {addr}");
  stat("abstract");
  metas.effects.concat(&effects);
  metas.ustate = ustate;
  Ok(AbstractOutput { effects, metas, term, args, safe })
}
