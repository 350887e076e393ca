//! Registration of finished declarations. Every declaration is all-or-nothing: the merged
//! universe graph and every kernel check are computed before anything is committed.

use crate::entry::*;
use crate::env::Env;
use crate::error::{DeclError, KernelError};
use crate::feedback::{assumption_message, definition_message, recursive_message};
use crate::inline::{inline_private_constants, private_closure, univ_context};
use crate::kernel::{ConstDef, ConstantBody};
use crate::types::{ConstAddr, Hyp, Id, Term};
use crate::univ::{ContextSet, Level, UGraph, UState, UnivEntry};
use crate::{stat, vprintln};
use itertools::Itertools;

/// Fail if `id` is already declared in the current module, or visible by its short name from
/// an enclosing module.
pub fn check_exists(env: &Env, id: &Id) -> Result<(), DeclError> {
  if env.is_taken(id) {
    return Err(DeclError::AlreadyDeclared { id: id.clone(), hint: None })
  }
  for path in env.modpath().ancestors().skip(1) {
    let addr = path.qualify(id.clone());
    if env.registry().locality(&addr) == Some(Locality::ImportDefaultBehavior) {
      return Err(DeclError::AlreadyDeclared { id: id.clone(), hint: Some(addr.key()) })
    }
  }
  Ok(())
}

fn definition(opaque: Opacity, term: Term) -> ConstDef {
  match opaque {
    Opacity::Opaque => ConstDef::OpaqueDef(term),
    Opacity::Transparent => ConstDef::Def(term),
  }
}

/// The kernel form of a private constant.
fn effect_body(eff: &SideEffect) -> ConstantBody {
  ConstantBody {
    addr: eff.addr.clone(),
    ty: eff.ty.clone(),
    def: definition(eff.opaque, eff.body.clone()),
    univs: eff.univs.clone(),
    body_ucst: ContextSet::new(),
    hyps: None,
    inline: false,
  }
}

/// The private constants `terms` need that the kernel does not know yet, dependencies first.
fn private_deps(env: &Env, effects: &SideEffects, terms: &[&Term]) -> Vec<ConstantBody> {
  let deps = terms.iter().flat_map(|t| private_closure(t, effects, env));
  let deps = deps.unique_by(|eff| eff.addr.clone());
  deps.filter(|eff| env.lookup_constant(&eff.addr).is_none()).map(effect_body).collect()
}

/// `univs` extended with the levels and constraints of `cs`.
fn extend_univs(univs: UnivEntry, cs: &ContextSet) -> UnivEntry {
  if cs.is_empty() {
    return univs
  }
  match univs {
    UnivEntry::Monomorphic(own) => UnivEntry::Monomorphic(own.union(cs)),
    UnivEntry::Polymorphic(mut uctx) => {
      for l in &cs.levels {
        if let Level::Var(x) = l {
          if !uctx.names.contains(x) {
            uctx.names.push(x.clone())
          }
        }
      }
      uctx.constraints = uctx.constraints.union(cs.constraints.clone());
      UnivEntry::Polymorphic(uctx)
    }
  }
}

/// Extend `g` with the universes of a candidate. Polymorphic universes stay bound to the
/// constant: they are only checked for consistency.
fn merge_univs(g: UGraph, body: &ConstantBody) -> Result<UGraph, DeclError> {
  match body.univs.monomorphic() {
    Some(cs) => g.merge(cs)?.merge(&body.body_ucst),
    None => {
      g.merge(&univ_context(&body.univs).union(&body.body_ucst))?;
      Ok(g)
    }
  }
}

/// The kernel candidates of a definition: the private constants it exports, then the
/// definition itself.
fn definition_candidates(
  env: &Env, addr: ConstAddr, entry: &ProofEntry,
) -> Result<Vec<ConstantBody>, DeclError> {
  let ty = entry.ty.clone().ok_or_else(|| DeclError::MissingType(addr.label.clone()))?;
  let out = entry.force_body()?;
  let export = entry.opaque == Opacity::Opaque && !env.cfg.inline_opaque_effects;
  let (mut candidates, term, univs) = if export {
    // the private constants become need-qualified constants of their own
    let exported = private_deps(env, &out.effects, &[&out.term, &ty]);
    vprintln!("{addr}: exporting {} private constant(s)", exported.len());
    (exported, out.term, entry.univs.clone())
  } else {
    let (term, ust) = inline_private_constants(UState::new(env.universes().clone()), env, entry)?;
    (vec![], term, extend_univs(entry.univs.clone(), ust.context_set()))
  };
  candidates.push(ConstantBody {
    addr,
    ty,
    def: definition(entry.opaque, term),
    univs,
    body_ucst: out.body_ucst,
    hyps: entry.secctx.clone(),
    inline: entry.inline,
  });
  Ok(candidates)
}

fn declare_constant_core(
  env: &mut Env, locality: Locality, id: &Id, kind: DeclKind, req: ConstantEntryRequest,
) -> Result<ConstAddr, DeclError> {
  check_exists(env, id)?;
  let addr = env.modpath().qualify(id.clone());
  let candidates = match req {
    ConstantEntryRequest::Definition(entry) => definition_candidates(env, addr, &entry)?,
    ConstantEntryRequest::Parameter(p) => vec![ConstantBody {
      addr,
      ty: p.ty,
      def: ConstDef::Undef,
      univs: p.univs,
      body_ucst: ContextSet::new(),
      hyps: p.secctx,
      inline: p.inline,
    }],
    ConstantEntryRequest::Primitive(p) => vec![ConstantBody {
      addr,
      ty: p.ty,
      def: ConstDef::Primitive(p.content),
      univs: UnivEntry::default(),
      body_ucst: ContextSet::new(),
      hyps: None,
      inline: false,
    }],
  };
  let mut g = env.universes().clone();
  for (i, c) in candidates.iter().enumerate() {
    g = merge_univs(g, c)?;
    env.check_candidate(c, &candidates[..i])?;
  }
  // nothing has been committed so far
  let Some((main, exported)) = candidates.split_last() else {
    return Err(DeclError::NameCountMismatch { expected: 1, got: 0 })
  };
  for c in exported {
    env.add_constant(c.clone(), Some(Locality::ImportNeedQualified), DeclKind::Lemma)?;
  }
  let addr = env.add_constant(main.clone(), Some(locality), kind)?;
  env.set_universes(g);
  let fb = env.feedback();
  match kind {
    DeclKind::Fixpoint | DeclKind::CoFixpoint =>
      recursive_message(fb, kind == DeclKind::Fixpoint, None, std::slice::from_ref(id)),
    _ if matches!(main.def, ConstDef::Undef) => assumption_message(fb, id),
    _ => definition_message(fb, id),
  }
  Ok(addr)
}

/// Register a constant under `id` in the current module and return its address. A deferred
/// body is forced first.
pub fn declare_constant(
  env: &mut Env, locality: Locality, id: Id, kind: DeclKind, req: ConstantEntryRequest,
) -> Result<ConstAddr, DeclError> {
  let res = declare_constant_core(env, locality, &id, kind, req);
  match &res {
    Ok(addr) => {
      stat("declaration");
      vprintln!("declared {addr} ({kind:?})")
    }
    Err(e) => {
      stat("declaration failed");
      vprintln!("declaration of {id} failed: {e}")
    }
  }
  res
}

/// Register a constant that cannot be referred to by name. Returns its address and the private
/// constants a body using it must carry: the ones its own body carries, then itself.
pub fn declare_private_constant(
  env: &mut Env, role: SideEffectRole, id: Id, kind: DeclKind, entry: ProofEntry,
) -> Result<(ConstAddr, SideEffects), DeclError> {
  if env.is_taken(&id) {
    return Err(DeclError::AlreadyDeclared { id, hint: None })
  }
  let out = entry.force_body()?;
  let ty = entry.ty.clone().ok_or_else(|| DeclError::MissingType(id.clone()))?;
  let addr = env.modpath().qualify(id);
  let univs = extend_univs(entry.univs.clone(), &out.body_ucst);
  env.universes().merge(&univ_context(&univs))?;
  let eff = SideEffect { addr: addr.clone(), body: out.term, ty, univs, opaque: entry.opaque, role };
  let pending = private_deps(env, &out.effects, &[&eff.body, &eff.ty]);
  let cand = ConstantBody { hyps: entry.secctx.clone(), inline: entry.inline, ..effect_body(&eff) };
  env.check_candidate(&cand, &pending)?;
  env.add_private(eff.clone());
  env.bump_count(kind);
  stat("private constant");
  let mut effects = out.effects;
  effects.push(eff);
  Ok((addr, effects))
}

/// Check a section variable like the kernel checks a constant.
fn check_hyp(env: &Env, hyp: &Hyp) -> Result<(), DeclError> {
  let addr = env.modpath().qualify(hyp.name.clone());
  for t in std::iter::once(&hyp.ty).chain(&hyp.body) {
    let err = if t.has_metas() {
      KernelError::UnresolvedMeta(addr.clone())
    } else if let Some(c) = t.consts().into_iter().find(|c| env.lookup_constant(c).is_none()) {
      KernelError::UnknownConstant(c)
    } else if let Some(var) = t.free_vars().into_iter().find(|x| !env.section_context().contains(x)) {
      KernelError::UndeclaredSectionVariable { addr: addr.clone(), var }
    } else {
      continue
    };
    return Err(env.kernel_fault(err))
  }
  Ok(())
}

/// Add a variable to the current section. Private constants in a local definition are inlined.
pub fn declare_variable(
  env: &mut Env, id: Id, kind: DeclKind, decl: VariableDeclaration,
) -> Result<(), DeclError> {
  if !env.in_section() {
    return Err(DeclError::NotInSection(id))
  }
  if env.section_context().contains(&id) {
    return Err(DeclError::AlreadyDeclared { id, hint: Some("section variable".into()) })
  }
  let (hyp, ucst, binding) = match decl {
    VariableDeclaration::LocalAssumption { ty, binding, univs } =>
      (Hyp { name: id.clone(), ty, body: None }, univs, binding),
    VariableDeclaration::LocalDefinition(entry) => {
      let ty = entry.ty.clone().ok_or_else(|| DeclError::MissingType(id.clone()))?;
      let out = entry.force_body()?;
      let (term, ust) = inline_private_constants(UState::new(env.universes().clone()), env, &entry)?;
      let ucst = univ_context(&entry.univs).union(&out.body_ucst).union(ust.context_set());
      (Hyp { name: id.clone(), ty, body: Some(term) }, ucst, BindingKind::Explicit)
    }
  };
  check_hyp(env, &hyp)?;
  let g = env.universes().merge(&ucst)?;
  let is_def = hyp.body.is_some();
  env.set_universes(g);
  env.push_section_var(hyp, binding == BindingKind::Implicit);
  env.bump_count(kind);
  stat("section variable");
  if is_def {
    definition_message(env.feedback(), &id)
  } else {
    assumption_message(env.feedback(), &id)
  }
  Ok(())
}

/// Add universes and constraints: to the global graph, or to the universes every later proof
/// starts with when `poly` is set. Declaring the same context twice has no further effect.
pub fn declare_universe_context(env: &mut Env, poly: bool, ctx: ContextSet) -> Result<(), DeclError> {
  if poly {
    let cs = env.poly_univs().union(&ctx);
    env.universes().merge(&cs)?;
    env.set_poly_univs(cs)
  } else {
    let g = env.universes().merge(&ctx)?;
    env.set_universes(g)
  }
  stat("universe context");
  Ok(())
}

/// Declare every entry of a closed proof. `names` may be empty for a proof with a single goal,
/// which is then declared under the name of the proof.
pub fn declare_proof_object(
  env: &mut Env, locality: Locality, kind: DeclKind, pobj: ProofObject, names: &[Id],
) -> Result<Vec<ConstAddr>, DeclError> {
  let names = match names {
    [] if pobj.entries.len() == 1 => vec![pobj.name.clone()],
    _ if names.len() == pobj.entries.len() => names.to_vec(),
    _ => return Err(DeclError::NameCountMismatch { expected: pobj.entries.len(), got: names.len() }),
  };
  (names.into_iter().zip(pobj.entries))
    .map(|(id, entry)| {
      declare_constant(env, locality, id, kind, ConstantEntryRequest::Definition(entry))
    })
    .collect()
}
