use crate::error::KernelError;
use crate::types::{ConstAddr, ConstId, Id, IdxVec, NamedContext, Term};
use crate::univ::{ContextSet, UnivEntry};
use crate::vprintln;
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug)]
pub enum ConstDef {
  Undef,
  Def(Term),
  OpaqueDef(Term),
  Primitive(Id),
}

impl ConstDef {
  pub fn body(&self) -> Option<&Term> {
    match self {
      ConstDef::Def(t) | ConstDef::OpaqueDef(t) => Some(t),
      ConstDef::Undef | ConstDef::Primitive(_) => None,
    }
  }
}

/// A declaration as the kernel stores it.
#[derive(Clone, Debug)]
pub struct ConstantBody {
  pub addr: ConstAddr,
  pub ty: Term,
  pub def: ConstDef,
  pub univs: UnivEntry,
  /// Universe constraints needed by the body only.
  pub body_ucst: ContextSet,
  /// The section variables the constant may depend on, when fixed.
  pub hyps: Option<BTreeSet<Id>>,
  pub inline: bool,
}

/// The safe-addition primitive. `check` validates a candidate without changing anything;
/// `add_constant` commits a candidate that was checked.
pub trait Kernel: Send + Sync {
  /// `pending` are candidates checked earlier in the same declaration, not yet added.
  fn check(
    &self, body: &ConstantBody, section: &NamedContext, pending: &[ConstantBody],
  ) -> Result<(), KernelError>;

  fn add_constant(&mut self, body: ConstantBody) -> Result<ConstId, KernelError>;

  fn lookup(&self, addr: &ConstAddr) -> Option<&ConstantBody>;

  fn len(&self) -> usize;
}

/// A kernel that validates the scoping of declarations: every constant and section variable a
/// declaration mentions must exist, and no placeholder may remain.
#[derive(Default)]
pub struct SafeKernel {
  consts: IdxVec<ConstId, ConstantBody>,
  index: HashMap<ConstAddr, ConstId>,
}

impl SafeKernel {
  pub fn new() -> Self { Self::default() }

  pub fn get(&self, id: ConstId) -> &ConstantBody { &self.consts[id] }

  fn check_term(
    &self, addr: &ConstAddr, tm: &Term, body: &ConstantBody, section: &NamedContext,
    pending: &[ConstantBody],
  ) -> Result<(), KernelError> {
    if tm.has_metas() {
      return Err(KernelError::UnresolvedMeta(addr.clone()))
    }
    for c in tm.consts() {
      if !self.index.contains_key(&c) && !pending.iter().any(|p| p.addr == c) {
        return Err(KernelError::UnknownConstant(c))
      }
    }
    for var in tm.free_vars() {
      if !section.contains(&var) {
        return Err(KernelError::UndeclaredSectionVariable { addr: addr.clone(), var })
      }
      if let Some(hyps) = &body.hyps {
        if !hyps.contains(&var) {
          return Err(KernelError::OutsideSectionClosure { addr: addr.clone(), var })
        }
      }
    }
    Ok(())
  }
}

impl Kernel for SafeKernel {
  fn check(
    &self, body: &ConstantBody, section: &NamedContext, pending: &[ConstantBody],
  ) -> Result<(), KernelError> {
    let addr = &body.addr;
    if self.index.contains_key(addr) || pending.iter().any(|p| p.addr == *addr) {
      return Err(KernelError::AlreadyPresent(addr.clone()))
    }
    self.check_term(addr, &body.ty, body, section, pending)?;
    if let Some(t) = body.def.body() {
      self.check_term(addr, t, body, section, pending)?
    }
    Ok(())
  }

  fn add_constant(&mut self, body: ConstantBody) -> Result<ConstId, KernelError> {
    if self.index.contains_key(&body.addr) {
      return Err(KernelError::AlreadyPresent(body.addr))
    }
    vprintln!("kernel: adding {}", body.addr);
    let addr = body.addr.clone();
    let id = self.consts.push(body);
    self.index.insert(addr, id);
    Ok(id)
  }

  fn lookup(&self, addr: &ConstAddr) -> Option<&ConstantBody> { Some(&self.consts[*self.index.get(addr)?]) }

  fn len(&self) -> usize { self.consts.len() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ModPath;
  use crate::univ::Level;

  fn axiom(name: &str, ty: Term) -> ConstantBody {
    ConstantBody {
      addr: ModPath::TOP.qualify(Id::new(name)),
      ty,
      def: ConstDef::Undef,
      univs: UnivEntry::default(),
      body_ucst: ContextSet::new(),
      hyps: None,
      inline: false,
    }
  }

  #[test]
  fn rejects_unknown_constants_and_duplicates() {
    let mut k = SafeKernel::new();
    let sec = NamedContext::default();
    let a = axiom("A", Term::Sort(Level::Set));
    k.check(&a, &sec, &[]).unwrap();
    k.add_constant(a.clone()).unwrap();
    assert_eq!(k.check(&a, &sec, &[]), Err(KernelError::AlreadyPresent(a.addr.clone())));
    let b = axiom("b", Term::Const(ModPath::TOP.qualify(Id::new("B"))));
    assert!(matches!(k.check(&b, &sec, &[]), Err(KernelError::UnknownConstant(_))));
    let b = axiom("b", Term::Const(a.addr.clone()));
    assert!(k.check(&b, &sec, &[]).is_ok());
    assert_eq!(k.len(), 1);
  }

  #[test]
  fn section_variables_must_be_in_scope() {
    let k = SafeKernel::new();
    let mut sec = NamedContext::default();
    let x = axiom("x", Term::Var(Id::new("A")));
    assert!(matches!(k.check(&x, &sec, &[]), Err(KernelError::UndeclaredSectionVariable { .. })));
    sec.push_assum(Id::new("A"), Term::Sort(Level::Set));
    assert!(k.check(&x, &sec, &[]).is_ok());
    let x = ConstantBody { hyps: Some(BTreeSet::new()), ..x };
    assert!(matches!(k.check(&x, &sec, &[]), Err(KernelError::OutsideSectionClosure { .. })));
  }
}
