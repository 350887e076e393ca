use crate::error::DeclError;
use crate::feedback::FeedbackId;
use crate::future::Deferred;
use crate::types::{ConstAddr, Id, Term};
use crate::univ::{ContextSet, UState, UnivEntry};
use enum_map::Enum;
use serde_derive::Serialize;
use std::collections::BTreeSet;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Opacity {
  Opaque,
  Transparent,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Locality {
  /// The short name resolves after import.
  ImportDefaultBehavior,
  /// Only the qualified name resolves.
  ImportNeedQualified,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, Serialize)]
pub enum DeclKind {
  Theorem,
  Lemma,
  Definition,
  Fixpoint,
  CoFixpoint,
  Axiom,
  Parameter,
  Primitive,
  Variable,
  LetVariable,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SideEffectRole {
  /// An auxiliary lemma factored out of a proof.
  Subproof,
}

/// A private constant produced while elaborating another term.
#[derive(Clone, Debug)]
pub struct SideEffect {
  pub addr: ConstAddr,
  pub body: Term,
  pub ty: Term,
  pub univs: UnivEntry,
  pub opaque: Opacity,
  pub role: SideEffectRole,
}

/// Private constants in declaration order. Each address occurs once.
#[derive(Clone, Debug, Default)]
pub struct SideEffects(Vec<SideEffect>);

impl SideEffects {
  pub fn new() -> Self { Self::default() }
  pub fn is_empty(&self) -> bool { self.0.is_empty() }
  pub fn len(&self) -> usize { self.0.len() }
  pub fn iter(&self) -> std::slice::Iter<'_, SideEffect> { self.0.iter() }

  pub fn get(&self, addr: &ConstAddr) -> Option<&SideEffect> { self.0.iter().find(|e| e.addr == *addr) }

  pub fn contains(&self, addr: &ConstAddr) -> bool { self.get(addr).is_some() }

  pub fn position(&self, addr: &ConstAddr) -> Option<usize> {
    self.0.iter().position(|e| e.addr == *addr)
  }

  pub fn push(&mut self, eff: SideEffect) {
    if !self.contains(&eff.addr) {
      self.0.push(eff)
    }
  }

  /// Append the effects of `other` that are not already present.
  pub fn concat(&mut self, other: &SideEffects) { other.iter().for_each(|e| self.push(e.clone())) }
}

impl<'a> IntoIterator for &'a SideEffects {
  type Item = &'a SideEffect;
  type IntoIter = std::slice::Iter<'a, SideEffect>;
  fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

/// A checked body, with the universe constraints only the body needs and the private
/// constants it refers to.
#[derive(Clone, Debug, Default)]
pub struct BodyOutput {
  pub term: Term,
  pub body_ucst: ContextSet,
  pub effects: SideEffects,
}

#[derive(Clone, Debug)]
pub enum ProofBody {
  Value(BodyOutput),
  Deferred(Deferred<BodyOutput>),
}

/// A finished but unregistered definition.
#[derive(Clone, Debug)]
pub struct ProofEntry {
  pub body: ProofBody,
  /// The section variables the definition may use, when fixed.
  pub secctx: Option<BTreeSet<Id>>,
  pub feedback_id: Option<FeedbackId>,
  pub ty: Option<Term>,
  pub univs: UnivEntry,
  pub opaque: Opacity,
  pub inline: bool,
}

impl ProofEntry {
  fn with_body(body: ProofBody) -> Self {
    ProofEntry {
      body,
      secctx: None,
      feedback_id: None,
      ty: None,
      univs: UnivEntry::default(),
      opaque: Opacity::Transparent,
      inline: false,
    }
  }

  /// A transparent definition with no side effects.
  pub fn definition(term: Term) -> Self {
    Self::with_body(ProofBody::Value(BodyOutput { term, ..Default::default() }))
  }

  pub fn from_output(out: BodyOutput) -> Self { Self::with_body(ProofBody::Value(out)) }

  pub fn deferred(body: Deferred<BodyOutput>) -> Self { Self::with_body(ProofBody::Deferred(body)) }

  pub fn with_type(self, ty: Term) -> Self { ProofEntry { ty: Some(ty), ..self } }
  pub fn with_univs(self, univs: UnivEntry) -> Self { ProofEntry { univs, ..self } }
  pub fn with_opacity(self, opaque: Opacity) -> Self { ProofEntry { opaque, ..self } }
  pub fn with_feedback_id(self, id: FeedbackId) -> Self { ProofEntry { feedback_id: Some(id), ..self } }
  pub fn with_section_vars(self, vars: BTreeSet<Id>) -> Self {
    ProofEntry { secctx: Some(vars), ..self }
  }

  pub fn is_resolved(&self) -> bool {
    match &self.body {
      ProofBody::Value(_) => true,
      ProofBody::Deferred(d) => d.is_resolved(),
    }
  }

  /// The body, forcing a deferred one.
  pub fn force_body(&self) -> Result<BodyOutput, DeclError> {
    match &self.body {
      ProofBody::Value(out) => Ok(out.clone()),
      ProofBody::Deferred(d) => d.force(),
    }
  }

  /// The same entry with an already computed body.
  pub fn resolved(&self) -> Result<ProofEntry, DeclError> {
    Ok(ProofEntry { body: ProofBody::Value(self.force_body()?), ..self.clone() })
  }
}

#[derive(Clone, Debug)]
pub struct ParameterEntry {
  pub secctx: Option<BTreeSet<Id>>,
  pub ty: Term,
  pub univs: UnivEntry,
  pub inline: bool,
}

impl ParameterEntry {
  pub fn new(ty: Term) -> Self {
    ParameterEntry { secctx: None, ty, univs: UnivEntry::default(), inline: false }
  }
}

/// A primitive operation or type, identified by its built-in name.
#[derive(Clone, Debug)]
pub struct PrimitiveEntry {
  pub content: Id,
  pub ty: Term,
}

#[derive(Clone, Debug)]
pub enum ConstantEntryRequest {
  Definition(ProofEntry),
  Parameter(ParameterEntry),
  Primitive(PrimitiveEntry),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindingKind {
  Explicit,
  Implicit,
}

#[derive(Clone, Debug)]
pub enum VariableDeclaration {
  LocalDefinition(ProofEntry),
  LocalAssumption { ty: Term, binding: BindingKind, univs: ContextSet },
}

impl VariableDeclaration {
  pub fn assumption(ty: Term) -> Self {
    VariableDeclaration::LocalAssumption { ty, binding: BindingKind::Explicit, univs: ContextSet::new() }
  }
}

/// The result of closing a proof: one entry per goal the proof was started with.
#[derive(Clone, Debug)]
pub struct ProofObject {
  pub name: Id,
  pub poly: bool,
  pub entries: Vec<ProofEntry>,
  pub ustate: UState,
}
