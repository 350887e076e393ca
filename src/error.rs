use crate::feedback::{Event, Feedback, FeedbackId, MsgLevel};
use crate::types::{ConstAddr, Id, MetaId};
use crate::univ::{Constraint, Level};
use itertools::Itertools;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
  /// The caller can fix the problem and try again.
  Recoverable,
  /// The declaration in progress is abandoned.
  Fatal,
}

/// Faults of the safe-addition primitive. These are never retried.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum KernelError {
  #[error("{0} is already present in the environment")]
  AlreadyPresent(ConstAddr),
  #[error("unknown constant {0}")]
  UnknownConstant(ConstAddr),
  #[error("{0} still contains metavariables")]
  UnresolvedMeta(ConstAddr),
  #[error("{addr} refers to {var}, which is not a section variable in scope")]
  UndeclaredSectionVariable { addr: ConstAddr, var: Id },
  #[error("{addr} uses section variable {var}, which is not among its declared section variables")]
  OutsideSectionClosure { addr: ConstAddr, var: Id },
}

fn fmt_hint(hint: &Option<String>) -> String {
  match hint {
    Some(h) => format!(" (as {h})"),
    None => String::new(),
  }
}

#[derive(Clone, Debug, Error)]
pub enum DeclError {
  #[error("{id} already exists{}", fmt_hint(.hint))]
  AlreadyDeclared { id: Id, hint: Option<String> },
  #[error("attempt to save an incomplete proof: {name} has {open} unsolved goal(s)")]
  IncompleteProof { name: Id, open: usize },
  #[error("{name}: construction left open metavariables {metas:?}")]
  UnresolvedMetavariables { name: Id, metas: Vec<MetaId> },
  #[error("universe inconsistency: cannot enforce {0}")]
  InconsistentUniverses(Constraint),
  #[error("undeclared universes: {}", .0.iter().format(", "))]
  UndeclaredUniverses(Vec<Level>),
  #[error("unexpected universe constraints: {}", .0.iter().format(", "))]
  UnexpectedConstraints(Vec<Constraint>),
  #[error("no focused proof")]
  NoFocusedProof,
  #[error("no such proof: {0}")]
  NoSuchProof(Id),
  #[error("no such goal: {0}")]
  NoSuchGoal(usize),
  #[error("{0} is not a section variable in scope")]
  UnknownSectionVariable(Id),
  #[error("used section variables have already been declared for this proof")]
  UsedVariablesAlreadySet,
  #[error("{0}: cannot declare a section variable outside of a section")]
  NotInSection(Id),
  #[error("no open {0} to close")]
  NothingToClose(&'static str),
  #[error("cannot declare {0} without a type")]
  MissingType(Id),
  #[error("expected {expected} name(s) for the proof, got {got}")]
  NameCountMismatch { expected: usize, got: usize },
  #[error("{tactic}: {msg}")]
  Tactic { tactic: &'static str, msg: String },
  #[error("deferred computation {0} was abandoned")]
  Abandoned(String),
  #[error("kernel rejected the declaration: {0}")]
  Kernel(#[from] KernelError),
  #[error("deferred proof {feedback_id} failed: {source}")]
  Deferred { feedback_id: FeedbackId, source: Box<DeclError> },
}

impl DeclError {
  pub fn tactic(tactic: &'static str, msg: impl Into<String>) -> Self {
    DeclError::Tactic { tactic, msg: msg.into() }
  }

  pub fn severity(&self) -> Severity {
    match self {
      DeclError::Kernel(_) | DeclError::InconsistentUniverses(_) | DeclError::Abandoned(_) =>
        Severity::Fatal,
      DeclError::Deferred { source, .. } => source.severity(),
      _ => Severity::Recoverable,
    }
  }

  /// The feedback identifier a deferred failure is attached to, if any.
  pub fn feedback_id(&self) -> Option<FeedbackId> {
    match self {
      DeclError::Deferred { feedback_id, .. } => Some(*feedback_id),
      _ => None,
    }
  }

  /// Send the error to the feedback channel. Returns true if it was fatal.
  pub fn report(&self, fb: &dyn Feedback, id: Option<FeedbackId>) -> bool {
    let severity = self.severity();
    fb.emit(Event {
      id: id.or_else(|| self.feedback_id()),
      level: MsgLevel::Error,
      name: None,
      msg: self.to_string(),
    });
    severity == Severity::Fatal
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::feedback::Recorder;

  #[test]
  fn already_declared_mentions_hint() {
    let e = DeclError::AlreadyDeclared { id: Id::new("foo"), hint: Some("M.foo".into()) };
    assert_eq!(e.to_string(), "foo already exists (as M.foo)");
    let e = DeclError::AlreadyDeclared { id: Id::new("foo"), hint: None };
    assert_eq!(e.to_string(), "foo already exists");
  }

  #[test]
  fn deferred_failures_keep_their_tag() {
    let addr = crate::types::ModPath::TOP.qualify("c".into());
    let inner = DeclError::Kernel(KernelError::UnknownConstant(addr));
    let e = DeclError::Deferred { feedback_id: FeedbackId(7), source: Box::new(inner) };
    assert_eq!(e.severity(), Severity::Fatal);
    let rec = Recorder::default();
    assert!(e.report(&rec, None));
    let evs = rec.events();
    assert_eq!(evs.len(), 1);
    assert_eq!(evs[0].id, Some(FeedbackId(7)));
    assert_eq!(evs[0].level, MsgLevel::Error);
  }
}
