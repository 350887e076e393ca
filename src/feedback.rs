//! The feedback channel. Events are informational: a sink may drop them without affecting
//! the outcome of any declaration.

use crate::types::Id;
use crate::verbose;
use itertools::Itertools;
use serde_derive::Serialize;
use std::io::Write;
use std::sync::Mutex;

/// Identifies the statement a message (or a deferred failure) belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FeedbackId(pub u32);

impl std::fmt::Display for FeedbackId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgLevel {
  Info,
  Warning,
  Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
  pub id: Option<FeedbackId>,
  pub level: MsgLevel,
  pub name: Option<Id>,
  pub msg: String,
}

impl Event {
  pub fn info(name: &Id, msg: String) -> Self {
    Event { id: None, level: MsgLevel::Info, name: Some(name.clone()), msg }
  }
}

pub trait Feedback {
  fn emit(&self, ev: Event);
}

/// Drops everything.
pub struct Silent;
impl Feedback for Silent {
  fn emit(&self, _: Event) {}
}

/// Prints warnings and errors to stderr, and informational messages in verbose mode.
pub struct Stderr;
impl Feedback for Stderr {
  fn emit(&self, ev: Event) {
    let sev = match ev.level {
      MsgLevel::Info if !verbose() => return,
      MsgLevel::Info => "info",
      MsgLevel::Warning => "warning",
      MsgLevel::Error => "error",
    };
    match ev.id {
      Some(id) => eprintln!("{id}: {sev}: {}", ev.msg),
      None => eprintln!("{sev}: {}", ev.msg),
    }
  }
}

/// Keeps every event, in order.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<Event>>);

impl Recorder {
  pub fn events(&self) -> Vec<Event> { self.0.lock().unwrap().clone() }

  pub fn count(&self, level: MsgLevel) -> usize {
    self.0.lock().unwrap().iter().filter(|ev| ev.level == level).count()
  }

  pub fn clear(&self) { self.0.lock().unwrap().clear() }
}

impl Feedback for Recorder {
  fn emit(&self, ev: Event) { self.0.lock().unwrap().push(ev) }
}

/// Writes one JSON object per event.
pub struct JsonFeedback<W>(Mutex<W>);

impl<W: Write> JsonFeedback<W> {
  pub fn new(w: W) -> Self { Self(Mutex::new(w)) }

  pub fn into_inner(self) -> W { self.0.into_inner().unwrap() }
}

impl<W: Write> Feedback for JsonFeedback<W> {
  fn emit(&self, ev: Event) {
    let mut w = self.0.lock().unwrap();
    // a sink that cannot write loses the message, nothing more
    if serde_json::to_writer(&mut *w, &ev).is_ok() {
      let _ = writeln!(w);
    }
  }
}

/// `1st`, `2nd`, `3rd`, `4th`, ... for a zero-based position.
pub fn pr_rank(i: usize) -> String {
  let n = i + 1;
  let suffix = match (n % 10, n % 100) {
    (_, 11..=13) => "th",
    (1, _) => "st",
    (2, _) => "nd",
    (3, _) => "rd",
    _ => "th",
  };
  format!("{n}{suffix}")
}

pub fn definition_message(fb: &dyn Feedback, id: &Id) {
  fb.emit(Event::info(id, format!("{id} is defined")))
}

pub fn assumption_message(fb: &dyn Feedback, id: &Id) {
  fb.emit(Event::info(id, format!("{id} is declared")))
}

fn fixpoint_text(indexes: Option<&[usize]>, ids: &[Id]) -> String {
  match ids {
    [] => String::new(),
    [id] => match indexes {
      Some(&[i]) => format!("{id} is recursively defined (guarded on {} argument)", pr_rank(i)),
      _ => format!("{id} is recursively defined"),
    },
    _ => match indexes {
      Some(idx) => format!(
        "{} are recursively defined (guarded respectively on {} arguments)",
        ids.iter().format(", "),
        idx.iter().map(|&i| pr_rank(i)).format(", ")
      ),
      None => format!("{} are recursively defined", ids.iter().format(", ")),
    },
  }
}

fn cofixpoint_text(ids: &[Id]) -> String {
  match ids {
    [] => String::new(),
    [id] => format!("{id} is corecursively defined"),
    _ => format!("{} are corecursively defined", ids.iter().format(", ")),
  }
}

/// `indexes` are the zero-based positions of the decreasing arguments, one per function.
pub fn fixpoint_message(fb: &dyn Feedback, indexes: Option<&[usize]>, ids: &[Id]) {
  debug_assert!(!ids.is_empty(), "no recursive definition");
  if let Some(first) = ids.first() {
    fb.emit(Event::info(first, fixpoint_text(indexes, ids)))
  }
}

pub fn cofixpoint_message(fb: &dyn Feedback, ids: &[Id]) {
  debug_assert!(!ids.is_empty(), "no corecursive definition");
  if let Some(first) = ids.first() {
    fb.emit(Event::info(first, cofixpoint_text(ids)))
  }
}

pub fn recursive_message(fb: &dyn Feedback, is_fix: bool, indexes: Option<&[usize]>, ids: &[Id]) {
  if is_fix {
    fixpoint_message(fb, indexes, ids)
  } else {
    cofixpoint_message(fb, ids)
  }
}

pub fn partial_proof_warning(fb: &dyn Feedback, id: Option<FeedbackId>, name: &Id, open: usize) {
  fb.emit(Event {
    id,
    level: MsgLevel::Warning,
    name: Some(name.clone()),
    msg: format!("{name}: attempt to save a proof with {open} unsolved goal(s)"),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ranks() {
    let r = [0, 1, 2, 3, 10, 11, 12, 20, 21, 110].map(pr_rank);
    assert_eq!(r, ["1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "111th"]);
  }

  #[test]
  fn fixpoint_texts() {
    let (f, g) = (Id::new("f"), Id::new("g"));
    assert_eq!(
      fixpoint_text(Some(&[1][..]), &[f.clone()]),
      "f is recursively defined (guarded on 2nd argument)"
    );
    assert_eq!(
      fixpoint_text(Some(&[0, 2][..]), &[f.clone(), g.clone()]),
      "f, g are recursively defined (guarded respectively on 1st, 3rd arguments)"
    );
    assert_eq!(cofixpoint_text(&[f, g]), "f, g are corecursively defined");
  }

  #[test]
  fn json_lines() {
    let fb = JsonFeedback::new(vec![]);
    definition_message(&fb, &Id::new("foo"));
    let out = String::from_utf8(fb.into_inner()).unwrap();
    assert_eq!(out, "{\"id\":null,\"level\":\"info\",\"name\":\"foo\",\"msg\":\"foo is defined\"}\n");
  }
}
