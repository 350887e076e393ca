use crate::error::DeclError;
use crate::{stat, vprintln};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};

type Thunk<T> = Box<dyn FnOnce() -> Result<T, DeclError> + Send>;

struct Inner<T> {
  tag: String,
  thunk: Mutex<Option<Thunk<T>>>,
  cell: OnceCell<Result<T, DeclError>>,
}

/// A computation that may run later. It runs at most once: the first `force` resolves it and
/// every later `force` (from any clone) observes the same result, including a failure.
pub struct Deferred<T>(Arc<Inner<T>>);

impl<T> Clone for Deferred<T> {
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> std::fmt::Debug for Deferred<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = if self.is_resolved() { "resolved" } else { "pending" };
    write!(f, "Deferred({}, {state})", self.0.tag)
  }
}

impl<T> Deferred<T> {
  pub fn tag(&self) -> &str { &self.0.tag }

  pub fn is_resolved(&self) -> bool { self.0.cell.get().is_some() }
}

impl<T: Clone> Deferred<T> {
  pub fn ready(val: T) -> Self {
    Deferred(Arc::new(Inner {
      tag: "ready".into(),
      thunk: Mutex::new(None),
      cell: OnceCell::with_value(Ok(val)),
    }))
  }

  pub fn pending(
    tag: impl Into<String>, f: impl FnOnce() -> Result<T, DeclError> + Send + 'static,
  ) -> Self {
    Deferred(Arc::new(Inner {
      tag: tag.into(),
      thunk: Mutex::new(Some(Box::new(f))),
      cell: OnceCell::new(),
    }))
  }

  pub fn force(&self) -> Result<T, DeclError> {
    let res = self.0.cell.get_or_init(|| {
      let thunk = self.0.thunk.lock().unwrap().take();
      match thunk {
        Some(f) => {
          stat("deferred forced");
          vprintln!("forcing {}", self.0.tag);
          f()
        }
        // the thunk panicked in an earlier attempt
        None => Err(DeclError::Abandoned(self.0.tag.clone())),
      }
    });
    res.clone()
  }

  /// A computation running `f` on the result of this one, once forced.
  pub fn chain<U: Clone>(
    &self, tag: impl Into<String>, f: impl FnOnce(T) -> Result<U, DeclError> + Send + 'static,
  ) -> Deferred<U>
  where
    T: Send + Sync + 'static,
  {
    let this = self.clone();
    Deferred::pending(tag, move || f(this.force()?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn forcing_runs_once() {
    let runs = Arc::new(AtomicU32::new(0));
    let r2 = runs.clone();
    let d = Deferred::pending("count", move || Ok(r2.fetch_add(1, Ordering::SeqCst) + 10));
    assert!(!d.is_resolved());
    let d2 = d.clone();
    assert_eq!(d.force().unwrap(), 10);
    assert_eq!(d2.force().unwrap(), 10);
    assert!(d2.is_resolved());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn failures_are_memoized() {
    let d: Deferred<u32> = Deferred::pending("bad", || Err(DeclError::NoFocusedProof));
    assert!(matches!(d.force(), Err(DeclError::NoFocusedProof)));
    assert!(d.is_resolved());
    assert!(matches!(d.force(), Err(DeclError::NoFocusedProof)));
  }

  #[test]
  fn chain_is_lazy() {
    let d = Deferred::ready(2u32);
    let c = d.chain("double", |x| Ok(x * 2));
    assert!(!c.is_resolved());
    assert_eq!(c.force().unwrap(), 4);
  }
}
