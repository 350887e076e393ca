use serde_derive::Deserialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

mod abstraction;
mod closer;
mod declare;
mod entry;
mod env;
mod error;
mod feedback;
mod format;
mod future;
mod inline;
mod kernel;
mod meta;
mod proof;
mod registry;
mod stack;
mod tactic;
mod types;
mod univ;

pub use abstraction::*;
pub use closer::*;
pub use declare::*;
pub use entry::*;
pub use env::*;
pub use error::*;
pub use feedback::*;
pub use future::*;
pub use inline::*;
pub use kernel::*;
pub use meta::*;
pub use proof::*;
pub use registry::*;
pub use stack::*;
pub use tactic::*;
pub use types::*;
pub use univ::*;

pub fn stat(s: &'static str) {
  *STATS.lock().unwrap().get_or_insert_with(HashMap::new).entry(s).or_default() += 1;
}

/// A snapshot of the event counters, sorted by name.
pub fn stats() -> Vec<(&'static str, u32)> {
  let mut g = STATS.lock().unwrap();
  let mut vec: Vec<_> = g.get_or_insert_with(HashMap::new).iter().map(|(&s, &i)| (s, i)).collect();
  vec.sort();
  vec
}

#[macro_export]
macro_rules! vprintln {
  ($($args:tt)*) => {
    if $crate::verbose() {
      eprintln!($($args)*)
    }
  };
}

const DEBUG: bool = cfg!(debug_assertions);

static VERBOSE: AtomicBool = AtomicBool::new(false);
pub fn verbose() -> bool { DEBUG && VERBOSE.load(std::sync::atomic::Ordering::SeqCst) }
pub fn set_verbose(b: bool) { VERBOSE.store(b, std::sync::atomic::Ordering::SeqCst) }

static STATS: Mutex<Option<HashMap<&'static str, u32>>> = Mutex::new(None);

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Inline the private constants of opaque definitions, instead of declaring them as
  /// separate constants.
  pub inline_opaque_effects: bool,
  /// Warn when a proof is saved with unsolved goals.
  pub warn_partial_proofs: bool,
  /// Appended to the proof name to name the lemmas built by `abstract`.
  pub abstract_suffix: Cow<'static, str>,
  /// Panic on kernel rejections instead of returning an error.
  pub panic_on_kernel_fault: bool,
  pub verbose: bool,
}

impl Config {
  pub const DEFAULT: Self = Self {
    inline_opaque_effects: false,
    warn_partial_proofs: true,
    abstract_suffix: Cow::Borrowed("_subproof"),
    panic_on_kernel_fault: false,
    verbose: false,
  };

  pub fn from_env() -> Self {
    let mut cfg = Self::DEFAULT;
    cfg.inline_opaque_effects = std::env::var("INLINE_OPAQUE_EFFECTS").is_ok();
    cfg.warn_partial_proofs = std::env::var("NO_PARTIAL_WARNING").is_err();
    if let Ok(s) = std::env::var("ABSTRACT_SUFFIX") {
      cfg.abstract_suffix = s.into()
    }
    cfg.panic_on_kernel_fault = std::env::var("PANIC_ON_KERNEL_FAULT").is_ok();
    cfg.verbose = std::env::var("DECLARE_VERBOSE").is_ok();
    cfg
  }

  /// Missing fields take their default value.
  pub fn from_json(s: &str) -> serde_json::Result<Self> { serde_json::from_str(s) }
}

impl Default for Config {
  fn default() -> Self { Self::DEFAULT }
}
