use crate::entry::Locality;
use crate::types::{ConstAddr, Id, ModPath};
use radix_trie::{Trie, TrieCommon};

#[derive(Clone, Debug)]
struct Registered {
  addr: ConstAddr,
  locality: Locality,
}

/// The names of all declared constants, keyed by their dotted path. Entries are never removed.
#[derive(Default)]
pub struct ConstantRegistry {
  names: Trie<String, Registered>,
}

impl ConstantRegistry {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize { self.names.len() }

  pub fn is_empty(&self) -> bool { self.names.is_empty() }

  pub fn contains(&self, addr: &ConstAddr) -> bool { self.names.get(&addr.key()).is_some() }

  pub fn locality(&self, addr: &ConstAddr) -> Option<Locality> {
    Some(self.names.get(&addr.key())?.locality)
  }

  pub fn insert(&mut self, addr: ConstAddr, locality: Locality) {
    let old = self.names.insert(addr.key(), Registered { addr, locality });
    debug_assert!(old.is_none(), "registry entries are never replaced");
  }

  /// Resolve a short name from inside module `from`: constants of `from` itself, then those of
  /// the enclosing modules whose short name is visible.
  pub fn locate(&self, from: &ModPath, id: &Id) -> Option<ConstAddr> {
    from.ancestors().find_map(|path| {
      let entry = self.names.get(&path.qualify(id.clone()).key())?;
      (path == *from || entry.locality == Locality::ImportDefaultBehavior).then(|| entry.addr.clone())
    })
  }

  /// The constants declared directly in `path`, in key order.
  pub fn in_module(&self, path: &ModPath) -> Vec<ConstAddr> {
    let prefix = path.key_prefix();
    let direct = |r: &Registered| r.addr.path == *path;
    if prefix.is_empty() {
      return self.names.values().filter(|r| direct(r)).map(|r| r.addr.clone()).collect()
    }
    match self.names.get_raw_descendant(&prefix) {
      Some(sub) => sub.values().filter(|r| direct(r)).map(|r| r.addr.clone()).collect(),
      None => vec![],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn path(ms: &[&str]) -> ModPath { ModPath(ms.iter().map(|&m| Id::new(m)).collect()) }

  #[test]
  fn need_qualified_names_do_not_resolve_from_submodules() {
    let mut reg = ConstantRegistry::new();
    let m = path(&["M"]);
    reg.insert(m.qualify("a".into()), Locality::ImportDefaultBehavior);
    reg.insert(m.qualify("b".into()), Locality::ImportNeedQualified);
    let inner = path(&["M", "N"]);
    assert_eq!(reg.locate(&inner, &"a".into()), Some(m.qualify("a".into())));
    assert_eq!(reg.locate(&inner, &"b".into()), None);
    assert_eq!(reg.locate(&m, &"b".into()), Some(m.qualify("b".into())));
  }

  #[test]
  fn module_listing() {
    let mut reg = ConstantRegistry::new();
    let (m, mn, mm) = (path(&["M"]), path(&["M", "N"]), path(&["MM"]));
    reg.insert(m.qualify("x".into()), Locality::ImportDefaultBehavior);
    reg.insert(mn.qualify("y".into()), Locality::ImportDefaultBehavior);
    reg.insert(mm.qualify("z".into()), Locality::ImportDefaultBehavior);
    reg.insert(ModPath::TOP.qualify("t".into()), Locality::ImportDefaultBehavior);
    assert_eq!(reg.in_module(&m), vec![m.qualify("x".into())]);
    assert_eq!(reg.in_module(&mn), vec![mn.qualify("y".into())]);
    assert_eq!(reg.in_module(&ModPath::TOP), vec![ModPath::TOP.qualify("t".into())]);
    assert_eq!(reg.len(), 4);
  }
}
