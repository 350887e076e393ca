use crate::error::DeclError;
use crate::types::Id;
use im::OrdSet;
use itertools::Itertools;
use serde_derive::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Level {
  /// The bottom level, below every other level.
  Set,
  Var(Id),
}

impl Level {
  pub fn var(s: &str) -> Level { Level::Var(Id::new(s)) }
}

impl std::fmt::Debug for Level {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Display::fmt(self, f) }
}
impl std::fmt::Display for Level {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Level::Set => f.write_str("Set"),
      Level::Var(x) => write!(f, "{x}"),
    }
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ConstraintKind {
  Lt,
  Le,
  Eq,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Constraint {
  pub left: Level,
  pub kind: ConstraintKind,
  pub right: Level,
}

impl Constraint {
  pub fn lt(left: Level, right: Level) -> Self { Self { left, kind: ConstraintKind::Lt, right } }
  pub fn le(left: Level, right: Level) -> Self { Self { left, kind: ConstraintKind::Le, right } }
  pub fn eq(left: Level, right: Level) -> Self { Self { left, kind: ConstraintKind::Eq, right } }

  /// Holds in every graph.
  pub fn is_trivial(&self) -> bool {
    match self.kind {
      ConstraintKind::Lt => false,
      ConstraintKind::Le => self.left == self.right || self.left == Level::Set,
      ConstraintKind::Eq => self.left == self.right,
    }
  }
}

impl std::fmt::Debug for Constraint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Display::fmt(self, f) }
}
impl std::fmt::Display for Constraint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let op = match self.kind {
      ConstraintKind::Lt => "<",
      ConstraintKind::Le => "<=",
      ConstraintKind::Eq => "=",
    };
    write!(f, "{} {op} {}", self.left, self.right)
  }
}

/// A set of universe levels together with constraints over them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ContextSet {
  pub levels: OrdSet<Level>,
  pub constraints: OrdSet<Constraint>,
}

impl std::fmt::Debug for ContextSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{{{} |= {}}}", self.levels.iter().format(" "), self.constraints.iter().format(", "))
  }
}

impl ContextSet {
  pub fn new() -> Self { Self::default() }

  pub fn is_empty(&self) -> bool { self.levels.is_empty() && self.constraints.is_empty() }

  pub fn with_levels(levels: impl IntoIterator<Item = Level>) -> Self {
    let mut cs = Self::new();
    levels.into_iter().for_each(|l| cs.add_level(l));
    cs
  }

  pub fn add_level(&mut self, l: Level) {
    if l != Level::Set {
      self.levels.insert(l);
    }
  }

  /// Adds a constraint, and the levels it mentions.
  pub fn add_constraint(&mut self, c: Constraint) {
    self.add_level(c.left.clone());
    self.add_level(c.right.clone());
    self.constraints.insert(c);
  }

  pub fn union(&self, other: &ContextSet) -> ContextSet {
    ContextSet {
      levels: self.levels.clone().union(other.levels.clone()),
      constraints: self.constraints.clone().union(other.constraints.clone()),
    }
  }

  /// The levels and constraints of `self` that are not in `other`.
  pub fn diff(&self, other: &ContextSet) -> ContextSet {
    ContextSet {
      levels: self.levels.clone().relative_complement(other.levels.clone()),
      constraints: self.constraints.clone().relative_complement(other.constraints.clone()),
    }
  }

  pub fn is_subset(&self, other: &ContextSet) -> bool {
    self.levels.is_subset(&other.levels) && self.constraints.is_subset(&other.constraints)
  }
}

/// The universe context of a polymorphic declaration: bound level names and their constraints.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UContext {
  pub names: Vec<Id>,
  pub constraints: OrdSet<Constraint>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnivEntry {
  Monomorphic(ContextSet),
  Polymorphic(UContext),
}

impl Default for UnivEntry {
  fn default() -> Self { UnivEntry::Monomorphic(ContextSet::new()) }
}

impl UnivEntry {
  pub fn is_polymorphic(&self) -> bool { matches!(self, UnivEntry::Polymorphic(_)) }

  /// The context to be merged into the global graph, if any.
  pub fn monomorphic(&self) -> Option<&ContextSet> {
    match self {
      UnivEntry::Monomorphic(cs) => Some(cs),
      UnivEntry::Polymorphic(_) => None,
    }
  }
}

/// A user-written universe declaration: `@{u v | u < v}`, possibly extensible with `+`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnivDecl {
  pub instance: Vec<Id>,
  pub extensible_instance: bool,
  pub constraints: Vec<Constraint>,
  pub extensible_constraints: bool,
}

impl Default for UnivDecl {
  fn default() -> Self {
    Self { instance: vec![], extensible_instance: true, constraints: vec![], extensible_constraints: true }
  }
}

impl UnivDecl {
  /// A declaration that fixes both the bound names and the constraints.
  pub fn closed(instance: Vec<Id>, constraints: Vec<Constraint>) -> Self {
    Self { instance, extensible_instance: false, constraints, extensible_constraints: false }
  }

  pub fn context_set(&self) -> ContextSet {
    let mut cs = ContextSet::with_levels(self.instance.iter().cloned().map(Level::Var));
    self.constraints.iter().cloned().for_each(|c| cs.add_constraint(c));
    cs
  }
}

/// An append-only graph of universe constraints. `Set` is implicitly below every level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UGraph {
  cs: ContextSet,
}

impl UGraph {
  pub fn new() -> Self { Self::default() }

  pub fn context_set(&self) -> &ContextSet { &self.cs }

  pub fn contains_level(&self, l: &Level) -> bool { *l == Level::Set || self.cs.levels.contains(l) }

  fn edges(&self) -> HashMap<&Level, Vec<(&Level, bool)>> {
    let mut edges: HashMap<_, Vec<_>> = HashMap::new();
    for c in &self.cs.constraints {
      match c.kind {
        ConstraintKind::Lt => edges.entry(&c.left).or_default().push((&c.right, true)),
        ConstraintKind::Le => edges.entry(&c.left).or_default().push((&c.right, false)),
        ConstraintKind::Eq => {
          edges.entry(&c.left).or_default().push((&c.right, false));
          edges.entry(&c.right).or_default().push((&c.left, false))
        }
      }
    }
    let set = edges.entry(&Level::Set).or_default();
    set.extend(self.cs.levels.iter().map(|l| (l, false)));
    edges
  }

  /// Whether `to` is reachable from `from`, and if so whether some path crosses a strict edge.
  fn search(edges: &HashMap<&Level, Vec<(&Level, bool)>>, from: &Level, to: &Level) -> Option<bool> {
    // states are (level, crossed a strict edge)
    let mut seen = HashSet::new();
    let mut worklist = vec![(from, false)];
    let mut found = None;
    while let Some((l, strict)) = worklist.pop() {
      if !seen.insert((l, strict)) {
        continue
      }
      if l == to {
        if strict {
          return Some(true)
        }
        found = Some(false)
      }
      for &(next, s) in edges.get(l).into_iter().flatten() {
        worklist.push((next, strict || s))
      }
    }
    found
  }

  fn check_consistent(&self) -> Result<(), DeclError> {
    let edges = self.edges();
    for c in &self.cs.constraints {
      let bad = match c.kind {
        ConstraintKind::Lt => Self::search(&edges, &c.right, &c.left).is_some(),
        ConstraintKind::Le | ConstraintKind::Eq =>
          Self::search(&edges, &c.right, &c.left) == Some(true)
            || c.kind == ConstraintKind::Eq && Self::search(&edges, &c.left, &c.right) == Some(true),
      };
      if bad {
        return Err(DeclError::InconsistentUniverses(c.clone()))
      }
    }
    Ok(())
  }

  /// The graph extended with `ctx`. Merging a context that is already present is a no-op.
  pub fn merge(&self, ctx: &ContextSet) -> Result<UGraph, DeclError> {
    if ctx.is_subset(&self.cs) {
      return Ok(self.clone())
    }
    let g = UGraph { cs: self.cs.union(ctx) };
    g.check_consistent()?;
    Ok(g)
  }

  /// Whether the constraint already follows from the graph.
  pub fn implies(&self, c: &Constraint) -> bool {
    if c.is_trivial() {
      return true
    }
    let edges = self.edges();
    match c.kind {
      ConstraintKind::Lt => Self::search(&edges, &c.left, &c.right) == Some(true),
      ConstraintKind::Le => Self::search(&edges, &c.left, &c.right).is_some(),
      ConstraintKind::Eq =>
        Self::search(&edges, &c.left, &c.right).is_some()
          && Self::search(&edges, &c.right, &c.left).is_some(),
    }
  }
}

/// The universe state of a proof: a local context over a snapshot of the global graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UState {
  local: ContextSet,
  ambient: UGraph,
}

impl UState {
  pub fn new(ambient: UGraph) -> Self { Self { local: ContextSet::new(), ambient } }

  /// A state whose local context is already known to be consistent with `ambient`.
  pub(crate) fn with_local(ambient: UGraph, local: ContextSet) -> Self { Self { local, ambient } }

  pub fn context_set(&self) -> &ContextSet { &self.local }

  pub fn ambient(&self) -> &UGraph { &self.ambient }

  /// Refresh the global snapshot, keeping the local context.
  pub fn set_ambient(&mut self, ambient: UGraph) { self.ambient = ambient }

  pub fn new_level(&mut self, name: &str) -> Level {
    let l = Level::var(name);
    self.local.add_level(l.clone());
    l
  }

  /// Fails without changing `self` if the merged constraints contain a cycle.
  pub fn merge_context_set(&mut self, ctx: &ContextSet) -> Result<(), DeclError> {
    if ctx.is_subset(&self.local) {
      return Ok(())
    }
    let local = self.local.union(ctx);
    self.ambient.merge(&local)?;
    self.local = local;
    Ok(())
  }

  /// The state without the universes of `bound`, which a monomorphic declaration cannot
  /// export. Fails if a remaining constraint still mentions one of them.
  pub(crate) fn unbind(&self, bound: &ContextSet) -> Result<UState, DeclError> {
    if bound.is_empty() {
      return Ok(self.clone())
    }
    let local = self.local.diff(bound);
    let escaping = (local.constraints.iter())
      .filter(|c| bound.levels.contains(&c.left) || bound.levels.contains(&c.right))
      .cloned()
      .collect_vec();
    if !escaping.is_empty() {
      return Err(DeclError::UnexpectedConstraints(escaping))
    }
    Ok(UState { local, ambient: self.ambient.clone() })
  }

  /// Drop constraints that hold trivially or already follow from the global graph.
  pub fn normalize(&self) -> UState {
    let mut local = ContextSet { levels: self.local.levels.clone(), constraints: OrdSet::new() };
    for c in &self.local.constraints {
      if !self.ambient.implies(c) {
        local.constraints.insert(c.clone());
      }
    }
    local.levels = local.levels.into_iter().filter(|l| !self.ambient.contains_level(l)).collect();
    UState { local, ambient: self.ambient.clone() }
  }

  /// Check the local context against a universe declaration and build the universe entry of
  /// the declared constant.
  pub fn check_univ_decl(&self, decl: &UnivDecl, poly: bool) -> Result<UnivEntry, DeclError> {
    let declared = decl.context_set();
    if !decl.extensible_instance {
      let undeclared =
        self.local.levels.iter().filter(|l| !declared.levels.contains(l)).cloned().collect_vec();
      if !undeclared.is_empty() {
        return Err(DeclError::UndeclaredUniverses(undeclared))
      }
    }
    if !decl.extensible_constraints {
      let allowed = self.ambient.merge(&declared)?;
      let unexpected = (self.local.constraints.iter())
        .filter(|c| !declared.constraints.contains(c) && !allowed.implies(c))
        .cloned()
        .collect_vec();
      if !unexpected.is_empty() {
        return Err(DeclError::UnexpectedConstraints(unexpected))
      }
    }
    let full = self.local.union(&declared);
    Ok(if poly {
      let mut names = decl.instance.clone();
      for l in &full.levels {
        if let Level::Var(x) = l {
          if !names.contains(x) {
            names.push(x.clone())
          }
        }
      }
      UnivEntry::Polymorphic(UContext { names, constraints: full.constraints })
    } else {
      UnivEntry::Monomorphic(full)
    })
  }
}
