use crate::entry::{DeclKind, Locality, SideEffect};
use crate::error::{DeclError, KernelError};
use crate::feedback::{Feedback, Stderr};
use crate::kernel::{ConstantBody, Kernel, SafeKernel};
use crate::registry::ConstantRegistry;
use crate::types::{ConstAddr, Hyp, Id, ModPath, NamedContext, Term};
use crate::univ::{ContextSet, UGraph};
use crate::{set_verbose, stat, vprintln, Config};
use enum_map::EnumMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug)]
enum Scope {
  Module,
  /// A section, the number of section variables in scope when it was opened, and the
  /// polymorphic universes declared before it.
  Section(Id, usize, ContextSet),
}

/// The global environment: the kernel, the name registry, the section variables and the
/// global universe graph. Every declaration goes through an `&mut Env`.
pub struct Env {
  pub cfg: Config,
  kernel: Box<dyn Kernel>,
  registry: ConstantRegistry,
  section: NamedContext,
  /// Section variables bound implicitly.
  implicit: BTreeSet<Id>,
  scopes: Vec<Scope>,
  modpath: ModPath,
  universes: UGraph,
  /// Universes declared polymorphically; every new proof starts with them.
  poly_univs: ContextSet,
  private: HashMap<ConstAddr, SideEffect>,
  feedback: Arc<dyn Feedback + Send + Sync>,
  stamp: u64,
  counts: EnumMap<DeclKind, u32>,
}

impl Env {
  pub fn new(cfg: Config) -> Self { Self::with_feedback(cfg, Arc::new(Stderr)) }

  pub fn with_feedback(cfg: Config, feedback: Arc<dyn Feedback + Send + Sync>) -> Self {
    set_verbose(cfg.verbose);
    Env {
      cfg,
      kernel: Box::new(SafeKernel::new()),
      registry: ConstantRegistry::new(),
      section: NamedContext::default(),
      implicit: BTreeSet::new(),
      scopes: vec![],
      modpath: ModPath::TOP,
      universes: UGraph::new(),
      poly_univs: ContextSet::new(),
      private: HashMap::new(),
      feedback,
      stamp: 0,
      counts: EnumMap::default(),
    }
  }

  pub fn feedback(&self) -> &(dyn Feedback + Send + Sync) { &*self.feedback }
  pub fn feedback_handle(&self) -> Arc<dyn Feedback + Send + Sync> { self.feedback.clone() }
  pub fn kernel(&self) -> &dyn Kernel { &*self.kernel }
  pub fn registry(&self) -> &ConstantRegistry { &self.registry }
  pub fn universes(&self) -> &UGraph { &self.universes }
  pub fn poly_univs(&self) -> &ContextSet { &self.poly_univs }
  pub fn section_context(&self) -> &NamedContext { &self.section }
  pub fn modpath(&self) -> &ModPath { &self.modpath }
  pub fn counts(&self) -> &EnumMap<DeclKind, u32> { &self.counts }

  /// Changes whenever a declaration or a scope change modifies the environment.
  pub fn stamp(&self) -> u64 { self.stamp }

  pub fn is_implicit(&self, id: &Id) -> bool { self.implicit.contains(id) }

  pub fn in_section(&self) -> bool { self.scopes.iter().any(|s| matches!(s, Scope::Section(..))) }

  pub fn start_module(&mut self, name: Id) {
    vprintln!("start module {name}");
    self.modpath.0.push(name);
    self.scopes.push(Scope::Module);
    self.stamp += 1;
  }

  pub fn end_module(&mut self) -> Result<ModPath, DeclError> {
    let Some(Scope::Module) = self.scopes.last() else { return Err(DeclError::NothingToClose("module")) };
    self.scopes.pop();
    let path = self.modpath.clone();
    self.modpath.0.pop();
    self.stamp += 1;
    Ok(path)
  }

  pub fn open_section(&mut self, name: Id) {
    vprintln!("open section {name}");
    self.scopes.push(Scope::Section(name, self.section.len(), self.poly_univs.clone()));
    self.stamp += 1;
  }

  /// Close the innermost section, dropping its variables, which are returned, and its
  /// polymorphic universes.
  pub fn close_section(&mut self) -> Result<(Id, Vec<Hyp>), DeclError> {
    let Some(Scope::Section(..)) = self.scopes.last() else {
      return Err(DeclError::NothingToClose("section"))
    };
    let Some(Scope::Section(name, n, univs)) = self.scopes.pop() else { unreachable!() };
    let vars = self.section.0.split_off(n);
    for h in &vars {
      self.implicit.remove(&h.name);
    }
    self.poly_univs = univs;
    self.stamp += 1;
    Ok((name, vars))
  }

  pub fn locate(&self, id: &Id) -> Option<ConstAddr> { self.registry.locate(&self.modpath, id) }

  pub fn lookup_constant(&self, addr: &ConstAddr) -> Option<&ConstantBody> { self.kernel.lookup(addr) }

  pub fn private_constant(&self, addr: &ConstAddr) -> Option<&SideEffect> { self.private.get(addr) }

  /// The type of a constant, private or public.
  pub fn constant_type(&self, addr: &ConstAddr) -> Option<&Term> {
    match self.kernel.lookup(addr) {
      Some(body) => Some(&body.ty),
      None => Some(&self.private.get(addr)?.ty),
    }
  }

  /// Whether `id` is taken in the current module, as a public or private constant.
  pub fn is_taken(&self, id: &Id) -> bool {
    let addr = self.modpath.qualify(id.clone());
    self.registry.contains(&addr) || self.private.contains_key(&addr) || self.kernel.lookup(&addr).is_some()
  }

  /// `base` if it is free, otherwise the first free `base0`, `base1`, ...
  pub fn fresh_name(&self, base: &Id) -> Id {
    if !self.is_taken(base) {
      return base.clone()
    }
    (0..)
      .map(|i| Id::new(&format!("{base}{i}")))
      .find(|id| !self.is_taken(id))
      .unwrap_or_else(|| base.clone())
  }

  pub(crate) fn push_section_var(&mut self, hyp: Hyp, implicit: bool) {
    if implicit {
      self.implicit.insert(hyp.name.clone());
    }
    self.section.0.push(hyp);
    self.stamp += 1;
  }

  pub(crate) fn set_universes(&mut self, g: UGraph) {
    if g != self.universes {
      self.universes = g;
      self.stamp += 1;
    }
  }

  pub(crate) fn set_poly_univs(&mut self, cs: ContextSet) {
    self.poly_univs = cs;
    self.stamp += 1;
  }

  pub(crate) fn bump_count(&mut self, kind: DeclKind) { self.counts[kind] += 1 }

  pub(crate) fn check_candidate(
    &self, body: &ConstantBody, pending: &[ConstantBody],
  ) -> Result<(), DeclError> {
    self.kernel.check(body, &self.section, pending).map_err(|e| self.kernel_fault(e))
  }

  /// Add a checked constant. `registered` is `None` for private constants, which are not
  /// resolvable by name.
  pub(crate) fn add_constant(
    &mut self, body: ConstantBody, registered: Option<Locality>, kind: DeclKind,
  ) -> Result<ConstAddr, DeclError> {
    let addr = body.addr.clone();
    match self.kernel.add_constant(body) {
      Ok(_) => {}
      // a checked candidate that the kernel refuses means the tables are out of sync
      Err(e) => return Err(self.kernel_fault(e)),
    }
    if let Some(locality) = registered {
      self.registry.insert(addr.clone(), locality)
    }
    self.bump_count(kind);
    self.stamp += 1;
    Ok(addr)
  }

  pub(crate) fn add_private(&mut self, eff: SideEffect) {
    self.private.insert(eff.addr.clone(), eff);
    self.stamp += 1;
  }

  pub(crate) fn kernel_fault(&self, e: KernelError) -> DeclError {
    stat("kernel fault");
    if self.cfg.panic_on_kernel_fault {
      panic!("kernel fault: {e}")
    }
    DeclError::Kernel(e)
  }
}
