use crate::types::{Id, Term};
use crate::univ::Level;
use pretty::{Arena, DocAllocator, DocBuilder};

/// The names of the binders crossed so far, innermost first.
#[derive(Clone, Copy)]
enum Names<'b> {
  Nil,
  Cons(&'b Id, &'b Names<'b>),
}

impl Names<'_> {
  fn get(&self, mut i: u32) -> Option<&Id> {
    let mut cur = self;
    loop {
      match cur {
        Names::Nil => return None,
        Names::Cons(x, _) if i == 0 => return Some(*x),
        Names::Cons(_, rest) => {
          cur = *rest;
          i -= 1
        }
      }
    }
  }
}

struct Pretty<'a> {
  arena: &'a Arena<'a>,
}

impl Pretty<'_> {
  fn with<R>(f: impl for<'b> FnOnce(&'b Pretty<'b>) -> R) -> R {
    let arena = Arena::new();
    f(&Pretty { arena: &arena })
  }
}

impl<'a> std::ops::Deref for Pretty<'a> {
  type Target = &'a Arena<'a>;
  fn deref(&self) -> &Self::Target { &self.arena }
}

type Doc<'a> = DocBuilder<'a, Arena<'a>>;

/// Whether the innermost binder is used.
fn uses_rel0(body: &Term) -> bool {
  let mut found = false;
  body.walk(0, &mut |t, depth| found |= matches!(t, Term::Rel(i) if *i == depth));
  found
}

impl<'a> Pretty<'a> {
  fn parens_if(&self, prec: bool, doc: Doc<'a>) -> Doc<'a> {
    if prec {
      doc.parens()
    } else {
      doc
    }
  }

  fn level(&self, l: &Level) -> Doc<'a> {
    match l {
      Level::Set => self.text("Set"),
      Level::Var(u) => self.text(format!("Type@{{{u}}}")),
    }
  }

  fn binder(&self, name: &Id, ty: &Term, names: Names<'_>) -> Doc<'a> {
    let ty = self.term(false, ty, names);
    self.text(format!("({name} :")).append(self.line()).append(ty).append(")").group()
  }

  fn term(&self, prec: bool, tm: &Term, names: Names<'_>) -> Doc<'a> {
    match tm {
      Term::Rel(i) => match names.get(*i) {
        Some(x) => self.text(x.to_string()),
        None => self.text(format!("#{i}")),
      },
      Term::Var(x) => self.text(x.to_string()),
      Term::Sort(l) => self.level(l),
      Term::Const(c) => self.text(c.key()),
      Term::Meta(m, inst) if inst.is_empty() => self.text(format!("?{}", m.0)),
      Term::Meta(m, inst) => {
        let args = inst.iter().map(|t| self.term(false, t, names));
        let args = self.intersperse(args, self.text(",").append(self.line()));
        self.text(format!("?{}@{{", m.0)).append(args.nest(2)).append("}").group()
      }
      Term::App(f, args) => {
        let mut doc = self.term(true, f, names);
        for arg in &**args {
          doc = doc.append(self.line()).append(self.term(true, arg, names))
        }
        self.parens_if(prec, doc.nest(2).group())
      }
      Term::Lambda { name, ty, body } => {
        let inner = Names::Cons(name, &names);
        let doc = (self.text("fun").append(self.space()).append(self.binder(name, ty, names)))
          .append(" =>")
          .append(self.line().append(self.term(false, body, inner)).nest(2))
          .group();
        self.parens_if(prec, doc)
      }
      Term::Pi { name, ty, body } if !uses_rel0(body) => {
        let inner = Names::Cons(name, &names);
        let doc = (self.term(true, ty, names))
          .append(" ->")
          .append(self.line())
          .append(self.term(false, body, inner))
          .group();
        self.parens_if(prec, doc)
      }
      Term::Pi { name, ty, body } => {
        let inner = Names::Cons(name, &names);
        let doc = (self.text("forall").append(self.space()).append(self.binder(name, ty, names)))
          .append(",")
          .append(self.line().append(self.term(false, body, inner)).nest(2))
          .group();
        self.parens_if(prec, doc)
      }
      Term::LetIn { name, val, ty, body } => {
        let inner = Names::Cons(name, &names);
        let doc = (self.text(format!("let {name} :")))
          .append(self.line())
          .append(self.term(false, ty, names))
          .append(" :=")
          .append(self.line())
          .append(self.term(false, val, names))
          .append(" in")
          .group()
          .append(self.line())
          .append(self.term(false, body, inner));
        self.parens_if(prec, doc)
      }
    }
  }
}

impl std::fmt::Debug for Term {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    Pretty::with(|p| p.term(false, self, Names::Nil).render_fmt(100, f))
  }
}
impl std::fmt::Display for Term {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    Pretty::with(|p| p.term(false, self, Names::Nil).render_fmt(100, f))
  }
}
