use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// A substitution: pattern variable names to subterms.
pub type Subst = IndexMap<String, Term>;

/// Immutable term tree.
///
/// Rewriting never mutates a term in place; every operation returns a new
/// term, so elaborated terms can be shared freely across emission paths.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Term {
    /// Variable reference by name.
    Var(String),
    /// Declared or generated constant.
    Const(String),
    /// Function application.
    App(String, Vec<Term>),
    /// Built-in pairing constructor.
    Pair(Box<Term>, Box<Term>),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn cst(name: impl Into<String>) -> Self {
        Term::Const(name.into())
    }

    pub fn app(name: impl Into<String>, args: Vec<Term>) -> Self {
        Term::App(name.into(), args)
    }

    pub fn pair(fst: Term, snd: Term) -> Self {
        Term::Pair(Box::new(fst), Box::new(snd))
    }

    /// Whether the term contains no variables.
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Var(_) => false,
            Term::Const(_) => true,
            Term::App(_, args) => args.iter().all(Term::is_ground),
            Term::Pair(l, r) => l.is_ground() && r.is_ground(),
        }
    }

    /// Collect variable names in first-occurrence order.
    pub fn vars(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut IndexSet<String>) {
        match self {
            Term::Var(v) => {
                out.insert(v.clone());
            }
            Term::Const(_) => {}
            Term::App(_, args) => {
                for a in args {
                    a.collect_vars(out);
                }
            }
            Term::Pair(l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }

    /// Apply a substitution, leaving unbound variables in place.
    pub fn apply(&self, subst: &Subst) -> Term {
        match self {
            Term::Var(v) => subst.get(v).cloned().unwrap_or_else(|| self.clone()),
            Term::Const(_) => self.clone(),
            Term::App(name, args) => {
                Term::App(name.clone(), args.iter().map(|a| a.apply(subst)).collect())
            }
            Term::Pair(l, r) => Term::pair(l.apply(subst), r.apply(subst)),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::Const(c) => write!(f, "'{c}'"),
            Term::App(name, args) => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Term::Pair(l, r) => write!(f, "<{l}, {r}>"),
        }
    }
}
