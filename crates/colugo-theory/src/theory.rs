use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

use crate::term::{Subst, Term};

/// Rewrite steps allowed per declared equation before the engine gives up.
///
/// The cap scales with theory size so that legitimate deep normal forms stay
/// reachable while cyclic theories are rejected instead of looping.
const REWRITE_BUDGET_PER_EQUATION: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TheoryError {
    #[error("Duplicate function symbol '{0}'")]
    DuplicateSymbol(String),
    #[error("Unknown symbol '{0}' (undeclared or used at the wrong arity)")]
    UnknownSymbol(String),
    #[error("Right-hand side variable '{0}' is not bound on the left-hand side")]
    UnboundVariable(String),
    #[error("Rewriting exceeded {0} steps; the declared theory does not terminate")]
    TheoryDivergence(usize),
    #[error("Pattern does not match term")]
    NoMatch,
}

/// A declared function symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionSymbol {
    pub name: String,
    pub arity: usize,
}

/// An oriented rewrite equation, applied left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Equation {
    pub lhs: Term,
    pub rhs: Term,
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}

/// The closed equational theory: read-only shared state once the
/// declaration phase ends.
///
/// Every theory starts with the `fst`/`snd` projections over the built-in
/// pairing constructor; they are ordinary equations, not matcher special
/// cases.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Theory {
    symbols: IndexMap<String, usize>,
    equations: Vec<Equation>,
}

impl Theory {
    pub fn new() -> Self {
        let mut symbols = IndexMap::new();
        symbols.insert("fst".to_string(), 1);
        symbols.insert("snd".to_string(), 1);
        let pair = Term::pair(Term::var("x"), Term::var("y"));
        let equations = vec![
            Equation {
                lhs: Term::app("fst", vec![pair.clone()]),
                rhs: Term::var("x"),
            },
            Equation {
                lhs: Term::app("snd", vec![pair]),
                rhs: Term::var("y"),
            },
        ];
        Self { symbols, equations }
    }

    pub fn declare_symbol(
        &mut self,
        name: impl Into<String>,
        arity: usize,
    ) -> Result<(), TheoryError> {
        let name = name.into();
        if self.symbols.contains_key(&name) {
            return Err(TheoryError::DuplicateSymbol(name));
        }
        self.symbols.insert(name, arity);
        Ok(())
    }

    pub fn declare_equation(&mut self, lhs: Term, rhs: Term) -> Result<(), TheoryError> {
        self.check_term(&lhs)?;
        self.check_term(&rhs)?;
        let lhs_vars = lhs.vars();
        for v in rhs.vars() {
            if !lhs_vars.contains(&v) {
                return Err(TheoryError::UnboundVariable(v));
            }
        }
        self.equations.push(Equation {
            lhs: lhs.clone(),
            rhs,
        });
        // Well-formedness: the new equation must not make its own redex
        // divergent. Rejecting here keeps divergence a declaration-site
        // error instead of a surprise at an arbitrary later match.
        if let Err(e) = self.normalize(&lhs) {
            self.equations.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn arity(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = FunctionSymbol> + '_ {
        self.symbols.iter().map(|(name, &arity)| FunctionSymbol {
            name: name.clone(),
            arity,
        })
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// Validate that every symbol in a term is declared at its used arity.
    pub fn check_term(&self, t: &Term) -> Result<(), TheoryError> {
        match t {
            Term::Var(_) | Term::Const(_) => Ok(()),
            Term::App(name, args) => {
                match self.symbols.get(name) {
                    Some(&arity) if arity == args.len() => {}
                    _ => return Err(TheoryError::UnknownSymbol(name.clone())),
                }
                for a in args {
                    self.check_term(a)?;
                }
                Ok(())
            }
            Term::Pair(l, r) => {
                self.check_term(l)?;
                self.check_term(r)
            }
        }
    }

    fn step_budget(&self) -> usize {
        REWRITE_BUDGET_PER_EQUATION * (self.equations.len() + 1)
    }

    /// Rewrite to normal form: innermost-first, equations applied left to
    /// right until no head matches. Returns a fresh term; the input is
    /// never mutated.
    pub fn normalize(&self, t: &Term) -> Result<Term, TheoryError> {
        let mut budget = self.step_budget();
        self.normalize_bounded(t, &mut budget)
    }

    fn normalize_bounded(&self, t: &Term, budget: &mut usize) -> Result<Term, TheoryError> {
        let current = match t {
            Term::Var(_) | Term::Const(_) => t.clone(),
            Term::App(name, args) => {
                let args = args
                    .iter()
                    .map(|a| self.normalize_bounded(a, budget))
                    .collect::<Result<Vec<_>, _>>()?;
                Term::App(name.clone(), args)
            }
            Term::Pair(l, r) => Term::pair(
                self.normalize_bounded(l, budget)?,
                self.normalize_bounded(r, budget)?,
            ),
        };
        if let Some(contractum) = self.rewrite_root(&current) {
            if *budget == 0 {
                return Err(TheoryError::TheoryDivergence(self.step_budget()));
            }
            *budget -= 1;
            // The contractum may expose new redexes anywhere, including at
            // the root again.
            return self.normalize_bounded(&contractum, budget);
        }
        Ok(current)
    }

    fn rewrite_root(&self, t: &Term) -> Option<Term> {
        for eq in &self.equations {
            let mut subst = Subst::new();
            if syntactic_match(&eq.lhs, t, &mut subst) {
                return Some(eq.rhs.apply(&subst));
            }
        }
        None
    }

    /// Match a pattern against a term up to the theory: both sides are
    /// normalized first, then matched syntactically with pattern variables
    /// as binders (non-linear occurrences must agree).
    pub fn match_term(&self, pattern: &Term, term: &Term) -> Result<Subst, TheoryError> {
        let pattern = self.normalize(pattern)?;
        let term = self.normalize(term)?;
        let mut subst = Subst::new();
        if syntactic_match(&pattern, &term, &mut subst) {
            Ok(subst)
        } else {
            Err(TheoryError::NoMatch)
        }
    }

    /// Theory equality: identical normal forms.
    pub fn equal(&self, a: &Term, b: &Term) -> Result<bool, TheoryError> {
        Ok(self.normalize(a)? == self.normalize(b)?)
    }

    /// Whether two terms could denote the same value for some assignment of
    /// their variables. Over-approximate on purpose; used to derive causal
    /// edges between insert and consume sites.
    pub fn may_unify(&self, a: &Term, b: &Term) -> Result<bool, TheoryError> {
        let a = self.normalize(a)?;
        let b = self.normalize(b)?;
        Ok(overlaps(&a, &b))
    }
}

impl Default for Theory {
    fn default() -> Self {
        Self::new()
    }
}

/// Syntactic one-way matching; variables on the pattern side only.
fn syntactic_match(pattern: &Term, term: &Term, subst: &mut Subst) -> bool {
    match (pattern, term) {
        (Term::Var(v), _) => match subst.get(v) {
            Some(bound) => bound == term,
            None => {
                subst.insert(v.clone(), term.clone());
                true
            }
        },
        (Term::Const(a), Term::Const(b)) => a == b,
        (Term::App(f, fargs), Term::App(g, gargs)) => {
            f == g
                && fargs.len() == gargs.len()
                && fargs
                    .iter()
                    .zip(gargs)
                    .all(|(p, t)| syntactic_match(p, t, subst))
        }
        (Term::Pair(pl, pr), Term::Pair(tl, tr)) => {
            syntactic_match(pl, tl, subst) && syntactic_match(pr, tr, subst)
        }
        _ => false,
    }
}

/// Structural overlap with variables on both sides treated as wildcards.
fn overlaps(a: &Term, b: &Term) -> bool {
    match (a, b) {
        (Term::Var(_), _) | (_, Term::Var(_)) => true,
        (Term::Const(x), Term::Const(y)) => x == y,
        (Term::App(f, fargs), Term::App(g, gargs)) => {
            f == g && fargs.len() == gargs.len() && fargs.iter().zip(gargs).all(|(x, y)| overlaps(x, y))
        }
        (Term::Pair(al, ar), Term::Pair(bl, br)) => overlaps(al, bl) && overlaps(ar, br),
        _ => false,
    }
}
