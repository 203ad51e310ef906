//! Event vocabulary, causal precedence edges, and lemma translation.
//!
//! Lemmas arrive in four surface forms (`reachable`, `corresponds`,
//! `exists-trace`, `all-traces`) and are normalized here into one canonical
//! shape: a closed formula over occurrence quantifiers, event predicates
//! `Event(term) @ idx`, the strict precedence relation, and implication.

use indexmap::{IndexMap, IndexSet};
use std::fmt;
use thiserror::Error;

use colugo_dsl::ast;
use colugo_theory::{Term, Theory, TheoryError};

use crate::system::{CausalEdge, Node, ProcessIr, SiteRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Lemma '{lemma}' references event tag '{tag}' never emitted by any process")]
    UnknownEventTag { lemma: String, tag: String },
    #[error("Lemma '{lemma}' uses trace variable '{var}' outside any quantifier")]
    FreeLemmaVariable { lemma: String, var: String },
}

/// Trace quantifier of a normalized lemma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum TraceQuantifier {
    AllTraces,
    ExistsTrace,
}

impl fmt::Display for TraceQuantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceQuantifier::AllTraces => write!(f, "all-traces"),
            TraceQuantifier::ExistsTrace => write!(f, "exists-trace"),
        }
    }
}

/// Canonical trace-formula body.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Formula {
    /// The event occurs at trace position `occ`.
    Event {
        tag: String,
        args: Vec<Term>,
        occ: String,
    },
    /// Strict precedence of occurrence indices.
    Precedes { earlier: String, later: String },
    And(Box<Formula>, Box<Formula>),
    Implies(Box<Formula>, Box<Formula>),
    Exists { vars: Vec<String>, body: Box<Formula> },
    ForAll { vars: Vec<String>, body: Box<Formula> },
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Event { tag, args, occ } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{tag}({}) @ {occ}", args.join(", "))
            }
            Formula::Precedes { earlier, later } => write!(f, "{earlier} < {later}"),
            Formula::And(l, r) => write!(f, "({l} & {r})"),
            Formula::Implies(l, r) => write!(f, "({l} ==> {r})"),
            Formula::Exists { vars, body } => write!(f, "Ex {}. {body}", vars.join(" ")),
            Formula::ForAll { vars, body } => write!(f, "All {}. {body}", vars.join(" ")),
        }
    }
}

/// A normalized lemma, ready for backend emission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceFormula {
    pub name: String,
    pub quantifier: TraceQuantifier,
    pub body: Formula,
}

impl fmt::Display for TraceFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lemma {}: {}: {}", self.name, self.quantifier, self.body)
    }
}

/// Collect the emitted event vocabulary: tag to argument count.
pub fn event_vocabulary(processes: &[ProcessIr]) -> IndexMap<String, usize> {
    let mut vocab = IndexMap::new();
    for p in processes {
        for site in &p.events {
            vocab.entry(site.tag.clone()).or_insert(site.args.len());
        }
    }
    vocab
}

/// Normalize one lemma declaration against the emitted vocabulary.
pub fn translate_lemma(
    decl: &ast::LemmaDecl,
    vocab: &IndexMap<String, usize>,
) -> Result<TraceFormula, PropertyError> {
    match &decl.kind {
        ast::LemmaKind::Reachable { event } => {
            check_tag(&decl.name, &event.tag, vocab)?;
            Ok(TraceFormula {
                name: decl.name.clone(),
                quantifier: TraceQuantifier::ExistsTrace,
                body: Formula::Exists {
                    vars: vec!["i".into()],
                    body: Box::new(event_atom(event, "i")),
                },
            })
        }
        ast::LemmaKind::Corresponds {
            conclusion,
            premise,
        } => {
            check_tag(&decl.name, &conclusion.tag, vocab)?;
            check_tag(&decl.name, &premise.tag, vocab)?;
            // For every occurrence of the conclusion there is a strictly
            // earlier occurrence of the premise.
            Ok(TraceFormula {
                name: decl.name.clone(),
                quantifier: TraceQuantifier::AllTraces,
                body: Formula::ForAll {
                    vars: vec!["i".into()],
                    body: Box::new(Formula::Implies(
                        Box::new(event_atom(conclusion, "i")),
                        Box::new(Formula::Exists {
                            vars: vec!["j".into()],
                            body: Box::new(Formula::And(
                                Box::new(event_atom(premise, "j")),
                                Box::new(Formula::Precedes {
                                    earlier: "j".into(),
                                    later: "i".into(),
                                }),
                            )),
                        }),
                    )),
                },
            })
        }
        ast::LemmaKind::ExistsTrace { formula } => Ok(TraceFormula {
            name: decl.name.clone(),
            quantifier: TraceQuantifier::ExistsTrace,
            body: translate_formula(&decl.name, formula, vocab, &mut IndexSet::new())?,
        }),
        ast::LemmaKind::AllTraces { formula } => Ok(TraceFormula {
            name: decl.name.clone(),
            quantifier: TraceQuantifier::AllTraces,
            body: translate_formula(&decl.name, formula, vocab, &mut IndexSet::new())?,
        }),
    }
}

fn event_atom(pattern: &ast::EventPattern, occ: &str) -> Formula {
    Formula::Event {
        tag: pattern.tag.clone(),
        args: pattern.args.iter().map(term_of_ast).collect(),
        occ: occ.into(),
    }
}

fn check_tag(
    lemma: &str,
    tag: &str,
    vocab: &IndexMap<String, usize>,
) -> Result<(), PropertyError> {
    if vocab.contains_key(tag) {
        Ok(())
    } else {
        Err(PropertyError::UnknownEventTag {
            lemma: lemma.into(),
            tag: tag.into(),
        })
    }
}

fn translate_formula(
    lemma: &str,
    formula: &ast::LemmaFormula,
    vocab: &IndexMap<String, usize>,
    bound: &mut IndexSet<String>,
) -> Result<Formula, PropertyError> {
    match formula {
        ast::LemmaFormula::Event { occ, pattern } => {
            check_tag(lemma, &pattern.tag, vocab)?;
            check_occ(lemma, occ, bound)?;
            Ok(event_atom(pattern, occ))
        }
        ast::LemmaFormula::Precedes { earlier, later } => {
            check_occ(lemma, earlier, bound)?;
            check_occ(lemma, later, bound)?;
            Ok(Formula::Precedes {
                earlier: earlier.clone(),
                later: later.clone(),
            })
        }
        ast::LemmaFormula::And(l, r) => Ok(Formula::And(
            Box::new(translate_formula(lemma, l, vocab, bound)?),
            Box::new(translate_formula(lemma, r, vocab, bound)?),
        )),
        ast::LemmaFormula::Implies(l, r) => Ok(Formula::Implies(
            Box::new(translate_formula(lemma, l, vocab, bound)?),
            Box::new(translate_formula(lemma, r, vocab, bound)?),
        )),
        ast::LemmaFormula::Exists { vars, body } => {
            let added = bind_occs(vars, bound);
            let body = translate_formula(lemma, body, vocab, bound)?;
            unbind_occs(&added, bound);
            Ok(Formula::Exists {
                vars: vars.clone(),
                body: Box::new(body),
            })
        }
        ast::LemmaFormula::ForAll { vars, body } => {
            let added = bind_occs(vars, bound);
            let body = translate_formula(lemma, body, vocab, bound)?;
            unbind_occs(&added, bound);
            Ok(Formula::ForAll {
                vars: vars.clone(),
                body: Box::new(body),
            })
        }
    }
}

fn check_occ(lemma: &str, occ: &str, bound: &IndexSet<String>) -> Result<(), PropertyError> {
    if bound.contains(occ) {
        Ok(())
    } else {
        Err(PropertyError::FreeLemmaVariable {
            lemma: lemma.into(),
            var: occ.into(),
        })
    }
}

fn bind_occs(vars: &[String], bound: &mut IndexSet<String>) -> Vec<String> {
    let mut added = Vec::new();
    for v in vars {
        if bound.insert(v.clone()) {
            added.push(v.clone());
        }
    }
    added
}

fn unbind_occs(added: &[String], bound: &mut IndexSet<String>) {
    for v in added {
        bound.shift_remove(v);
    }
}

/// Structural lift of a surface term; lemma argument patterns keep their
/// variables free for the backend to interpret.
pub(crate) fn term_of_ast(t: &ast::TermAst) -> Term {
    match t {
        ast::TermAst::Var(v) => Term::Var(v.clone()),
        ast::TermAst::Const(c) => Term::Const(c.clone()),
        ast::TermAst::App(name, args) => {
            Term::App(name.clone(), args.iter().map(term_of_ast).collect())
        }
        ast::TermAst::Pair(l, r) => Term::pair(term_of_ast(l), term_of_ast(r)),
    }
}

/// Derive the causal precedence edges the execution model induces: a
/// consume cannot fire before an insertion of a fact its pattern could
/// unify with, on the same store. Over-approximate by design; a spurious
/// edge only orders transitions that could never exchange a fact anyway.
pub fn derive_causal_edges(
    theory: &Theory,
    processes: &[ProcessIr],
) -> Result<Vec<CausalEdge>, TheoryError> {
    let mut edges = Vec::new();
    for (ci, consumer) in processes.iter().enumerate() {
        for (cn, cnode) in consumer.nodes.iter().enumerate() {
            let Node::Consume { store, pattern, .. } = cnode else {
                continue;
            };
            for (pi, producer) in processes.iter().enumerate() {
                for (pn, pnode) in producer.nodes.iter().enumerate() {
                    let Node::Insert {
                        store: pstore,
                        fact,
                        ..
                    } = pnode
                    else {
                        continue;
                    };
                    if pstore != store {
                        continue;
                    }
                    if theory.may_unify(pattern, fact)? {
                        edges.push(CausalEdge {
                            store: *store,
                            producer: SiteRef {
                                process: pi,
                                node: pn,
                            },
                            consumer: SiteRef {
                                process: ci,
                                node: cn,
                            },
                        });
                    }
                }
            }
        }
    }
    Ok(edges)
}
