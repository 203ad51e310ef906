use thiserror::Error;

use colugo_theory::{Subst, Term, Theory, TheoryError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Fact {fact} is absent from store '{store}'")]
    FactAbsent { store: String, fact: String },
    #[error(transparent)]
    Theory(#[from] TheoryError),
}

/// The fact multiset owned by one channel or file instance.
///
/// Channels hold only transient facts, consumed on receipt. Files
/// additionally carry a persistent content fact that is matched without
/// being consumed.
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    facts: Vec<Term>,
    content: Option<Term>,
}

impl Store {
    pub fn channel(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            facts: Vec::new(),
            content: None,
        }
    }

    pub fn file(name: impl Into<String>, content: Term) -> Self {
        Self {
            name: name.into(),
            facts: Vec::new(),
            content: Some(content),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn facts(&self) -> &[Term] {
        &self.facts
    }

    /// Add a fact unconditionally.
    pub fn insert(&mut self, fact: Term) {
        self.facts.push(fact);
    }

    /// Delete one occurrence equal (up to the theory) to `fact`.
    pub fn remove(&mut self, fact: &Term, theory: &Theory) -> Result<(), StoreError> {
        let mut found = None;
        for (i, candidate) in self.facts.iter().enumerate() {
            if theory.equal(candidate, fact)? {
                found = Some(i);
                break;
            }
        }
        match found {
            Some(i) => {
                self.facts.remove(i);
                Ok(())
            }
            None => Err(StoreError::FactAbsent {
                store: self.name.clone(),
                fact: fact.to_string(),
            }),
        }
    }

    /// Select a fact unifying with the pattern, bind its variables, and
    /// consume it. `Ok(None)` means no fact unifies: the containing command
    /// blocks (a dead-ended trace branch), it does not error.
    ///
    /// The selection among multiple matching facts is nondeterministic in
    /// the execution semantics the IR encodes; this compile-time model
    /// picks the oldest matching fact.
    pub fn match_consume(
        &mut self,
        pattern: &Term,
        theory: &Theory,
    ) -> Result<Option<Subst>, TheoryError> {
        for i in 0..self.facts.len() {
            match theory.match_term(pattern, &self.facts[i]) {
                Ok(subst) => {
                    self.facts.remove(i);
                    return Ok(Some(subst));
                }
                Err(TheoryError::NoMatch) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Match the persistent content fact without consuming it. `Ok(None)`
    /// when this store has no content (it is a channel) or the pattern does
    /// not match.
    pub fn read_content(
        &self,
        pattern: &Term,
        theory: &Theory,
    ) -> Result<Option<Subst>, TheoryError> {
        let Some(ref content) = self.content else {
            return Ok(None);
        };
        match theory.match_term(pattern, content) {
            Ok(subst) => Ok(Some(subst)),
            Err(TheoryError::NoMatch) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
