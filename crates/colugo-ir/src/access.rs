use indexmap::{IndexMap, IndexSet};
use std::fmt;
use thiserror::Error;

use colugo_dsl::ast;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Duplicate type '{0}'")]
    DuplicateType(String),
    #[error("Unknown type '{0}'")]
    UnknownType(String),
}

/// Kind of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeKind {
    Process,
    Channel,
    Filesys,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Process => write!(f, "process"),
            TypeKind::Channel => write!(f, "channel"),
            TypeKind::Filesys => write!(f, "filesys"),
        }
    }
}

impl From<ast::TypeKindAst> for TypeKind {
    fn from(k: ast::TypeKindAst) -> Self {
        match k {
            ast::TypeKindAst::Process => TypeKind::Process,
            ast::TypeKindAst::Channel => TypeKind::Channel,
            ast::TypeKindAst::Filesys => TypeKind::Filesys,
        }
    }
}

/// An access grant: subject type may invoke `ops`, optionally only on
/// objects of a given type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Grant {
    pub subject: String,
    pub object: Option<String>,
    pub ops: IndexSet<String>,
}

/// Attacker-scoped grant: which attacks/operations the attacker may apply
/// on behalf of, or instead of, a principal of the subject type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AttackerGrant {
    pub subject: String,
    pub ops: IndexSet<String>,
}

/// Type vocabulary and grant tables, fixed once the declaration phase closes.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AccessTable {
    types: IndexMap<String, TypeKind>,
    grants: Vec<Grant>,
    attacker_grants: Vec<AttackerGrant>,
}

impl AccessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_type(
        &mut self,
        name: impl Into<String>,
        kind: TypeKind,
    ) -> Result<(), AccessError> {
        let name = name.into();
        if self.types.contains_key(&name) {
            return Err(AccessError::DuplicateType(name));
        }
        self.types.insert(name, kind);
        Ok(())
    }

    pub fn declare_grant(
        &mut self,
        subject: impl Into<String>,
        object: Option<String>,
        ops: impl IntoIterator<Item = String>,
    ) -> Result<(), AccessError> {
        let subject = subject.into();
        if !self.types.contains_key(&subject) {
            return Err(AccessError::UnknownType(subject));
        }
        if let Some(ref obj) = object {
            if !self.types.contains_key(obj) {
                return Err(AccessError::UnknownType(obj.clone()));
            }
        }
        self.grants.push(Grant {
            subject,
            object,
            ops: ops.into_iter().collect(),
        });
        Ok(())
    }

    pub fn declare_attacker_grant(
        &mut self,
        subject: impl Into<String>,
        ops: impl IntoIterator<Item = String>,
    ) -> Result<(), AccessError> {
        let subject = subject.into();
        if !self.types.contains_key(&subject) {
            return Err(AccessError::UnknownType(subject));
        }
        self.attacker_grants.push(AttackerGrant {
            subject,
            ops: ops.into_iter().collect(),
        });
        Ok(())
    }

    pub fn type_kind(&self, name: &str) -> Option<TypeKind> {
        self.types.get(name).copied()
    }

    /// Whether `subject` may invoke `op`, on an object of type `object`
    /// when one is involved. A grant without an object type only covers
    /// object-free invocations, and vice versa.
    pub fn check_invocation(&self, subject: &str, object: Option<&str>, op: &str) -> bool {
        self.grants.iter().any(|g| {
            g.subject == subject && g.object.as_deref() == object && g.ops.contains(op)
        })
    }

    /// Whether the attacker may apply `op` on behalf of principals of type
    /// `subject`.
    pub fn attacker_allows(&self, subject: &str, op: &str) -> bool {
        self.attacker_grants
            .iter()
            .any(|g| g.subject == subject && g.ops.contains(op))
    }
}
