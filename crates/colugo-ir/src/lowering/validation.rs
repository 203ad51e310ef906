//! Span lookup helpers for elaboration diagnostics.

use colugo_dsl::ast;
use colugo_theory::TheoryError;

use crate::access::AccessError;
use crate::properties::PropertyError;

use super::ElabError;

/// Best-effort span lookup for an elaboration error by examining the AST.
pub(super) fn find_span_for_error(err: &ElabError, program: &ast::Program) -> Option<ast::Span> {
    let unit = &program.unit.node;
    match err {
        ElabError::Theory(TheoryError::DuplicateSymbol(name))
        | ElabError::Theory(TheoryError::UnknownSymbol(name)) => {
            for f in &unit.functions {
                if &f.name == name {
                    return Some(f.span);
                }
            }
            for c in &unit.constants {
                if &c.name == name {
                    return Some(c.span);
                }
            }
            // Fall back to the first equation mentioning the symbol.
            for eq in &unit.equations {
                if term_mentions(&eq.lhs, name) || term_mentions(&eq.rhs, name) {
                    return Some(eq.span);
                }
            }
            None
        }
        ElabError::Theory(TheoryError::UnboundVariable(var)) => {
            for eq in &unit.equations {
                if term_has_var(&eq.rhs, var) {
                    return Some(eq.span);
                }
            }
            None
        }
        ElabError::Theory(_) => unit.equations.last().map(|eq| eq.span),
        ElabError::Access(AccessError::DuplicateType(name))
        | ElabError::Access(AccessError::UnknownType(name)) => {
            for t in &unit.types {
                if &t.name == name {
                    return Some(t.span);
                }
            }
            for g in &unit.grants {
                if &g.subject == name || g.object.as_deref() == Some(name) {
                    return Some(g.span);
                }
            }
            for g in &unit.attacker_grants {
                if &g.subject == name {
                    return Some(g.span);
                }
            }
            None
        }
        ElabError::UnboundVariable { context, .. } => {
            // `context` is the instance name; point at its declaration.
            for inst in &unit.system.node.instances {
                if &inst.name == context {
                    return Some(inst.span);
                }
            }
            Some(unit.system.span)
        }
        ElabError::ArityMismatch { target, .. } | ElabError::RecursiveSyscall { name: target, .. } => {
            for sys in &unit.syscalls {
                if &sys.name == target {
                    return Some(sys.span);
                }
            }
            for att in &unit.attacks {
                if &att.name == target {
                    return Some(att.span);
                }
            }
            None
        }
        ElabError::UnknownSyscall(name) => {
            for att in &unit.attacks {
                if let ast::AttackKind::Active { overrides, .. } = &att.kind {
                    if overrides == name {
                        return Some(att.span);
                    }
                }
            }
            None
        }
        ElabError::UnknownInstance(name) => {
            for inst in &unit.system.node.instances {
                if inst.args.iter().any(|a| a == name) {
                    return Some(inst.span);
                }
            }
            Some(unit.system.span)
        }
        ElabError::UnknownTemplate(name) => {
            for inst in &unit.system.node.instances {
                if &inst.template == name {
                    return Some(inst.span);
                }
            }
            Some(unit.system.span)
        }
        ElabError::Property(PropertyError::UnknownEventTag { lemma, .. })
        | ElabError::Property(PropertyError::FreeLemmaVariable { lemma, .. }) => {
            for l in &unit.system.node.lemmas {
                if &l.node.name == lemma {
                    return Some(l.span);
                }
            }
            Some(unit.system.span)
        }
        ElabError::AccessViolation { .. } | ElabError::Store(_) | ElabError::Validation(_) => {
            Some(program.unit.span)
        }
    }
}

fn term_mentions(t: &ast::TermAst, symbol: &str) -> bool {
    match t {
        ast::TermAst::Var(_) => false,
        ast::TermAst::Const(c) => c == symbol,
        ast::TermAst::App(name, args) => {
            name == symbol || args.iter().any(|a| term_mentions(a, symbol))
        }
        ast::TermAst::Pair(l, r) => term_mentions(l, symbol) || term_mentions(r, symbol),
    }
}

fn term_has_var(t: &ast::TermAst, var: &str) -> bool {
    match t {
        ast::TermAst::Var(v) => v == var,
        ast::TermAst::Const(_) => false,
        ast::TermAst::App(_, args) => args.iter().any(|a| term_has_var(a, var)),
        ast::TermAst::Pair(l, r) => term_has_var(l, var) || term_has_var(r, var),
    }
}
