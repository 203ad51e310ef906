mod commands;
mod inline;
mod validation;

use indexmap::{IndexMap, IndexSet};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use colugo_dsl::ast;
use colugo_theory::{Theory, TheoryError};

use crate::access::{AccessError, AccessTable, TypeKind};
use crate::properties::{
    self, derive_causal_edges, event_vocabulary, term_of_ast, PropertyError,
};
use crate::store::StoreError;
use crate::system::{NonceId, StoreDecl, StoreId, StoreKind, SystemIr};

use commands::{ElabEnv, ProcElab};
use validation::find_span_for_error;

/// Built-in syscall names. Each operates on a channel or file instance and
/// may be overridden by an active attack like any user syscall.
pub const BUILTIN_SYSCALLS: [&str; 3] = ["send", "recv", "open"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElabError {
    #[error(transparent)]
    Theory(#[from] TheoryError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error("Unbound variable '{var}' in '{context}'")]
    UnboundVariable { var: String, context: String },
    #[error("'{target}' takes {expected} arguments, found {found}")]
    ArityMismatch {
        target: String,
        expected: usize,
        found: usize,
    },
    #[error("Access violation: type '{subject}' lacks a grant for '{op}' (object type: {object})")]
    AccessViolation {
        subject: String,
        object: String,
        op: String,
    },
    #[error("Recursive syscall '{name}' (call chain: {chain})")]
    RecursiveSyscall { name: String, chain: String },
    #[error("Unknown syscall or attack '{0}'")]
    UnknownSyscall(String),
    #[error("Unknown channel or file instance '{0}'")]
    UnknownInstance(String),
    #[error("Unknown process template '{0}'")]
    UnknownTemplate(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Wrapper for collecting multiple elaboration errors.
///
/// The declaration phase runs to completion before reporting so a user sees
/// every declaration problem in one pass; body elaboration then collects
/// per-occurrence errors across all process instances.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{}", format_elab_errors(.errors))]
pub struct ElabErrors {
    pub errors: Vec<ElabError>,
}

fn format_elab_errors(errors: &[ElabError]) -> String {
    if errors.len() == 1 {
        return errors[0].to_string();
    }
    let mut s = format!("{} elaboration errors:\n", errors.len());
    for (i, e) in errors.iter().enumerate() {
        s.push_str(&format!("  {}. {}\n", i + 1, e));
    }
    s
}

/// An elaboration error enriched with source span information for
/// pretty-printed diagnostics.
#[derive(Debug, Error, Diagnostic)]
#[error("{inner}")]
pub struct SpannedElabError {
    #[source_code]
    pub src: NamedSource<String>,
    pub inner: ElabError,
    #[label("here")]
    pub span: Option<SourceSpan>,
}

impl SpannedElabError {
    fn new(err: ElabError, source: String, filename: String, span: Option<ast::Span>) -> Self {
        Self {
            src: NamedSource::new(filename, source),
            inner: err,
            span: span.map(|s| SourceSpan::new(s.start.into(), s.end - s.start)),
        }
    }
}

/// Elaborate a program, attaching source spans for pretty error reporting
/// via miette. Only the first collected error is returned.
pub fn elaborate_with_source(
    program: &ast::Program,
    source: &str,
    filename: &str,
) -> Result<SystemIr, SpannedElabError> {
    elaborate(program).map_err(|errs| {
        let err = errs
            .errors
            .into_iter()
            .next()
            .expect("ElabErrors is never empty");
        let span = find_span_for_error(&err, program);
        SpannedElabError::new(err, source.to_string(), filename.to_string(), span)
    })
}

/// Elaborate a program, collecting as many errors as possible, each wrapped
/// with source-span information.
pub fn elaborate_with_source_multi(
    program: &ast::Program,
    source: &str,
    filename: &str,
) -> (Option<SystemIr>, Vec<SpannedElabError>) {
    match elaborate(program) {
        Ok(ir) => (Some(ir), Vec::new()),
        Err(errs) => {
            let spanned = errs
                .errors
                .into_iter()
                .map(|err| {
                    let span = find_span_for_error(&err, program);
                    SpannedElabError::new(
                        err,
                        source.to_string(),
                        filename.to_string(),
                        span,
                    )
                })
                .collect();
            (None, spanned)
        }
    }
}

/// Fresh-value identity space, threaded explicitly through elaboration so
/// every `new` occurrence and fresh constant receives a globally distinct
/// generation act.
#[derive(Debug, Default)]
pub struct NonceAllocator {
    next: usize,
}

impl NonceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> NonceId {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn count(&self) -> usize {
        self.next
    }
}

/// Elaborate a parsed program into the backend-agnostic system IR.
///
/// A pure function from AST to IR or error set: no error is retried, and
/// nothing outside the returned value is mutated.
pub fn elaborate(program: &ast::Program) -> Result<SystemIr, ElabErrors> {
    let unit = &program.unit.node;
    let mut errors: Vec<ElabError> = Vec::new();

    // Declaration phase. Every declaration is processed even after a
    // failure so the error report covers the whole phase.
    let mut theory = Theory::new();
    for f in &unit.functions {
        if let Err(e) = theory.declare_symbol(&f.name, f.arity) {
            errors.push(e.into());
        }
    }
    for eq in &unit.equations {
        let lhs = term_of_ast(&eq.lhs);
        let rhs = term_of_ast(&eq.rhs);
        if let Err(e) = theory.declare_equation(lhs, rhs) {
            errors.push(e.into());
        }
    }

    let mut access = AccessTable::new();
    for t in &unit.types {
        if let Err(e) = access.declare_type(&t.name, TypeKind::from(t.kind)) {
            errors.push(e.into());
        }
    }
    for g in &unit.grants {
        if let Err(e) = access.declare_grant(&g.subject, g.object.clone(), g.ops.iter().cloned())
        {
            errors.push(e.into());
        }
    }
    for g in &unit.attacker_grants {
        if let Err(e) = access.declare_attacker_grant(&g.subject, g.ops.iter().cloned()) {
            errors.push(e.into());
        }
    }

    let mut constants: IndexSet<String> = IndexSet::new();
    let mut fresh_names: Vec<String> = Vec::new();
    for c in &unit.constants {
        if !constants.insert(c.name.clone()) {
            errors.push(TheoryError::DuplicateSymbol(c.name.clone()).into());
            continue;
        }
        if c.fresh {
            fresh_names.push(c.name.clone());
        }
    }

    let mut stores: Vec<StoreDecl> = Vec::new();
    let mut store_ids: IndexMap<String, StoreId> = IndexMap::new();
    for ch in &unit.channels {
        match access.type_kind(&ch.ty) {
            None => errors.push(AccessError::UnknownType(ch.ty.clone()).into()),
            Some(TypeKind::Channel) => {}
            Some(kind) => errors.push(ElabError::Validation(format!(
                "channel '{}' declared with {kind} type '{}'",
                ch.name, ch.ty
            ))),
        }
        if store_ids.contains_key(&ch.name) {
            errors.push(ElabError::Validation(format!(
                "duplicate instance name '{}'",
                ch.name
            )));
            continue;
        }
        let id = stores.len();
        stores.push(StoreDecl {
            name: ch.name.clone(),
            ty: ch.ty.clone(),
            kind: StoreKind::Channel,
        });
        store_ids.insert(ch.name.clone(), id);
    }
    for file in &unit.files {
        match access.type_kind(&file.ty) {
            None => errors.push(AccessError::UnknownType(file.ty.clone()).into()),
            Some(TypeKind::Filesys) => {}
            Some(kind) => errors.push(ElabError::Validation(format!(
                "file '{}' declared with {kind} type '{}'",
                file.name, file.ty
            ))),
        }
        if store_ids.contains_key(&file.name) {
            errors.push(ElabError::Validation(format!(
                "duplicate instance name '{}'",
                file.name
            )));
            continue;
        }
        let content = term_of_ast(&file.init);
        if let Err(e) = theory.check_term(&content) {
            errors.push(e.into());
        }
        if !content.is_ground() {
            errors.push(ElabError::Validation(format!(
                "initial content of file '{}' must be ground",
                file.name
            )));
        }
        let id = stores.len();
        stores.push(StoreDecl {
            name: file.name.clone(),
            ty: file.ty.clone(),
            kind: StoreKind::File { content },
        });
        store_ids.insert(file.name.clone(), id);
    }

    let mut syscalls: IndexMap<String, &ast::SyscallDecl> = IndexMap::new();
    for sys in &unit.syscalls {
        if BUILTIN_SYSCALLS.contains(&sys.name.as_str()) {
            errors.push(ElabError::Validation(format!(
                "syscall '{}' shadows a built-in",
                sys.name
            )));
            continue;
        }
        if syscalls.insert(sys.name.clone(), sys).is_some() {
            errors.push(ElabError::Validation(format!(
                "duplicate syscall '{}'",
                sys.name
            )));
        }
    }
    let mut attacks: IndexMap<String, &ast::AttackDecl> = IndexMap::new();
    for att in &unit.attacks {
        if syscalls.contains_key(&att.name) {
            errors.push(ElabError::Validation(format!(
                "attack '{}' shares its name with a syscall",
                att.name
            )));
            continue;
        }
        if attacks.insert(att.name.clone(), att).is_some() {
            errors.push(ElabError::Validation(format!(
                "duplicate attack '{}'",
                att.name
            )));
            continue;
        }
        if let ast::AttackKind::Active { overrides, .. } = &att.kind {
            let known = BUILTIN_SYSCALLS.contains(&overrides.as_str())
                || syscalls.contains_key(overrides);
            if !known {
                errors.push(ElabError::UnknownSyscall(overrides.clone()));
            }
        }
    }

    let mut templates: IndexMap<String, &ast::Spanned<ast::ProcessDecl>> = IndexMap::new();
    for proc in &unit.processes {
        match access.type_kind(&proc.node.ty) {
            None => errors.push(AccessError::UnknownType(proc.node.ty.clone()).into()),
            Some(TypeKind::Process) => {}
            Some(kind) => errors.push(ElabError::Validation(format!(
                "process template '{}' declared with {kind} type '{}'",
                proc.node.name, proc.node.ty
            ))),
        }
        if templates.insert(proc.node.name.clone(), proc).is_some() {
            errors.push(ElabError::Validation(format!(
                "duplicate process template '{}'",
                proc.node.name
            )));
        }
    }

    // Declaration errors are batch-reported; elaboration halts here.
    if !errors.is_empty() {
        return Err(ElabErrors { errors });
    }

    let mut nonces = NonceAllocator::new();
    let fresh_constants: IndexMap<String, NonceId> = fresh_names
        .into_iter()
        .map(|name| {
            let id = nonces.fresh();
            (name, id)
        })
        .collect();

    let env = ElabEnv {
        theory: &theory,
        access: &access,
        stores: &stores,
        store_ids: &store_ids,
        syscalls: &syscalls,
        attacks: &attacks,
        constants: &constants,
    };

    // Process instantiation: one sequential transition graph per instance.
    let mut processes = Vec::new();
    let mut instance_names: IndexSet<String> = IndexSet::new();
    for inst in &unit.system.node.instances {
        if !instance_names.insert(inst.name.clone()) {
            errors.push(ElabError::Validation(format!(
                "duplicate process instance '{}'",
                inst.name
            )));
            continue;
        }
        let Some(template) = templates.get(&inst.template) else {
            errors.push(ElabError::UnknownTemplate(inst.template.clone()));
            continue;
        };
        let decl = &template.node;
        if inst.args.len() != decl.params.len() {
            errors.push(ElabError::ArityMismatch {
                target: inst.template.clone(),
                expected: decl.params.len(),
                found: inst.args.len(),
            });
            continue;
        }
        match instantiate(&env, &mut nonces, inst, decl) {
            Ok(proc) => processes.push(proc),
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        return Err(ElabErrors { errors });
    }

    // Event vocabulary, lemma normalization, causal precedence edges.
    let vocab = event_vocabulary(&processes);
    let mut lemmas = Vec::new();
    for lemma in &unit.system.node.lemmas {
        match properties::translate_lemma(&lemma.node, &vocab) {
            Ok(tf) => lemmas.push(tf),
            Err(e) => errors.push(e.into()),
        }
    }
    let causal_edges = match derive_causal_edges(&theory, &processes) {
        Ok(edges) => edges,
        Err(e) => {
            errors.push(e.into());
            Vec::new()
        }
    };
    if !errors.is_empty() {
        return Err(ElabErrors { errors });
    }

    Ok(SystemIr {
        theory,
        stores,
        processes,
        causal_edges,
        lemmas,
        fresh_constants,
        nonce_count: nonces.count(),
    })
}

fn instantiate(
    env: &ElabEnv<'_>,
    nonces: &mut NonceAllocator,
    inst: &ast::InstanceDecl,
    decl: &ast::ProcessDecl,
) -> Result<crate::system::ProcessIr, ElabError> {
    let mut elab = ProcElab::new(env, nonces, &inst.name, &decl.name, &decl.ty);
    for (param, arg) in decl.params.iter().zip(&inst.args) {
        let Some(&store) = env.store_ids.get(arg) else {
            return Err(ElabError::UnknownInstance(arg.clone()));
        };
        let arg_ty = &env.stores[store].ty;
        if arg_ty != &param.ty {
            return Err(ElabError::Validation(format!(
                "instance '{}' passes '{}' (type '{}') for parameter '{}' of type '{}'",
                inst.name, arg, arg_ty, param.name, param.ty
            )));
        }
        elab.bind_store_param(&param.name, store)?;
    }
    elab.elaborate_var_inits(&decl.vars)?;
    elab.elaborate_command(&decl.body)?;
    Ok(elab.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use colugo_dsl::ast::{
        FunctionDecl, Program, Span, Spanned, SystemDecl, Unit,
    };

    fn empty_unit() -> Unit {
        Unit {
            name: "Empty".into(),
            functions: Vec::new(),
            equations: Vec::new(),
            types: Vec::new(),
            grants: Vec::new(),
            attacker_grants: Vec::new(),
            syscalls: Vec::new(),
            attacks: Vec::new(),
            channels: Vec::new(),
            files: Vec::new(),
            constants: Vec::new(),
            processes: Vec::new(),
            system: Spanned::new(
                SystemDecl {
                    instances: Vec::new(),
                    lemmas: Vec::new(),
                },
                Span::new(0, 0),
            ),
        }
    }

    // ---------------------------------------------------------------
    // NonceAllocator
    // ---------------------------------------------------------------

    #[test]
    fn nonce_allocator_is_monotone_and_counted() {
        let mut alloc = NonceAllocator::new();
        let a = alloc.fresh();
        let b = alloc.fresh();
        let c = alloc.fresh();
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(alloc.count(), 3);
    }

    // ---------------------------------------------------------------
    // ElabErrors formatting
    // ---------------------------------------------------------------

    #[test]
    fn single_error_formats_without_numbering() {
        let errs = ElabErrors {
            errors: vec![ElabError::UnknownTemplate("Client".into())],
        };
        assert_eq!(errs.to_string(), "Unknown process template 'Client'");
    }

    #[test]
    fn multiple_errors_format_with_count_and_numbering() {
        let errs = ElabErrors {
            errors: vec![
                ElabError::UnknownTemplate("Client".into()),
                ElabError::UnknownInstance("net".into()),
            ],
        };
        let msg = errs.to_string();
        assert!(msg.starts_with("2 elaboration errors:\n"));
        assert!(msg.contains("1. Unknown process template 'Client'"));
        assert!(msg.contains("2. Unknown channel or file instance 'net'"));
    }

    // ---------------------------------------------------------------
    // Source-span enrichment
    // ---------------------------------------------------------------

    #[test]
    fn with_source_attaches_the_offending_declaration_span() {
        let mut unit = empty_unit();
        unit.functions = vec![
            FunctionDecl {
                name: "senc".into(),
                arity: 2,
                span: Span::new(4, 10),
            },
            FunctionDecl {
                name: "senc".into(),
                arity: 2,
                span: Span::new(12, 18),
            },
        ];
        let program = Program {
            unit: Spanned::new(unit, Span::new(0, 20)),
        };

        let err = elaborate_with_source(&program, "fun senc/2; fun senc/2;", "dup.clg")
            .expect_err("duplicate symbol must be rejected");
        assert_eq!(err.inner.to_string(), "Duplicate function symbol 'senc'");
        let span = err.span.expect("span is attached");
        assert_eq!(span.offset(), 4);
        assert_eq!(span.len(), 6);
    }

    #[test]
    fn with_source_multi_reports_every_declaration_error() {
        let mut unit = empty_unit();
        unit.functions = vec![
            FunctionDecl {
                name: "f".into(),
                arity: 1,
                span: Span::new(0, 1),
            },
            FunctionDecl {
                name: "f".into(),
                arity: 2,
                span: Span::new(2, 3),
            },
            FunctionDecl {
                name: "g".into(),
                arity: 1,
                span: Span::new(4, 5),
            },
            FunctionDecl {
                name: "g".into(),
                arity: 1,
                span: Span::new(6, 7),
            },
        ];
        let program = Program {
            unit: Spanned::new(unit, Span::new(0, 8)),
        };

        let (ir, errs) = elaborate_with_source_multi(&program, "f f g g", "dups.clg");
        assert!(ir.is_none());
        assert_eq!(errs.len(), 2);
    }

    // ---------------------------------------------------------------
    // Empty system
    // ---------------------------------------------------------------

    #[test]
    fn empty_unit_elaborates_to_an_empty_system() {
        let program = Program {
            unit: Spanned::new(empty_unit(), Span::new(0, 0)),
        };
        let ir = elaborate(&program).unwrap();
        assert!(ir.processes.is_empty());
        assert!(ir.stores.is_empty());
        assert!(ir.lemmas.is_empty());
        assert_eq!(ir.nonce_count, 0);
        // The built-in projections are always present.
        assert_eq!(ir.theory.equations().len(), 2);
    }
}
