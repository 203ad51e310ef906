/// Source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-width placeholder span for programmatically built ASTs.
    pub fn point(at: usize) -> Self {
        Self { start: at, end: at }
    }
}

/// A spanned AST node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Top-level program = a single compilation unit.
///
/// The external front end resolves `load` directives by textual inclusion
/// before building this, so the core always sees one closed unit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Program {
    pub unit: Spanned<Unit>,
}

/// A compilation unit: every declaration plus one system composition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Unit {
    pub name: String,
    pub functions: Vec<FunctionDecl>,
    pub equations: Vec<EquationDecl>,
    pub types: Vec<TypeDecl>,
    pub grants: Vec<GrantDecl>,
    pub attacker_grants: Vec<AttackerGrantDecl>,
    pub syscalls: Vec<SyscallDecl>,
    pub attacks: Vec<AttackDecl>,
    pub channels: Vec<ChannelInstanceDecl>,
    pub files: Vec<FileInstanceDecl>,
    pub constants: Vec<ConstantDecl>,
    pub processes: Vec<Spanned<ProcessDecl>>,
    pub system: Spanned<SystemDecl>,
}

/// Function symbol declaration: `fun senc/2;`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct FunctionDecl {
    pub name: String,
    pub arity: usize,
    pub span: Span,
}

/// Equation declaration: `equation sdec(senc(x, y), y) = x;`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct EquationDecl {
    pub lhs: TermAst,
    pub rhs: TermAst,
    pub span: Span,
}

/// Kind of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum TypeKindAst {
    Process,
    Channel,
    Filesys,
}

impl std::fmt::Display for TypeKindAst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeKindAst::Process => write!(f, "process"),
            TypeKindAst::Channel => write!(f, "channel"),
            TypeKindAst::Filesys => write!(f, "filesys"),
        }
    }
}

/// Type declaration: `type client_ty : process;`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TypeDecl {
    pub name: String,
    pub kind: TypeKindAst,
    pub span: Span,
}

/// Access grant: `allow client_ty on chan_ty [send, recv];`
/// or object-free: `allow client_ty [get_nonce];`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct GrantDecl {
    pub subject: String,
    pub object: Option<String>,
    pub ops: Vec<String>,
    pub span: Span,
}

/// Attacker-scoped grant: `allow attack client_ty [inject_channel];`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct AttackerGrantDecl {
    pub subject: String,
    pub ops: Vec<String>,
    pub span: Span,
}

/// User-defined syscall: parameterized command body, optionally yielding a
/// result term for calls in expression position.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SyscallDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Spanned<Command>,
    pub result: Option<TermAst>,
    pub span: Span,
}

/// Attack declaration, active or passive.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct AttackDecl {
    pub name: String,
    pub kind: AttackKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum AttackKind {
    /// Replacement body offered to the attacker at call sites of `overrides`.
    Active {
        overrides: String,
        params: Vec<String>,
        body: Spanned<Command>,
        result: Option<TermAst>,
    },
    /// Leakage operation a process invokes explicitly.
    Passive {
        param: String,
        body: Spanned<Command>,
    },
}

/// Channel instance declaration: `channel net : chan_ty;`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ChannelInstanceDecl {
    pub name: String,
    pub ty: String,
    pub span: Span,
}

/// File instance declaration with initial content: `file keystore : fs_ty = key(k);`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct FileInstanceDecl {
    pub name: String,
    pub ty: String,
    pub init: TermAst,
    pub span: Span,
}

/// Constant declaration: `const k;` or `fresh const n0;`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ConstantDecl {
    pub name: String,
    pub fresh: bool,
    pub span: Span,
}

/// Process template declaration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ProcessDecl {
    pub name: String,
    pub ty: String,
    pub params: Vec<ProcessParam>,
    pub vars: Vec<VarInit>,
    pub body: Spanned<Command>,
}

/// Formal channel/file parameter of a process template.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct ProcessParam {
    pub name: String,
    pub ty: String,
    pub span: Span,
}

/// Local `var` binding with initializer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct VarInit {
    pub name: String,
    pub init: TermAst,
    pub span: Span,
}

/// System composition: a fixed finite set of process instances plus lemmas.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SystemDecl {
    pub instances: Vec<InstanceDecl>,
    pub lemmas: Vec<Spanned<LemmaDecl>>,
}

/// One process instance in the composition: `alice = Client(net, keystore);`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct InstanceDecl {
    pub name: String,
    pub template: String,
    pub args: Vec<String>,
    pub span: Span,
}

/// Surface term: variables, constants, applications, pairs.
///
/// Patterns, equation sides, guards, and event payloads are all terms;
/// only `bind` initializers may additionally contain calls (see [`ExprAst`]).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum TermAst {
    Var(String),
    Const(String),
    App(String, Vec<TermAst>),
    Pair(Box<TermAst>, Box<TermAst>),
}

impl TermAst {
    pub fn var(name: impl Into<String>) -> Self {
        TermAst::Var(name.into())
    }

    pub fn cst(name: impl Into<String>) -> Self {
        TermAst::Const(name.into())
    }

    pub fn app(name: impl Into<String>, args: Vec<TermAst>) -> Self {
        TermAst::App(name.into(), args)
    }

    pub fn pair(fst: TermAst, snd: TermAst) -> Self {
        TermAst::Pair(Box::new(fst), Box::new(snd))
    }
}

impl std::fmt::Display for TermAst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TermAst::Var(v) => write!(f, "{v}"),
            TermAst::Const(c) => write!(f, "'{c}'"),
            TermAst::App(name, args) => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            TermAst::Pair(l, r) => write!(f, "<{l}, {r}>"),
        }
    }
}

/// Expression in `bind` position: a term that may also contain syscall or
/// attack calls, which the elaborator inlines by value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum ExprAst {
    Var(String),
    Const(String),
    App(String, Vec<ExprAst>),
    Pair(Box<ExprAst>, Box<ExprAst>),
    Call { target: String, args: Vec<ExprAst> },
}

impl ExprAst {
    pub fn var(name: impl Into<String>) -> Self {
        ExprAst::Var(name.into())
    }

    pub fn cst(name: impl Into<String>) -> Self {
        ExprAst::Const(name.into())
    }

    pub fn app(name: impl Into<String>, args: Vec<ExprAst>) -> Self {
        ExprAst::App(name.into(), args)
    }

    pub fn pair(fst: ExprAst, snd: ExprAst) -> Self {
        ExprAst::Pair(Box::new(fst), Box::new(snd))
    }

    pub fn call(target: impl Into<String>, args: Vec<ExprAst>) -> Self {
        ExprAst::Call {
            target: target.into(),
            args,
        }
    }

    /// Lift a call-free term into expression position.
    pub fn from_term(t: &TermAst) -> Self {
        match t {
            TermAst::Var(v) => ExprAst::Var(v.clone()),
            TermAst::Const(c) => ExprAst::Const(c.clone()),
            TermAst::App(name, args) => {
                ExprAst::App(name.clone(), args.iter().map(ExprAst::from_term).collect())
            }
            TermAst::Pair(l, r) => {
                ExprAst::Pair(Box::new(ExprAst::from_term(l)), Box::new(ExprAst::from_term(r)))
            }
        }
    }
}

/// Guard operator in branch/until arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum GuardOp {
    Eq,
    Ne,
}

impl std::fmt::Display for GuardOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardOp::Eq => write!(f, "="),
            GuardOp::Ne => write!(f, "!="),
        }
    }
}

/// Equality/inequality test over already-bound terms.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct GuardAst {
    pub lhs: TermAst,
    pub op: GuardOp,
    pub rhs: TermAst,
}

impl std::fmt::Display for GuardAst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {} {}]", self.lhs, self.op, self.rhs)
    }
}

/// A guarded arm of a branch or until clause.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct GuardedArm {
    pub guard: GuardAst,
    pub command: Spanned<Command>,
    pub span: Span,
}

/// The closed command set of process bodies.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Command {
    /// `x := expr` — write-once binding in the enclosing scope.
    Bind { var: String, expr: ExprAst },
    /// Sequential composition; commands run left to right in one scope.
    Seq(Vec<Spanned<Command>>),
    /// Guarded alternatives tested in declaration order; no arm holding
    /// leaves the process stuck (a dead-ended trace branch, not a fault).
    Branch { arms: Vec<GuardedArm> },
    /// `repeat body until [g1] -> c1, ...` — the first holding until-guard
    /// exits the loop running its command; none holding repeats the body.
    Repeat {
        body: Box<Spanned<Command>>,
        until: Vec<GuardedArm>,
    },
    /// Fresh nonce binding, globally distinct across the composed system.
    New { var: String },
    /// Syscall or attack invocation in statement position.
    Call { target: String, args: Vec<ExprAst> },
    /// Event emission at this exact control point.
    Emit { tag: String, args: Vec<TermAst> },
    /// Unconditional fact insertion into an instance's store.
    Insert { instance: String, fact: TermAst },
    /// Exact-occurrence deletion; statically checked for presence.
    Remove { instance: String, fact: TermAst },
    /// Nondeterministic match-and-consume; blocks when nothing unifies.
    MatchConsume { instance: String, pattern: TermAst },
    /// No-op (the body of never-exiting until arms, among other uses).
    Skip,
}

/// Lemma declaration attached to the system composition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct LemmaDecl {
    pub name: String,
    pub kind: LemmaKind,
    pub span: Span,
}

/// The surface lemma forms, prior to normalization into trace formulas.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum LemmaKind {
    /// Some trace contains an occurrence of the event.
    Reachable { event: EventPattern },
    /// `corresponds A ~> B`: every occurrence of A is preceded by a
    /// matching occurrence of B, in all traces.
    Corresponds {
        conclusion: EventPattern,
        premise: EventPattern,
    },
    /// Explicit existential trace formula.
    ExistsTrace { formula: LemmaFormula },
    /// Explicit universal trace formula.
    AllTraces { formula: LemmaFormula },
}

/// An event predicate in a lemma: tag plus argument patterns.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct EventPattern {
    pub tag: String,
    pub args: Vec<TermAst>,
    pub span: Span,
}

impl std::fmt::Display for EventPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.tag)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{a}")?;
        }
        write!(f, ")")
    }
}

/// Body of an explicit trace lemma.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum LemmaFormula {
    /// `A(t) @ i` — the event occurs at trace position `i`.
    Event { occ: String, pattern: EventPattern },
    /// `i < j` — strict precedence of occurrence indices.
    Precedes { earlier: String, later: String },
    And(Box<LemmaFormula>, Box<LemmaFormula>),
    Implies(Box<LemmaFormula>, Box<LemmaFormula>),
    Exists {
        vars: Vec<String>,
        body: Box<LemmaFormula>,
    },
    ForAll {
        vars: Vec<String>,
        body: Box<LemmaFormula>,
    },
}
