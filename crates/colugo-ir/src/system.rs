use indexmap::IndexMap;
use std::fmt;

use colugo_theory::{Term, Theory};

use crate::properties::TraceFormula;

/// A unique identifier for a transition node within one process graph.
pub type NodeId = usize;
/// A unique identifier for a channel/file instance.
pub type StoreId = usize;
/// A unique identifier for a process instance.
pub type ProcessId = usize;
/// A unique identifier for a fresh-value generation act.
pub type NonceId = usize;

/// Guard operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum GuardOp {
    Eq,
    Ne,
}

impl fmt::Display for GuardOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardOp::Eq => write!(f, "="),
            GuardOp::Ne => write!(f, "!="),
        }
    }
}

/// An equality/inequality test over elaborated terms.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct GuardIr {
    pub lhs: Term,
    pub op: GuardOp,
    pub rhs: Term,
}

impl GuardIr {
    /// `Some(truth)` when both sides are literal constants and the guard is
    /// therefore decided at elaboration time. A constant-false until-arm is
    /// the corpus' "loop forever" idiom.
    pub fn constant_truth(&self) -> Option<bool> {
        match (&self.lhs, &self.rhs) {
            (Term::Const(a), Term::Const(b)) => Some(match self.op {
                GuardOp::Eq => a == b,
                GuardOp::Ne => a != b,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for GuardIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// Who controls an alternative at a composed call site.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Provenance {
    /// The syscall's own body.
    Normal,
    /// The named active attack's replacement body.
    Attack(String),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Normal => write!(f, "normal"),
            Provenance::Attack(name) => write!(f, "attack:{name}"),
        }
    }
}

/// One continuation of a composed call site.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Alternative {
    pub provenance: Provenance,
    pub entry: NodeId,
}

/// A guarded branch/until arm.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BranchArm {
    pub guard: GuardIr,
    pub target: NodeId,
}

/// A transition node in a process graph.
///
/// Process bodies are reified as an arena of nodes with integer indices so
/// that cyclic `repeat` constructs and the causal-edge analysis operate
/// over a finite, inspectable structure rather than host-language
/// recursion.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(tag = "kind"))]
pub enum Node {
    /// Bind a local to an elaborated value.
    Bind {
        var: String,
        value: Term,
        next: Option<NodeId>,
    },
    /// Generate a globally unique fresh value.
    Fresh {
        var: String,
        nonce: NonceId,
        next: Option<NodeId>,
    },
    /// Guarded alternatives in declaration order; when no arm holds the
    /// process is stuck (a dead end, not a fault).
    Branch { arms: Vec<BranchArm> },
    /// Loop exit check: the first holding arm leaves the loop, otherwise
    /// control returns to `repeat`.
    Until {
        arms: Vec<BranchArm>,
        repeat: NodeId,
    },
    /// Attacker-composed call site: a closed set of tagged continuations,
    /// one per reachable elaboration.
    Choice { alternatives: Vec<Alternative> },
    /// Unconditional fact insertion.
    Insert {
        store: StoreId,
        fact: Term,
        next: Option<NodeId>,
    },
    /// Exact-occurrence deletion of a statically guaranteed fact.
    Remove {
        store: StoreId,
        fact: Term,
        next: Option<NodeId>,
    },
    /// Match-and-consume; blocks when no fact unifies.
    Consume {
        store: StoreId,
        pattern: Term,
        next: Option<NodeId>,
    },
    /// Non-consuming match against a file's persistent content fact.
    ReadContent {
        store: StoreId,
        pattern: Term,
        next: Option<NodeId>,
    },
    /// Event emission at this control point.
    Emit {
        tag: String,
        args: Vec<Term>,
        index: usize,
        next: Option<NodeId>,
    },
    /// Join/no-op node.
    Nop { next: Option<NodeId> },
}

impl Node {
    /// Linear successor, when this node has one.
    pub fn next(&self) -> Option<NodeId> {
        match self {
            Node::Bind { next, .. }
            | Node::Fresh { next, .. }
            | Node::Insert { next, .. }
            | Node::Remove { next, .. }
            | Node::Consume { next, .. }
            | Node::ReadContent { next, .. }
            | Node::Emit { next, .. }
            | Node::Nop { next } => *next,
            Node::Branch { .. } | Node::Until { .. } | Node::Choice { .. } => None,
        }
    }

    /// Patch the linear successor. Control nodes (branch/until/choice)
    /// route through their arm targets and are left untouched.
    pub fn set_next(&mut self, target: NodeId) {
        match self {
            Node::Bind { next, .. }
            | Node::Fresh { next, .. }
            | Node::Insert { next, .. }
            | Node::Remove { next, .. }
            | Node::Consume { next, .. }
            | Node::ReadContent { next, .. }
            | Node::Emit { next, .. }
            | Node::Nop { next } => *next = Some(target),
            Node::Branch { .. } | Node::Until { .. } | Node::Choice { .. } => {}
        }
    }
}

/// An event emission site, summarized for the lemma translator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EventSite {
    pub tag: String,
    pub args: Vec<Term>,
    pub node: NodeId,
    pub index: usize,
}

/// One elaborated process instance: an ordered transition graph.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessIr {
    /// Instance name from the system composition.
    pub name: String,
    /// Template this instance was elaborated from.
    pub template: String,
    /// Declared process type.
    pub ty: String,
    pub nodes: Vec<Node>,
    pub entry: Option<NodeId>,
    /// Emission sites in per-process index order.
    pub events: Vec<EventSite>,
}

impl ProcessIr {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        ty: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            ty: ty.into(),
            nodes: Vec::new(),
            entry: None,
            events: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

/// Kind of store an instance owns.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum StoreKind {
    Channel,
    File { content: Term },
}

/// A declared channel/file instance. The instance's store is exclusively
/// addressed by this declaration's name; there is no aliasing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreDecl {
    pub name: String,
    pub ty: String,
    pub kind: StoreKind,
}

/// A transition-node reference across the composed system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteRef {
    pub process: ProcessId,
    pub node: NodeId,
}

/// A cross-process precedence constraint: the consumer transition cannot
/// fire before the producer's insertion into the same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CausalEdge {
    pub store: StoreId,
    pub producer: SiteRef,
    pub consumer: SiteRef,
}

/// The complete elaborated system handed to backend adapters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemIr {
    /// The closed theory: symbols plus oriented equations.
    pub theory: Theory,
    /// Channel/file instances, indexed by [`StoreId`].
    pub stores: Vec<StoreDecl>,
    /// Process instances, indexed by [`ProcessId`].
    pub processes: Vec<ProcessIr>,
    /// Cross-process precedence constraints.
    pub causal_edges: Vec<CausalEdge>,
    /// Normalized lemma formulas.
    pub lemmas: Vec<TraceFormula>,
    /// Fresh constants, each a nonce generated once at system start.
    pub fresh_constants: IndexMap<String, NonceId>,
    /// Total number of generation acts allocated across the system.
    pub nonce_count: usize,
}

impl SystemIr {
    pub fn find_store_by_name(&self, name: &str) -> Option<StoreId> {
        self.stores.iter().position(|s| s.name == name)
    }

    pub fn find_process_by_name(&self, name: &str) -> Option<ProcessId> {
        self.processes.iter().position(|p| p.name == name)
    }
}

impl fmt::Display for SystemIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "System:")?;
        writeln!(f, "  Stores:")?;
        for (i, s) in self.stores.iter().enumerate() {
            match &s.kind {
                StoreKind::Channel => writeln!(f, "    s{i}: channel {} : {}", s.name, s.ty)?,
                StoreKind::File { content } => {
                    writeln!(f, "    s{i}: file {} : {} = {content}", s.name, s.ty)?
                }
            }
        }
        if !self.fresh_constants.is_empty() {
            writeln!(f, "  Fresh constants:")?;
            for (name, nonce) in &self.fresh_constants {
                writeln!(f, "    {name} = ~{nonce}")?;
            }
        }
        for (pi, p) in self.processes.iter().enumerate() {
            writeln!(f, "  Process p{pi}: {} = {}<{}>", p.name, p.template, p.ty)?;
            for (ni, n) in p.nodes.iter().enumerate() {
                let entry = if p.entry == Some(ni) { " (entry)" } else { "" };
                write!(f, "    n{ni}{entry}: ")?;
                match n {
                    Node::Bind { var, value, next } => {
                        writeln!(f, "bind {var} := {value}{}", fmt_next(next))?
                    }
                    Node::Fresh { var, nonce, next } => {
                        writeln!(f, "new {var} = ~{nonce}{}", fmt_next(next))?
                    }
                    Node::Branch { arms } => {
                        writeln!(f, "branch {}", fmt_arms(arms))?;
                    }
                    Node::Until { arms, repeat } => {
                        writeln!(f, "until {} else -> n{repeat}", fmt_arms(arms))?;
                    }
                    Node::Choice { alternatives } => {
                        let alts: Vec<String> = alternatives
                            .iter()
                            .map(|a| format!("{} -> n{}", a.provenance, a.entry))
                            .collect();
                        writeln!(f, "choice {{{}}}", alts.join(", "))?;
                    }
                    Node::Insert { store, fact, next } => {
                        writeln!(f, "insert s{store} {fact}{}", fmt_next(next))?
                    }
                    Node::Remove { store, fact, next } => {
                        writeln!(f, "remove s{store} {fact}{}", fmt_next(next))?
                    }
                    Node::Consume {
                        store,
                        pattern,
                        next,
                    } => writeln!(f, "consume s{store} {pattern}{}", fmt_next(next))?,
                    Node::ReadContent {
                        store,
                        pattern,
                        next,
                    } => writeln!(f, "read s{store} {pattern}{}", fmt_next(next))?,
                    Node::Emit {
                        tag,
                        args,
                        index,
                        next,
                    } => {
                        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                        writeln!(f, "emit {tag}({}) @{index}{}", args.join(", "), fmt_next(next))?
                    }
                    Node::Nop { next } => writeln!(f, "nop{}", fmt_next(next))?,
                }
            }
        }
        if !self.causal_edges.is_empty() {
            writeln!(f, "  Causal edges:")?;
            for e in &self.causal_edges {
                writeln!(
                    f,
                    "    p{}.n{} < p{}.n{} (s{})",
                    e.producer.process, e.producer.node, e.consumer.process, e.consumer.node, e.store
                )?;
            }
        }
        if !self.lemmas.is_empty() {
            writeln!(f, "  Lemmas:")?;
            for l in &self.lemmas {
                writeln!(f, "    {l}")?;
            }
        }
        Ok(())
    }
}

fn fmt_next(next: &Option<NodeId>) -> String {
    match next {
        Some(n) => format!(" -> n{n}"),
        None => String::new(),
    }
}

fn fmt_arms(arms: &[BranchArm]) -> String {
    let arms: Vec<String> = arms
        .iter()
        .map(|a| format!("[{}] -> n{}", a.guard, a.target))
        .collect();
    arms.join(", ")
}
