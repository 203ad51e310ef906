//! Command-tree elaboration: one process instance at a time, walking the
//! closed command set into an arena of transition nodes.

use indexmap::{IndexMap, IndexSet};

use colugo_dsl::ast;
use colugo_theory::{Term, Theory};

use crate::access::AccessTable;
use crate::store::StoreError;
use crate::system::{
    BranchArm, EventSite, GuardIr, GuardOp, Node, NodeId, ProcessIr, StoreDecl, StoreId,
};

use super::{inline, ElabError, NonceAllocator};

/// Shared read-only elaboration state, fixed after the declaration phase.
pub(crate) struct ElabEnv<'a> {
    pub theory: &'a Theory,
    pub access: &'a AccessTable,
    pub stores: &'a [StoreDecl],
    pub store_ids: &'a IndexMap<String, StoreId>,
    pub syscalls: &'a IndexMap<String, &'a ast::SyscallDecl>,
    pub attacks: &'a IndexMap<String, &'a ast::AttackDecl>,
    pub constants: &'a IndexSet<String>,
}

/// What a name in scope denotes.
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    /// A term value (local var, nonce, formal bound by value).
    Term(Term),
    /// A channel/file instance (process formal or syscall formal).
    Store(StoreId),
}

/// Elaboration state for one process instance.
///
/// Locals are write-once per scope but may be shadowed by inner scopes;
/// values are carried symbolically, so later uses see the bound term
/// itself. Fresh values draw from the system-wide allocator threaded in by
/// the caller.
pub(crate) struct ProcElab<'a> {
    pub(crate) env: &'a ElabEnv<'a>,
    pub(crate) ir: ProcessIr,
    pub(crate) nonces: &'a mut NonceAllocator,
    scopes: Vec<IndexMap<String, Binding>>,
    used_names: IndexSet<String>,
    event_index: usize,
    tail: Option<NodeId>,
    pub(crate) call_stack: Vec<String>,
    pub(crate) in_attack: bool,
    /// Facts guaranteed present on the current straight-line path, per
    /// store. Conservatively cleared at joins and loop entries.
    path_facts: IndexMap<StoreId, Vec<Term>>,
}

impl<'a> ProcElab<'a> {
    pub(crate) fn new(
        env: &'a ElabEnv<'a>,
        nonces: &'a mut NonceAllocator,
        name: &str,
        template: &str,
        ty: &str,
    ) -> Self {
        Self {
            env,
            ir: ProcessIr::new(name, template, ty),
            nonces,
            scopes: vec![IndexMap::new()],
            used_names: IndexSet::new(),
            event_index: 0,
            tail: None,
            call_stack: Vec::new(),
            in_attack: false,
            path_facts: IndexMap::new(),
        }
    }

    pub(crate) fn finish(self) -> ProcessIr {
        self.ir
    }

    // ---------------------------------------------------------------
    // Scopes & names
    // ---------------------------------------------------------------

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Swap in a fresh scope stack (syscall inlining is call-by-value: the
    /// body sees only its formals), returning the caller's stack.
    pub(crate) fn swap_scopes(
        &mut self,
        frame: IndexMap<String, Binding>,
    ) -> Vec<IndexMap<String, Binding>> {
        std::mem::replace(&mut self.scopes, vec![frame])
    }

    pub(crate) fn restore_scopes(&mut self, scopes: Vec<IndexMap<String, Binding>>) {
        self.scopes = scopes;
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    /// Write-once binding in the current scope.
    pub(crate) fn bind_local(&mut self, var: &str, binding: Binding) -> Result<(), ElabError> {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        if scope.contains_key(var) {
            return Err(ElabError::Validation(format!(
                "variable '{var}' is already bound in this scope"
            )));
        }
        scope.insert(var.to_string(), binding);
        Ok(())
    }

    pub(crate) fn bind_store_param(&mut self, name: &str, store: StoreId) -> Result<(), ElabError> {
        self.bind_local(name, Binding::Store(store))
    }

    /// Allocate a process-unique IR name for a surface variable; shadowed
    /// occurrences get a numeric suffix.
    pub(crate) fn ir_name(&mut self, base: &str) -> String {
        if self.used_names.insert(base.to_string()) {
            return base.to_string();
        }
        let mut i = 2;
        loop {
            let candidate = format!("{base}_{i}");
            if self.used_names.insert(candidate.clone()) {
                return candidate;
            }
            i += 1;
        }
    }

    // ---------------------------------------------------------------
    // Graph construction
    // ---------------------------------------------------------------

    /// Attach a node after the current tail (or make it the entry).
    pub(crate) fn link(&mut self, id: NodeId) {
        match self.tail {
            Some(t) => self.ir.nodes[t].set_next(id),
            None => {
                if self.ir.entry.is_none() {
                    self.ir.entry = Some(id);
                }
            }
        }
    }

    pub(crate) fn append(&mut self, node: Node) -> NodeId {
        let id = self.ir.add_node(node);
        self.link(id);
        self.tail = Some(id);
        id
    }

    pub(crate) fn set_tail(&mut self, id: NodeId) {
        self.tail = Some(id);
    }

    /// Elaborate a sub-chain (a branch arm, an inlined alternative) that
    /// converges on `join`. Returns the sub-chain's entry node.
    pub(crate) fn sub_chain(
        &mut self,
        join: NodeId,
        f: impl FnOnce(&mut Self) -> Result<(), ElabError>,
    ) -> Result<NodeId, ElabError> {
        let saved_tail = self.tail.take();
        let entry = self.ir.add_node(Node::Nop { next: None });
        self.tail = Some(entry);
        let result = f(self);
        if let Some(t) = self.tail {
            self.ir.nodes[t].set_next(join);
        }
        self.tail = saved_tail;
        result.map(|_| entry)
    }

    // ---------------------------------------------------------------
    // Term & guard resolution
    // ---------------------------------------------------------------

    fn resolve_ident(&self, name: &str) -> Result<Term, ElabError> {
        if let Some(binding) = self.lookup(name) {
            return match binding {
                Binding::Term(t) => Ok(t.clone()),
                Binding::Store(_) => Err(ElabError::Validation(format!(
                    "channel or file '{name}' used in term position"
                ))),
            };
        }
        if self.env.constants.contains(name) {
            return Ok(Term::Const(name.to_string()));
        }
        Err(ElabError::UnboundVariable {
            var: name.to_string(),
            context: self.ir.name.clone(),
        })
    }

    /// Resolve a surface term in the current scope. Every variable must be
    /// bound; literal constants pass through.
    pub(crate) fn resolve_term(&self, t: &ast::TermAst) -> Result<Term, ElabError> {
        match t {
            ast::TermAst::Var(v) => self.resolve_ident(v),
            ast::TermAst::Const(c) => Ok(Term::Const(c.clone())),
            ast::TermAst::App(name, args) => {
                if self.env.theory.arity(name) != Some(args.len()) {
                    return Err(colugo_theory::TheoryError::UnknownSymbol(name.clone()).into());
                }
                let args = args
                    .iter()
                    .map(|a| self.resolve_term(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Term::App(name.clone(), args))
            }
            ast::TermAst::Pair(l, r) => {
                Ok(Term::pair(self.resolve_term(l)?, self.resolve_term(r)?))
            }
        }
    }

    /// Resolve a match pattern: bound variables resolve to their values,
    /// unbound variables become runtime binders in the current scope.
    pub(crate) fn resolve_pattern(&mut self, t: &ast::TermAst) -> Result<Term, ElabError> {
        match t {
            ast::TermAst::Var(v) => {
                if self.lookup(v).is_some() || self.env.constants.contains(v.as_str()) {
                    return self.resolve_ident(v);
                }
                let ir_var = self.ir_name(v);
                self.bind_local(v, Binding::Term(Term::var(ir_var.clone())))?;
                Ok(Term::var(ir_var))
            }
            ast::TermAst::Const(c) => Ok(Term::Const(c.clone())),
            ast::TermAst::App(name, args) => {
                if self.env.theory.arity(name) != Some(args.len()) {
                    return Err(colugo_theory::TheoryError::UnknownSymbol(name.clone()).into());
                }
                let args = args
                    .iter()
                    .map(|a| self.resolve_pattern(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Term::App(name.clone(), args))
            }
            ast::TermAst::Pair(l, r) => Ok(Term::pair(
                self.resolve_pattern(l)?,
                self.resolve_pattern(r)?,
            )),
        }
    }

    fn resolve_guard(&self, g: &ast::GuardAst) -> Result<GuardIr, ElabError> {
        let lhs = self.env.theory.normalize(&self.resolve_term(&g.lhs)?)?;
        let rhs = self.env.theory.normalize(&self.resolve_term(&g.rhs)?)?;
        let op = match g.op {
            ast::GuardOp::Eq => GuardOp::Eq,
            ast::GuardOp::Ne => GuardOp::Ne,
        };
        let guard = GuardIr { lhs, op, rhs };
        if guard.constant_truth() == Some(false) {
            tracing::warn!(
                process = %self.ir.name,
                guard = %guard,
                "guard compares distinct literals and can never hold"
            );
        }
        Ok(guard)
    }

    /// Evaluate a bind-position expression, inlining any calls it contains.
    pub(crate) fn eval_expr(&mut self, e: &ast::ExprAst) -> Result<Term, ElabError> {
        match e {
            ast::ExprAst::Var(v) => self.resolve_ident(v),
            ast::ExprAst::Const(c) => Ok(Term::Const(c.clone())),
            ast::ExprAst::App(name, args) => {
                if self.env.theory.arity(name) != Some(args.len()) {
                    return Err(colugo_theory::TheoryError::UnknownSymbol(name.clone()).into());
                }
                let args = args
                    .iter()
                    .map(|a| self.eval_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Term::App(name.clone(), args))
            }
            ast::ExprAst::Pair(l, r) => Ok(Term::pair(self.eval_expr(l)?, self.eval_expr(r)?)),
            ast::ExprAst::Call { target, args } => inline::eval_call(self, target, args, true)?
                .ok_or_else(|| {
                    ElabError::Validation(format!(
                        "call to '{target}' yields no value but is used in expression position"
                    ))
                }),
        }
    }

    // ---------------------------------------------------------------
    // Store access & static fact tracking
    // ---------------------------------------------------------------

    pub(crate) fn resolve_store(&self, name: &str) -> Result<StoreId, ElabError> {
        if let Some(Binding::Store(id)) = self.lookup(name) {
            return Ok(*id);
        }
        if let Some(&id) = self.env.store_ids.get(name) {
            return Ok(id);
        }
        Err(ElabError::UnknownInstance(name.to_string()))
    }

    /// Authorization check for a store-directed operation. Inside attack
    /// bodies the attacker grant table is consulted instead.
    pub(crate) fn check_store_op(&self, store: StoreId, op: &str) -> Result<(), ElabError> {
        let decl = &self.env.stores[store];
        let ok = if self.in_attack {
            self.env.access.attacker_allows(&self.ir.ty, op)
        } else {
            self.env
                .access
                .check_invocation(&self.ir.ty, Some(&decl.ty), op)
        };
        if ok {
            Ok(())
        } else {
            Err(ElabError::AccessViolation {
                subject: self.ir.ty.clone(),
                object: decl.ty.clone(),
                op: op.to_string(),
            })
        }
    }

    /// Authorization check for an object-free operation (user syscalls).
    pub(crate) fn check_plain_op(&self, op: &str) -> Result<(), ElabError> {
        let ok = if self.in_attack {
            self.env.access.attacker_allows(&self.ir.ty, op)
        } else {
            self.env.access.check_invocation(&self.ir.ty, None, op)
        };
        if ok {
            Ok(())
        } else {
            Err(ElabError::AccessViolation {
                subject: self.ir.ty.clone(),
                object: "none".to_string(),
                op: op.to_string(),
            })
        }
    }

    pub(crate) fn track_insert(&mut self, store: StoreId, fact: Term) {
        self.path_facts.entry(store).or_default().push(fact);
    }

    /// A removal is only emitted for a fact whose presence is statically or
    /// symbolically guaranteed on the current path.
    pub(crate) fn track_remove(&mut self, store: StoreId, fact: &Term) -> Result<(), ElabError> {
        let facts = self.path_facts.entry(store).or_default();
        if let Some(pos) = facts.iter().position(|f| f == fact) {
            facts.remove(pos);
            Ok(())
        } else {
            Err(StoreError::FactAbsent {
                store: self.env.stores[store].name.clone(),
                fact: fact.to_string(),
            }
            .into())
        }
    }

    /// A consume may take any fact its pattern unifies with; drop those
    /// from the guarantees.
    pub(crate) fn consume_invalidate(
        &mut self,
        store: StoreId,
        pattern: &Term,
    ) -> Result<(), ElabError> {
        let theory = self.env.theory;
        if let Some(facts) = self.path_facts.get_mut(&store) {
            let mut kept = Vec::new();
            for f in facts.drain(..) {
                if !theory.may_unify(pattern, &f)? {
                    kept.push(f);
                }
            }
            *facts = kept;
        }
        Ok(())
    }

    pub(crate) fn clear_path_facts(&mut self) {
        self.path_facts.clear();
    }

    // ---------------------------------------------------------------
    // Command walk
    // ---------------------------------------------------------------

    pub(crate) fn elaborate_var_inits(&mut self, vars: &[ast::VarInit]) -> Result<(), ElabError> {
        for v in vars {
            let value = self.env.theory.normalize(&self.resolve_term(&v.init)?)?;
            let ir_var = self.ir_name(&v.name);
            self.bind_local(&v.name, Binding::Term(value.clone()))?;
            self.append(Node::Bind {
                var: ir_var,
                value,
                next: None,
            });
        }
        Ok(())
    }

    pub(crate) fn elaborate_command(
        &mut self,
        cmd: &ast::Spanned<ast::Command>,
    ) -> Result<(), ElabError> {
        match &cmd.node {
            ast::Command::Bind { var, expr } => {
                let value = self.eval_expr(expr)?;
                let ir_var = self.ir_name(var);
                self.bind_local(var, Binding::Term(value.clone()))?;
                self.append(Node::Bind {
                    var: ir_var,
                    value,
                    next: None,
                });
                Ok(())
            }
            ast::Command::Seq(cmds) => {
                for c in cmds {
                    self.elaborate_command(c)?;
                }
                Ok(())
            }
            ast::Command::Branch { arms } => {
                let join = self.ir.add_node(Node::Nop { next: None });
                let saved_facts = self.path_facts.clone();
                let mut ir_arms = Vec::new();
                for arm in arms {
                    let guard = self.resolve_guard(&arm.guard)?;
                    self.path_facts = saved_facts.clone();
                    self.push_scope();
                    let entry = self.sub_chain(join, |p| p.elaborate_command(&arm.command))?;
                    self.pop_scope();
                    ir_arms.push(BranchArm {
                        guard,
                        target: entry,
                    });
                }
                self.clear_path_facts();
                let branch = self.ir.add_node(Node::Branch { arms: ir_arms });
                self.link(branch);
                self.tail = Some(join);
                Ok(())
            }
            ast::Command::Repeat { body, until } => {
                let body_entry = self.ir.add_node(Node::Nop { next: None });
                self.link(body_entry);
                self.tail = Some(body_entry);
                self.clear_path_facts();
                self.push_scope();
                self.elaborate_command(body)?;
                let join = self.ir.add_node(Node::Nop { next: None });
                let mut arms = Vec::new();
                for arm in until {
                    // Exit guards and exit commands see the loop body's
                    // final-iteration bindings.
                    let guard = self.resolve_guard(&arm.guard)?;
                    self.push_scope();
                    let entry = self.sub_chain(join, |p| p.elaborate_command(&arm.command))?;
                    self.pop_scope();
                    arms.push(BranchArm {
                        guard,
                        target: entry,
                    });
                }
                self.pop_scope();
                let until_node = self.ir.add_node(Node::Until {
                    arms,
                    repeat: body_entry,
                });
                self.link(until_node);
                self.tail = Some(join);
                self.clear_path_facts();
                Ok(())
            }
            ast::Command::New { var } => {
                let ir_var = self.ir_name(var);
                let nonce = self.nonces.fresh();
                self.bind_local(var, Binding::Term(Term::var(ir_var.clone())))?;
                self.append(Node::Fresh {
                    var: ir_var,
                    nonce,
                    next: None,
                });
                Ok(())
            }
            ast::Command::Call { target, args } => {
                inline::eval_call(self, target, args, false)?;
                Ok(())
            }
            ast::Command::Emit { tag, args } => {
                let args = args
                    .iter()
                    .map(|a| self.resolve_term(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let index = self.event_index;
                self.event_index += 1;
                let node = self.append(Node::Emit {
                    tag: tag.clone(),
                    args: args.clone(),
                    index,
                    next: None,
                });
                self.ir.events.push(EventSite {
                    tag: tag.clone(),
                    args,
                    node,
                    index,
                });
                Ok(())
            }
            ast::Command::Insert { instance, fact } => {
                let store = self.resolve_store(instance)?;
                self.check_store_op(store, "insert")?;
                let fact = self.env.theory.normalize(&self.resolve_term(fact)?)?;
                self.track_insert(store, fact.clone());
                self.append(Node::Insert {
                    store,
                    fact,
                    next: None,
                });
                Ok(())
            }
            ast::Command::Remove { instance, fact } => {
                let store = self.resolve_store(instance)?;
                self.check_store_op(store, "remove")?;
                let fact = self.env.theory.normalize(&self.resolve_term(fact)?)?;
                self.track_remove(store, &fact)?;
                self.append(Node::Remove {
                    store,
                    fact,
                    next: None,
                });
                Ok(())
            }
            ast::Command::MatchConsume { instance, pattern } => {
                let store = self.resolve_store(instance)?;
                self.check_store_op(store, "match")?;
                let pattern = self.resolve_pattern(pattern)?;
                self.consume_invalidate(store, &pattern)?;
                self.append(Node::Consume {
                    store,
                    pattern,
                    next: None,
                });
                Ok(())
            }
            ast::Command::Skip => Ok(()),
        }
    }
}
