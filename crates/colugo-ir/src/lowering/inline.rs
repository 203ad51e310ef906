//! Syscall inlining and attacker composition.
//!
//! A syscall call splices the callee's body at the call site with actuals
//! substituted for formals (call-by-value; recursion is rejected). When the
//! calling process's type carries an attacker grant for an active attack
//! overriding the called syscall, the call site elaborates to an explicit
//! choice between the unmodified body and each applicable attack body: a
//! closed set of tagged alternatives computed once, never dynamic dispatch.

use indexmap::IndexMap;

use colugo_dsl::ast;
use colugo_theory::Term;

use crate::system::{Alternative, Node, Provenance, StoreId, StoreKind};

use super::commands::{Binding, ProcElab};
use super::{ElabError, BUILTIN_SYSCALLS};

pub(crate) fn eval_call<'a>(
    p: &mut ProcElab<'a>,
    target: &str,
    args: &[ast::ExprAst],
    want_value: bool,
) -> Result<Option<Term>, ElabError> {
    if BUILTIN_SYSCALLS.contains(&target) {
        return eval_builtin(p, target, args, want_value);
    }
    let env = p.env;

    if let Some(&att) = env.attacks.get(target) {
        return match &att.kind {
            // A passive attack is never a substitution: the process invokes
            // it explicitly and its body only leaks.
            ast::AttackKind::Passive { param, body } => {
                if !env.access.attacker_allows(&p.ir.ty, target) {
                    return Err(ElabError::AccessViolation {
                        subject: p.ir.ty.clone(),
                        object: "none".to_string(),
                        op: target.to_string(),
                    });
                }
                if args.len() != 1 {
                    return Err(ElabError::ArityMismatch {
                        target: target.to_string(),
                        expected: 1,
                        found: args.len(),
                    });
                }
                let actual = Binding::Term(p.eval_expr(&args[0])?);
                let mut frame = IndexMap::new();
                frame.insert(param.clone(), actual);
                inline_body(p, target, frame, body, None, true)?;
                Ok(None)
            }
            ast::AttackKind::Active { .. } => Err(ElabError::Validation(format!(
                "active attack '{target}' is applied at overridden call sites, not invoked directly"
            ))),
        };
    }

    let Some(&sys) = env.syscalls.get(target) else {
        return Err(ElabError::UnknownSyscall(target.to_string()));
    };
    p.check_plain_op(target)?;
    if args.len() != sys.params.len() {
        return Err(ElabError::ArityMismatch {
            target: target.to_string(),
            expected: sys.params.len(),
            found: args.len(),
        });
    }
    let actuals = eval_actuals(p, args)?;
    let attacks = applicable_attacks(p, target);

    if attacks.is_empty() {
        let frame = frame_of(&sys.params, actuals)?;
        return inline_body(p, target, frame, &sys.body, sys.result.as_ref(), false);
    }

    let normal_actuals = actuals.clone();
    compose_site(
        p,
        target,
        move |p| {
            let frame = frame_of(&sys.params, normal_actuals)?;
            inline_body(p, target, frame, &sys.body, sys.result.as_ref(), false)
        },
        attacks,
        actuals,
        want_value,
    )
}

/// Built-in syscalls over channel/file stores. They participate in the
/// attacker composition exactly like user syscalls.
fn eval_builtin<'a>(
    p: &mut ProcElab<'a>,
    target: &str,
    args: &[ast::ExprAst],
    want_value: bool,
) -> Result<Option<Term>, ElabError> {
    match target {
        "send" => {
            expect_args(target, 2, args)?;
            let store = resolve_store_arg(p, &args[0])?;
            require_channel(p, store, target)?;
            p.check_store_op(store, "send")?;
            let message = p.eval_expr(&args[1])?;
            let message = p.env.theory.normalize(&message)?;
            let attacks = applicable_attacks(p, "send");
            if attacks.is_empty() {
                p.track_insert(store, message.clone());
                p.append(Node::Insert {
                    store,
                    fact: message,
                    next: None,
                });
                return Ok(None);
            }
            let actuals = vec![Binding::Store(store), Binding::Term(message.clone())];
            compose_site(
                p,
                "send",
                move |p| {
                    p.track_insert(store, message.clone());
                    p.append(Node::Insert {
                        store,
                        fact: message,
                        next: None,
                    });
                    Ok(None)
                },
                attacks,
                actuals,
                want_value,
            )
        }
        "recv" => {
            expect_args(target, 1, args)?;
            let store = resolve_store_arg(p, &args[0])?;
            require_channel(p, store, target)?;
            p.check_store_op(store, "recv")?;
            let attacks = applicable_attacks(p, "recv");
            if attacks.is_empty() {
                return Ok(Some(consume_any(p, store)?));
            }
            let actuals = vec![Binding::Store(store)];
            compose_site(
                p,
                "recv",
                move |p| Ok(Some(consume_any(p, store)?)),
                attacks,
                actuals,
                want_value,
            )
        }
        "open" => {
            expect_args(target, 1, args)?;
            let store = resolve_store_arg(p, &args[0])?;
            require_file(p, store, target)?;
            p.check_store_op(store, "open")?;
            let attacks = applicable_attacks(p, "open");
            if attacks.is_empty() {
                return Ok(Some(read_any(p, store)));
            }
            let actuals = vec![Binding::Store(store)];
            compose_site(
                p,
                "open",
                move |p| Ok(Some(read_any(p, store))),
                attacks,
                actuals,
                want_value,
            )
        }
        _ => Err(ElabError::UnknownSyscall(target.to_string())),
    }
}

/// Normal `recv` continuation: consume whatever fact the store offers.
fn consume_any(p: &mut ProcElab<'_>, store: StoreId) -> Result<Term, ElabError> {
    let var = p.ir_name("msg");
    let pattern = Term::var(var);
    p.consume_invalidate(store, &pattern)?;
    p.append(Node::Consume {
        store,
        pattern: pattern.clone(),
        next: None,
    });
    Ok(pattern)
}

/// Normal `open` continuation: bind the file's content without consuming.
fn read_any(p: &mut ProcElab<'_>, store: StoreId) -> Term {
    let var = p.ir_name("content");
    let pattern = Term::var(var);
    p.append(Node::ReadContent {
        store,
        pattern: pattern.clone(),
        next: None,
    });
    pattern
}

/// Active attacks the attacker may substitute at this call site. Attack
/// bodies themselves are never re-intercepted.
fn applicable_attacks<'a>(p: &ProcElab<'a>, syscall: &str) -> Vec<&'a ast::AttackDecl> {
    if p.in_attack {
        return Vec::new();
    }
    p.env
        .attacks
        .values()
        .copied()
        .filter(|a| {
            matches!(&a.kind, ast::AttackKind::Active { overrides, .. } if overrides == syscall)
        })
        .filter(|a| p.env.access.attacker_allows(&p.ir.ty, &a.name))
        .collect()
}

/// Elaborate a composed call site: one tagged alternative per reachable
/// elaboration, all converging on a join node. With a result in play,
/// every alternative binds the same return variable.
fn compose_site<'a>(
    p: &mut ProcElab<'a>,
    site: &str,
    normal: impl FnOnce(&mut ProcElab<'a>) -> Result<Option<Term>, ElabError>,
    attacks: Vec<&'a ast::AttackDecl>,
    actuals: Vec<Binding>,
    want_value: bool,
) -> Result<Option<Term>, ElabError> {
    let join = p.ir.add_node(Node::Nop { next: None });
    let ret_var = if want_value {
        Some(p.ir_name(&format!("{site}_ret")))
    } else {
        None
    };

    let mut alternatives = Vec::new();
    let entry = p.sub_chain(join, |p| {
        let value = normal(p)?;
        bind_ret(p, ret_var.as_deref(), value, site)
    })?;
    alternatives.push(Alternative {
        provenance: Provenance::Normal,
        entry,
    });

    for att in attacks {
        let ast::AttackKind::Active {
            params,
            body,
            result,
            ..
        } = &att.kind
        else {
            continue;
        };
        if params.len() != actuals.len() {
            return Err(ElabError::ArityMismatch {
                target: att.name.clone(),
                expected: params.len(),
                found: actuals.len(),
            });
        }
        let frame = frame_of(params, actuals.clone())?;
        let entry = p.sub_chain(join, |p| {
            let value = inline_body(p, &att.name, frame, body, result.as_ref(), true)?;
            bind_ret(p, ret_var.as_deref(), value, &att.name)
        })?;
        alternatives.push(Alternative {
            provenance: Provenance::Attack(att.name.clone()),
            entry,
        });
    }

    let choice = p.ir.add_node(Node::Choice { alternatives });
    p.link(choice);
    p.set_tail(join);
    // Alternatives may leave different facts behind.
    p.clear_path_facts();
    Ok(ret_var.map(Term::var))
}

/// Splice a callee body at the call site. The body sees only its formals
/// (call-by-value); the caller's scopes are restored afterwards.
fn inline_body<'a>(
    p: &mut ProcElab<'a>,
    name: &str,
    frame: IndexMap<String, Binding>,
    body: &ast::Spanned<ast::Command>,
    result: Option<&ast::TermAst>,
    as_attack: bool,
) -> Result<Option<Term>, ElabError> {
    if p.call_stack.iter().any(|n| n == name) {
        let chain = format!("{} -> {name}", p.call_stack.join(" -> "));
        return Err(ElabError::RecursiveSyscall {
            name: name.to_string(),
            chain,
        });
    }
    p.call_stack.push(name.to_string());
    let saved_scopes = p.swap_scopes(frame);
    let saved_attack = p.in_attack;
    p.in_attack = saved_attack || as_attack;

    let outcome = (|| {
        p.elaborate_command(body)?;
        match result {
            Some(t) => Ok(Some(p.resolve_term(t)?)),
            None => Ok(None),
        }
    })();

    p.in_attack = saved_attack;
    p.restore_scopes(saved_scopes);
    p.call_stack.pop();
    outcome
}

fn bind_ret(
    p: &mut ProcElab<'_>,
    ret: Option<&str>,
    value: Option<Term>,
    who: &str,
) -> Result<(), ElabError> {
    let Some(ret) = ret else {
        return Ok(());
    };
    let Some(value) = value else {
        return Err(ElabError::Validation(format!(
            "call to '{who}' is used in expression position but yields no value"
        )));
    };
    p.append(Node::Bind {
        var: ret.to_string(),
        value,
        next: None,
    });
    Ok(())
}

fn eval_actuals(p: &mut ProcElab<'_>, args: &[ast::ExprAst]) -> Result<Vec<Binding>, ElabError> {
    args.iter()
        .map(|a| match a {
            ast::ExprAst::Var(name) if p.resolve_store(name).is_ok() => {
                Ok(Binding::Store(p.resolve_store(name)?))
            }
            _ => Ok(Binding::Term(p.eval_expr(a)?)),
        })
        .collect()
}

fn frame_of(params: &[String], actuals: Vec<Binding>) -> Result<IndexMap<String, Binding>, ElabError> {
    let mut frame = IndexMap::new();
    for (param, actual) in params.iter().zip(actuals) {
        if frame.insert(param.clone(), actual).is_some() {
            return Err(ElabError::Validation(format!(
                "duplicate formal parameter '{param}'"
            )));
        }
    }
    Ok(frame)
}

fn expect_args(target: &str, expected: usize, args: &[ast::ExprAst]) -> Result<(), ElabError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ElabError::ArityMismatch {
            target: target.to_string(),
            expected,
            found: args.len(),
        })
    }
}

fn resolve_store_arg(p: &ProcElab<'_>, arg: &ast::ExprAst) -> Result<StoreId, ElabError> {
    match arg {
        ast::ExprAst::Var(name) => p.resolve_store(name),
        _ => Err(ElabError::Validation(
            "expected a channel or file instance argument".to_string(),
        )),
    }
}

fn require_channel(p: &ProcElab<'_>, store: StoreId, op: &str) -> Result<(), ElabError> {
    match p.env.stores[store].kind {
        StoreKind::Channel => Ok(()),
        StoreKind::File { .. } => Err(ElabError::Validation(format!(
            "'{op}' targets a channel, but '{}' is a file",
            p.env.stores[store].name
        ))),
    }
}

fn require_file(p: &ProcElab<'_>, store: StoreId, op: &str) -> Result<(), ElabError> {
    match p.env.stores[store].kind {
        StoreKind::File { .. } => Ok(()),
        StoreKind::Channel => Err(ElabError::Validation(format!(
            "'{op}' targets a file, but '{}' is a channel",
            p.env.stores[store].name
        ))),
    }
}
