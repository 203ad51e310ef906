#![allow(dead_code)]

//! Shared builders for integration scenarios. The surface front end is an
//! external collaborator, so test programs are assembled directly as ASTs.

use colugo_dsl::ast::*;

pub fn sp<T>(node: T) -> Spanned<T> {
    Spanned::new(node, Span::point(0))
}

pub fn span() -> Span {
    Span::point(0)
}

pub fn program(unit: Unit) -> Program {
    Program { unit: sp(unit) }
}

pub fn unit(name: &str) -> Unit {
    Unit {
        name: name.into(),
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
        system: sp(SystemDecl {
            instances: Vec::new(),
            lemmas: Vec::new(),
        }),
    }
}

pub fn fun(name: &str, arity: usize) -> FunctionDecl {
    FunctionDecl {
        name: name.into(),
        arity,
        span: span(),
    }
}

pub fn equation(lhs: TermAst, rhs: TermAst) -> EquationDecl {
    EquationDecl {
        lhs,
        rhs,
        span: span(),
    }
}

pub fn ty(name: &str, kind: TypeKindAst) -> TypeDecl {
    TypeDecl {
        name: name.into(),
        kind,
        span: span(),
    }
}

pub fn grant(subject: &str, object: Option<&str>, ops: &[&str]) -> GrantDecl {
    GrantDecl {
        subject: subject.into(),
        object: object.map(Into::into),
        ops: ops.iter().map(|s| s.to_string()).collect(),
        span: span(),
    }
}

pub fn attacker_grant(subject: &str, ops: &[&str]) -> AttackerGrantDecl {
    AttackerGrantDecl {
        subject: subject.into(),
        ops: ops.iter().map(|s| s.to_string()).collect(),
        span: span(),
    }
}

pub fn channel(name: &str, ty: &str) -> ChannelInstanceDecl {
    ChannelInstanceDecl {
        name: name.into(),
        ty: ty.into(),
        span: span(),
    }
}

pub fn file(name: &str, ty: &str, init: TermAst) -> FileInstanceDecl {
    FileInstanceDecl {
        name: name.into(),
        ty: ty.into(),
        init,
        span: span(),
    }
}

pub fn constant(name: &str, fresh: bool) -> ConstantDecl {
    ConstantDecl {
        name: name.into(),
        fresh,
        span: span(),
    }
}

pub fn syscall(
    name: &str,
    params: &[&str],
    body: Command,
    result: Option<TermAst>,
) -> SyscallDecl {
    SyscallDecl {
        name: name.into(),
        params: params.iter().map(|s| s.to_string()).collect(),
        body: sp(body),
        result,
        span: span(),
    }
}

pub fn active_attack(
    name: &str,
    overrides: &str,
    params: &[&str],
    body: Command,
    result: Option<TermAst>,
) -> AttackDecl {
    AttackDecl {
        name: name.into(),
        kind: AttackKind::Active {
            overrides: overrides.into(),
            params: params.iter().map(|s| s.to_string()).collect(),
            body: sp(body),
            result,
        },
        span: span(),
    }
}

pub fn passive_attack(name: &str, param: &str, body: Command) -> AttackDecl {
    AttackDecl {
        name: name.into(),
        kind: AttackKind::Passive {
            param: param.into(),
            body: sp(body),
        },
        span: span(),
    }
}

pub fn process(name: &str, ty: &str, params: &[(&str, &str)], body: Command) -> Spanned<ProcessDecl> {
    sp(ProcessDecl {
        name: name.into(),
        ty: ty.into(),
        params: params
            .iter()
            .map(|(n, t)| ProcessParam {
                name: n.to_string(),
                ty: t.to_string(),
                span: span(),
            })
            .collect(),
        vars: Vec::new(),
        body: sp(body),
    })
}

pub fn instance(name: &str, template: &str, args: &[&str]) -> InstanceDecl {
    InstanceDecl {
        name: name.into(),
        template: template.into(),
        args: args.iter().map(|s| s.to_string()).collect(),
        span: span(),
    }
}

pub fn lemma(name: &str, kind: LemmaKind) -> Spanned<LemmaDecl> {
    sp(LemmaDecl {
        name: name.into(),
        kind,
        span: span(),
    })
}

pub fn event(tag: &str, args: Vec<TermAst>) -> EventPattern {
    EventPattern {
        tag: tag.into(),
        args,
        span: span(),
    }
}

pub fn seq(cmds: Vec<Command>) -> Command {
    Command::Seq(cmds.into_iter().map(sp).collect())
}

pub fn bind(var: &str, expr: ExprAst) -> Command {
    Command::Bind {
        var: var.into(),
        expr,
    }
}

pub fn call(target: &str, args: Vec<ExprAst>) -> Command {
    Command::Call {
        target: target.into(),
        args,
    }
}

pub fn emit(tag: &str, args: Vec<TermAst>) -> Command {
    Command::Emit {
        tag: tag.into(),
        args,
    }
}

pub fn guard(lhs: TermAst, op: GuardOp, rhs: TermAst) -> GuardAst {
    GuardAst { lhs, op, rhs }
}

pub fn arm(g: GuardAst, command: Command) -> GuardedArm {
    GuardedArm {
        guard: g,
        command: sp(command),
        span: span(),
    }
}
