mod common;

use common::*;

use colugo_dsl::ast::{
    Command, ExprAst, GuardOp, LemmaKind, SystemDecl, TermAst, TypeKindAst, Unit, VarInit,
};
use colugo_ir::lowering::{elaborate, ElabError};
use colugo_ir::properties::PropertyError;
use colugo_ir::store::StoreError;
use colugo_ir::system::{Node, ProcessIr, Provenance};
use colugo_theory::{Subst, Term, TheoryError};

use colugo_ir::access::AccessError;

/// Follow linear successors from a node, collecting visited ids (the last
/// entry is the first node without a successor, e.g. a control node).
fn walk_linear(p: &ProcessIr, start: usize) -> Vec<usize> {
    let mut out = vec![start];
    let mut cur = start;
    while let Some(next) = p.node(cur).next() {
        out.push(next);
        cur = next;
    }
    out
}

// -------------------------------------------------------------------
// End-to-end: symmetric-encryption handshake
// -------------------------------------------------------------------

fn handshake_unit() -> Unit {
    let mut u = unit("SymmetricHandshake");
    u.functions = vec![fun("senc", 2), fun("sdec", 2)];
    u.equations = vec![equation(
        TermAst::app(
            "sdec",
            vec![
                TermAst::app("senc", vec![TermAst::var("x"), TermAst::var("y")]),
                TermAst::var("y"),
            ],
        ),
        TermAst::var("x"),
    )];
    u.types = vec![
        ty("client_ty", TypeKindAst::Process),
        ty("server_ty", TypeKindAst::Process),
        ty("chan_ty", TypeKindAst::Channel),
        ty("fs_ty", TypeKindAst::Filesys),
    ];
    u.grants = vec![
        grant("client_ty", Some("chan_ty"), &["send"]),
        grant("server_ty", Some("chan_ty"), &["recv"]),
        grant("client_ty", Some("fs_ty"), &["open"]),
        grant("server_ty", Some("fs_ty"), &["open"]),
        grant("client_ty", None, &["get_nonce"]),
        grant("server_ty", None, &["get_nonce"]),
    ];
    u.channels = vec![channel("net", "chan_ty")];
    u.files = vec![file("nstore", "fs_ty", TermAst::cst("n0"))];
    u.constants = vec![constant("payload", false), constant("k", false)];
    u.syscalls = vec![syscall(
        "get_nonce",
        &["f"],
        bind("r", ExprAst::call("open", vec![ExprAst::var("f")])),
        Some(TermAst::var("r")),
    )];
    u.processes = vec![
        process(
            "Client",
            "client_ty",
            &[("c", "chan_ty"), ("f", "fs_ty")],
            seq(vec![
                bind("n", ExprAst::call("get_nonce", vec![ExprAst::var("f")])),
                call(
                    "send",
                    vec![
                        ExprAst::var("c"),
                        ExprAst::app(
                            "senc",
                            vec![
                                ExprAst::pair(ExprAst::cst("payload"), ExprAst::var("n")),
                                ExprAst::cst("k"),
                            ],
                        ),
                    ],
                ),
            ]),
        ),
        process(
            "Server",
            "server_ty",
            &[("c", "chan_ty"), ("f", "fs_ty")],
            seq(vec![
                bind("n", ExprAst::call("get_nonce", vec![ExprAst::var("f")])),
                bind("r", ExprAst::call("recv", vec![ExprAst::var("c")])),
                bind(
                    "d",
                    ExprAst::app("sdec", vec![ExprAst::var("r"), ExprAst::cst("k")]),
                ),
                Command::Branch {
                    arms: vec![arm(
                        guard(
                            TermAst::app("snd", vec![TermAst::var("d")]),
                            GuardOp::Eq,
                            TermAst::var("n"),
                        ),
                        emit("Valid", vec![TermAst::app("fst", vec![TermAst::var("d")])]),
                    )],
                },
            ]),
        ),
    ];
    u.system = sp(SystemDecl {
        instances: vec![
            instance("alice", "Client", &["net", "nstore"]),
            instance("bob", "Server", &["net", "nstore"]),
        ],
        lemmas: vec![lemma(
            "valid_reachable",
            LemmaKind::Reachable {
                event: event("Valid", vec![TermAst::var("x")]),
            },
        )],
    });
    u
}

#[test]
fn handshake_elaborates() {
    let ir = elaborate(&program(handshake_unit())).expect("elaboration should succeed");
    assert_eq!(ir.processes.len(), 2);
    assert_eq!(ir.stores.len(), 2);
    assert_eq!(ir.lemmas.len(), 1);
}

#[test]
fn server_guard_is_satisfiable_exactly_for_matching_key_and_nonce() {
    let ir = elaborate(&program(handshake_unit())).unwrap();
    let bob = &ir.processes[ir.find_process_by_name("bob").unwrap()];

    let guard = bob
        .nodes
        .iter()
        .find_map(|n| match n {
            Node::Branch { arms } => Some(arms[0].guard.clone()),
            _ => None,
        })
        .expect("server has a branch");
    // Runtime-bound variables: the received message and the file content.
    let msg_var = bob
        .nodes
        .iter()
        .find_map(|n| match n {
            Node::Consume {
                pattern: Term::Var(v),
                ..
            } => Some(v.clone()),
            _ => None,
        })
        .expect("server consumes from the channel");
    let nonce_var = bob
        .nodes
        .iter()
        .find_map(|n| match n {
            Node::ReadContent {
                pattern: Term::Var(v),
                ..
            } => Some(v.clone()),
            _ => None,
        })
        .expect("server reads the nonce file");

    let good_cipher = Term::app(
        "senc",
        vec![
            Term::pair(Term::cst("payload"), Term::cst("n0")),
            Term::cst("k"),
        ],
    );
    let mut sub = Subst::new();
    sub.insert(msg_var.clone(), good_cipher);
    sub.insert(nonce_var.clone(), Term::cst("n0"));
    let lhs = ir.theory.normalize(&guard.lhs.apply(&sub)).unwrap();
    let rhs = ir.theory.normalize(&guard.rhs.apply(&sub)).unwrap();
    assert_eq!(lhs, rhs, "guard holds when the ciphertext matches");

    // Wrong key: decryption is stuck and the projection never fires.
    let bad_key = Term::app(
        "senc",
        vec![
            Term::pair(Term::cst("payload"), Term::cst("n0")),
            Term::cst("k_other"),
        ],
    );
    let mut sub = Subst::new();
    sub.insert(msg_var.clone(), bad_key);
    sub.insert(nonce_var.clone(), Term::cst("n0"));
    let lhs = ir.theory.normalize(&guard.lhs.apply(&sub)).unwrap();
    let rhs = ir.theory.normalize(&guard.rhs.apply(&sub)).unwrap();
    assert_ne!(lhs, rhs, "guard cannot hold under a different key");

    // Wrong nonce.
    let stale = Term::app(
        "senc",
        vec![
            Term::pair(Term::cst("payload"), Term::cst("n_stale")),
            Term::cst("k"),
        ],
    );
    let mut sub = Subst::new();
    sub.insert(msg_var, stale);
    sub.insert(nonce_var, Term::cst("n0"));
    let lhs = ir.theory.normalize(&guard.lhs.apply(&sub)).unwrap();
    let rhs = ir.theory.normalize(&guard.rhs.apply(&sub)).unwrap();
    assert_ne!(lhs, rhs, "guard cannot hold for a stale nonce");
}

#[test]
fn valid_event_is_emitted_only_on_the_matching_branch() {
    let ir = elaborate(&program(handshake_unit())).unwrap();
    let bob = &ir.processes[ir.find_process_by_name("bob").unwrap()];

    assert_eq!(bob.events.len(), 1);
    let site = &bob.events[0];
    assert_eq!(site.tag, "Valid");

    let main_chain = walk_linear(bob, bob.entry.unwrap());
    assert!(
        !main_chain.contains(&site.node),
        "the emission is not on the unconditional path"
    );
    let arm_target = bob
        .nodes
        .iter()
        .find_map(|n| match n {
            Node::Branch { arms } => Some(arms[0].target),
            _ => None,
        })
        .unwrap();
    assert!(walk_linear(bob, arm_target).contains(&site.node));
}

#[test]
fn send_to_recv_induces_a_causal_edge() {
    let ir = elaborate(&program(handshake_unit())).unwrap();
    let net = ir.find_store_by_name("net").unwrap();
    let alice = ir.find_process_by_name("alice").unwrap();
    let bob = ir.find_process_by_name("bob").unwrap();

    let insert_node = ir.processes[alice]
        .nodes
        .iter()
        .position(|n| matches!(n, Node::Insert { .. }))
        .unwrap();
    let consume_node = ir.processes[bob]
        .nodes
        .iter()
        .position(|n| matches!(n, Node::Consume { .. }))
        .unwrap();

    assert!(ir.causal_edges.iter().any(|e| {
        e.store == net
            && e.producer.process == alice
            && e.producer.node == insert_node
            && e.consumer.process == bob
            && e.consumer.node == consume_node
    }));
}

// -------------------------------------------------------------------
// Attacker composition
// -------------------------------------------------------------------

fn injection_unit() -> Unit {
    let mut u = unit("ChannelInjection");
    u.functions = vec![fun("In", 1)];
    u.types = vec![
        ty("client_ty", TypeKindAst::Process),
        ty("chan_ty", TypeKindAst::Channel),
    ];
    u.grants = vec![grant("client_ty", Some("chan_ty"), &["recv"])];
    u.attacker_grants = vec![attacker_grant("client_ty", &["inject_channel", "match"])];
    u.channels = vec![channel("net", "chan_ty")];
    u.attacks = vec![active_attack(
        "inject_channel",
        "recv",
        &["ch"],
        Command::MatchConsume {
            instance: "ch".into(),
            pattern: TermAst::app("In", vec![TermAst::var("v")]),
        },
        Some(TermAst::var("v")),
    )];
    u.processes = vec![process(
        "Client",
        "client_ty",
        &[("c", "chan_ty")],
        seq(vec![
            bind("r", ExprAst::call("recv", vec![ExprAst::var("c")])),
            emit("Got", vec![TermAst::var("r")]),
        ]),
    )];
    u.system = sp(SystemDecl {
        instances: vec![instance("victim", "Client", &["net"])],
        lemmas: vec![lemma(
            "got_reachable",
            LemmaKind::Reachable {
                event: event("Got", vec![TermAst::var("x")]),
            },
        )],
    });
    u
}

#[test]
fn overridden_recv_yields_exactly_two_continuations() {
    let ir = elaborate(&program(injection_unit())).unwrap();
    let victim = &ir.processes[0];

    let choices: Vec<_> = victim
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Choice { alternatives } => Some(alternatives.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(choices.len(), 1, "one composed call site");
    let alternatives = &choices[0];
    assert_eq!(alternatives.len(), 2, "normal and attack, nothing else");
    assert_eq!(alternatives[0].provenance, Provenance::Normal);
    assert_eq!(
        alternatives[1].provenance,
        Provenance::Attack("inject_channel".into())
    );

    // Normal continuation consumes the legitimately stored fact.
    let normal_chain = walk_linear(victim, alternatives[0].entry);
    assert!(normal_chain.iter().any(|&id| matches!(
        victim.node(id),
        Node::Consume {
            pattern: Term::Var(_),
            ..
        }
    )));

    // Attack continuation consumes an attacker-supplied In(v) fact.
    let attack_chain = walk_linear(victim, alternatives[1].entry);
    assert!(attack_chain.iter().any(|&id| matches!(
        victim.node(id),
        Node::Consume {
            pattern: Term::App(name, _),
            ..
        } if name == "In"
    )));

    // Both continuations bind the same return variable.
    let ret_of = |chain: &[usize]| {
        chain.iter().find_map(|&id| match victim.node(id) {
            Node::Bind { var, .. } => Some(var.clone()),
            _ => None,
        })
    };
    let normal_ret = ret_of(&normal_chain).unwrap();
    let attack_ret = ret_of(&attack_chain).unwrap();
    assert_eq!(normal_ret, attack_ret);
}

#[test]
fn attack_without_attacker_grant_is_not_composed() {
    let mut u = injection_unit();
    u.attacker_grants.clear();
    let ir = elaborate(&program(u)).unwrap();
    let victim = &ir.processes[0];
    assert!(victim
        .nodes
        .iter()
        .all(|n| !matches!(n, Node::Choice { .. })));
}

// -------------------------------------------------------------------
// Passive attacks
// -------------------------------------------------------------------

#[test]
fn passive_attack_leaks_without_composition() {
    let mut u = unit("Wiretap");
    u.types = vec![
        ty("spy_ty", TypeKindAst::Process),
        ty("chan_ty", TypeKindAst::Channel),
    ];
    u.channels = vec![channel("leak", "chan_ty")];
    u.attacker_grants = vec![attacker_grant("spy_ty", &["wiretap", "insert"])];
    u.attacks = vec![passive_attack(
        "wiretap",
        "x",
        Command::Insert {
            instance: "leak".into(),
            fact: TermAst::var("x"),
        },
    )];
    u.processes = vec![process(
        "Spy",
        "spy_ty",
        &[],
        seq(vec![
            call("wiretap", vec![ExprAst::cst("secret")]),
            emit("Done", vec![]),
        ]),
    )];
    u.system = sp(SystemDecl {
        instances: vec![instance("eve", "Spy", &[])],
        lemmas: vec![lemma(
            "leak_happens",
            LemmaKind::Reachable {
                event: event("Done", vec![]),
            },
        )],
    });

    let ir = elaborate(&program(u)).unwrap();
    let eve = &ir.processes[0];
    let leak = ir.find_store_by_name("leak").unwrap();
    assert!(eve.nodes.iter().any(|n| matches!(
        n,
        Node::Insert { store, fact, .. } if *store == leak && fact == &Term::cst("secret")
    )));
    assert!(eve.nodes.iter().all(|n| !matches!(n, Node::Choice { .. })));
}

// -------------------------------------------------------------------
// Fresh-value uniqueness
// -------------------------------------------------------------------

#[test]
fn nonces_are_pairwise_distinct_across_instances_and_attack_alternatives() {
    let mut u = unit("Beacons");
    u.types = vec![
        ty("sensor_ty", TypeKindAst::Process),
        ty("chan_ty", TypeKindAst::Channel),
    ];
    u.grants = vec![grant("sensor_ty", Some("chan_ty"), &["send"])];
    u.attacker_grants = vec![attacker_grant("sensor_ty", &["blind_send", "insert"])];
    u.channels = vec![channel("net", "chan_ty")];
    u.constants = vec![constant("seed", true)];
    u.attacks = vec![active_attack(
        "blind_send",
        "send",
        &["ch", "m"],
        seq(vec![
            Command::New { var: "x".into() },
            Command::Insert {
                instance: "ch".into(),
                fact: TermAst::var("x"),
            },
        ]),
        None,
    )];
    u.processes = vec![process(
        "Beacon",
        "sensor_ty",
        &[("c", "chan_ty")],
        seq(vec![
            Command::New { var: "a".into() },
            Command::New { var: "b".into() },
            call(
                "send",
                vec![
                    ExprAst::var("c"),
                    ExprAst::pair(ExprAst::var("a"), ExprAst::var("b")),
                ],
            ),
            emit("Beat", vec![TermAst::var("a")]),
        ]),
    )];
    u.system = sp(SystemDecl {
        instances: vec![
            instance("s1", "Beacon", &["net"]),
            instance("s2", "Beacon", &["net"]),
        ],
        lemmas: vec![lemma(
            "beat_reachable",
            LemmaKind::Reachable {
                event: event("Beat", vec![TermAst::var("x")]),
            },
        )],
    });

    let ir = elaborate(&program(u)).unwrap();
    let mut nonces: Vec<usize> = ir.fresh_constants.values().copied().collect();
    for p in &ir.processes {
        for n in &p.nodes {
            if let Node::Fresh { nonce, .. } = n {
                nonces.push(*nonce);
            }
        }
    }
    // One fresh constant, plus per instance: a, b, and the attack
    // alternative's x.
    assert_eq!(nonces.len(), 7);
    let mut dedup = nonces.clone();
    dedup.sort_unstable();
    dedup.dedup();
    assert_eq!(dedup.len(), nonces.len(), "every generation act is distinct");
    assert_eq!(ir.nonce_count, nonces.len());
}

// -------------------------------------------------------------------
// Declaration-phase batch reporting
// -------------------------------------------------------------------

#[test]
fn declaration_errors_are_collected_in_one_pass() {
    let mut u = unit("Broken");
    u.functions = vec![fun("senc", 2), fun("senc", 3)];
    u.equations = vec![equation(
        TermAst::app("sdec", vec![TermAst::var("c"), TermAst::var("k")]),
        TermAst::var("c"),
    )];
    u.types = vec![
        ty("t1", TypeKindAst::Process),
        ty("t1", TypeKindAst::Channel),
    ];
    u.grants = vec![grant("t1", Some("ghost_ty"), &["send"])];

    let errs = elaborate(&program(u)).unwrap_err();
    assert_eq!(errs.errors.len(), 4);
    assert!(errs
        .errors
        .contains(&ElabError::Theory(TheoryError::DuplicateSymbol("senc".into()))));
    assert!(errs
        .errors
        .contains(&ElabError::Theory(TheoryError::UnknownSymbol("sdec".into()))));
    assert!(errs
        .errors
        .contains(&ElabError::Access(AccessError::DuplicateType("t1".into()))));
    assert!(errs
        .errors
        .contains(&ElabError::Access(AccessError::UnknownType("ghost_ty".into()))));
}

// -------------------------------------------------------------------
// Policy, scoping, and structural errors
// -------------------------------------------------------------------

fn minimal_unit_with_body(body: Command) -> Unit {
    let mut u = unit("Minimal");
    u.types = vec![
        ty("t", TypeKindAst::Process),
        ty("chan_ty", TypeKindAst::Channel),
    ];
    u.channels = vec![channel("net", "chan_ty")];
    u.processes = vec![process("P", "t", &[("c", "chan_ty")], body)];
    u.system = sp(SystemDecl {
        instances: vec![instance("p1", "P", &["net"])],
        lemmas: vec![],
    });
    u
}

#[test]
fn ungranted_send_is_an_access_violation() {
    let u = minimal_unit_with_body(call(
        "send",
        vec![ExprAst::var("c"), ExprAst::cst("hello")],
    ));
    let errs = elaborate(&program(u)).unwrap_err();
    assert_eq!(
        errs.errors[0],
        ElabError::AccessViolation {
            subject: "t".into(),
            object: "chan_ty".into(),
            op: "send".into(),
        }
    );
}

#[test]
fn mutually_recursive_syscalls_are_rejected() {
    let mut u = minimal_unit_with_body(call("ping", vec![]));
    u.grants = vec![grant("t", None, &["ping", "pong"])];
    u.syscalls = vec![
        syscall("ping", &[], call("pong", vec![]), None),
        syscall("pong", &[], call("ping", vec![]), None),
    ];
    let errs = elaborate(&program(u)).unwrap_err();
    assert_eq!(
        errs.errors[0],
        ElabError::RecursiveSyscall {
            name: "ping".into(),
            chain: "ping -> pong -> ping".into(),
        }
    );
}

#[test]
fn unbound_variable_is_reported_with_its_instance() {
    let u = minimal_unit_with_body(emit("E", vec![TermAst::var("z")]));
    let errs = elaborate(&program(u)).unwrap_err();
    assert_eq!(
        errs.errors[0],
        ElabError::UnboundVariable {
            var: "z".into(),
            context: "p1".into(),
        }
    );
}

#[test]
fn removal_of_an_unguaranteed_fact_is_rejected() {
    let mut u = minimal_unit_with_body(Command::Remove {
        instance: "net".into(),
        fact: TermAst::cst("ghost"),
    });
    u.grants = vec![grant("t", Some("chan_ty"), &["remove"])];
    let errs = elaborate(&program(u)).unwrap_err();
    assert!(matches!(
        &errs.errors[0],
        ElabError::Store(StoreError::FactAbsent { store, .. }) if store == "net"
    ));
}

#[test]
fn insert_then_remove_on_the_same_path_is_accepted() {
    let mut u = minimal_unit_with_body(seq(vec![
        Command::Insert {
            instance: "net".into(),
            fact: TermAst::cst("token"),
        },
        Command::Remove {
            instance: "net".into(),
            fact: TermAst::cst("token"),
        },
    ]));
    u.grants = vec![grant("t", Some("chan_ty"), &["insert", "remove"])];
    assert!(elaborate(&program(u)).is_ok());
}

#[test]
fn locals_are_write_once_but_shadowable() {
    let rebind = minimal_unit_with_body(seq(vec![
        bind("x", ExprAst::cst("a")),
        bind("x", ExprAst::cst("b")),
    ]));
    let errs = elaborate(&program(rebind)).unwrap_err();
    assert!(matches!(errs.errors[0], ElabError::Validation(_)));

    let shadow = minimal_unit_with_body(seq(vec![
        bind("x", ExprAst::cst("a")),
        Command::Branch {
            arms: vec![arm(
                guard(TermAst::var("x"), GuardOp::Eq, TermAst::cst("a")),
                bind("x", ExprAst::cst("b")),
            )],
        },
    ]));
    assert!(elaborate(&program(shadow)).is_ok());
}

#[test]
fn forever_loop_idiom_elaborates_to_constant_false_until_arm() {
    let u = minimal_unit_with_body(Command::Repeat {
        body: Box::new(sp(Command::Skip)),
        until: vec![arm(
            guard(TermAst::cst("1"), GuardOp::Eq, TermAst::cst("2")),
            Command::Skip,
        )],
    });
    let ir = elaborate(&program(u)).unwrap();
    let p = &ir.processes[0];
    let until = p
        .nodes
        .iter()
        .find_map(|n| match n {
            Node::Until { arms, repeat } => Some((arms.clone(), *repeat)),
            _ => None,
        })
        .expect("loop lowers to an until node");
    assert_eq!(until.0.len(), 1);
    assert_eq!(until.0[0].guard.constant_truth(), Some(false));
    assert!(until.1 < p.nodes.len());
}

#[test]
fn direct_invocation_of_an_active_attack_is_rejected() {
    let mut u = minimal_unit_with_body(call("inject", vec![ExprAst::cst("x")]));
    u.attacker_grants = vec![attacker_grant("t", &["inject"])];
    u.attacks = vec![active_attack(
        "inject",
        "send",
        &["ch", "m"],
        Command::Skip,
        None,
    )];
    let errs = elaborate(&program(u)).unwrap_err();
    assert!(matches!(errs.errors[0], ElabError::Validation(_)));
}

#[test]
fn attack_overriding_unknown_syscall_is_a_declaration_error() {
    let mut u = minimal_unit_with_body(Command::Skip);
    u.attacks = vec![active_attack(
        "mangle",
        "frobnicate",
        &["x"],
        Command::Skip,
        None,
    )];
    let errs = elaborate(&program(u)).unwrap_err();
    assert_eq!(errs.errors[0], ElabError::UnknownSyscall("frobnicate".into()));
}

#[test]
fn var_initializers_bind_before_the_body() {
    let mut u = unit("Vars");
    u.types = vec![ty("t", TypeKindAst::Process)];
    u.constants = vec![constant("k0", false)];
    let mut p = process("P", "t", &[], emit("Key", vec![TermAst::var("kv")]));
    p.node.vars = vec![VarInit {
        name: "kv".into(),
        init: TermAst::var("k0"),
        span: span(),
    }];
    u.processes = vec![p];
    u.system = sp(SystemDecl {
        instances: vec![instance("p1", "P", &[])],
        lemmas: vec![],
    });

    let ir = elaborate(&program(u)).unwrap();
    let p1 = &ir.processes[0];
    assert!(matches!(
        p1.node(p1.entry.unwrap()),
        Node::Bind { var, value, .. } if var == "kv" && value == &Term::cst("k0")
    ));
    assert_eq!(p1.events[0].args[0], Term::cst("k0"));
}

#[test]
fn lemma_on_never_emitted_tag_is_rejected() {
    let mut u = minimal_unit_with_body(emit("Ping", vec![]));
    u.system = sp(SystemDecl {
        instances: vec![instance("p1", "P", &["net"])],
        lemmas: vec![lemma(
            "bogus",
            LemmaKind::Reachable {
                event: event("Pong", vec![]),
            },
        )],
    });
    let errs = elaborate(&program(u)).unwrap_err();
    assert_eq!(
        errs.errors[0],
        ElabError::Property(PropertyError::UnknownEventTag {
            lemma: "bogus".into(),
            tag: "Pong".into(),
        })
    );
}
