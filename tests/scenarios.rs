//! Table-driven scenario tests (S1–S6, §8 of the design spec) plus the
//! disassembly snapshots that document what the compiler actually emits.

use pretty_assertions::assert_eq;
use rstest::rstest;
use wisp_compile::bytecode::disassemble;
use wisp_compile::{CompileError, Compiler, CompilerConfig, Env, Symbol, Table, Value};

fn def_for(ast: Value) -> wisp_compile::FuncDef {
    def_for_env(Env::new(), ast)
}

fn def_for_env(env: Env, ast: Value) -> wisp_compile::FuncDef {
    match Compiler::compile(env, CompilerConfig::default(), &ast).expect("compile failed") {
        Value::Function(f) => f.def.clone(),
        other => panic!("expected a Function, got {other:?}"),
    }
}

/// Just `def`'s own instruction lines — the text between its
/// `=== Instructions ===` header and whatever follows (a blank line before a
/// recursed `--- literal N: FuncDef ---` block, or end of string), with each
/// line's `<offset>: ` column trimmed of padding so assertions read
/// naturally regardless of how wide the offset field is.
fn lines(def: &wisp_compile::FuncDef) -> Vec<String> {
    let text = disassemble(def);
    let mut in_instructions = false;
    let mut out = Vec::new();
    for raw in text.lines() {
        let line = raw.trim_start();
        if line == "=== Instructions ===" {
            in_instructions = true;
            continue;
        }
        if !in_instructions {
            continue;
        }
        if line.is_empty() || line.starts_with("===") || line.starts_with("---") {
            break;
        }
        out.push(line.to_string());
    }
    out
}

/// Declare `name` as a mutable global bound to `value` in `env`.
fn mutable_global(env: &mut Env, name: &str, value: Value) {
    env.constants.insert(Value::symbol(name), value);
    let mut meta = Table::new();
    meta.insert(Value::symbol("mutable"), Value::Bool(true));
    env.meta.insert(Value::symbol(name), Value::Table(meta.into()));
}

/// Declare `name` as an ordinary (immutable) global constant.
fn constant_global(env: &mut Env, name: &str, value: Value) {
    env.constants.insert(Value::symbol(name), value);
}

#[test]
fn s1_bare_integer() {
    let def = def_for(Value::Integer(42));
    assert_eq!(def.arity, 0);
    assert_eq!(def.locals, 1);
    let lines = lines(&def);
    assert_eq!(lines, vec!["0: I16 0 42", "3: RET 0"]);
}

#[test]
fn s2_if_true_branches_both_return() {
    let ast = Value::tuple(vec![
        Value::symbol("if"),
        Value::Bool(true),
        Value::Integer(1),
        Value::Integer(2),
    ]);
    let def = def_for(ast);
    let text = disassemble(&def);
    // TRU $0 ; JIF $0 off ; I16 $0 1 ; RET $0 ; I16 $0 2 ; RET $0 — tail
    // position means each branch returns directly, no trailing JMP.
    assert!(text.contains("TRU 0"));
    assert!(text.contains("JIF"));
    assert_eq!(text.matches("RET").count(), 2);
    assert!(!text.contains("JMP"), "tail if must not emit a join JMP");
}

#[rstest]
#[case::literal_false(Value::Bool(false))]
#[case::literal_nil(Value::Nil)]
fn statically_false_condition_skips_the_test_entirely(#[case] cond: Value) {
    let ast = Value::tuple(vec![Value::symbol("if"), cond, Value::Integer(1), Value::Integer(2)]);
    let def = def_for(ast);
    let text = disassemble(&def);
    assert!(!text.contains("JIF"), "a statically-false condition must not emit a test");
    assert!(text.contains("I16 0 2"), "only the else branch should compile");
    assert!(!text.contains("I16 0 1"), "the unreachable then branch must not compile");
}

#[test]
fn s3_root_def_rewrites_to_global_def() {
    let mut env = Env::new();
    constant_global(&mut env, "global-def", Value::string("<host global-def>"));
    constant_global(&mut env, "+", Value::string("<host +>"));

    let ast = Value::tuple(vec![
        Value::symbol("do"),
        Value::tuple(vec![Value::symbol("def"), Value::symbol("x"), Value::Integer(5)]),
        Value::tuple(vec![
            Value::symbol("+"),
            Value::symbol("x"),
            Value::Integer(1),
        ]),
    ]);
    let err = Compiler::compile(env.clone(), CompilerConfig::default(), &ast).unwrap_err();
    // `def` rewrites to a `global-def` call but does not also bind the name
    // for subsequent reads in the same compilation — `x` stays unbound.
    assert_eq!(err, CompileError::UnboundSymbol(Symbol::new("x")));

    let def_only = Value::tuple(vec![
        Value::symbol("do"),
        Value::tuple(vec![Value::symbol("def"), Value::symbol("x"), Value::Integer(5)]),
    ]);
    let def = def_for_env(env, def_only);
    assert_eq!(def.arity, 0);
    assert!(def.flags.needs_env());
}

#[test]
fn s4_identity_closure() {
    let ast = Value::tuple(vec![
        Value::symbol("fn"),
        Value::array(vec![Value::symbol("x")]),
        Value::symbol("x"),
    ]);
    let def = def_for(ast);
    assert_eq!(lines(&def), vec!["0: CLN 0 0", "3: RET 0"]);

    assert_eq!(def.literals.len(), 1);
    match &def.literals[0] {
        Value::FuncDef(inner) => {
            assert_eq!(inner.arity, 1);
            assert_eq!(inner.locals, 1);
            assert_eq!(inner.flags, wisp_compile::FuncFlags::empty());
            assert_eq!(lines(inner), vec!["0: RET 0"]);
        }
        other => panic!("expected a FuncDef literal, got {other:?}"),
    }
}

#[test]
fn s5_nested_closure_needs_parent_at_both_levels() {
    let ast = Value::tuple(vec![
        Value::symbol("fn"),
        Value::array(vec![Value::symbol("x")]),
        Value::tuple(vec![
            Value::symbol("fn"),
            Value::array(vec![Value::symbol("y")]),
            Value::symbol("x"),
        ]),
    ]);
    let def = def_for(ast);
    assert!(def.flags.needs_parent(), "outer fn must expose its frame");

    let inner = match &def.literals[0] {
        Value::FuncDef(f) => f.clone(),
        other => panic!("expected FuncDef, got {other:?}"),
    };
    assert!(inner.flags.needs_parent(), "middle fn must also expose its frame");

    let inner_inner = match &inner.literals[0] {
        Value::FuncDef(f) => f.clone(),
        other => panic!("expected FuncDef, got {other:?}"),
    };
    assert!(inner_inner.flags.needs_parent());
    assert_eq!(lines(&inner_inner), vec!["0: UPV 0 1 0", "4: RET 0"]);
}

#[test]
fn s6_while_loop_back_edge_targets_the_header() {
    let mut env = Env::new();
    mutable_global(&mut env, "i", Value::Integer(0));
    constant_global(&mut env, "<", Value::string("<host <>"));
    constant_global(&mut env, "+", Value::string("<host +>"));
    constant_global(&mut env, "get", Value::string("<host get>"));
    constant_global(&mut env, "set!", Value::string("<host set!>"));

    let ast = Value::tuple(vec![
        Value::symbol("while"),
        Value::tuple(vec![Value::symbol("<"), Value::symbol("i"), Value::Integer(10)]),
        Value::tuple(vec![
            Value::symbol("varset!"),
            Value::symbol("i"),
            Value::tuple(vec![Value::symbol("+"), Value::symbol("i"), Value::Integer(1)]),
        ]),
    ]);
    let def = def_for_env(env, ast);
    assert!(def.flags.needs_env());
    let rows = lines(&def);
    assert!(rows.iter().any(|l| l.contains("JIF")));

    let header_offset: usize = rows[0].split(':').next().unwrap().parse().unwrap();
    let jmp_row = rows.iter().find(|l| l.contains("JMP")).expect("expected a back-edge JMP");
    let jmp_offset: usize = jmp_row.split(':').next().unwrap().parse().unwrap();
    let operands: Vec<i64> = jmp_row
        .split_whitespace()
        .skip(2)
        .map(|w| w.parse::<u16>().unwrap() as i64)
        .collect();
    // off32 is a signed word delta from the JMP instruction's own start.
    let off = (operands[0] | (operands[1] << 16)) as i32 as i64;
    assert_eq!(jmp_offset as i64 + off, header_offset as i64);
}

#[test]
fn unbound_symbol_is_rejected() {
    let err = Compiler::compile(Env::new(), CompilerConfig::default(), &Value::symbol("nope"))
        .unwrap_err();
    assert_eq!(err, CompileError::UnboundSymbol(Symbol::new("nope")));
}

#[test]
fn varset_on_immutable_local_is_rejected() {
    let body = Value::tuple(vec![
        Value::symbol("do"),
        Value::tuple(vec![Value::symbol("def"), Value::symbol("x"), Value::Integer(1)]),
        Value::tuple(vec![Value::symbol("varset!"), Value::symbol("x"), Value::Integer(2)]),
    ]);
    // `def` at non-root scope (inside a function body) declares an
    // immutable local, so a later `varset!` on it must be rejected.
    let ast = Value::tuple(vec![Value::symbol("fn"), Value::array(vec![]), body]);
    let err = Compiler::compile(Env::new(), CompilerConfig::default(), &ast).unwrap_err();
    assert_eq!(err, CompileError::ImmutableAssignment(Symbol::new("x")));
}

#[test]
fn vararg_must_be_penultimate() {
    let ast = Value::tuple(vec![
        Value::symbol("fn"),
        Value::array(vec![Value::symbol("x"), Value::symbol("&")]),
        Value::symbol("x"),
    ]);
    let err = Compiler::compile(Env::new(), CompilerConfig::default(), &ast).unwrap_err();
    assert_eq!(err, CompileError::VarargMisplaced);
}
