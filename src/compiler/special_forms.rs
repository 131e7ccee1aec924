//! Special-form compilers (§4.7) and symbol resolution (§4.5, the parts that
//! need to synthesize and recompile AST for globals).

use super::Compiler;
use crate::bytecode::Opcode;
use crate::error::{CompileError, CompileResult};
use crate::resolver::{resolve, Resolution};
use crate::scope::{FormOptions, Slot};
use crate::symbol::Symbol;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SpecialForm {
    If,
    While,
    Do,
    Def,
    Var,
    VarSet,
    Fn,
    Quote,
    Apply,
    Tran,
}

pub(super) fn lookup(head: &str) -> Option<SpecialForm> {
    Some(match head {
        "if" => SpecialForm::If,
        "while" => SpecialForm::While,
        "do" => SpecialForm::Do,
        "def" => SpecialForm::Def,
        "var" => SpecialForm::Var,
        "varset!" => SpecialForm::VarSet,
        "fn" => SpecialForm::Fn,
        "quote" => SpecialForm::Quote,
        "apply" => SpecialForm::Apply,
        "tran" => SpecialForm::Tran,
        _ => return None,
    })
}

pub(super) fn dispatch(
    c: &mut Compiler,
    form: SpecialForm,
    args: &[Value],
    opts: FormOptions,
) -> CompileResult<Slot> {
    match form {
        SpecialForm::If => compile_if(c, args, opts),
        SpecialForm::While => compile_while(c, args, opts),
        SpecialForm::Do => compile_do(c, args, opts),
        SpecialForm::Def => compile_def(c, args, opts, false),
        SpecialForm::Var => compile_def(c, args, opts, true),
        SpecialForm::VarSet => compile_varset(c, args, opts),
        SpecialForm::Fn => compile_fn(c, args, opts),
        SpecialForm::Quote => compile_quote(c, args, opts),
        SpecialForm::Apply => compile_apply(c, args, opts),
        SpecialForm::Tran => compile_tran(c, args, opts),
    }
}

fn sym_at(items: &[Value], i: usize) -> CompileResult<&Symbol> {
    items.get(i).and_then(Value::as_symbol).ok_or(CompileError::ExpectedSymbol)
}

/// Resolve and compile a bare symbol reference — local/upvalue lookup,
/// falling through to the host environment for constants and mutable
/// globals (§4.5). A pure read has no side effect, so an unused result
/// short-circuits to nil without emitting anything, mirroring the
/// non-reference-literal rule in §4.6.
pub(super) fn compile_symbol_ref(c: &mut Compiler, sym: &Symbol, opts: FormOptions) -> CompileResult<Slot> {
    if let Some((defining, index, _mutable)) = c.scope.find_local(sym) {
        let level = c.scope.level() - defining.level();
        if opts.result_unused {
            return Ok(Slot::nil());
        }
        if level > 0 {
            c.scope.mark_upvalue_path(defining);
            let dst = if opts.can_choose { c.scope.get_local()? } else { opts.target };
            c.buffer.emit(Opcode::Upv);
            c.buffer.push_u16(dst);
            c.buffer.push_u16(level as u16);
            c.buffer.push_u16(index);
            return Ok(if opts.can_choose { Slot::owned(dst) } else { Slot::borrowed(dst) });
        }
        if opts.can_choose {
            return Ok(Slot::borrowed(index));
        }
        c.buffer.emit(Opcode::Mov);
        c.buffer.push_u16(opts.target);
        c.buffer.push_u16(index);
        return Ok(Slot::borrowed(opts.target));
    }

    match resolve(&c.scope, &c.env, sym) {
        Resolution::Unresolved => Err(CompileError::UnboundSymbol(sym.clone())),
        Resolution::Constant(v) => {
            c.scope.mark_touch_env();
            c.compile_value(&v, opts)
        }
        Resolution::MutableGlobal(v) => {
            c.scope.mark_touch_env();
            let synthetic = Value::tuple(vec![
                Value::symbol("get"),
                Value::quote(v),
                Value::Integer(0),
            ]);
            c.compile_value(&synthetic, opts)
        }
        Resolution::Local { .. } => unreachable!("local already handled via find_local"),
    }
}

/// `(do e1 … eN)`: a same-function sub-scope, every statement but the last
/// compiled for effect only, the last in the caller's own position.
fn compile_do(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    c.enter_scope(true);
    let result = (|| {
        if args.is_empty() {
            return Ok(Slot::nil());
        }
        for stmt in &args[..args.len() - 1] {
            let slot = c.compile_value(stmt, FormOptions::unused(false))?;
            debug_assert!(!slot.has_returned, "a non-tail statement must not return");
        }
        c.compile_value(&args[args.len() - 1], opts)
    })();
    c.exit_scope();
    result
}

/// `(def sym value)` / `(var sym value)` at non-root scope; at the root
/// scope both rewrite to a `global-def`/`global-var` call (§4.7, §9 Open
/// Question: the rewritten form's second argument is the symbol reinterpreted
/// byte-for-byte as a string, which is how the host's global table is keyed).
fn compile_def(c: &mut Compiler, args: &[Value], opts: FormOptions, mutable: bool) -> CompileResult<Slot> {
    if args.len() != 2 {
        return Err(CompileError::ExpectedFormArity);
    }
    let sym = sym_at(args, 0)?.clone();
    let value = &args[1];

    if c.scope.level() == 0 {
        let callee = if mutable { "global-var" } else { "global-def" };
        let rewritten = Value::tuple(vec![
            Value::symbol(callee),
            Value::string(sym.as_str()),
            value.clone(),
        ]);
        return c.compile_value(&rewritten, opts);
    }

    let target = c.scope.declare_local(sym, mutable)?;
    let computed = c.compile_value(value, FormOptions::pinned(target, false))?;
    debug_assert_eq!(computed.index, target);
    Ok(c.coerce(Slot::borrowed(target), opts))
}

/// `(varset! sym value)`: reassign a mutable binding. Immutable locals and
/// unbound symbols are compile errors; a mutable global rewrites to a
/// `set!` call and then re-reads the symbol for its result value.
fn compile_varset(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    if args.len() != 2 {
        return Err(CompileError::ExpectedFormArity);
    }
    let sym = sym_at(args, 0)?.clone();
    let value = &args[1];

    if let Some((defining, index, mutable)) = c.scope.find_local(&sym) {
        if !mutable {
            return Err(CompileError::ImmutableAssignment(sym));
        }
        let level = c.scope.level() - defining.level();
        if level > 0 {
            c.scope.mark_upvalue_path(defining);
            let src = c.compile_value(value, FormOptions::any(false))?;
            c.buffer.emit(Opcode::Suv);
            c.buffer.push_u16(src.index);
            c.buffer.push_u16(level as u16);
            c.buffer.push_u16(index);
            if src.is_temp {
                c.scope.free_local(src.index);
            }
            return Ok(c.coerce(Slot::borrowed(index), opts));
        }
        c.compile_value(value, FormOptions::pinned(index, false))?;
        return Ok(c.coerce(Slot::borrowed(index), opts));
    }

    match resolve(&c.scope, &c.env, &sym) {
        Resolution::MutableGlobal(v) => {
            c.scope.mark_touch_env();
            let set_call = Value::tuple(vec![
                Value::symbol("set!"),
                Value::quote(v),
                Value::Integer(0),
                value.clone(),
            ]);
            c.compile_value(&set_call, FormOptions::unused(false))?;
            compile_symbol_ref(c, &sym, opts)
        }
        Resolution::Constant(_) => Err(CompileError::ImmutableAssignment(sym)),
        Resolution::Unresolved => Err(CompileError::UnboundSymbol(sym)),
        Resolution::Local { .. } => unreachable!("local already handled via find_local"),
    }
}

/// `(if cond then [else])`. The condition's slot is reused as the
/// destination for both branches so callers can rely on a single
/// known location for the result.
fn compile_if(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    if args.len() < 2 || args.len() > 3 {
        return Err(CompileError::ExpectedFormArity);
    }

    let cond = c.compile_value(&args[0], FormOptions::any(false))?;
    // A condition that is statically the nil slot never takes the `then`
    // branch; skip straight to `else` (or nil) without emitting a test.
    if cond.is_nil {
        return match args.get(2) {
            Some(else_branch) => c.compile_value(else_branch, opts),
            None => Ok(c.coerce(Slot::nil(), opts)),
        };
    }

    // JIF occupies 4 words: opcode, cond, off_lo, off_hi.
    let jif_at = c.buffer.reserve(4);
    c.buffer.overwrite_at(jif_at, &[Opcode::Jif.as_u16(), cond.index]);

    let then_target = if opts.can_choose { cond.index } else { opts.target };
    let then_opts = FormOptions { target: then_target, can_choose: false, ..opts };
    let mut then_slot = c.compile_value(&args[1], then_opts)?;
    if opts.is_tail {
        then_slot = c.emit_return(then_slot);
    }

    let has_else = args.len() == 3;
    // JMP occupies 3 words: opcode, off_lo, off_hi.
    let jmp_at = if !opts.is_tail && has_else {
        let at = c.buffer.reserve(3);
        c.buffer.overwrite_at(at, &[Opcode::Jmp.as_u16()]);
        Some(at)
    } else {
        None
    };

    let after_then = c.buffer.length();
    patch_offset(c, jif_at + 2, jif_at, after_then);

    let mut else_slot = match args.get(2) {
        Some(else_branch) => {
            let else_opts = FormOptions { target: then_target, can_choose: false, ..opts };
            c.compile_value(else_branch, else_opts)?
        }
        None => Slot::borrowed(then_target),
    };
    if opts.is_tail {
        else_slot = c.emit_return(else_slot);
    }

    let after_else = c.buffer.length();
    if let Some(at) = jmp_at {
        patch_offset(c, at + 1, at, after_else);
    }

    if cond.is_temp && cond.index != then_target {
        c.scope.free_local(cond.index);
    }

    let _ = (then_slot, else_slot);
    if opts.is_tail {
        Ok(Slot::returned())
    } else {
        Ok(Slot { index: then_target, is_nil: false, is_temp: opts.can_choose, has_returned: false })
    }
}

/// Backpatch a 2-word jump offset at `operand_at` so that the jump
/// instruction starting at word `jump_at` lands at word `target`. The
/// offset is in words, measured from the start of the jump instruction.
fn patch_offset(c: &mut Compiler, operand_at: usize, jump_at: usize, target: usize) {
    let delta = (target as i64) - (jump_at as i64);
    let words = delta as i32 as u32;
    c.buffer.overwrite_at(operand_at, &[(words & 0xFFFF) as u16, (words >> 16) as u16]);
}

/// `(while cond body…)`: loops back to re-testing `cond` until it is falsy.
/// The body's value is always discarded.
fn compile_while(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    if args.is_empty() {
        return Err(CompileError::ExpectedFormArity);
    }
    c.enter_scope(true);
    let result = (|| {
        let start = c.buffer.length();
        let cond = c.compile_value(&args[0], FormOptions::any(false))?;
        if cond.is_nil {
            return Ok(Slot::nil());
        }
        // JIF occupies 4 words: opcode, cond, off_lo, off_hi.
        let jif_at = c.buffer.reserve(4);
        c.buffer.overwrite_at(jif_at, &[Opcode::Jif.as_u16(), cond.index]);
        for stmt in &args[1..] {
            c.compile_value(stmt, FormOptions::unused(false))?;
        }
        // JMP occupies 3 words: opcode, off_lo, off_hi.
        let back = c.buffer.length();
        let jmp_at = c.buffer.reserve(3);
        c.buffer.overwrite_at(jmp_at, &[Opcode::Jmp.as_u16()]);
        patch_offset(c, jmp_at + 1, back, start);

        let after_loop = c.buffer.length();
        patch_offset(c, jif_at + 2, jif_at, after_loop);

        // Preserved host quirk: when the result is not discarded, the
        // returned slot is the condition register's final (stale) value
        // from the last evaluation, not a freshly-computed nil.
        if opts.result_unused {
            if cond.is_temp {
                c.scope.free_local(cond.index);
            }
            Ok(Slot::nil())
        } else {
            Ok(Slot::borrowed(cond.index))
        }
    })();
    c.exit_scope();
    result
}

/// `(fn [params…] body…)`: compiles the body into a fresh region of the
/// outer buffer, then excises it into its own `FuncDef`, registers that def
/// as a literal in the *outer* scope, and emits `CLN` (make-closure).
fn compile_fn(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    let params = match args.first() {
        Some(Value::Array(items)) => items.clone(),
        _ => return Err(CompileError::ExpectedArgumentsArray),
    };
    let body = &args[1..];

    c.enter_scope(false);
    let fn_result = (|| {
        let mut arity = 0u16;
        let mut vararg = false;
        let mut i = 0usize;
        while i < params.len() {
            let sym = params[i].as_symbol().ok_or(CompileError::ExpectedSymbol)?;
            if sym.is_vararg_marker() {
                if i != params.len() - 2 {
                    return Err(CompileError::VarargMisplaced);
                }
                let rest = params[i + 1].as_symbol().ok_or(CompileError::ExpectedSymbol)?;
                c.scope.declare_local(rest.clone(), false)?;
                vararg = true;
                i += 2;
                continue;
            }
            c.scope.declare_local(sym.clone(), false)?;
            arity += 1;
            i += 1;
        }

        let size_before = c.buffer.length();
        let body_tuple = {
            let mut items = vec![Value::symbol("do")];
            items.extend_from_slice(body);
            Value::tuple(items)
        };
        let result = c.compile_value(&body_tuple, FormOptions::any(true))?;
        c.emit_return(result);

        let bytecode = c.buffer.split_off_tail(c.buffer.length() - size_before);
        let mut flags = FuncFlagsAccum::default();
        if vararg {
            flags.vararg = true;
        }
        if c.scope.touch_parent() {
            flags.needs_parent = true;
        }
        if c.scope.touch_env() {
            flags.needs_env = true;
        }

        Ok((bytecode, c.scope.literals(), c.scope.frame_size(), arity, flags))
    })();
    c.exit_scope();

    let (bytecode, literals, locals, arity, flags) = fn_result?;
    let def = crate::funcdef::FuncDef {
        bytecode,
        literals,
        locals,
        arity,
        flags: flags.into(),
    };
    let idx = c.scope.add_literal(Value::FuncDef(std::rc::Rc::new(def)));
    let dst = if opts.can_choose { c.scope.get_local()? } else { opts.target };
    c.buffer.emit(Opcode::Cln);
    c.buffer.push_u16(dst);
    c.buffer.push_u16(idx);
    Ok(if opts.result_unused {
        if opts.can_choose {
            c.scope.free_local(dst);
        }
        Slot::nil()
    } else if opts.can_choose {
        Slot::owned(dst)
    } else {
        Slot::borrowed(dst)
    })
}

#[derive(Default)]
struct FuncFlagsAccum {
    vararg: bool,
    needs_parent: bool,
    needs_env: bool,
}

impl From<FuncFlagsAccum> for crate::funcdef::FuncFlags {
    fn from(a: FuncFlagsAccum) -> Self {
        let mut f = crate::funcdef::FuncFlags::empty();
        if a.vararg {
            f |= crate::funcdef::FuncFlags::VARARG;
        }
        if a.needs_parent {
            f |= crate::funcdef::FuncFlags::NEEDS_PARENT;
        }
        if a.needs_env {
            f |= crate::funcdef::FuncFlags::NEEDS_ENV;
        }
        f
    }
}

/// `(quote x)`: non-reference values compile as immediates; everything else
/// is pooled, but never re-walked as code.
fn compile_quote(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    if args.len() != 1 {
        return Err(CompileError::ExpectedFormArity);
    }
    if args[0].is_nonref() {
        super::expr::compile_nonref(c, &args[0], opts)
    } else {
        super::expr::compile_reference_literal(c, &args[0], opts)
    }
}

/// `(apply fn arg0 … argK restSeq)`: fixed arguments pushed with `PSK`, then
/// the trailing sequence spliced in with `PAR`.
fn compile_apply(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    if args.len() < 2 {
        return Err(CompileError::ExpectedFormArity);
    }
    let callee = c.compile_value(&args[0], FormOptions::any(false))?;
    let callee = c.realize_slot(callee)?;
    let fixed = &args[1..args.len() - 1];
    let mut fixed_slots = Vec::with_capacity(fixed.len());
    for a in fixed {
        let slot = c.compile_value(a, FormOptions::any(false))?;
        fixed_slots.push(c.realize_slot(slot)?);
    }
    let rest = c.compile_value(&args[args.len() - 1], FormOptions::any(false))?;
    let rest = c.realize_slot(rest)?;

    c.buffer.emit(Opcode::Psk);
    c.buffer.push_u16(fixed_slots.len() as u16);
    for s in &fixed_slots {
        c.buffer.push_u16(s.index);
    }
    c.buffer.emit(Opcode::Par);
    c.buffer.push_u16(rest.index);

    for s in fixed_slots {
        if s.is_temp {
            c.scope.free_local(s.index);
        }
    }
    if rest.is_temp {
        c.scope.free_local(rest.index);
    }

    if opts.is_tail {
        c.buffer.emit(Opcode::Tcl);
        c.buffer.push_u16(callee.index);
        if callee.is_temp {
            c.scope.free_local(callee.index);
        }
        return Ok(Slot::returned());
    }

    let dst = if opts.can_choose { c.scope.get_local()? } else { opts.target };
    c.buffer.emit(Opcode::Cal);
    c.buffer.push_u16(callee.index);
    c.buffer.push_u16(dst);
    if callee.is_temp {
        c.scope.free_local(callee.index);
    }
    Ok(if opts.result_unused {
        if opts.can_choose {
            c.scope.free_local(dst);
        }
        Slot::nil()
    } else if opts.can_choose {
        Slot::owned(dst)
    } else {
        Slot::borrowed(dst)
    })
}

/// `(tran target [value])`: coroutine transfer.
fn compile_tran(c: &mut Compiler, args: &[Value], opts: FormOptions) -> CompileResult<Slot> {
    if args.is_empty() || args.len() > 2 {
        return Err(CompileError::ExpectedFormArity);
    }
    let target = c.compile_value(&args[0], FormOptions::any(false))?;
    let target = c.realize_slot(target)?;
    let value = match args.get(1) {
        Some(v) => c.compile_value(v, FormOptions::any(false))?,
        None => c.compile_value(&Value::Nil, FormOptions::any(false))?,
    };
    let value = c.realize_slot(value)?;
    let dst = if opts.can_choose { c.scope.get_local()? } else { opts.target };
    c.buffer.emit(Opcode::Trn);
    c.buffer.push_u16(dst);
    c.buffer.push_u16(target.index);
    c.buffer.push_u16(value.index);
    if target.is_temp {
        c.scope.free_local(target.index);
    }
    if value.is_temp {
        c.scope.free_local(value.index);
    }
    Ok(if opts.result_unused {
        if opts.can_choose {
            c.scope.free_local(dst);
        }
        Slot::nil()
    } else if opts.can_choose {
        Slot::owned(dst)
    } else {
        Slot::borrowed(dst)
    })
}
