//! Expression compilers (§4.6): one strategy per AST shape.

use super::Compiler;
use crate::bytecode::Opcode;
use crate::error::CompileResult;
use crate::scope::{FormOptions, Slot};
use crate::value::{Table, Value};

/// Pick (and possibly allocate) the destination register for an expression
/// that must always be emitted (arrays, tables, calls): a fresh temp when the
/// caller either doesn't care where the value lands or is about to discard
/// it, otherwise the caller's pinned target.
fn choose_dst(c: &mut Compiler, opts: FormOptions) -> CompileResult<(u16, bool)> {
    if opts.can_choose || opts.result_unused {
        Ok((c.scope.get_local()?, true))
    } else {
        Ok((opts.target, false))
    }
}

fn finish(c: &mut Compiler, opts: FormOptions, dst: u16, is_temp: bool) -> Slot {
    if opts.result_unused {
        if is_temp {
            c.scope.free_local(dst);
        }
        return Slot::nil();
    }
    Slot { index: dst, is_nil: false, is_temp, has_returned: false }
}

/// nil / bool / integer / real: a single immediate instruction, sized to the
/// smallest encoding that fits the value.
pub(super) fn compile_nonref(c: &mut Compiler, v: &Value, opts: FormOptions) -> CompileResult<Slot> {
    if opts.result_unused {
        return Ok(Slot::nil());
    }
    let (dst, is_temp) = choose_dst(c, opts)?;
    match v {
        Value::Nil => c.buffer.emit(Opcode::Nil),
        Value::Bool(true) => c.buffer.emit(Opcode::Tru),
        Value::Bool(false) => c.buffer.emit(Opcode::Fls),
        Value::Integer(i) => {
            if let Ok(small) = i16::try_from(*i) {
                c.buffer.emit(Opcode::I16);
                c.buffer.push_u16(dst);
                c.buffer.push_i16(small);
                return Ok(finish(c, opts, dst, is_temp));
            } else if let Ok(mid) = i32::try_from(*i) {
                c.buffer.emit(Opcode::I32);
                c.buffer.push_u16(dst);
                c.buffer.push_i32(mid);
                return Ok(finish(c, opts, dst, is_temp));
            } else {
                c.buffer.emit(Opcode::I64);
                c.buffer.push_u16(dst);
                c.buffer.push_i64(*i);
                return Ok(finish(c, opts, dst, is_temp));
            }
        }
        Value::Real(r) => {
            c.buffer.emit(Opcode::F64);
            c.buffer.push_u16(dst);
            c.buffer.push_real(r.0);
            return Ok(finish(c, opts, dst, is_temp));
        }
        _ => unreachable!("compile_nonref called with a reference type"),
    }
    c.buffer.push_u16(dst);
    Ok(finish(c, opts, dst, is_temp))
}

/// string / table / tuple-as-data / anything else stored by structural
/// identity: pooled and fetched with `CST`.
pub(super) fn compile_reference_literal(
    c: &mut Compiler,
    v: &Value,
    opts: FormOptions,
) -> CompileResult<Slot> {
    if opts.result_unused {
        return Ok(Slot::nil());
    }
    let idx = c.scope.add_literal(v.clone());
    let (dst, is_temp) = choose_dst(c, opts)?;
    c.buffer.emit(Opcode::Cst);
    c.buffer.push_u16(dst);
    c.buffer.push_u16(idx);
    Ok(finish(c, opts, dst, is_temp))
}

pub(super) fn compile_array(
    c: &mut Compiler,
    items: &[Value],
    opts: FormOptions,
) -> CompileResult<Slot> {
    let mut elems = Vec::with_capacity(items.len());
    for item in items {
        let slot = c.compile_value(item, FormOptions::any(false))?;
        elems.push(c.realize_slot(slot)?);
    }
    let (dst, is_temp) = choose_dst(c, opts)?;
    c.buffer.emit(Opcode::Arr);
    c.buffer.push_u16(dst);
    c.buffer.push_u16(elems.len() as u16);
    for e in &elems {
        c.buffer.push_u16(e.index);
    }
    for e in elems {
        if e.is_temp {
            c.scope.free_local(e.index);
        }
    }
    Ok(finish(c, opts, dst, is_temp))
}

/// Table literal: alternating key/value slots in the table's own (insertion)
/// bucket order, so recompiling the same literal twice yields the same `DIC`
/// operand order.
pub(super) fn compile_table(
    c: &mut Compiler,
    table: &Table,
    opts: FormOptions,
) -> CompileResult<Slot> {
    let mut kv = Vec::with_capacity(table.len() * 2);
    for (k, v) in table.iter() {
        let ks = c.compile_value(k, FormOptions::any(false))?;
        kv.push(c.realize_slot(ks)?);
        let vs = c.compile_value(v, FormOptions::any(false))?;
        kv.push(c.realize_slot(vs)?);
    }
    let (dst, is_temp) = choose_dst(c, opts)?;
    c.buffer.emit(Opcode::Dic);
    c.buffer.push_u16(dst);
    c.buffer.push_u16(kv.len() as u16);
    for s in &kv {
        c.buffer.push_u16(s.index);
    }
    for s in kv {
        if s.is_temp {
            c.scope.free_local(s.index);
        }
    }
    Ok(finish(c, opts, dst, is_temp))
}

/// A tuple whose head is not a recognized special-form name: an ordinary
/// call. Arguments are pushed with `PSK`, then the call is either a tail
/// call (`TCL`, no destination — control does not return here) or an
/// ordinary call (`CAL callee dst`).
pub(super) fn compile_call(
    c: &mut Compiler,
    tuple: &[Value],
    opts: FormOptions,
) -> CompileResult<Slot> {
    let callee = c.compile_value(&tuple[0], FormOptions::any(false))?;
    let callee = c.realize_slot(callee)?;
    let mut args = Vec::with_capacity(tuple.len() - 1);
    for arg in &tuple[1..] {
        let slot = c.compile_value(arg, FormOptions::any(false))?;
        args.push(c.realize_slot(slot)?);
    }

    c.buffer.emit(Opcode::Psk);
    c.buffer.push_u16(args.len() as u16);
    for a in &args {
        c.buffer.push_u16(a.index);
    }
    for a in args {
        if a.is_temp {
            c.scope.free_local(a.index);
        }
    }

    if opts.is_tail {
        c.buffer.emit(Opcode::Tcl);
        c.buffer.push_u16(callee.index);
        if callee.is_temp {
            c.scope.free_local(callee.index);
        }
        return Ok(Slot::returned());
    }

    let (dst, is_temp) = choose_dst(c, opts)?;
    c.buffer.emit(Opcode::Cal);
    c.buffer.push_u16(callee.index);
    c.buffer.push_u16(dst);
    if callee.is_temp {
        c.scope.free_local(callee.index);
    }
    Ok(finish(c, opts, dst, is_temp))
}
