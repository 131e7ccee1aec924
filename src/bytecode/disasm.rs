//! Human-readable disassembly, used by tests and by downstream tooling to
//! inspect what the compiler produced.

use super::opcode::Opcode;
use crate::funcdef::FuncDef;
use crate::value::Value;

/// Render a `FuncDef` as a constant pool (if non-empty) followed by its
/// instruction stream, recursing into every `FuncDef` literal reachable
/// through a `CLN` so a whole nest of closures disassembles to one greppable
/// block of text.
pub fn disassemble(def: &FuncDef) -> String {
    let mut out = String::new();
    write_def(&mut out, def);
    out
}

fn write_def(out: &mut String, def: &FuncDef) {
    if !def.literals.is_empty() {
        out.push_str("=== Constants ===\n");
        for (idx, lit) in def.literals.iter().enumerate() {
            out.push_str(&format!("{idx}: {}\n", format_value(lit)));
        }
        out.push('\n');
    }

    out.push_str("=== Instructions ===\n");
    let words = &def.bytecode;
    let mut pc = 0usize;
    while pc < words.len() {
        let raw = words[pc];
        match Opcode::from_u16(raw) {
            Some(op) => {
                let operands = read_operands(op, words, pc + 1);
                out.push_str(&format!("{:4}: {}", pc, op.mnemonic()));
                for word in &operands {
                    out.push_str(&format!(" {}", word));
                }
                out.push('\n');
                pc += 1 + operands.len();
            }
            None => {
                out.push_str(&format!("{:4}: .word {}\n", pc, raw));
                pc += 1;
            }
        }
    }

    for (idx, lit) in def.literals.iter().enumerate() {
        if let Value::FuncDef(inner) = lit {
            out.push_str(&format!("\n--- literal {idx}: FuncDef ---\n"));
            write_def(out, inner);
        }
    }
}

/// Render a constant-pool entry. `FuncDef` literals print a short marker
/// here — their body is rendered in full as its own recursed block below.
fn format_value(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.0.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Symbol(s) => format!("'{}", s.as_str()),
        Value::Tuple(items) => format!("(tuple of {})", items.len()),
        Value::Array(items) => format!("(array of {})", items.len()),
        Value::Table(t) => format!("(table of {})", t.len()),
        Value::FuncDef(_) => "<funcdef, see below>".to_string(),
        Value::Function(_) => "<function>".to_string(),
    }
}

/// Read the operand words following an opcode at `start`. `ARR`/`DIC` carry
/// `dst, count, e0…` — `PSK` carries `count, a0…` with no destination.
fn read_operands(op: Opcode, words: &[u16], start: usize) -> Vec<u16> {
    match op {
        Opcode::Arr | Opcode::Dic => {
            let count = words.get(start + 1).copied().unwrap_or(0) as usize;
            words.get(start..start + 2 + count).unwrap_or_default().to_vec()
        }
        Opcode::Psk => {
            let count = words.get(start).copied().unwrap_or(0) as usize;
            words.get(start..start + 1 + count).unwrap_or_default().to_vec()
        }
        _ => {
            let n = op.fixed_operand_words().expect("non-variable opcode");
            words.get(start..start + n).unwrap_or_default().to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcdef::FuncFlags;

    #[test]
    fn renders_fixed_width_instructions() {
        let def = FuncDef {
            bytecode: vec![
                Opcode::Nil.as_u16(),
                0,
                Opcode::Ret.as_u16(),
                0,
            ],
            literals: vec![],
            locals: 1,
            arity: 0,
            flags: FuncFlags::empty(),
        };
        let text = disassemble(&def);
        assert!(text.contains("NIL"));
        assert!(text.contains("RET"));
    }

    #[test]
    fn renders_variable_width_instruction() {
        // ARR $0 2 $1 $2 — dst=0, count=2, elements at slots 1 and 2.
        let def = FuncDef {
            bytecode: vec![Opcode::Arr.as_u16(), 0, 2, 1, 2],
            literals: vec![],
            locals: 3,
            arity: 0,
            flags: FuncFlags::empty(),
        };
        let text = disassemble(&def);
        assert!(text.contains("0: ARR 0 2 1 2"));
    }

    #[test]
    fn renders_psk_without_a_destination() {
        let def = FuncDef {
            bytecode: vec![Opcode::Psk.as_u16(), 2, 0, 1],
            literals: vec![],
            locals: 2,
            arity: 0,
            flags: FuncFlags::empty(),
        };
        let text = disassemble(&def);
        assert!(text.contains("0: PSK 2 0 1"));
    }

    #[test]
    fn prints_a_constants_section_and_recurses_into_nested_funcdefs() {
        let inner = FuncDef {
            bytecode: vec![Opcode::Ret.as_u16(), 0],
            literals: vec![],
            locals: 1,
            arity: 0,
            flags: FuncFlags::empty(),
        };
        let def = FuncDef {
            bytecode: vec![Opcode::Cln.as_u16(), 0, 0, Opcode::Ret.as_u16(), 0],
            literals: vec![Value::FuncDef(inner.into())],
            locals: 1,
            arity: 0,
            flags: FuncFlags::empty(),
        };
        let text = disassemble(&def);
        assert!(text.contains("=== Constants ==="));
        assert!(text.contains("0: <funcdef, see below>"));
        assert!(text.contains("--- literal 0: FuncDef ---"));
        // the nested FuncDef's own instructions appear in the same text.
        let instructions_sections = text.matches("=== Instructions ===").count();
        assert_eq!(instructions_sections, 2);
    }
}
