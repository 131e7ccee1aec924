//! The compiler: a single recursive dispatch (`compile_value`) over AST
//! `Value`s, parameterized at every call by a `FormOptions` hint record
//! (§2, §3 "Compiler state").

mod expr;
mod special_forms;

use crate::bytecode::{BytecodeBuffer, Opcode};
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};
use crate::funcdef::{FuncDef, FuncEnv, FuncFlags, Function};
use crate::resolver::Env;
use crate::scope::{FormOptions, Scope, Slot};
use crate::value::Value;

/// Transient compiler state: created per `compile` call, discarded on return.
pub struct Compiler {
    env: Env,
    buffer: BytecodeBuffer,
    scope: Scope,
    depth: u32,
    config: CompilerConfig,
}

impl Compiler {
    fn new(env: Env, config: CompilerConfig) -> Self {
        Compiler {
            env,
            buffer: BytecodeBuffer::new(),
            scope: Scope::root(),
            depth: 0,
            config,
        }
    }

    /// Replace the live scope with its same-function or new-function child,
    /// working around `Scope::push_scope` taking `self` by value.
    fn enter_scope(&mut self, same_function: bool) {
        let current = std::mem::replace(&mut self.scope, Scope::root());
        self.scope = current.push_scope(same_function);
    }

    /// Replace the live scope with its parent.
    fn exit_scope(&mut self) {
        let current = std::mem::replace(&mut self.scope, Scope::root());
        self.scope = current.pop_scope();
    }

    /// `emit_return` (§4.8): no-op if the slot already represents a return;
    /// otherwise emits `RTN` for a nil result or `RET idx` otherwise.
    fn emit_return(&mut self, slot: Slot) -> Slot {
        if slot.has_returned {
            return slot;
        }
        if slot.is_nil {
            self.buffer.emit(Opcode::Rtn);
        } else {
            self.buffer.emit(Opcode::Ret);
            self.buffer.push_u16(slot.index);
            if slot.is_temp {
                self.scope.free_local(slot.index);
            }
        }
        Slot::returned()
    }

    /// Materialize a possibly-nil slot into a real register by emitting
    /// `NIL` into a freshly allocated local. Used wherever a slot's index
    /// is about to be read directly as an instruction operand (array/table
    /// elements, call/apply arguments and callees, tran's target and
    /// value) rather than handed back to a caller that can accept a nil
    /// slot on its own terms.
    fn realize_slot(&mut self, slot: Slot) -> CompileResult<Slot> {
        if !slot.is_nil {
            return Ok(slot);
        }
        let dst = self.scope.get_local()?;
        self.buffer.emit(Opcode::Nil);
        self.buffer.push_u16(dst);
        Ok(Slot::owned(dst))
    }

    /// Coerce an already-computed slot to what `opts` demands: drop it if
    /// the result is unused, leave it if the caller can choose, or `MOV` it
    /// into the pinned target otherwise.
    fn coerce(&mut self, slot: Slot, opts: FormOptions) -> Slot {
        if opts.result_unused {
            if slot.is_temp {
                self.scope.free_local(slot.index);
            }
            return Slot::nil();
        }
        if slot.is_nil {
            if opts.can_choose {
                return slot;
            }
            self.buffer.emit(Opcode::Nil);
            self.buffer.push_u16(opts.target);
            return Slot::borrowed(opts.target);
        }
        if opts.can_choose || slot.index == opts.target {
            return slot;
        }
        self.buffer.emit(Opcode::Mov);
        self.buffer.push_u16(opts.target);
        self.buffer.push_u16(slot.index);
        if slot.is_temp {
            self.scope.free_local(slot.index);
        }
        Slot::borrowed(opts.target)
    }

    /// The recursive dispatch: one AST shape, one compiler strategy.
    fn compile_value(&mut self, form: &Value, opts: FormOptions) -> CompileResult<Slot> {
        self.depth += 1;
        if self.depth > self.config.recursion_limit() {
            self.depth -= 1;
            return Err(CompileError::RecursionTooDeep);
        }
        let result = self.dispatch(form, opts);
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, form: &Value, opts: FormOptions) -> CompileResult<Slot> {
        match form {
            Value::Nil | Value::Bool(_) | Value::Integer(_) | Value::Real(_) => {
                expr::compile_nonref(self, form, opts)
            }
            Value::String(_) | Value::FuncDef(_) | Value::Function(_) => {
                expr::compile_reference_literal(self, form, opts)
            }
            Value::Symbol(sym) => special_forms::compile_symbol_ref(self, sym, opts),
            Value::Array(items) => expr::compile_array(self, items, opts),
            Value::Table(table) => expr::compile_table(self, table, opts),
            Value::Tuple(items) => self.compile_tuple(items, opts),
        }
    }

    fn compile_tuple(&mut self, items: &[Value], opts: FormOptions) -> CompileResult<Slot> {
        if items.is_empty() {
            return expr::compile_reference_literal(self, &Value::tuple(vec![]), opts);
        }
        if let Value::Symbol(head) = &items[0] {
            if let Some(form) = special_forms::lookup(head.as_str()) {
                return special_forms::dispatch(self, form, &items[1..], opts);
            }
        }
        expr::compile_call(self, items, opts)
    }

    /// Top-level entry (§4.9): compile `ast` in tail position from a fresh
    /// root scope, emit a trailing return, and wrap the result as a closure
    /// with an empty upvalue environment.
    pub fn compile(env: Env, config: CompilerConfig, ast: &Value) -> CompileResult<Value> {
        let mut compiler = Compiler::new(env, config);
        let result = compiler.compile_value(ast, FormOptions::any(true))?;
        compiler.emit_return(result);

        let flags = {
            let mut f = FuncFlags::empty();
            if compiler.scope.touch_parent() {
                f |= FuncFlags::NEEDS_PARENT;
            }
            if compiler.scope.touch_env() {
                f |= FuncFlags::NEEDS_ENV;
            }
            f
        };
        let def = FuncDef {
            bytecode: compiler.buffer.into_words(),
            literals: compiler.scope.literals(),
            locals: compiler.scope.frame_size(),
            arity: 0,
            flags,
        };
        Ok(Value::Function(
            Function { parent: None, def, env: FuncEnv::empty() }.into(),
        ))
    }
}
