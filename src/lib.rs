//! AST-to-bytecode compiler core for a small homoiconic, register-VM-targeting
//! language.
//!
//! The entry point is [`compiler::Compiler::compile`]: it takes a host
//! [`resolver::Env`], a [`config::CompilerConfig`], and an AST root expressed
//! directly as [`value::Value`] (this language is homoiconic — there is no
//! separate AST type), and produces a [`value::Value::Function`] wrapping a
//! compiled [`funcdef::FuncDef`].

pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod error;
pub mod funcdef;
pub mod resolver;
pub mod scope;
pub mod symbol;
pub mod value;

pub use compiler::Compiler;
pub use config::CompilerConfig;
pub use error::{CompileError, CompileResult};
pub use funcdef::{FuncDef, FuncEnv, FuncFlags, Function};
pub use resolver::Env;
pub use symbol::Symbol;
pub use value::{Table, Value};

/// Compile `ast` to a closure under the default configuration and an empty
/// host environment — a convenience wrapper for the common case of
/// compiling a self-contained expression with no ambient globals.
pub fn compile(ast: &Value) -> CompileResult<Value> {
    Compiler::compile(Env::new(), CompilerConfig::default(), ast)
}
