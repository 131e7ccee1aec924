//! Compiler errors.
//!
//! The original host propagates these via `setjmp`/`longjmp` out of the C
//! compiler; here they are ordinary `Result`/`?` values, with `into_value()`
//! provided for hosts that want to hand the error back into the language as
//! data (matching the ABI the rest of the toolchain expects error values in).

use crate::symbol::Symbol;
use crate::value::Value;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("expected a symbol")]
    ExpectedSymbol,

    #[error("expected an arguments array")]
    ExpectedArgumentsArray,

    #[error("wrong number of arguments to special form")]
    ExpectedFormArity,

    #[error("unbound symbol: {0}")]
    UnboundSymbol(Symbol),

    #[error("cannot assign to immutable binding: {0}")]
    ImmutableAssignment(Symbol),

    #[error("too many locals in function")]
    TooManyLocals,

    #[error("recursion too deep")]
    RecursionTooDeep,

    #[error("`&` must be the second-to-last parameter")]
    VarargMisplaced,

    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Convert to a host-facing value, matching the historical ABI: the
    /// offending symbol itself for an unbound-symbol error, or an ordinary
    /// string carrying `thiserror`'s rendered message for everything else.
    /// Untagged, not wrapped in a tuple — a host catches this value and
    /// inspects it with the same predicates it uses on any other string or
    /// symbol.
    pub fn into_value(self) -> Value {
        match self {
            CompileError::UnboundSymbol(sym) => Value::Symbol(sym),
            other => Value::string(other.to_string()),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
