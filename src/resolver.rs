//! Symbol resolution: scope chain first, then the host environment (§4.5).

use crate::scope::Scope;
use crate::symbol::Symbol;
use crate::value::{Table, Value};

/// The ambient host environment a compilation resolves globals against.
///
/// `constants` maps a bound symbol to its value; `meta` records, per symbol,
/// a table with a `mutable` entry whose truthiness marks the binding as a
/// mutable global rather than a constant; `nils` is a separate membership
/// table for symbols bound to nil (kept apart from `constants` so a nil
/// binding is distinguishable from "absent", matching the host's own split).
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub constants: Table,
    pub meta: Table,
    pub nils: Table,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_marked_mutable(&self, sym: &Symbol) -> bool {
        match self.meta.get(&Value::Symbol(sym.clone())) {
            Some(meta) => match meta {
                Value::Table(t) => t
                    .get(&Value::symbol("mutable"))
                    .is_some_and(Value::is_truthy),
                other => other.is_truthy(),
            },
            None => false,
        }
    }
}

/// The outcome of resolving a symbol against a scope chain and an `Env`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Local { level: u32, index: u16, mutable: bool },
    Constant(Value),
    MutableGlobal(Value),
    Unresolved,
}

/// Resolve `sym` starting from `scope`, per §4.5. Does not mutate any
/// `touch_parent`/`touch_env` flags — callers that accept a `Local`
/// resolution with `level > 0` are responsible for calling
/// `Scope::mark_upvalue_path`, and callers that accept a global resolution
/// are responsible for calling `scope.mark_touch_env()`.
pub fn resolve(scope: &Scope, env: &Env, sym: &Symbol) -> Resolution {
    if let Some((defining, index, mutable)) = scope.find_local(sym) {
        return Resolution::Local {
            level: scope.level() - defining.level(),
            index,
            mutable,
        };
    }

    if let Some(value) = env.constants.get(&Value::Symbol(sym.clone())) {
        return if env.is_marked_mutable(sym) {
            Resolution::MutableGlobal(value.clone())
        } else {
            Resolution::Constant(value.clone())
        };
    }

    if env.nils.get(&Value::Symbol(sym.clone())).is_some() {
        return Resolution::Constant(Value::Nil);
    }

    Resolution::Unresolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_local_in_innermost_scope() {
        let mut root = Scope::root();
        root.declare_local(Symbol::new("x"), false).unwrap();
        let env = Env::new();
        match resolve(&root, &env, &Symbol::new("x")) {
            Resolution::Local { level, index, mutable } => {
                assert_eq!(level, 0);
                assert_eq!(index, 0);
                assert!(!mutable);
            }
            other => panic!("expected Local, got {other:?}"),
        }
    }

    #[test]
    fn computes_nonzero_level_across_function_boundary() {
        let mut root = Scope::root();
        root.declare_local(Symbol::new("x"), false).unwrap();
        let inner = root.push_scope(false);
        let env = Env::new();
        match resolve(&inner, &env, &Symbol::new("x")) {
            Resolution::Local { level, .. } => assert_eq!(level, 1),
            other => panic!("expected Local, got {other:?}"),
        }
    }

    #[test]
    fn falls_through_to_mutable_global() {
        let root = Scope::root();
        let mut env = Env::new();
        env.constants.insert(Value::symbol("g"), Value::Integer(5));
        let mut meta = Table::new();
        meta.insert(Value::symbol("mutable"), Value::Bool(true));
        env.meta.insert(Value::symbol("g"), Value::Table(meta.into()));
        match resolve(&root, &env, &Symbol::new("g")) {
            Resolution::MutableGlobal(Value::Integer(5)) => {}
            other => panic!("expected MutableGlobal(5), got {other:?}"),
        }
    }

    #[test]
    fn falls_through_to_constant() {
        let root = Scope::root();
        let mut env = Env::new();
        env.constants.insert(Value::symbol("pi"), Value::real(3.0));
        match resolve(&root, &env, &Symbol::new("pi")) {
            Resolution::Constant(_) => {}
            other => panic!("expected Constant, got {other:?}"),
        }
    }

    #[test]
    fn unbound_symbol_is_unresolved() {
        let root = Scope::root();
        let env = Env::new();
        assert_eq!(resolve(&root, &env, &Symbol::new("nope")), Resolution::Unresolved);
    }
}
