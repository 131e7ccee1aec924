//! Scope chain, slot allocator, and literal pool (§4.2–§4.4).
//!
//! A same-function sub-scope (opened by `if`/`while`/`do` bodies) shares its
//! parent's register space and literal pool — that sharing is modeled here by
//! handing both scopes the same `Rc<RefCell<FunctionFrame>>` rather than by
//! copying fields back out on pop. `frame_size` is therefore kept as a
//! running high-water mark updated on every allocation, not batched at
//! `pop_scope` time; the two are observationally equivalent for same-function
//! scopes since they share one frame, and for a new-function scope the `fn`
//! compiler already captures `locals` from the frame before popping, so there
//! is nothing left to merge into the (unrelated) outer frame.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::CompileError;
use crate::symbol::Symbol;
use crate::value::Value;

/// Where a compiled expression's value landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub index: u16,
    pub is_nil: bool,
    pub is_temp: bool,
    pub has_returned: bool,
}

impl Slot {
    pub fn owned(index: u16) -> Self {
        Slot { index, is_nil: false, is_temp: true, has_returned: false }
    }

    pub fn borrowed(index: u16) -> Self {
        Slot { index, is_nil: false, is_temp: false, has_returned: false }
    }

    pub fn nil() -> Self {
        Slot { index: 0, is_nil: true, is_temp: false, has_returned: false }
    }

    pub fn returned() -> Self {
        Slot { index: 0, is_nil: true, is_temp: false, has_returned: true }
    }
}

/// Hints threaded into every recursive `compile_value` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormOptions {
    pub target: u16,
    pub result_unused: bool,
    pub can_choose: bool,
    pub is_tail: bool,
}

impl FormOptions {
    /// Options for a sub-expression whose value is discarded.
    pub fn unused(is_tail: bool) -> Self {
        FormOptions { target: 0, result_unused: true, can_choose: true, is_tail }
    }

    /// Options for a sub-expression that may land anywhere.
    pub fn any(is_tail: bool) -> Self {
        FormOptions { target: 0, result_unused: false, can_choose: true, is_tail }
    }

    /// Options that pin the result to an exact slot.
    pub fn pinned(target: u16, is_tail: bool) -> Self {
        FormOptions { target, result_unused: false, can_choose: false, is_tail }
    }

    pub fn not_tail(self) -> Self {
        FormOptions { is_tail: false, ..self }
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalBinding {
    index: u16,
    mutable: bool,
}

/// Per-function register space, literal pool, and closure-capture flags,
/// shared by every same-function scope via `Rc<RefCell<_>>`.
#[derive(Debug, Default)]
struct FunctionFrame {
    next_local: u16,
    frame_size: u16,
    free_heap: Vec<u16>,
    literals: HashMap<Value, u16>,
    literals_array: Vec<Value>,
    touch_parent: bool,
    touch_env: bool,
}

impl FunctionFrame {
    fn get_local(&mut self) -> Result<u16, CompileError> {
        if let Some(reused) = self.free_heap.pop() {
            return Ok(reused);
        }
        if self.next_local == 0xFFFF {
            return Err(CompileError::TooManyLocals);
        }
        let idx = self.next_local;
        self.next_local += 1;
        self.frame_size = self.frame_size.max(self.next_local);
        Ok(idx)
    }

    fn free_local(&mut self, index: u16) {
        self.free_heap.push(index);
    }

    fn add_literal(&mut self, v: Value) -> u16 {
        if let Some(&idx) = self.literals.get(&v) {
            return idx;
        }
        let idx = self.literals_array.len() as u16;
        self.literals_array.push(v.clone());
        self.literals.insert(v, idx);
        idx
    }
}

/// One link in the scope chain.
pub struct Scope {
    level: u32,
    frame: Rc<RefCell<FunctionFrame>>,
    locals: HashMap<Symbol, LocalBinding>,
    parent: Option<Box<Scope>>,
}

impl Scope {
    pub fn root() -> Self {
        Scope {
            level: 0,
            frame: Rc::new(RefCell::new(FunctionFrame::default())),
            locals: HashMap::new(),
            parent: None,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.parent.as_deref()
    }

    /// Open a child scope. `same_function` shares this scope's register space
    /// and literal pool (an `if`/`while`/`do` body); otherwise a fresh frame
    /// is started one level deeper (a `fn` body).
    pub fn push_scope(self, same_function: bool) -> Scope {
        let (level, frame) = if same_function {
            (self.level, Rc::clone(&self.frame))
        } else {
            (self.level + 1, Rc::new(RefCell::new(FunctionFrame::default())))
        };
        Scope {
            level,
            frame,
            locals: HashMap::new(),
            parent: Some(Box::new(self)),
        }
    }

    /// Close this scope, returning the parent. See the module doc comment
    /// for why no field merge happens here.
    pub fn pop_scope(self) -> Scope {
        *self.parent.expect("pop_scope called on the root scope")
    }

    pub fn get_local(&self) -> Result<u16, CompileError> {
        self.frame.borrow_mut().get_local()
    }

    pub fn free_local(&self, index: u16) {
        self.frame.borrow_mut().free_local(index);
    }

    pub fn add_literal(&self, v: Value) -> u16 {
        self.frame.borrow_mut().add_literal(v)
    }

    pub fn literals(&self) -> Vec<Value> {
        self.frame.borrow().literals_array.clone()
    }

    pub fn frame_size(&self) -> u16 {
        self.frame.borrow().frame_size
    }

    pub fn touch_parent(&self) -> bool {
        self.frame.borrow().touch_parent
    }

    pub fn touch_env(&self) -> bool {
        self.frame.borrow().touch_env
    }

    pub fn mark_touch_parent(&self) {
        self.frame.borrow_mut().touch_parent = true;
    }

    pub fn mark_touch_env(&self) {
        self.frame.borrow_mut().touch_env = true;
    }

    /// Declare a local in this scope, reserving a fresh register for it.
    pub fn declare_local(&mut self, sym: Symbol, mutable: bool) -> Result<u16, CompileError> {
        let index = self.get_local()?;
        self.locals.insert(sym, LocalBinding { index, mutable });
        Ok(index)
    }

    /// Look up `sym` in this scope only (not the chain) — `(index, mutable)`.
    fn local_here(&self, sym: &Symbol) -> Option<(u16, bool)> {
        self.locals.get(sym).map(|b| (b.index, b.mutable))
    }

    /// Whether `other` shares this scope's register space (same function).
    fn shares_frame_with(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.frame, &other.frame)
    }

    /// Walk outward from `self`, yielding `(scope, index, mutable)` for the
    /// first scope whose `locals` map holds `sym`.
    pub(crate) fn find_local(&self, sym: &Symbol) -> Option<(&Scope, u16, bool)> {
        let mut cur = self;
        loop {
            if let Some((index, mutable)) = cur.local_here(sym) {
                return Some((cur, index, mutable));
            }
            cur = cur.parent()?;
        }
    }

    /// Mark `touch_parent` on every function frame from `self` up through
    /// and including `defining`'s: each of those frames must keep its
    /// register file reachable so the child closure's `UPV` chain can walk
    /// through it, including the frame the value actually lives in.
    pub fn mark_upvalue_path(&self, defining: &Scope) {
        let mut cur = self;
        loop {
            cur.mark_touch_parent();
            if cur.shares_frame_with(defining) {
                break;
            }
            match cur.parent() {
                Some(p) => cur = p,
                None => break,
            }
        }
    }
}
