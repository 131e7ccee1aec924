//! The bytecode buffer: an append-only stream of 16-bit words.
//!
//! Truncation is how the compiler excises an inner function body after
//! compiling it in place (§4.9/4.7 `fn`) and how it backpatches jump operands
//! (rewind to a saved offset, overwrite, restore the end).

mod disasm;
mod opcode;

pub use disasm::disassemble;
pub use opcode::Opcode;

/// An append-only stream of 16-bit words.
#[derive(Debug, Clone, Default)]
pub struct BytecodeBuffer {
    words: Vec<u16>,
}

impl BytecodeBuffer {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Emit an opcode word.
    pub fn emit(&mut self, op: Opcode) {
        self.push_u16(op.as_u16());
    }

    pub fn push_u16(&mut self, value: u16) {
        self.words.push(value);
    }

    pub fn push_i16(&mut self, value: i16) {
        self.push_u16(value as u16);
    }

    /// Little-endian word order: low word first, then high word.
    pub fn push_i32(&mut self, value: i32) {
        let bits = value as u32;
        self.push_u16((bits & 0xFFFF) as u16);
        self.push_u16((bits >> 16) as u16);
    }

    pub fn push_i64(&mut self, value: i64) {
        let bits = value as u64;
        for shift in [0, 16, 32, 48] {
            self.push_u16(((bits >> shift) & 0xFFFF) as u16);
        }
    }

    /// Native IEEE-754 64-bit, word-split the same way as `push_i64`.
    pub fn push_real(&mut self, value: f64) {
        self.push_i64(value.to_bits() as i64);
    }

    /// Current length in words — used to snapshot jump/backpatch positions.
    pub fn length(&self) -> usize {
        self.words.len()
    }

    /// Drop the buffer back to `n` words. Used to excise a just-compiled
    /// inner function body, and (rewind, emit, implicit-restore-by-caller)
    /// to backpatch jump operands.
    pub fn truncate(&mut self, n: usize) {
        self.words.truncate(n);
    }

    /// Overwrite `words.len()` words starting at `offset`. Used for
    /// backpatching a previously-reserved jump operand.
    pub fn overwrite_at(&mut self, offset: usize, words: &[u16]) {
        self.words[offset..offset + words.len()].copy_from_slice(words);
    }

    /// Reserve `n` words (written later via `overwrite_at`), returning the
    /// offset of the first reserved word.
    pub fn reserve(&mut self, n: usize) -> usize {
        let at = self.length();
        self.words.extend(std::iter::repeat(0).take(n));
        at
    }

    /// Copy out the last `n` words and drop them from the buffer — used to
    /// splice a compiled function body out into its own `FuncDef`.
    pub fn split_off_tail(&mut self, n: usize) -> Vec<u16> {
        let start = self.words.len() - n;
        let tail = self.words.split_off(start);
        tail
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u16> {
        self.words
    }
}
