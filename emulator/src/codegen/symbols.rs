//! Compile-time bookkeeping: the scope stack, function signatures and the
//! bump allocator behind globals, spill slots and `malloc`.

use std::collections::BTreeMap;

use crate::constants as C;
use crate::parser::ast::Type;

use super::CompileError;

/// Where a binding's value lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Register(u8),
    Ram(C::Address),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub ty: Type,
    pub storage: Storage,
    pub writable: bool,
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<Type>,
    pub return_type: Type,
    /// Code label the call site JALs to.
    pub label: String,
}

/// A lexical scope stack. Bindings are kept in declaration order so that
/// lookup, shadowing and spill-candidate selection are all deterministic.
#[derive(Default)]
pub struct SymbolTable {
    scopes: Vec<Vec<Binding>>,
    functions: BTreeMap<String, Signature>,
}

impl SymbolTable {
    pub fn enter_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Pop the innermost scope, returning its bindings so the caller can
    /// release their registers.
    pub fn exit_scope(&mut self) -> Vec<Binding> {
        self.scopes.pop().unwrap_or_default()
    }

    pub fn define(&mut self, binding: Binding) {
        self.scopes
            .last_mut()
            .expect("define outside any scope")
            .push(binding);
    }

    /// Innermost binding with the given name.
    pub fn resolve(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|b| b.name == name))
    }

    pub fn define_function(&mut self, name: &str, signature: Signature) {
        self.functions.insert(name.to_string(), signature);
    }

    pub fn function(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)
    }
}

/// The compile-time heap cursor. `malloc(N)` returns the cursor and bumps
/// it; nothing is ever handed back, which keeps the generated program
/// deterministic and free of a runtime allocator.
pub struct HeapCursor {
    next: C::Address,
}

impl Default for HeapCursor {
    fn default() -> Self {
        Self {
            next: C::HEAP_START,
        }
    }
}

impl HeapCursor {
    pub fn alloc(&mut self, words: usize) -> Result<C::Address, CompileError> {
        let address = self.next;
        let end = usize::from(address) + words;
        if end > usize::from(C::HEAP_END) {
            return Err(CompileError::OutOfStaticMemory);
        }
        self.next = end as C::Address;
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, storage: Storage) -> Binding {
        Binding {
            name: name.into(),
            ty: Type::Int,
            storage,
            writable: true,
        }
    }

    #[test]
    fn shadowing_test() {
        let mut table = SymbolTable::default();
        table.enter_scope();
        table.define(binding("x", Storage::Register(5)));
        table.enter_scope();
        table.define(binding("x", Storage::Register(6)));
        assert_eq!(table.resolve("x").unwrap().storage, Storage::Register(6));
        table.exit_scope();
        assert_eq!(table.resolve("x").unwrap().storage, Storage::Register(5));
    }

    #[test]
    fn heap_cursor_bumps_test() {
        let mut heap = HeapCursor::default();
        let a = heap.alloc(4).unwrap();
        let b = heap.alloc(1).unwrap();
        assert_eq!(a, crate::constants::HEAP_START);
        assert_eq!(b, a + 4);
        assert!(heap.alloc(usize::from(u16::MAX)).is_err());
    }
}
