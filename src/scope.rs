// Scope tree
//
// This file is part of blend65c.
// Copyright (C) 2015 Jeffrey Sharp
//
// blend65c is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published
// by the Free Software Foundation, either version 3 of the License,
// or (at your option) any later version.
//
// blend65c is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See
// the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with blend65c.  If not, see <http://www.gnu.org/licenses/>.
//
// Tree-structured scopes. Scopes and the symbols declared
// in them outlive the rest of a single compilation, so they live in one
// arena (`SymbolTable`) addressed by `Id<Scope>`, replacing the
// self-referential `&'a Scope<'a>` tree of the original prototype.

use crate::ordered_map::OrderedMap;
use crate::source::Range;
use crate::symbol::Symbol;
use crate::arena::{Arena, Id};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
}

pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<Id<Scope>>,
    pub children: Vec<Id<Scope>>,
    pub symbols: OrderedMap<Symbol>,
    /// Where this scope was introduced (the module/function/block header).
    pub location: Range,
}

impl Scope {
    pub fn new_root(location: Range) -> Self {
        Scope {
            kind: ScopeKind::Module,
            parent: None,
            children: Vec::new(),
            symbols: OrderedMap::new(),
            location,
        }
    }

    fn new_child(kind: ScopeKind, parent: Id<Scope>, location: Range) -> Self {
        Scope { kind, parent, children: Vec::new(), symbols: OrderedMap::new(), location }
    }
}

/// Owns the arena of scopes for one compilation and tracks the "current"
/// scope as a cursor, mirroring `enter`/`exit`.B.
pub struct SymbolTable {
    scopes: Arena<Scope>,
    root: Id<Scope>,
    current: Id<Scope>,
}

impl SymbolTable {
    pub fn new(module_location: Range) -> Self {
        let mut scopes = Arena::new();
        let root = scopes.alloc(Scope::new_root(module_location));
        SymbolTable { scopes, root, current: root }
    }

    pub fn root(&self) -> Id<Scope> {
        self.root
    }

    pub fn current(&self) -> Id<Scope> {
        self.current
    }

    pub fn scope(&self, id: Id<Scope>) -> &Scope {
        self.scopes.get(id)
    }

    pub fn scope_mut(&mut self, id: Id<Scope>) -> &mut Scope {
        self.scopes.get_mut(id)
    }

    /// Creates and enters a new child scope of the current scope.
    pub fn create(&mut self, kind: ScopeKind, location: Range) -> Id<Scope> {
        let parent = self.current;
        let child = self.scopes.alloc(Scope::new_child(kind, parent, location));
        self.scopes.get_mut(parent).children.push(child);
        self.current = child;
        child
    }

    /// Re-enters a previously created scope (used when re-visiting a
    /// function body after its header has been declared).
    pub fn enter(&mut self, scope: Id<Scope>) {
        self.current = scope;
    }

    /// Returns to the parent of the current scope. Exiting the root is a
    /// no-op, matching "every non-root has a parent present".
    pub fn exit(&mut self) {
        if let Some(parent) = self.scopes.get(self.current).parent {
            self.current = parent;
        }
    }

    /// Declares `symbol` in the current scope. Fails if a symbol by that
    /// name already exists in *this* scope (duplicate declaration).
    pub fn declare(&mut self, symbol: Symbol) -> Result<(), Symbol> {
        let name = symbol.name.clone();
        let scope = self.scopes.get_mut(self.current);
        match scope.symbols.insert(&name, symbol) {
            Ok(()) => Ok(()),
            Err(existing) => Err(existing.clone()),
        }
    }

    pub fn declare_in(&mut self, scope_id: Id<Scope>, symbol: Symbol) -> Result<(), Symbol> {
        let name = symbol.name.clone();
        let scope = self.scopes.get_mut(scope_id);
        match scope.symbols.insert(&name, symbol) {
            Ok(()) => Ok(()),
            Err(existing) => Err(existing.clone()),
        }
    }

    /// Walks from the current scope up through parents, returning the
    /// nearest symbol named `name`.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.lookup_from(self.current, name)
    }

    pub fn lookup_from(&self, scope_id: Id<Scope>, name: &str) -> Option<&Symbol> {
        let mut cursor = Some(scope_id);
        while let Some(id) = cursor {
            let scope = self.scopes.get(id);
            if let Some(sym) = scope.symbols.get(name) {
                return Some(sym);
            }
            cursor = scope.parent;
        }
        None
    }

    /// Looks up `name` only in the current scope, no parent walk.
    pub fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes.get(self.current).symbols.get(name)
    }

    pub fn symbols_in_scope(&self, scope_id: Id<Scope>) -> impl Iterator<Item = &Symbol> {
        self.scopes.get(scope_id).symbols.iter()
    }

    /// All symbols visible from `scope_id`: its own, then its ancestors',
    /// in that order (nearest scope wins on name collision, as in `lookup`).
    pub fn visible_symbols(&self, scope_id: Id<Scope>) -> Vec<&Symbol> {
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        let mut cursor = Some(scope_id);
        while let Some(id) = cursor {
            let scope = self.scopes.get(id);
            for sym in scope.symbols.iter() {
                if seen.insert(sym.name.clone()) {
                    result.push(sym);
                }
            }
            cursor = scope.parent;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{StorageClass, SymbolKind};
    use crate::types::Type;
    use std::rc::Rc;

    fn range() -> Range {
        Range::synthetic(Rc::from("f.b65"))
    }

    fn sym(table: &SymbolTable, name: &str) -> Symbol {
        Symbol::new(name, SymbolKind::Variable, StorageClass::Ram, Type::Byte, table.current(), range())
    }

    #[test]
    fn declare_and_lookup_local() {
        let mut t = SymbolTable::new(range());
        let s = sym(&t, "x");
        t.declare(s).unwrap();
        assert!(t.lookup_local("x").is_some());
    }

    #[test]
    fn lookup_walks_to_parent() {
        let mut t = SymbolTable::new(range());
        let s = sym(&t, "x");
        t.declare(s).unwrap();

        let child = t.create(ScopeKind::Function, range());
        assert!(t.lookup_local("x").is_none());
        assert!(t.lookup("x").is_some());
        assert_eq!(t.current(), child);
    }

    #[test]
    fn duplicate_declaration_in_same_scope_fails() {
        let mut t = SymbolTable::new(range());
        t.declare(sym(&t, "x")).unwrap();
        let err = t.declare(sym(&t, "x"));
        assert!(err.is_err());
    }

    #[test]
    fn shadowing_in_child_scope_is_allowed() {
        let mut t = SymbolTable::new(range());
        t.declare(sym(&t, "x")).unwrap();
        t.create(ScopeKind::Block, range());
        assert!(t.declare(sym(&t, "x")).is_ok());
    }

    #[test]
    fn exit_returns_to_parent() {
        let mut t = SymbolTable::new(range());
        let root = t.current();
        t.create(ScopeKind::Block, range());
        t.exit();
        assert_eq!(t.current(), root);
    }

    #[test]
    fn exit_at_root_is_noop() {
        let mut t = SymbolTable::new(range());
        let root = t.current();
        t.exit();
        assert_eq!(t.current(), root);
    }
}
