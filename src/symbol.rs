// Symbols
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

use crate::arena::Id;
use crate::scope::Scope;
use crate::source::Range;
use crate::types::Type;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind {
    Variable,
    Function,
    Parameter,
    MapVariable,
    Imported,
    Type,
    Enum,
    EnumMember,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageClass {
    /// Not placed in memory (e.g. a function or a compile-time constant).
    None,
    Zp,
    Ram,
    Data,
    /// Memory-mapped at a fixed address (`@map` hardware register).
    Map,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub storage_class: StorageClass,
    pub exported: bool,
    pub is_const: bool,
    pub ty: Type,
    pub declaring_scope: Id<Scope>,
    pub location: Range,
    /// Fixed address for `@map` symbols; required by the "map ⇒ fixed
    /// address metadata present" invariant.
    pub fixed_address: Option<u32>,
}

impl Symbol {
    pub fn new(
        name: impl Into<String>,
        kind: SymbolKind,
        storage_class: StorageClass,
        ty: Type,
        declaring_scope: Id<Scope>,
        location: Range,
    ) -> Self {
        Symbol {
            name: name.into(),
            kind,
            storage_class,
            exported: false,
            is_const: false,
            ty,
            declaring_scope,
            location,
            fixed_address: None,
        }
    }

    pub fn exported(mut self, exported: bool) -> Self {
        self.exported = exported;
        self
    }

    pub fn constant(mut self, is_const: bool) -> Self {
        self.is_const = is_const;
        self
    }

    pub fn at_address(mut self, address: u32) -> Self {
        self.fixed_address = Some(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use std::rc::Rc;

    #[test]
    fn map_symbol_carries_fixed_address() {
        let mut scopes: Arena<Scope> = Arena::new();
        let root = scopes.alloc(Scope::new_root(Range::synthetic(Rc::from("f"))));
        let sym = Symbol::new(
            "BORDER",
            SymbolKind::MapVariable,
            StorageClass::Map,
            Type::Byte,
            root,
            Range::synthetic(Rc::from("f")),
        )
        .at_address(0xD020);
        assert_eq!(sym.fixed_address, Some(0xD020));
        assert_eq!(sym.storage_class, StorageClass::Map);
    }
}
