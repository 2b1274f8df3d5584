//! Lexically scoped symbol resolution. Symbol tables live in a [Scopes]
//! arena with parent links; lookups walk the parent chain and report how many
//! hops they took, which the code generator emits as the static-link count at
//! call sites.

use crate::{
    ast::{TypeId, Word},
    consts::MARK_SIZE,
    error::CompileError,
};
use serde::Serialize;
use std::collections::HashMap;

/// Index of a symbol in the [Scopes] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SymbolId(pub(crate) usize);

/// Index of a symbol table in the [Scopes] arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeId(pub(crate) usize);

/// One named entity: variable, parameter, typed constant, compile-time
/// constant, or subprogram.
///
/// `address` semantics depend on what the symbol is:
/// - variable / typed constant / parameter: word offset relative to the mark
///   pointer of the owning frame
/// - user subprogram: entry instruction address in the istore (patched in by
///   the code generator)
/// - native subprogram: index into the native registry
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub ty: TypeId,
    pub address: usize,
    pub is_native: bool,
    pub by_reference: bool,
    /// Present iff this symbol is a compile-time constant
    pub value: Option<Word>,
}

/// The result of a symbol lookup: the symbol plus the number of parent-table
/// hops that were needed to find it (0 = local).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SymbolLookup {
    pub symbol: SymbolId,
    pub level: usize,
}

/// One lexical scope: a value namespace and a type namespace, both keyed by
/// lowercased name, plus running size sums for frame layout.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    values: HashMap<String, SymbolId>,
    types: HashMap<String, TypeId>,
    parent: Option<ScopeId>,
    pub total_parameter_size: usize,
    pub total_variable_size: usize,
    pub total_typed_constants_size: usize,
}

impl SymbolTable {
    /// Frame size for the subprogram owning this scope: the mark plus
    /// everything addressed relative to it.
    pub fn frame_size(&self) -> usize {
        MARK_SIZE
            + self.total_parameter_size
            + self.total_variable_size
            + self.total_typed_constants_size
    }
}

/// Arena holding every scope and symbol of a compilation.
#[derive(Clone, Debug, Default)]
pub struct Scopes {
    tables: Vec<SymbolTable>,
    symbols: Vec<Symbol>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new scope linked to `parent`.
    pub fn push_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.tables.push(SymbolTable {
            parent,
            ..SymbolTable::default()
        });
        ScopeId(self.tables.len() - 1)
    }

    pub fn table(&self, scope: ScopeId) -> &SymbolTable {
        &self.tables[scope.0]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub(crate) fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    /// Add a symbol to a scope's value namespace. Fails on a duplicate in
    /// the same scope; shadowing an outer scope is fine.
    pub(crate) fn define(
        &mut self,
        scope: ScopeId,
        symbol: Symbol,
    ) -> Result<SymbolId, CompileError> {
        let key = symbol.name.to_lowercase();
        if self.tables[scope.0].values.contains_key(&key) {
            return Err(CompileError::DuplicateIdentifier(symbol.name));
        }
        self.symbols.push(symbol);
        let id = SymbolId(self.symbols.len() - 1);
        self.tables[scope.0].values.insert(key, id);
        Ok(id)
    }

    /// Add a named type to a scope's type namespace.
    pub(crate) fn define_type(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: TypeId,
    ) -> Result<(), CompileError> {
        let key = name.to_lowercase();
        if self.tables[scope.0].types.contains_key(&key) {
            return Err(CompileError::DuplicateIdentifier(name.into()));
        }
        self.tables[scope.0].types.insert(key, ty);
        Ok(())
    }

    /// Add a parameter. Parameters are added before variables, so their
    /// mark-relative addresses stay stable as locals accumulate. A
    /// by-reference parameter occupies one word regardless of referent size.
    pub(crate) fn add_parameter(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: TypeId,
        by_reference: bool,
        size: usize,
    ) -> Result<SymbolId, CompileError> {
        let size = if by_reference { 1 } else { size };
        let address = MARK_SIZE + self.tables[scope.0].total_parameter_size;
        let id = self.define(
            scope,
            Symbol {
                name: name.into(),
                ty,
                address,
                is_native: false,
                by_reference,
                value: None,
            },
        )?;
        self.tables[scope.0].total_parameter_size += size;
        Ok(id)
    }

    /// Add a local variable, after all parameters.
    pub(crate) fn add_variable(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: TypeId,
        size: usize,
    ) -> Result<SymbolId, CompileError> {
        let address = self.local_area_top(scope);
        let id = self.define(
            scope,
            Symbol {
                name: name.into(),
                ty,
                address,
                is_native: false,
                by_reference: false,
                value: None,
            },
        )?;
        self.tables[scope.0].total_variable_size += size;
        Ok(id)
    }

    /// Add a typed constant. Shares the local area with variables (sections
    /// can alternate, so both running sums feed the address).
    pub(crate) fn add_typed_constant(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: TypeId,
        size: usize,
    ) -> Result<SymbolId, CompileError> {
        let address = self.local_area_top(scope);
        let id = self.define(
            scope,
            Symbol {
                name: name.into(),
                ty,
                address,
                is_native: false,
                by_reference: false,
                value: None,
            },
        )?;
        self.tables[scope.0].total_typed_constants_size += size;
        Ok(id)
    }

    fn local_area_top(&self, scope: ScopeId) -> usize {
        let table = &self.tables[scope.0];
        MARK_SIZE
            + table.total_parameter_size
            + table.total_variable_size
            + table.total_typed_constants_size
    }

    /// Look up a name in the value namespace, walking parent links. Returns
    /// the symbol and the number of hops taken.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolLookup> {
        let key = name.to_lowercase();
        let mut level = 0;
        let mut current = Some(scope);
        while let Some(scope_id) = current {
            let table = &self.tables[scope_id.0];
            if let Some(&symbol) = table.values.get(&key) {
                return Some(SymbolLookup { symbol, level });
            }
            current = table.parent;
            level += 1;
        }
        None
    }

    /// Look up a name in the type namespace, walking parent links.
    pub fn lookup_type(&self, scope: ScopeId, name: &str) -> Option<TypeId> {
        let key = name.to_lowercase();
        let mut current = Some(scope);
        while let Some(scope_id) = current {
            let table = &self.tables[scope_id.0];
            if let Some(&ty) = table.types.get(&key) {
                return Some(ty);
            }
            current = table.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{SimpleType, TypeTable};

    #[test]
    fn test_frame_addresses() {
        let types = TypeTable::new();
        let integer = types.simple_id(SimpleType::Integer);
        let mut scopes = Scopes::new();
        let scope = scopes.push_scope(None);

        // Two parameters: one by value (2 words), one by reference (1 word
        // no matter the referent size)
        let p0 = scopes.add_parameter(scope, "a", integer, false, 2).unwrap();
        let p1 = scopes.add_parameter(scope, "b", integer, true, 40).unwrap();
        // Variable, typed constant, variable: the local area interleaves
        let v0 = scopes.add_variable(scope, "x", integer, 1).unwrap();
        let t0 = scopes
            .add_typed_constant(scope, "k", integer, 3)
            .unwrap();
        let v1 = scopes.add_variable(scope, "y", integer, 1).unwrap();

        assert_eq!(scopes.symbol(p0).address, MARK_SIZE);
        assert_eq!(scopes.symbol(p1).address, MARK_SIZE + 2);
        assert_eq!(scopes.symbol(v0).address, MARK_SIZE + 3);
        assert_eq!(scopes.symbol(t0).address, MARK_SIZE + 4);
        assert_eq!(scopes.symbol(v1).address, MARK_SIZE + 7);
        assert_eq!(scopes.table(scope).frame_size(), MARK_SIZE + 8);
    }

    #[test]
    fn test_lookup_levels() {
        let types = TypeTable::new();
        let integer = types.simple_id(SimpleType::Integer);
        let mut scopes = Scopes::new();
        let outer = scopes.push_scope(None);
        let inner = scopes.push_scope(Some(outer));

        scopes.add_variable(outer, "g", integer, 1).unwrap();
        scopes.add_variable(inner, "l", integer, 1).unwrap();

        assert_eq!(scopes.lookup(inner, "l").unwrap().level, 0);
        assert_eq!(scopes.lookup(inner, "G").unwrap().level, 1);
        assert_eq!(scopes.lookup(outer, "l"), None);
    }

    #[test]
    fn test_duplicate_in_same_scope() {
        let types = TypeTable::new();
        let integer = types.simple_id(SimpleType::Integer);
        let mut scopes = Scopes::new();
        let scope = scopes.push_scope(None);
        scopes.add_variable(scope, "x", integer, 1).unwrap();
        assert!(scopes.add_variable(scope, "X", integer, 1).is_err());
    }
}
