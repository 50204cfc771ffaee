//! Scoped symbol table used while lowering a function body.

use std::collections::HashMap;

use crate::types::Type;

#[derive(Debug, Clone)]
pub struct Symbol {
    pub ty: Type,
    /// Index into the IR value space the lowering pass allocates for locals;
    /// opaque to this module.
    pub slot: u32,
    pub is_param: bool,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        assert!(!self.scopes.is_empty(), "popped the root scope");
    }

    /// Returns `false` if `name` already exists in the *current* (innermost)
    /// scope — shadowing an outer scope is allowed, redeclaring in the same
    /// scope is not.
    pub fn declare(&mut self, name: &str, symbol: Symbol) -> bool {
        let scope = self.scopes.last_mut().expect("root scope always present");
        if scope.contains_key(name) {
            return false;
        }
        scope.insert(name.to_string(), symbol);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Specifier;

    fn sym(ty: Specifier) -> Symbol {
        Symbol {
            ty: Type::plain(ty),
            slot: 0,
            is_param: false,
        }
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut t = SymbolTable::new();
        t.declare("x", sym(Specifier::Float));
        t.push_scope();
        t.declare("x", sym(Specifier::Int));
        assert_eq!(t.lookup("x").unwrap().ty.specifier, Specifier::Int);
        t.pop_scope();
        assert_eq!(t.lookup("x").unwrap().ty.specifier, Specifier::Float);
    }

    #[test]
    fn redeclaration_in_same_scope_rejected() {
        let mut t = SymbolTable::new();
        assert!(t.declare("x", sym(Specifier::Float)));
        assert!(!t.declare("x", sym(Specifier::Int)));
    }
}
