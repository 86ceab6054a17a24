//! Identifier interning.
//!
//! Identifiers are hash-consed into an [`Interner`]; an [`Ident`] is a `u32`
//! handle, so identifier equality is handle equality. Each interned entry
//! carries a `reserved` flag (keywords) and a `tainted` flag (used by the
//! preprocessor to mark names that came out of macro expansion).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Interned identifier handle. Equality is interner identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ident(pub u32);

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ident#{}", self.0)
    }
}

#[derive(Debug)]
struct IdentData {
    name: String,
    reserved: bool,
    tainted: bool,
}

/// Hash-consing identifier table.
#[derive(Debug, Default)]
pub struct Interner {
    entries: Vec<IdentData>,
    map: HashMap<String, Ident>,
}

impl Interner {
    pub fn new() -> Self {
        Interner {
            entries: Vec::new(),
            map: HashMap::new(),
        }
    }

    /// Interns `name`, returning the canonical handle.
    pub fn intern(&mut self, name: &str) -> Ident {
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        let id = Ident(self.entries.len() as u32);
        self.entries.push(IdentData {
            name: name.to_string(),
            reserved: false,
            tainted: false,
        });
        self.map.insert(name.to_string(), id);
        id
    }

    /// Interns `name` and marks it reserved. Used for keyword registration.
    pub fn intern_reserved(&mut self, name: &str) -> Ident {
        let id = self.intern(name);
        self.entries[id.0 as usize].reserved = true;
        id
    }

    /// Looks up `name` without interning.
    pub fn lookup(&self, name: &str) -> Option<Ident> {
        self.map.get(name).copied()
    }

    pub fn name(&self, id: Ident) -> &str {
        &self.entries[id.0 as usize].name
    }

    pub fn is_reserved(&self, id: Ident) -> bool {
        self.entries[id.0 as usize].reserved
    }

    pub fn is_tainted(&self, id: Ident) -> bool {
        self.entries[id.0 as usize].tainted
    }

    pub fn set_tainted(&mut self, id: Ident, tainted: bool) {
        self.entries[id.0 as usize].tainted = tainted;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("foo");
        let c = interner.intern("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.name(a), "foo");
        assert_eq!(interner.name(c), "bar");
    }

    #[test]
    fn lookup_does_not_intern() {
        let mut interner = Interner::new();
        assert_eq!(interner.lookup("x"), None);
        let id = interner.intern("x");
        assert_eq!(interner.lookup("x"), Some(id));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn reserved_flag_sticks() {
        let mut interner = Interner::new();
        let kw = interner.intern_reserved("while");
        let plain = interner.intern("foo");
        assert!(interner.is_reserved(kw));
        assert!(!interner.is_reserved(plain));
        // Re-interning the same spelling keeps the flag.
        let again = interner.intern("while");
        assert_eq!(kw, again);
        assert!(interner.is_reserved(again));
    }

    #[test]
    fn tainted_flag_toggles() {
        let mut interner = Interner::new();
        let id = interner.intern("m");
        assert!(!interner.is_tainted(id));
        interner.set_tainted(id, true);
        assert!(interner.is_tainted(id));
        interner.set_tainted(id, false);
        assert!(!interner.is_tainted(id));
    }
}
