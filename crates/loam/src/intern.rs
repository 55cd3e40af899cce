//! Identifier interning.
//!
//! Every identifier, literal string, and generated name (the `%expr`,
//! `%iter`, ... family produced by desugaring) is stored once in the
//! [`Interner`] and referred to by a [`StrId`]. Identifier equality is then
//! handle equality, which is what makes environment lookup, static-string
//! objects, and the `IdentifierConcat`/`IdentifierSlice` primitives cheap.

use ahash::AHashMap;

/// Index into the interner's storage.
///
/// Uses `u32` to save space; four billion distinct identifiers is far more
/// than any compilation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrId(u32);

impl StrId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<String>,
    map: AHashMap<String, StrId>,
}

impl Interner {
    pub fn intern(&mut self, s: &str) -> StrId {
        if let Some(&id) = self.map.get(s) {
            return id;
        }
        let id = StrId(u32::try_from(self.strings.len()).expect("interner overflow"));
        self.strings.push(s.to_owned());
        self.map.insert(s.to_owned(), id);
        id
    }

    pub fn get(&self, id: StrId) -> &str {
        &self.strings[id.index()]
    }

    /// Lookup without interning, for callers that only probe.
    pub fn find(&self, s: &str) -> Option<StrId> {
        self.map.get(s).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut interner = Interner::default();
        let a = interner.intern("size");
        let b = interner.intern("size");
        assert_eq!(a, b);
        assert_eq!(interner.get(a), "size");
        assert_ne!(a, interner.intern("Size"));
    }
}
