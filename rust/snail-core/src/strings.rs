//! String interning table for O(1) identifier comparison.
//!
//! Identifiers are dense and zero-based: the n-th distinct string interned
//! gets id `n`. Ids are never reclaimed for the lifetime of the table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Interned string identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntStr(u32);

impl IntStr {
    /// Rebuild an id from its raw index. Only meaningful for the table that
    /// issued it.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for IntStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#:sym{}", self.0)
    }
}

/// Intern table mapping strings to unique ids.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, IntStr>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `s`, assigning the next sequential id on first use.
    pub fn intern(&mut self, s: &str) -> IntStr {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = IntStr(
            u32::try_from(self.strings.len()).unwrap_or_else(|_| panic!("intern table full")),
        );
        let owned: Arc<str> = Arc::from(s);
        self.strings.push(Arc::clone(&owned));
        self.lookup.insert(owned, id);
        id
    }

    /// Look up an existing id without inserting.
    pub fn get(&self, s: &str) -> Option<IntStr> {
        self.lookup.get(s).copied()
    }

    /// Return the string an id was issued for.
    ///
    /// # Panics
    /// Panics if `id` was never issued by this table.
    pub fn resolve(&self, id: IntStr) -> &str {
        match self.try_resolve(id) {
            Some(s) => s,
            None => panic!("resolve of unknown interned id {}", id.raw()),
        }
    }

    pub fn try_resolve(&self, id: IntStr) -> Option<&str> {
        self.strings.get(id.index()).map(|s| &**s)
    }

    pub(crate) fn resolve_shared(&self, id: IntStr) -> Option<Arc<str>> {
        self.strings.get(id.index()).cloned()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Iterate `(id, string)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (IntStr, &str)> + '_ {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (IntStr(i as u32), &**s))
    }
}

/// Handle to a string table shared between executors.
///
/// Every operation takes the lock once, so insert-or-lookup is atomic with
/// respect to other handles.
#[derive(Debug, Clone, Default)]
pub struct SharedStringTable {
    inner: Arc<Mutex<StringTable>>,
}

impl SharedStringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: StringTable) -> Self {
        Self {
            inner: Arc::new(Mutex::new(table)),
        }
    }

    pub fn intern(&self, s: &str) -> IntStr {
        self.inner.lock().intern(s)
    }

    pub fn get(&self, s: &str) -> Option<IntStr> {
        self.inner.lock().get(s)
    }

    /// # Panics
    /// Panics if `id` was never issued by this table.
    pub fn resolve(&self, id: IntStr) -> Arc<str> {
        match self.inner.lock().resolve_shared(id) {
            Some(s) => s,
            None => panic!("resolve of unknown interned id {}", id.raw()),
        }
    }

    pub fn try_resolve(&self, id: IntStr) -> Option<Arc<str>> {
        self.inner.lock().resolve_shared(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Run `f` with the table locked, for batches of operations.
    pub fn with<R>(&self, f: impl FnOnce(&mut StringTable) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
