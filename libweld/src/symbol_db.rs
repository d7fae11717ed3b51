//! The process-wide intern table mapping symbol names to their slots.
//!
//! Interning is sharded by name hash so that files can publish their globals
//! concurrently. Entries are stored prehashed: the name is hashed once on
//! insertion and the stored hash is reused whenever a shard grows. Lookups
//! after the initial parse are read-mostly; the shard mutexes are
//! effectively uncontended by then.

use crate::hash::hash_bytes;
use crate::hash::PreHashed;
use crate::symbol::Symbol;
use hashbrown::hash_table;
use hashbrown::HashTable;
use std::sync::Arc;
use std::sync::Mutex;

const NUM_SHARDS: usize = 16;

pub struct SymbolTable {
    shards: Vec<Mutex<HashTable<PreHashed<Arc<Symbol>>>>>,
}

impl SymbolTable {
    pub(crate) fn new() -> Self {
        let mut shards = Vec::with_capacity(NUM_SHARDS);
        shards.resize_with(NUM_SHARDS, || Mutex::new(HashTable::new()));
        SymbolTable { shards }
    }

    /// Returns the stable slot for `name`, creating it on first use.
    /// Idempotent: every caller interning the same name gets the same slot.
    pub fn intern(&self, name: &[u8]) -> Arc<Symbol> {
        let hash = hash_bytes(name);
        let mut shard = self.shards[hash as usize % NUM_SHARDS].lock().unwrap();

        match shard.entry(
            hash,
            |entry| entry.name() == name,
            |entry| entry.hash(),
        ) {
            hash_table::Entry::Occupied(entry) => Arc::clone(entry.get()),
            hash_table::Entry::Vacant(entry) => {
                let sym = Arc::new(Symbol::new(name));
                entry.insert(PreHashed::new(sym.clone(), hash));
                sym
            }
        }
    }

    pub fn get(&self, name: &[u8]) -> Option<Arc<Symbol>> {
        let hash = hash_bytes(name);
        let shard = self.shards[hash as usize % NUM_SHARDS].lock().unwrap();
        shard
            .find(hash, |entry| entry.name() == name)
            .map(|entry| Arc::clone(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let table = SymbolTable::new();
        let a = table.intern(b"foo");
        let b = table.intern(b"foo");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(table.get(b"foo").is_some());
        assert!(table.get(b"bar").is_none());
    }

    #[test]
    fn distinct_names_get_distinct_slots() {
        let table = SymbolTable::new();
        let a = table.intern(b"foo");
        let b = table.intern(b"bar");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
