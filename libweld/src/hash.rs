use std::hash::BuildHasher;
use std::hash::Hasher;
use std::ops::Deref;

/// Content hash used for interning symbol names, merged fragments and string
/// pools.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = foldhash::fast::FixedState::default().build_hasher();
    hasher.write(bytes);
    hasher.finish()
}

/// A value carrying the hash it was interned under. Content-keyed tables
/// store these so that the hash is computed exactly once; when a table grows
/// and redistributes its entries, the stored hash is handed back verbatim
/// instead of rehashing the underlying bytes.
#[derive(Eq, Clone, Copy, Debug)]
pub(crate) struct PreHashed<T> {
    value: T,
    hash: u64,
}

impl<T: PartialEq> PartialEq for PreHashed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> PreHashed<T> {
    pub(crate) fn new(value: T, hash: u64) -> Self {
        Self { value, hash }
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }
}

impl<T> Deref for PreHashed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// The hash function `.gnu.version_d` and `.gnu.version_r` records carry in
/// `vd_hash` / `vna_hash`. This is the System V gABI `elf_hash`.
pub(crate) fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &b in name {
        h = (h << 4).wrapping_add(u32::from(b));
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elf_hash() {
        // Reference values from the gABI.
        assert_eq!(elf_hash(b""), 0);
        assert_eq!(elf_hash(b"printf"), 0x077905a6);
        assert_eq!(elf_hash(b"GLIBC_2.2.5"), 0x09691a75);
    }

    #[test]
    fn hash_bytes_is_stable_per_content() {
        assert_eq!(hash_bytes(b"foo"), hash_bytes(b"foo"));
        assert_ne!(hash_bytes(b"foo"), hash_bytes(b"bar"));
    }

    #[test]
    fn prehashed_compares_by_value_and_keeps_its_hash() {
        let a = PreHashed::new("x", hash_bytes(b"x"));
        let b = PreHashed::new("x", hash_bytes(b"x"));
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(*a, "x");
    }
}
