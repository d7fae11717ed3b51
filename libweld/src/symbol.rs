//! The process-wide symbol slot. One `Symbol` exists per unique global name;
//! files share slots via `Arc` and compete for ownership during resolution.
//!
//! Hot flag updates go through atomics so that relocation scanning can run
//! over objects in parallel without locks. Composite updates (claiming a
//! definition, the weak-to-strong transition forced by a DSO reference) are
//! serialized by the per-symbol mutex; everything else tolerates relaxed
//! ordering because passes are separated by pool barriers.

use crate::elf::Visibility;
use crate::input_files::FileId;
use bitflags::bitflags;
use object::elf::VER_NDX_GLOBAL;
use std::fmt::Display;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

bitflags! {
    /// What the relocation scanner decided a symbol needs from the synthetic
    /// tables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u16 {
        const NEEDS_DYNSYM = 1 << 0;
        const NEEDS_GOT = 1 << 1;
        const NEEDS_PLT = 1 << 2;
        const NEEDS_GOTTPOFF = 1 << 3;
        const NEEDS_TLSGD = 1 << 4;
        const NEEDS_TLSDESC = 1 << 5;
        const NEEDS_TLSLD = 1 << 6;
        const NEEDS_COPYREL = 1 << 7;
    }
}

pub(crate) struct AtomicSymbolFlags(AtomicU16);

impl AtomicSymbolFlags {
    fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    pub(crate) fn get(&self) -> SymbolFlags {
        SymbolFlags::from_bits_retain(self.0.load(Relaxed))
    }

    pub(crate) fn or_assign(&self, flags: SymbolFlags) {
        // Gaining exclusive access to the cache line is wasteful when the
        // bits are already set, which they usually are after the first
        // relocation against a symbol.
        let current = self.0.load(Relaxed);
        if current & flags.bits() == flags.bits() {
            return;
        }
        self.0.fetch_or(flags.bits(), Relaxed);
    }

    fn clear(&self) {
        self.0.store(0, Relaxed);
    }
}

/// Strength classes for symbol resolution, strongest first. Lazy (unloaded
/// archive member) and shared-object definitions rank together below regular
/// definitions; COMMON beats only the absence of a definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum DefinitionClass {
    Strong = 1,
    Weak = 2,
    StrongShared = 3,
    WeakShared = 4,
    Common = 5,
    UndefWeak = 6,
}

pub(crate) const RANK_NONE: u64 = u64::MAX;

/// Packs a definition's strength into a single comparable word: class, then
/// file priority, then the file ID as the final deterministic tie-breaker.
pub(crate) fn resolution_rank(class: DefinitionClass, priority: u32, file: FileId) -> u64 {
    ((class as u64) << 56) | (u64::from(priority) << 24) | u64::from(file.as_u32() & 0x00ff_ffff)
}

/// The fields rewritten together when a file takes ownership of a symbol.
#[derive(Clone, Copy)]
pub(crate) struct SymbolClaim {
    pub(crate) file: FileId,
    pub(crate) value: u64,
    pub(crate) sym_idx: u32,
    pub(crate) visibility: Visibility,
    pub(crate) is_weak: bool,
    pub(crate) is_lazy: bool,
    pub(crate) is_imported: bool,
    pub(crate) ver_idx: u16,
}

const IDX_NONE: u32 = u32::MAX;

pub struct Symbol {
    name: Box<[u8]>,
    mu: Mutex<()>,
    rank: AtomicU64,
    file: AtomicU32,
    value: AtomicU64,
    /// Index of the defining record in the owning file's `elf_syms`.
    sym_idx: AtomicU32,
    /// Output section header index, for linker-defined symbols.
    shndx: AtomicU32,
    visibility: AtomicU8,
    ver_idx: AtomicU16,
    flags: AtomicSymbolFlags,
    is_weak: AtomicBool,
    is_lazy: AtomicBool,
    is_imported: AtomicBool,
    is_exported: AtomicBool,
    has_copyrel: AtomicBool,
    copyrel_readonly: AtomicBool,
    dynsym_idx: AtomicU32,
    got_idx: AtomicU32,
    gotplt_idx: AtomicU32,
    plt_idx: AtomicU32,
    pltgot_idx: AtomicU32,
    gottpoff_idx: AtomicU32,
    tlsgd_idx: AtomicU32,
    tlsdesc_idx: AtomicU32,
}

impl Symbol {
    pub(crate) fn new(name: &[u8]) -> Self {
        Symbol {
            name: name.into(),
            mu: Mutex::new(()),
            rank: AtomicU64::new(RANK_NONE),
            file: AtomicU32::new(FileId::NONE.as_u32()),
            value: AtomicU64::new(0),
            sym_idx: AtomicU32::new(IDX_NONE),
            shndx: AtomicU32::new(0),
            visibility: AtomicU8::new(Visibility::Default.to_u8()),
            ver_idx: AtomicU16::new(VER_NDX_GLOBAL),
            flags: AtomicSymbolFlags::new(),
            is_weak: AtomicBool::new(false),
            is_lazy: AtomicBool::new(false),
            is_imported: AtomicBool::new(false),
            is_exported: AtomicBool::new(false),
            has_copyrel: AtomicBool::new(false),
            copyrel_readonly: AtomicBool::new(false),
            dynsym_idx: AtomicU32::new(IDX_NONE),
            got_idx: AtomicU32::new(IDX_NONE),
            gotplt_idx: AtomicU32::new(IDX_NONE),
            plt_idx: AtomicU32::new(IDX_NONE),
            pltgot_idx: AtomicU32::new(IDX_NONE),
            gottpoff_idx: AtomicU32::new(IDX_NONE),
            tlsgd_idx: AtomicU32::new(IDX_NONE),
            tlsdesc_idx: AtomicU32::new(IDX_NONE),
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn file(&self) -> Option<FileId> {
        FileId::from_raw(self.file.load(Relaxed))
    }

    pub(crate) fn owner_is(&self, file: FileId) -> bool {
        self.file.load(Relaxed) == file.as_u32()
    }

    pub fn value(&self) -> u64 {
        self.value.load(Relaxed)
    }

    pub(crate) fn set_value(&self, value: u64) {
        self.value.store(value, Relaxed);
    }

    pub(crate) fn sym_idx(&self) -> Option<usize> {
        let idx = self.sym_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx as usize)
    }

    pub fn shndx(&self) -> u32 {
        self.shndx.load(Relaxed)
    }

    pub(crate) fn set_shndx(&self, shndx: u32) {
        self.shndx.store(shndx, Relaxed);
    }

    pub fn visibility(&self) -> Visibility {
        Visibility::from_u8(self.visibility.load(Relaxed))
    }

    pub fn ver_idx(&self) -> u16 {
        self.ver_idx.load(Relaxed)
    }

    pub(crate) fn set_ver_idx(&self, ver_idx: u16) {
        self.ver_idx.store(ver_idx, Relaxed);
    }

    pub fn flags(&self) -> SymbolFlags {
        self.flags.get()
    }

    pub(crate) fn add_flags(&self, flags: SymbolFlags) {
        self.flags.or_assign(flags);
    }

    pub fn is_weak(&self) -> bool {
        self.is_weak.load(Relaxed)
    }

    /// The weak-to-strong transition performed when a non-weak reference
    /// resolves to a shared-object definition. Racing callers and concurrent
    /// claims are serialized by the symbol's mutex.
    pub(crate) fn clear_weak(&self) {
        let _guard = self.mu.lock().unwrap();
        self.is_weak.store(false, Relaxed);
    }

    pub(crate) fn is_lazy(&self) -> bool {
        self.is_lazy.load(Relaxed)
    }

    pub fn is_imported(&self) -> bool {
        self.is_imported.load(Relaxed)
    }

    pub(crate) fn set_imported(&self, imported: bool) {
        self.is_imported.store(imported, Relaxed);
    }

    pub fn is_exported(&self) -> bool {
        self.is_exported.load(Relaxed)
    }

    pub(crate) fn set_exported(&self, exported: bool) {
        self.is_exported.store(exported, Relaxed);
    }

    pub fn has_copyrel(&self) -> bool {
        self.has_copyrel.load(Relaxed)
    }

    pub(crate) fn set_has_copyrel(&self) {
        self.has_copyrel.store(true, Relaxed);
    }

    pub fn copyrel_readonly(&self) -> bool {
        self.copyrel_readonly.load(Relaxed)
    }

    pub(crate) fn set_copyrel_readonly(&self, readonly: bool) {
        self.copyrel_readonly.store(readonly, Relaxed);
    }

    pub fn dynsym_idx(&self) -> Option<u32> {
        let idx = self.dynsym_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_dynsym_idx(&self, idx: u32) {
        self.dynsym_idx.store(idx, Relaxed);
    }

    pub fn got_idx(&self) -> Option<u32> {
        let idx = self.got_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_got_idx(&self, idx: u32) {
        self.got_idx.store(idx, Relaxed);
    }

    pub fn gotplt_idx(&self) -> Option<u32> {
        let idx = self.gotplt_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_gotplt_idx(&self, idx: u32) {
        self.gotplt_idx.store(idx, Relaxed);
    }

    pub fn plt_idx(&self) -> Option<u32> {
        let idx = self.plt_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_plt_idx(&self, idx: u32) {
        self.plt_idx.store(idx, Relaxed);
    }

    pub fn pltgot_idx(&self) -> Option<u32> {
        let idx = self.pltgot_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_pltgot_idx(&self, idx: u32) {
        self.pltgot_idx.store(idx, Relaxed);
    }

    pub fn gottpoff_idx(&self) -> Option<u32> {
        let idx = self.gottpoff_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_gottpoff_idx(&self, idx: u32) {
        self.gottpoff_idx.store(idx, Relaxed);
    }

    pub fn tlsgd_idx(&self) -> Option<u32> {
        let idx = self.tlsgd_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_tlsgd_idx(&self, idx: u32) {
        self.tlsgd_idx.store(idx, Relaxed);
    }

    pub fn tlsdesc_idx(&self) -> Option<u32> {
        let idx = self.tlsdesc_idx.load(Relaxed);
        (idx != IDX_NONE).then_some(idx)
    }

    pub(crate) fn set_tlsdesc_idx(&self, idx: u32) {
        self.tlsdesc_idx.store(idx, Relaxed);
    }

    /// Takes ownership of the slot if `rank` beats the current owner's rank.
    /// Returns whether the claim won.
    pub(crate) fn try_claim(&self, rank: u64, claim: SymbolClaim) -> bool {
        let _guard = self.mu.lock().unwrap();

        if rank >= self.rank.load(Relaxed) {
            return false;
        }

        self.rank.store(rank, Relaxed);
        self.file.store(claim.file.as_u32(), Relaxed);
        self.value.store(claim.value, Relaxed);
        self.sym_idx.store(claim.sym_idx, Relaxed);
        self.visibility.store(claim.visibility.to_u8(), Relaxed);
        self.ver_idx.store(claim.ver_idx, Relaxed);
        self.is_weak.store(claim.is_weak, Relaxed);
        self.is_lazy.store(claim.is_lazy, Relaxed);
        self.is_imported.store(claim.is_imported, Relaxed);
        true
    }

    /// Reverts the slot to the unresolved state. The name survives; all
    /// resolution bookkeeping is dropped.
    pub(crate) fn clear(&self) {
        let _guard = self.mu.lock().unwrap();

        self.rank.store(RANK_NONE, Relaxed);
        self.file.store(FileId::NONE.as_u32(), Relaxed);
        self.value.store(0, Relaxed);
        self.sym_idx.store(IDX_NONE, Relaxed);
        self.shndx.store(0, Relaxed);
        self.visibility.store(Visibility::Default.to_u8(), Relaxed);
        self.ver_idx.store(VER_NDX_GLOBAL, Relaxed);
        self.flags.clear();
        self.is_weak.store(false, Relaxed);
        self.is_lazy.store(false, Relaxed);
        self.is_imported.store(false, Relaxed);
        self.is_exported.store(false, Relaxed);
        self.has_copyrel.store(false, Relaxed);
        self.copyrel_readonly.store(false, Relaxed);
        self.dynsym_idx.store(IDX_NONE, Relaxed);
        self.got_idx.store(IDX_NONE, Relaxed);
        self.gotplt_idx.store(IDX_NONE, Relaxed);
        self.plt_idx.store(IDX_NONE, Relaxed);
        self.pltgot_idx.store(IDX_NONE, Relaxed);
        self.gottpoff_idx.store(IDX_NONE, Relaxed);
        self.tlsgd_idx.store(IDX_NONE, Relaxed);
        self.tlsdesc_idx.store(IDX_NONE, Relaxed);
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Ok(s) = std::str::from_utf8(&self.name) {
            Display::fmt(s, f)
        } else {
            write!(f, "INVALID UTF-8({:?})", &self.name)
        }
    }
}
