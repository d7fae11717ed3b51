//! The output-chunk model. A chunk is anything that occupies a range of the
//! output file: the ELF/program/section headers, a regular output section
//! aggregating input sections, a merged section aggregating deduplicated
//! fragments, or a synthetic section whose bytes the linker generates.
//!
//! Rather than a deep class hierarchy, every chunk exposes a `ChunkCommon`
//! and the chunk list is a vector of `ChunkRef` tags; passes dispatch on the
//! tag through `Context::chunk_common`.

use crate::elf::GOT_ENTRY_SIZE;
use crate::elf::SectionHeader;
use crate::hash::hash_bytes;
use crate::hash::PreHashed;
use crate::input_files::FileId;
use crate::symbol::Symbol;
use hashbrown::hash_table;
use hashbrown::HashTable;
use object::elf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    Header,
    Regular,
    Synthetic,
}

/// State shared by every chunk variant.
pub struct ChunkCommon<'data> {
    pub name: &'data str,
    pub shdr: SectionHeader,
    pub kind: ChunkKind,
    /// Forces the next virtual address to a page boundary before this chunk.
    pub new_page: bool,
    /// Forces the virtual address to a page boundary after this chunk.
    pub new_page_end: bool,
    /// Output section header index; assigned at the end of layout, 0 until
    /// then (and forever for header pseudo-chunks).
    pub shndx: u32,
}

impl<'data> ChunkCommon<'data> {
    pub(crate) fn new(
        name: &'data str,
        kind: ChunkKind,
        sh_type: u32,
        sh_flags: u64,
        sh_addralign: u64,
    ) -> Self {
        ChunkCommon {
            name,
            shdr: SectionHeader {
                sh_type,
                sh_flags,
                sh_addralign,
                ..Default::default()
            },
            kind,
            new_page: false,
            new_page_end: false,
            shndx: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSectionId(pub(crate) u32);

impl OutputSectionId {
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergedSectionId(pub(crate) u32);

impl MergedSectionId {
    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Names a chunk without borrowing it: either one of the `Context`-owned
/// synthetic chunks or an index into the regular/merged section pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChunkRef {
    Ehdr,
    Phdr,
    Shdr,
    Interp,
    BuildId,
    Got,
    GotPlt,
    Plt,
    PltGot,
    RelPlt,
    RelDyn,
    Symtab,
    Strtab,
    Shstrtab,
    Dynsym,
    Dynstr,
    Dynamic,
    Hash,
    GnuHash,
    EhFrame,
    EhFrameHdr,
    Dynbss,
    DynbssRelro,
    Verdef,
    Versym,
    Verneed,
    Output(OutputSectionId),
    Merged(MergedSectionId),
}

/// Reference from an output section back to one of its input sections.
#[derive(Clone, Copy, Debug)]
pub(crate) struct InputSectionRef {
    pub(crate) file: FileId,
    pub(crate) index: u32,
}

/// A regular output section: an aggregation of input sections.
pub struct OutputSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) members: Vec<InputSectionRef>,
}

impl<'data> OutputSection<'data> {
    pub(crate) fn new(name: &'data str, sh_type: u32, sh_flags: u64) -> Self {
        OutputSection {
            common: ChunkCommon::new(name, ChunkKind::Regular, sh_type, sh_flags, 1),
            members: Vec::new(),
        }
    }
}

/// Maps an input section name to the output section it is placed in, e.g.
/// `.text.startup` lands in `.text`.
pub(crate) fn output_section_name<'a>(name: &'a str) -> &'a str {
    const PREFIXES: &[&str] = &[
        ".text",
        ".data.rel.ro",
        ".data",
        ".rodata",
        ".bss.rel.ro",
        ".bss",
        ".init_array",
        ".fini_array",
        ".tbss",
        ".tdata",
        ".gcc_except_table",
    ];
    for prefix in PREFIXES {
        if name == *prefix {
            return prefix;
        }
        if let Some(rest) = name.strip_prefix(prefix) {
            if rest.starts_with('.') {
                return prefix;
            }
        }
    }
    name
}

/// A NUL-separated string pool with deduplication, used by the string-table
/// sections. Offset 0 is the empty string. Offsets are stored prehashed so
/// pool growth never rescans the content.
pub(crate) struct StringPool {
    content: Vec<u8>,
    offsets: HashTable<PreHashed<u32>>,
}

impl StringPool {
    fn new() -> Self {
        StringPool {
            content: vec![0],
            offsets: HashTable::new(),
        }
    }

    /// Adds `bytes` (without a terminator) and returns its offset. Equal
    /// strings share one entry.
    pub(crate) fn add(&mut self, bytes: &[u8]) -> u32 {
        let hash = hash_bytes(bytes);
        let content = &self.content;

        match self.offsets.entry(
            hash,
            |entry| {
                let start = **entry as usize;
                content.get(start..start + bytes.len()) == Some(bytes)
                    && content.get(start + bytes.len()) == Some(&0)
            },
            |entry| entry.hash(),
        ) {
            hash_table::Entry::Occupied(entry) => **entry.get(),
            hash_table::Entry::Vacant(entry) => {
                let offset = self.content.len() as u32;
                entry.insert(PreHashed::new(offset, hash));
                self.content.extend_from_slice(bytes);
                self.content.push(0);
                offset
            }
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub(crate) fn content(&self) -> &[u8] {
        &self.content
    }
}

pub struct GotSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) got_syms: Vec<Arc<Symbol>>,
    pub(crate) gottpoff_syms: Vec<Arc<Symbol>>,
    pub(crate) tlsgd_syms: Vec<Arc<Symbol>>,
    pub(crate) tlsdesc_syms: Vec<Arc<Symbol>>,
    pub(crate) tlsld_idx: Option<u32>,
    num_slots: u32,
}

impl GotSection<'_> {
    fn new() -> Self {
        GotSection {
            common: ChunkCommon::new(
                ".got",
                ChunkKind::Synthetic,
                elf::SHT_PROGBITS,
                u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                GOT_ENTRY_SIZE,
            ),
            got_syms: Vec::new(),
            gottpoff_syms: Vec::new(),
            tlsgd_syms: Vec::new(),
            tlsdesc_syms: Vec::new(),
            tlsld_idx: None,
            num_slots: 0,
        }
    }

    pub(crate) fn add_got_symbol(&mut self, sym: &Arc<Symbol>) {
        if sym.got_idx().is_some() {
            return;
        }
        sym.set_got_idx(self.num_slots);
        self.num_slots += 1;
        self.got_syms.push(sym.clone());
    }

    pub(crate) fn add_gottpoff_symbol(&mut self, sym: &Arc<Symbol>) {
        if sym.gottpoff_idx().is_some() {
            return;
        }
        sym.set_gottpoff_idx(self.num_slots);
        self.num_slots += 1;
        self.gottpoff_syms.push(sym.clone());
    }

    /// General-dynamic TLS needs two slots: module ID and offset.
    pub(crate) fn add_tlsgd_symbol(&mut self, sym: &Arc<Symbol>) {
        if sym.tlsgd_idx().is_some() {
            return;
        }
        sym.set_tlsgd_idx(self.num_slots);
        self.num_slots += 2;
        self.tlsgd_syms.push(sym.clone());
    }

    /// A TLS descriptor also occupies two slots.
    pub(crate) fn add_tlsdesc_symbol(&mut self, sym: &Arc<Symbol>) {
        if sym.tlsdesc_idx().is_some() {
            return;
        }
        sym.set_tlsdesc_idx(self.num_slots);
        self.num_slots += 2;
        self.tlsdesc_syms.push(sym.clone());
    }

    /// Local-dynamic TLS shares one module-global pair of slots.
    pub(crate) fn add_tlsld(&mut self) {
        if self.tlsld_idx.is_some() {
            return;
        }
        self.tlsld_idx = Some(self.num_slots);
        self.num_slots += 2;
    }

    pub(crate) fn num_slots(&self) -> u32 {
        self.num_slots
    }
}

pub struct GotPltSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    num_slots: u32,
}

impl GotPltSection<'_> {
    fn new() -> Self {
        GotPltSection {
            common: ChunkCommon::new(
                ".got.plt",
                ChunkKind::Synthetic,
                elf::SHT_PROGBITS,
                u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                GOT_ENTRY_SIZE,
            ),
            // The first three slots are reserved for the dynamic linker.
            num_slots: 3,
        }
    }

    fn reserve_slot(&mut self) -> u32 {
        let idx = self.num_slots;
        self.num_slots += 1;
        idx
    }

    pub(crate) fn num_slots(&self) -> u32 {
        self.num_slots
    }
}

pub struct PltSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) symbols: Vec<Arc<Symbol>>,
}

impl PltSection<'_> {
    fn new() -> Self {
        PltSection {
            common: ChunkCommon::new(
                ".plt",
                ChunkKind::Synthetic,
                elf::SHT_PROGBITS,
                u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR),
                16,
            ),
            symbols: Vec::new(),
        }
    }

    /// Gives `sym` a PLT entry plus the `.got.plt` slot and `.rela.plt`
    /// record that go with it.
    pub(crate) fn add_symbol(
        &mut self,
        gotplt: &mut GotPltSection,
        relplt: &mut RelPltSection,
        sym: &Arc<Symbol>,
    ) {
        if sym.plt_idx().is_some() {
            return;
        }
        sym.set_plt_idx(self.symbols.len() as u32);
        sym.set_gotplt_idx(gotplt.reserve_slot());
        relplt.num_relocs += 1;
        self.symbols.push(sym.clone());
    }
}

/// PLT entries for symbols that already have a regular GOT slot; these jump
/// through `.got` instead of `.got.plt` and need no dynamic relocation.
pub struct PltGotSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) symbols: Vec<Arc<Symbol>>,
}

impl PltGotSection<'_> {
    fn new() -> Self {
        PltGotSection {
            common: ChunkCommon::new(
                ".plt.got",
                ChunkKind::Synthetic,
                elf::SHT_PROGBITS,
                u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR),
                8,
            ),
            symbols: Vec::new(),
        }
    }

    pub(crate) fn add_symbol(&mut self, sym: &Arc<Symbol>) {
        if sym.pltgot_idx().is_some() {
            return;
        }
        sym.set_pltgot_idx(self.symbols.len() as u32);
        self.symbols.push(sym.clone());
    }
}

pub struct RelPltSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) num_relocs: u32,
}

impl RelPltSection<'_> {
    fn new() -> Self {
        let mut common = ChunkCommon::new(
            ".rela.plt",
            ChunkKind::Synthetic,
            elf::SHT_RELA,
            u64::from(elf::SHF_ALLOC),
            8,
        );
        common.shdr.sh_entsize = crate::elf::RELA_ENTRY_SIZE;
        RelPltSection {
            common,
            num_relocs: 0,
        }
    }
}

pub struct RelDynSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    /// Bumped concurrently from the relocation scanner.
    pub(crate) num_relocs: AtomicU64,
}

impl RelDynSection<'_> {
    fn new() -> Self {
        let mut common = ChunkCommon::new(
            ".rela.dyn",
            ChunkKind::Synthetic,
            elf::SHT_RELA,
            u64::from(elf::SHF_ALLOC),
            8,
        );
        common.shdr.sh_entsize = crate::elf::RELA_ENTRY_SIZE;
        RelDynSection {
            common,
            num_relocs: AtomicU64::new(0),
        }
    }

    pub(crate) fn add_reloc(&self) {
        self.num_relocs.fetch_add(1, Relaxed);
    }
}

pub struct DynsymSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    /// Real entries only; index 0, the null symbol, is implicit.
    pub(crate) symbols: Vec<Arc<Symbol>>,
}

impl DynsymSection<'_> {
    fn new() -> Self {
        let mut common = ChunkCommon::new(
            ".dynsym",
            ChunkKind::Synthetic,
            elf::SHT_DYNSYM,
            u64::from(elf::SHF_ALLOC),
            8,
        );
        common.shdr.sh_entsize = crate::elf::SYM_ENTRY_SIZE;
        common.shdr.sh_info = 1;
        DynsymSection {
            common,
            symbols: Vec::new(),
        }
    }

    pub(crate) fn add_symbol(&mut self, dynstr: &mut DynstrSection, sym: &Arc<Symbol>) {
        if sym.dynsym_idx().is_some() {
            return;
        }
        sym.set_dynsym_idx(self.symbols.len() as u32 + 1);
        dynstr.add_string(sym.name());
        self.symbols.push(sym.clone());
    }

    /// Entry count including the null symbol.
    pub(crate) fn num_symbols(&self) -> u64 {
        self.symbols.len() as u64 + 1
    }
}

pub struct DynstrSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pool: StringPool,
}

impl DynstrSection<'_> {
    fn new() -> Self {
        DynstrSection {
            common: ChunkCommon::new(
                ".dynstr",
                ChunkKind::Synthetic,
                elf::SHT_STRTAB,
                u64::from(elf::SHF_ALLOC),
                1,
            ),
            pool: StringPool::new(),
        }
    }

    pub(crate) fn add_string(&mut self, bytes: &[u8]) -> u32 {
        self.pool.add(bytes)
    }

    pub(crate) fn len(&self) -> u64 {
        self.pool.len()
    }

    pub(crate) fn content(&self) -> &[u8] {
        self.pool.content()
    }
}

pub struct ShstrtabSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) pool: StringPool,
}

impl ShstrtabSection<'_> {
    fn new() -> Self {
        ShstrtabSection {
            common: ChunkCommon::new(
                ".shstrtab",
                ChunkKind::Synthetic,
                elf::SHT_STRTAB,
                0,
                1,
            ),
            pool: StringPool::new(),
        }
    }
}

/// Names for the static symbol table (`.symtab`).
pub struct StrtabSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) pool: StringPool,
}

impl StrtabSection<'_> {
    fn new() -> Self {
        StrtabSection {
            common: ChunkCommon::new(".strtab", ChunkKind::Synthetic, elf::SHT_STRTAB, 0, 1),
            pool: StringPool::new(),
        }
    }
}

/// Placeholder for copy-relocated data from shared objects. Two instances
/// exist: one that lands in RELRO and one that does not.
pub struct DynbssSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) symbols: Vec<Arc<Symbol>>,
}

impl DynbssSection<'_> {
    fn new(relro: bool) -> Self {
        DynbssSection {
            common: ChunkCommon::new(
                if relro { ".dynbss.rel.ro" } else { ".dynbss" },
                ChunkKind::Synthetic,
                elf::SHT_NOBITS,
                u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                32,
            ),
            symbols: Vec::new(),
        }
    }

    /// Reserves space for a copy relocation; the symbol's value becomes its
    /// offset within this section.
    pub(crate) fn add_symbol(&mut self, sym: &Arc<Symbol>, size: u64) {
        let alignment = self.common.shdr.sh_addralign;
        let offset = crate::alignment::align_to(self.common.shdr.sh_size, alignment);
        sym.set_value(offset);
        sym.set_has_copyrel();
        self.common.shdr.sh_size = offset + size;
        self.symbols.push(sym.clone());
    }
}

pub struct VersymSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) contents: Vec<u16>,
}

impl VersymSection<'_> {
    fn new() -> Self {
        let mut common = ChunkCommon::new(
            ".gnu.version",
            ChunkKind::Synthetic,
            elf::SHT_GNU_VERSYM,
            u64::from(elf::SHF_ALLOC),
            2,
        );
        common.shdr.sh_entsize = crate::elf::VERSYM_ENTRY_SIZE;
        VersymSection {
            common,
            contents: Vec::new(),
        }
    }

    /// Sizes the table to the dynamic symbol count: entry 0 is
    /// `VER_NDX_LOCAL`, everything else defaults to `VER_NDX_GLOBAL`.
    pub(crate) fn resize_for(&mut self, num_dynsym: u64) {
        if self.contents.is_empty() {
            self.contents = vec![elf::VER_NDX_GLOBAL; num_dynsym as usize];
            self.contents[0] = elf::VER_NDX_LOCAL;
        }
    }
}

pub struct VerdefSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) contents: Vec<u8>,
}

impl VerdefSection<'_> {
    fn new() -> Self {
        VerdefSection {
            common: ChunkCommon::new(
                ".gnu.version_d",
                ChunkKind::Synthetic,
                elf::SHT_GNU_VERDEF,
                u64::from(elf::SHF_ALLOC),
                8,
            ),
            contents: Vec::new(),
        }
    }
}

pub struct VerneedSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) contents: Vec<u8>,
}

impl VerneedSection<'_> {
    fn new() -> Self {
        VerneedSection {
            common: ChunkCommon::new(
                ".gnu.version_r",
                ChunkKind::Synthetic,
                elf::SHT_GNU_VERNEED,
                u64::from(elf::SHF_ALLOC),
                8,
            ),
            contents: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DynamicEntry {
    pub tag: u64,
    pub value: u64,
}

pub struct DynamicSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) entries: Vec<DynamicEntry>,
}

impl DynamicSection<'_> {
    fn new() -> Self {
        let mut common = ChunkCommon::new(
            ".dynamic",
            ChunkKind::Synthetic,
            elf::SHT_DYNAMIC,
            u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
            8,
        );
        common.shdr.sh_entsize = crate::elf::DYNAMIC_ENTRY_SIZE;
        DynamicSection {
            common,
            entries: Vec::new(),
        }
    }
}

pub(crate) fn ehdr_chunk<'data>() -> ChunkCommon<'data> {
    let mut common = ChunkCommon::new("", ChunkKind::Header, 0, u64::from(elf::SHF_ALLOC), 8);
    common.shdr.sh_size = crate::elf::EHDR_SIZE;
    common
}

pub(crate) fn phdr_chunk<'data>() -> ChunkCommon<'data> {
    ChunkCommon::new("", ChunkKind::Header, 0, u64::from(elf::SHF_ALLOC), 8)
}

pub(crate) fn shdr_chunk<'data>() -> ChunkCommon<'data> {
    ChunkCommon::new("", ChunkKind::Header, 0, 0, 8)
}

pub(crate) fn symtab_chunk<'data>() -> ChunkCommon<'data> {
    let mut common = ChunkCommon::new(".symtab", ChunkKind::Synthetic, elf::SHT_SYMTAB, 0, 8);
    common.shdr.sh_entsize = crate::elf::SYM_ENTRY_SIZE;
    common
}

pub(crate) fn strtab_section<'data>() -> StrtabSection<'data> {
    StrtabSection::new()
}

pub(crate) fn eh_frame_chunk<'data>() -> ChunkCommon<'data> {
    ChunkCommon::new(
        ".eh_frame",
        ChunkKind::Synthetic,
        elf::SHT_PROGBITS,
        u64::from(elf::SHF_ALLOC),
        8,
    )
}

pub(crate) fn eh_frame_hdr_chunk<'data>() -> ChunkCommon<'data> {
    ChunkCommon::new(
        ".eh_frame_hdr",
        ChunkKind::Synthetic,
        elf::SHT_PROGBITS,
        u64::from(elf::SHF_ALLOC),
        4,
    )
}

pub(crate) fn interp_chunk<'data>(path_len: u64) -> ChunkCommon<'data> {
    let mut common = ChunkCommon::new(
        ".interp",
        ChunkKind::Synthetic,
        elf::SHT_PROGBITS,
        u64::from(elf::SHF_ALLOC),
        1,
    );
    common.shdr.sh_size = path_len + 1;
    common
}

pub(crate) fn build_id_chunk<'data>(digest_len: u64) -> ChunkCommon<'data> {
    let mut common = ChunkCommon::new(
        ".note.gnu.build-id",
        ChunkKind::Synthetic,
        elf::SHT_NOTE,
        u64::from(elf::SHF_ALLOC),
        4,
    );
    // Note header (12 bytes) + "GNU\0" + digest.
    common.shdr.sh_size = 16 + digest_len;
    common
}

pub(crate) fn hash_chunk<'data>() -> ChunkCommon<'data> {
    let mut common = ChunkCommon::new(
        ".hash",
        ChunkKind::Synthetic,
        elf::SHT_HASH,
        u64::from(elf::SHF_ALLOC),
        4,
    );
    common.shdr.sh_entsize = 4;
    common
}

pub(crate) fn gnu_hash_chunk<'data>() -> ChunkCommon<'data> {
    ChunkCommon::new(
        ".gnu.hash",
        ChunkKind::Synthetic,
        elf::SHT_GNU_HASH,
        u64::from(elf::SHF_ALLOC),
        8,
    )
}

pub(crate) fn got_section<'data>() -> GotSection<'data> {
    GotSection::new()
}

pub(crate) fn gotplt_section<'data>() -> GotPltSection<'data> {
    GotPltSection::new()
}

pub(crate) fn plt_section<'data>() -> PltSection<'data> {
    PltSection::new()
}

pub(crate) fn pltgot_section<'data>() -> PltGotSection<'data> {
    PltGotSection::new()
}

pub(crate) fn relplt_section<'data>() -> RelPltSection<'data> {
    RelPltSection::new()
}

pub(crate) fn reldyn_section<'data>() -> RelDynSection<'data> {
    RelDynSection::new()
}

pub(crate) fn dynsym_section<'data>() -> DynsymSection<'data> {
    DynsymSection::new()
}

pub(crate) fn dynstr_section<'data>() -> DynstrSection<'data> {
    DynstrSection::new()
}

pub(crate) fn shstrtab_section<'data>() -> ShstrtabSection<'data> {
    ShstrtabSection::new()
}

pub(crate) fn dynbss_section<'data>(relro: bool) -> DynbssSection<'data> {
    DynbssSection::new(relro)
}

pub(crate) fn versym_section<'data>() -> VersymSection<'data> {
    VersymSection::new()
}

pub(crate) fn verdef_section<'data>() -> VerdefSection<'data> {
    VerdefSection::new()
}

pub(crate) fn verneed_section<'data>() -> VerneedSection<'data> {
    VerneedSection::new()
}

pub(crate) fn dynamic_section<'data>() -> DynamicSection<'data> {
    DynamicSection::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_pool_dedupes() {
        let mut pool = StringPool::new();
        let a = pool.add(b"libc.so.6");
        let b = pool.add(b"GLIBC_2.2.5");
        let c = pool.add(b"libc.so.6");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 1 + 10 + 12);
        assert_eq!(&pool.content()[a as usize..a as usize + 9], b"libc.so.6");
    }

    #[test]
    fn output_section_name_canonicalization() {
        assert_eq!(output_section_name(".text.startup"), ".text");
        assert_eq!(output_section_name(".text"), ".text");
        assert_eq!(output_section_name(".data.rel.ro.foo"), ".data.rel.ro");
        assert_eq!(output_section_name(".data.foo"), ".data");
        assert_eq!(output_section_name(".textual"), ".textual");
        assert_eq!(output_section_name("my_section"), "my_section");
    }

    #[test]
    fn got_slot_accounting() {
        let mut got = got_section();
        let a = Arc::new(Symbol::new(b"a"));
        let b = Arc::new(Symbol::new(b"b"));
        got.add_got_symbol(&a);
        got.add_got_symbol(&a);
        got.add_tlsgd_symbol(&b);
        got.add_tlsld();
        got.add_tlsld();
        assert_eq!(a.got_idx(), Some(0));
        assert_eq!(b.tlsgd_idx(), Some(1));
        assert_eq!(got.tlsld_idx, Some(3));
        assert_eq!(got.num_slots(), 5);
    }
}
