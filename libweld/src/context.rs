//! The root of the link: owns the input files, the symbol table, the output
//! chunk registries and the synthetic sections. All global state is injected
//! through this type so that tests can run isolated links side by side.

use crate::args::Args;
use crate::args::BuildIdKind;
use crate::chunks;
use crate::chunks::ChunkCommon;
use crate::chunks::ChunkRef;
use crate::chunks::DynamicEntry;
use crate::chunks::DynamicSection;
use crate::chunks::DynbssSection;
use crate::chunks::DynstrSection;
use crate::chunks::DynsymSection;
use crate::chunks::GotPltSection;
use crate::chunks::GotSection;
use crate::chunks::MergedSectionId;
use crate::chunks::OutputSection;
use crate::chunks::OutputSectionId;
use crate::chunks::PltGotSection;
use crate::chunks::PltSection;
use crate::chunks::RelDynSection;
use crate::chunks::RelPltSection;
use crate::chunks::ShstrtabSection;
use crate::chunks::StrtabSection;
use crate::chunks::VerdefSection;
use crate::chunks::VerneedSection;
use crate::chunks::VersymSection;
use crate::chunks::output_section_name;
use crate::elf::ElfSym;
use crate::elf::Rela;
use crate::elf::SectionHeader;
use crate::error::ErrorSink;
use crate::input_files::ComdatGroup;
use crate::input_files::ComdatGroupRef;
use crate::input_files::FileId;
use crate::input_files::FragmentRef;
use crate::input_files::InputSection;
use crate::input_files::ObjectFile;
use crate::input_files::SharedFile;
use crate::string_merging::MergedSection;
use crate::symbol::DefinitionClass;
use crate::symbol::resolution_rank;
use crate::symbol::Symbol;
use crate::symbol::SymbolClaim;
use crate::symbol_db::SymbolTable;
use crate::synthetic_symbols::InternalSymbols;
use foldhash::HashMap;
use object::elf;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

#[derive(Clone, Copy)]
enum FileSlot {
    Internal,
    Object(u32),
    Shared(u32),
    Dead,
}

pub struct Context<'data> {
    pub args: &'data Args,
    pub symbol_table: SymbolTable,
    pub objs: Vec<ObjectFile<'data>>,
    pub dsos: Vec<SharedFile<'data>>,
    slots: Vec<FileSlot>,
    pub(crate) errors: ErrorSink,

    pub(crate) output_sections: Vec<OutputSection<'data>>,
    osec_lookup: HashMap<(&'data str, u32, u64), OutputSectionId>,
    pub(crate) merged_sections: Vec<MergedSection<'data>>,
    merged_lookup: HashMap<(&'data str, u32, u64), MergedSectionId>,
    comdat_groups: HashMap<&'data [u8], Arc<ComdatGroup>>,

    /// Output chunks in their current order: synthetic chunks first, regular
    /// and merged sections appended by binning, then the whole list is sorted
    /// by rank for layout.
    pub(crate) chunks: Vec<ChunkRef>,

    pub(crate) ehdr: ChunkCommon<'data>,
    pub(crate) phdr: ChunkCommon<'data>,
    pub(crate) shdr: ChunkCommon<'data>,
    pub(crate) interp: ChunkCommon<'data>,
    pub(crate) buildid: ChunkCommon<'data>,
    pub(crate) got: GotSection<'data>,
    pub(crate) gotplt: GotPltSection<'data>,
    pub(crate) plt: PltSection<'data>,
    pub(crate) pltgot: PltGotSection<'data>,
    pub(crate) relplt: RelPltSection<'data>,
    pub(crate) reldyn: RelDynSection<'data>,
    pub(crate) symtab: ChunkCommon<'data>,
    pub(crate) strtab: StrtabSection<'data>,
    pub(crate) shstrtab: ShstrtabSection<'data>,
    pub(crate) dynsym: DynsymSection<'data>,
    pub(crate) dynstr: DynstrSection<'data>,
    pub(crate) dynamic: DynamicSection<'data>,
    pub(crate) hash: ChunkCommon<'data>,
    pub(crate) gnu_hash: ChunkCommon<'data>,
    pub(crate) eh_frame: ChunkCommon<'data>,
    pub(crate) eh_frame_hdr: ChunkCommon<'data>,
    pub(crate) dynbss: DynbssSection<'data>,
    pub(crate) dynbss_relro: DynbssSection<'data>,
    pub(crate) verdef: VerdefSection<'data>,
    pub(crate) versym: VersymSection<'data>,
    pub(crate) verneed: VerneedSection<'data>,

    pub(crate) internal_symbols: Option<InternalSymbols>,

    /// The raw output image. Only the inter-chunk padding is written by this
    /// crate; everything else belongs to the writer.
    pub buf: Vec<u8>,
    pub(crate) file_size: u64,
}

impl<'data> Context<'data> {
    pub fn new(args: &'data Args) -> Self {
        Context {
            args,
            symbol_table: SymbolTable::new(),
            objs: Vec::new(),
            dsos: Vec::new(),
            slots: vec![FileSlot::Internal],
            errors: ErrorSink::default(),
            output_sections: Vec::new(),
            osec_lookup: HashMap::default(),
            merged_sections: Vec::new(),
            merged_lookup: HashMap::default(),
            comdat_groups: HashMap::default(),
            chunks: Vec::new(),
            ehdr: chunks::ehdr_chunk(),
            phdr: chunks::phdr_chunk(),
            shdr: chunks::shdr_chunk(),
            interp: chunks::interp_chunk(
                args.dynamic_linker.as_deref().map_or(0, |p| p.len() as u64),
            ),
            buildid: chunks::build_id_chunk(args.build_id.digest_len()),
            got: chunks::got_section(),
            gotplt: chunks::gotplt_section(),
            plt: chunks::plt_section(),
            pltgot: chunks::pltgot_section(),
            relplt: chunks::relplt_section(),
            reldyn: chunks::reldyn_section(),
            symtab: chunks::symtab_chunk(),
            strtab: chunks::strtab_section(),
            shstrtab: chunks::shstrtab_section(),
            dynsym: chunks::dynsym_section(),
            dynstr: chunks::dynstr_section(),
            dynamic: chunks::dynamic_section(),
            hash: chunks::hash_chunk(),
            gnu_hash: chunks::gnu_hash_chunk(),
            eh_frame: chunks::eh_frame_chunk(),
            eh_frame_hdr: chunks::eh_frame_hdr_chunk(),
            dynbss: chunks::dynbss_section(false),
            dynbss_relro: chunks::dynbss_section(true),
            verdef: chunks::verdef_section(),
            versym: chunks::versym_section(),
            verneed: chunks::verneed_section(),
            internal_symbols: None,
            buf: Vec::new(),
            file_size: 0,
        }
    }

    /// Registers the synthetic chunks that this link will consider emitting.
    /// Conditional chunks are gated on configuration here; anything that ends
    /// up with no content is dropped again before layout.
    pub(crate) fn create_synthetic_sections(&mut self) {
        let chunks = &mut self.chunks;
        let mut add = |chunk| chunks.push(chunk);

        add(ChunkRef::Ehdr);
        add(ChunkRef::Phdr);
        add(ChunkRef::Shdr);
        add(ChunkRef::Got);
        add(ChunkRef::GotPlt);
        add(ChunkRef::RelPlt);
        add(ChunkRef::Strtab);
        add(ChunkRef::Shstrtab);
        add(ChunkRef::Plt);
        add(ChunkRef::PltGot);
        add(ChunkRef::Symtab);
        add(ChunkRef::Dynsym);
        add(ChunkRef::Dynstr);
        add(ChunkRef::EhFrame);
        add(ChunkRef::Dynbss);
        add(ChunkRef::DynbssRelro);

        if self.args.dynamic_linker.is_some() {
            add(ChunkRef::Interp);
        }
        if self.args.build_id != BuildIdKind::None {
            add(ChunkRef::BuildId);
        }
        if self.args.eh_frame_hdr {
            add(ChunkRef::EhFrameHdr);
        }
        if self.args.hash_style_sysv {
            add(ChunkRef::Hash);
        }
        if self.args.hash_style_gnu {
            add(ChunkRef::GnuHash);
        }
        if !self.args.version_definitions.is_empty() {
            add(ChunkRef::Verdef);
        }

        add(ChunkRef::RelDyn);
        add(ChunkRef::Dynamic);
        add(ChunkRef::Versym);
        add(ChunkRef::Verneed);
    }

    pub(crate) fn chunk_common(&self, chunk: ChunkRef) -> &ChunkCommon<'data> {
        match chunk {
            ChunkRef::Ehdr => &self.ehdr,
            ChunkRef::Phdr => &self.phdr,
            ChunkRef::Shdr => &self.shdr,
            ChunkRef::Interp => &self.interp,
            ChunkRef::BuildId => &self.buildid,
            ChunkRef::Got => &self.got.common,
            ChunkRef::GotPlt => &self.gotplt.common,
            ChunkRef::Plt => &self.plt.common,
            ChunkRef::PltGot => &self.pltgot.common,
            ChunkRef::RelPlt => &self.relplt.common,
            ChunkRef::RelDyn => &self.reldyn.common,
            ChunkRef::Symtab => &self.symtab,
            ChunkRef::Strtab => &self.strtab.common,
            ChunkRef::Shstrtab => &self.shstrtab.common,
            ChunkRef::Dynsym => &self.dynsym.common,
            ChunkRef::Dynstr => &self.dynstr.common,
            ChunkRef::Dynamic => &self.dynamic.common,
            ChunkRef::Hash => &self.hash,
            ChunkRef::GnuHash => &self.gnu_hash,
            ChunkRef::EhFrame => &self.eh_frame,
            ChunkRef::EhFrameHdr => &self.eh_frame_hdr,
            ChunkRef::Dynbss => &self.dynbss.common,
            ChunkRef::DynbssRelro => &self.dynbss_relro.common,
            ChunkRef::Verdef => &self.verdef.common,
            ChunkRef::Versym => &self.versym.common,
            ChunkRef::Verneed => &self.verneed.common,
            ChunkRef::Output(id) => &self.output_sections[id.as_usize()].common,
            ChunkRef::Merged(id) => &self.merged_sections[id.as_usize()].common,
        }
    }

    pub(crate) fn chunk_common_mut(&mut self, chunk: ChunkRef) -> &mut ChunkCommon<'data> {
        match chunk {
            ChunkRef::Ehdr => &mut self.ehdr,
            ChunkRef::Phdr => &mut self.phdr,
            ChunkRef::Shdr => &mut self.shdr,
            ChunkRef::Interp => &mut self.interp,
            ChunkRef::BuildId => &mut self.buildid,
            ChunkRef::Got => &mut self.got.common,
            ChunkRef::GotPlt => &mut self.gotplt.common,
            ChunkRef::Plt => &mut self.plt.common,
            ChunkRef::PltGot => &mut self.pltgot.common,
            ChunkRef::RelPlt => &mut self.relplt.common,
            ChunkRef::RelDyn => &mut self.reldyn.common,
            ChunkRef::Symtab => &mut self.symtab,
            ChunkRef::Strtab => &mut self.strtab.common,
            ChunkRef::Shstrtab => &mut self.shstrtab.common,
            ChunkRef::Dynsym => &mut self.dynsym.common,
            ChunkRef::Dynstr => &mut self.dynstr.common,
            ChunkRef::Dynamic => &mut self.dynamic.common,
            ChunkRef::Hash => &mut self.hash,
            ChunkRef::GnuHash => &mut self.gnu_hash,
            ChunkRef::EhFrame => &mut self.eh_frame,
            ChunkRef::EhFrameHdr => &mut self.eh_frame_hdr,
            ChunkRef::Dynbss => &mut self.dynbss.common,
            ChunkRef::DynbssRelro => &mut self.dynbss_relro.common,
            ChunkRef::Verdef => &mut self.verdef.common,
            ChunkRef::Versym => &mut self.versym.common,
            ChunkRef::Verneed => &mut self.verneed.common,
            ChunkRef::Output(id) => &mut self.output_sections[id.as_usize()].common,
            ChunkRef::Merged(id) => &mut self.merged_sections[id.as_usize()].common,
        }
    }

    fn alloc_file_id(&mut self, slot: FileSlot) -> FileId {
        let id = FileId::new(self.slots.len() as u32);
        self.slots.push(slot);
        id
    }

    pub fn add_object(&mut self, name: &'data str, archive_name: Option<&'data str>) -> FileId {
        let index = self.objs.len() as u32;
        let id = self.alloc_file_id(FileSlot::Object(index));
        self.objs.push(ObjectFile::new(id, name, archive_name));
        id
    }

    pub fn add_dso(&mut self, name: &'data str, soname: &'data str) -> FileId {
        let index = self.dsos.len() as u32;
        let id = self.alloc_file_id(FileSlot::Shared(index));
        self.dsos.push(SharedFile::new(id, name, soname));
        id
    }

    pub(crate) fn object(&self, id: FileId) -> Option<&ObjectFile<'data>> {
        match self.slots.get(id.as_usize())? {
            FileSlot::Object(index) => self.objs.get(*index as usize),
            _ => None,
        }
    }

    pub(crate) fn dso(&self, id: FileId) -> Option<&SharedFile<'data>> {
        match self.slots.get(id.as_usize())? {
            FileSlot::Shared(index) => self.dsos.get(*index as usize),
            _ => None,
        }
    }

    pub(crate) fn file_display(&self, id: FileId) -> String {
        if id == FileId::INTERNAL {
            return "<internal>".to_owned();
        }
        match self.slots.get(id.as_usize()) {
            Some(FileSlot::Object(index)) => self.objs[*index as usize].to_string(),
            Some(FileSlot::Shared(index)) => self.dsos[*index as usize].to_string(),
            _ => format!("<file #{id}>"),
        }
    }

    /// Rebuilds the ID-to-slot index after dead files have been pruned from
    /// `objs` / `dsos`.
    pub(crate) fn reindex_files(&mut self) {
        for slot in &mut self.slots[1..] {
            *slot = FileSlot::Dead;
        }
        for (index, obj) in self.objs.iter().enumerate() {
            self.slots[obj.file_id.as_usize()] = FileSlot::Object(index as u32);
        }
        for (index, dso) in self.dsos.iter().enumerate() {
            self.slots[dso.file_id.as_usize()] = FileSlot::Shared(index as u32);
        }
    }

    fn object_mut(&mut self, id: FileId) -> &mut ObjectFile<'data> {
        match self.slots[id.as_usize()] {
            FileSlot::Object(index) => &mut self.objs[index as usize],
            _ => panic!("file #{id} is not a relocatable object"),
        }
    }

    fn dso_mut(&mut self, id: FileId) -> &mut SharedFile<'data> {
        match self.slots[id.as_usize()] {
            FileSlot::Shared(index) => &mut self.dsos[index as usize],
            _ => panic!("file #{id} is not a shared object"),
        }
    }

    /// Installs an object's parsed symbol table. Globals are interned in the
    /// process-wide table; locals get private slots bound to this file up
    /// front, since nobody else can ever claim them.
    pub fn set_object_symbols(
        &mut self,
        file: FileId,
        elf_syms: Vec<ElfSym<'data>>,
        first_global: usize,
        symvers: Vec<Option<&'data str>>,
    ) {
        let mut symbols = Vec::with_capacity(elf_syms.len());
        for (i, esym) in elf_syms.iter().enumerate() {
            if i < first_global {
                let sym = Arc::new(Symbol::new(esym.name));
                sym.try_claim(
                    resolution_rank(DefinitionClass::Strong, 0, file),
                    SymbolClaim {
                        file,
                        value: esym.value,
                        sym_idx: i as u32,
                        visibility: esym.visibility,
                        is_weak: false,
                        is_lazy: false,
                        is_imported: false,
                        ver_idx: elf::VER_NDX_GLOBAL,
                    },
                );
                symbols.push(sym);
            } else {
                symbols.push(self.symbol_table.intern(esym.name));
            }
        }

        let obj = self.object_mut(file);
        obj.elf_syms = elf_syms;
        obj.symbols = symbols;
        obj.first_global = first_global;
        obj.symvers = symvers;
    }

    /// Adds an input section, binding it to its output section by canonical
    /// name. Returns the section's index within the object.
    pub fn add_input_section(
        &mut self,
        file: FileId,
        name: &'data str,
        sh_type: u32,
        sh_flags: u64,
        sh_addralign: u64,
        data: &'data [u8],
        sh_size: u64,
    ) -> u32 {
        let osec_flags = sh_flags & !u64::from(elf::SHF_GROUP) & !u64::from(elf::SHF_MERGE)
            & !u64::from(elf::SHF_STRINGS);
        let output_section =
            self.output_section_for(output_section_name(name), sh_type, osec_flags);

        let obj = self.object_mut(file);
        let index = obj.sections.len() as u32;
        obj.sections.push(Some(InputSection {
            name,
            shdr: SectionHeader {
                sh_type,
                sh_flags,
                sh_size,
                sh_addralign: sh_addralign.max(1),
                ..Default::default()
            },
            data,
            relocs: Vec::new(),
            output_section,
            offset: AtomicU64::new(0),
        }));
        index
    }

    pub fn add_relocations(&mut self, file: FileId, section: u32, relocs: Vec<Rela>) {
        let obj = self.object_mut(file);
        if let Some(Some(isec)) = obj.sections.get_mut(section as usize) {
            isec.relocs = relocs;
        }
    }

    pub fn add_comdat_group(&mut self, file: FileId, signature: &'data [u8], members: Vec<u32>) {
        let group = self
            .comdat_groups
            .entry(signature)
            .or_insert_with(|| Arc::new(ComdatGroup::new()))
            .clone();
        self.object_mut(file)
            .comdat_groups
            .push(ComdatGroupRef { group, members });
    }

    /// Interns a mergeable fragment for `file` into the `(name, sh_type,
    /// sh_flags)`-keyed merged section.
    pub fn add_merged_fragment(
        &mut self,
        file: FileId,
        name: &'data str,
        sh_type: u32,
        sh_flags: u64,
        bytes: &'data [u8],
        alignment: u64,
    ) {
        let sec = self.merged_section_for(name, sh_type, sh_flags);
        let frag = self.merged_sections[sec.as_usize()].insert(Cow::Borrowed(bytes), alignment);
        self.object_mut(file)
            .fragments
            .push(FragmentRef { sec, frag });
    }

    /// Installs a shared object's exported definitions and their metadata.
    pub fn set_dso_symbols(
        &mut self,
        file: FileId,
        elf_syms: Vec<ElfSym<'data>>,
        readonly: Vec<bool>,
        versyms: Vec<u16>,
        version_names: Vec<&'data str>,
    ) {
        let symbols = elf_syms
            .iter()
            .map(|esym| self.symbol_table.intern(esym.name))
            .collect();

        let dso = self.dso_mut(file);
        dso.elf_syms = elf_syms;
        dso.symbols = symbols;
        dso.readonly = readonly;
        dso.versyms = versyms;
        dso.version_names = version_names;
    }

    /// Records a name the shared object needs from somebody else.
    pub fn add_dso_undef(&mut self, file: FileId, name: &[u8]) {
        let sym = self.symbol_table.intern(name);
        self.dso_mut(file).undefs.push(sym);
    }

    pub(crate) fn output_section_for(
        &mut self,
        name: &'data str,
        sh_type: u32,
        sh_flags: u64,
    ) -> OutputSectionId {
        *self
            .osec_lookup
            .entry((name, sh_type, sh_flags))
            .or_insert_with(|| {
                let id = OutputSectionId(self.output_sections.len() as u32);
                self.output_sections
                    .push(OutputSection::new(name, sh_type, sh_flags));
                id
            })
    }

    pub(crate) fn merged_section_for(
        &mut self,
        name: &'data str,
        sh_type: u32,
        sh_flags: u64,
    ) -> MergedSectionId {
        *self
            .merged_lookup
            .entry((name, sh_type, sh_flags))
            .or_insert_with(|| {
                let id = MergedSectionId(self.merged_sections.len() as u32);
                self.merged_sections
                    .push(MergedSection::new(name, sh_type, sh_flags));
                id
            })
    }

    pub fn symbol(&self, name: &[u8]) -> Option<Arc<Symbol>> {
        self.symbol_table.get(name)
    }

    /// Looks up a chunk's final header by section name. Returns the first
    /// match in layout order.
    pub fn find_chunk(&self, name: &str) -> Option<&SectionHeader> {
        self.chunks
            .iter()
            .find(|&&chunk| self.chunk_common(chunk).name == name)
            .map(|&chunk| &self.chunk_common(chunk).shdr)
    }

    /// All chunks in layout order with their names and final headers.
    pub fn chunk_headers(&self) -> impl Iterator<Item = (&str, &SectionHeader)> {
        self.chunks.iter().map(|&chunk| {
            let common = self.chunk_common(chunk);
            (common.name, &common.shdr)
        })
    }

    pub fn dynsym_symbols(&self) -> &[Arc<Symbol>] {
        &self.dynsym.symbols
    }

    pub fn versym_table(&self) -> &[u16] {
        &self.versym.contents
    }

    pub fn verdef_bytes(&self) -> &[u8] {
        &self.verdef.contents
    }

    pub fn verneed_bytes(&self) -> &[u8] {
        &self.verneed.contents
    }

    pub fn dynstr_bytes(&self) -> &[u8] {
        self.dynstr.content()
    }

    pub fn dynamic_entries(&self) -> &[DynamicEntry] {
        &self.dynamic.entries
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
