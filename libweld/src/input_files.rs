//! Parsed input files: relocatable objects and shared objects. Parsing
//! itself happens elsewhere; these types hold what the parser produced plus
//! the per-file state the resolution passes operate on.
//!
//! Files live in `Context::objs` / `Context::dsos` and are referred to by
//! stable `FileId`s so that symbols can name their owner without borrowing
//! it. Dead files are pruned after resolution; the ID-to-slot index is
//! rebuilt at that point.

use crate::chunks::MergedSectionId;
use crate::chunks::OutputSectionId;
use crate::context::Context;
use crate::elf::ElfSym;
use crate::elf::Rela;
use crate::elf::SectionHeader;
use crate::symbol::DefinitionClass;
use crate::symbol::resolution_rank;
use crate::symbol::Symbol;
use crate::symbol::SymbolClaim;
use object::elf;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

/// Stable identifier of an input file. ID 0 is the internal linker-synthesized
/// file; real inputs count up from 1 in insertion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u32);

impl FileId {
    pub(crate) const NONE: FileId = FileId(u32::MAX);
    pub(crate) const INTERNAL: FileId = FileId(0);

    pub(crate) fn new(raw: u32) -> FileId {
        FileId(raw)
    }

    pub(crate) fn as_u32(self) -> u32 {
        self.0
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_raw(raw: u32) -> Option<FileId> {
        (raw != u32::MAX).then_some(FileId(raw))
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One COMDAT key's state: the priority of the file whose group instance
/// wins. Files race to lower it during the first deduplication sweep.
pub(crate) struct ComdatGroup {
    pub(crate) owner: AtomicU32,
}

impl ComdatGroup {
    pub(crate) fn new() -> Self {
        ComdatGroup {
            owner: AtomicU32::new(u32::MAX),
        }
    }
}

/// A file's membership in a COMDAT group: the shared group state plus the
/// file-local section indices that belong to the group instance.
pub(crate) struct ComdatGroupRef {
    pub(crate) group: Arc<ComdatGroup>,
    pub(crate) members: Vec<u32>,
}

/// Reference from a file to a fragment it contributed to a merged section.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FragmentRef {
    pub(crate) sec: MergedSectionId,
    pub(crate) frag: u32,
}

/// A slice of an object's content headed for an output section.
pub struct InputSection<'data> {
    pub name: &'data str,
    pub shdr: SectionHeader,
    pub data: &'data [u8],
    pub(crate) relocs: Vec<Rela>,
    pub(crate) output_section: OutputSectionId,
    /// Offset within the output section; assigned during size computation,
    /// possibly from a different shard's thread.
    pub(crate) offset: AtomicU64,
}

impl InputSection<'_> {
    pub fn offset(&self) -> u64 {
        self.offset.load(Relaxed)
    }
}

pub struct ObjectFile<'data> {
    pub(crate) file_id: FileId,
    pub name: &'data str,
    pub archive_name: Option<&'data str>,
    pub(crate) is_alive: AtomicBool,
    pub(crate) is_in_lib: bool,
    pub(crate) exclude_libs: bool,
    pub(crate) priority: u32,
    pub(crate) first_global: usize,
    pub(crate) elf_syms: Vec<ElfSym<'data>>,
    pub(crate) symbols: Vec<Arc<Symbol>>,
    pub(crate) sections: Vec<Option<InputSection<'data>>>,
    pub(crate) comdat_groups: Vec<ComdatGroupRef>,
    pub(crate) fragments: Vec<FragmentRef>,
    /// Version suffix per global symbol (`symvers[i]` belongs to global
    /// `first_global + i`). A leading `@` marks the default version.
    pub(crate) symvers: Vec<Option<&'data str>>,
}

impl<'data> ObjectFile<'data> {
    pub(crate) fn new(
        file_id: FileId,
        name: &'data str,
        archive_name: Option<&'data str>,
    ) -> Self {
        let is_in_lib = archive_name.is_some();
        ObjectFile {
            file_id,
            name,
            archive_name,
            is_alive: AtomicBool::new(!is_in_lib),
            is_in_lib,
            exclude_libs: false,
            priority: 0,
            first_global: 0,
            elf_syms: Vec::new(),
            symbols: Vec::new(),
            sections: Vec::new(),
            comdat_groups: Vec::new(),
            fragments: Vec::new(),
            symvers: Vec::new(),
        }
    }

    pub fn section(&self, index: u32) -> Option<&InputSection<'data>> {
        self.sections.get(index as usize).and_then(Option::as_ref)
    }

    /// Iterates the global portion of the symbol table together with the
    /// matching ELF records.
    pub(crate) fn globals(&self) -> impl Iterator<Item = (usize, &ElfSym<'data>, &Arc<Symbol>)> {
        (self.first_global..self.elf_syms.len())
            .map(|i| (i, &self.elf_syms[i], &self.symbols[i]))
    }

    fn definition_class(&self, esym: &ElfSym, lazy: bool) -> DefinitionClass {
        if esym.is_common() {
            DefinitionClass::Common
        } else if lazy {
            if esym.is_weak() {
                DefinitionClass::WeakShared
            } else {
                DefinitionClass::StrongShared
            }
        } else if esym.is_weak() {
            DefinitionClass::Weak
        } else {
            DefinitionClass::Strong
        }
    }

    /// Publishes this object's global definitions. Archive members that have
    /// not been chosen yet publish them as lazy: the definitions occupy
    /// their slots so that references can find the member, but any regular
    /// definition outranks them.
    pub(crate) fn resolve_symbols(&self) {
        let lazy = self.is_in_lib && !self.is_alive.load(Relaxed);

        for (i, esym, sym) in self.globals() {
            if !esym.is_defined() {
                continue;
            }

            let class = self.definition_class(esym, lazy);
            let rank = resolution_rank(class, self.priority, self.file_id);
            sym.try_claim(
                rank,
                SymbolClaim {
                    file: self.file_id,
                    value: esym.value,
                    sym_idx: i as u32,
                    visibility: esym.visibility,
                    is_weak: esym.is_weak(),
                    is_lazy: lazy,
                    is_imported: false,
                    ver_idx: elf::VER_NDX_GLOBAL,
                },
            );
        }
    }

    /// Worklist body for archive liveness. Called once this object is known
    /// to be alive: re-publishes its own definitions as regular (it may have
    /// published them as lazy before being chosen), then wakes any archive
    /// member owning a symbol this object references but does not define.
    pub(crate) fn mark_live_objects(&self, ctx: &Context<'data>, feed: &dyn Fn(FileId)) {
        for (i, esym, sym) in self.globals() {
            if esym.is_defined() {
                if self.is_in_lib {
                    let class = self.definition_class(esym, false);
                    let rank = resolution_rank(class, self.priority, self.file_id);
                    sym.try_claim(
                        rank,
                        SymbolClaim {
                            file: self.file_id,
                            value: esym.value,
                            sym_idx: i as u32,
                            visibility: esym.visibility,
                            is_weak: esym.is_weak(),
                            is_lazy: false,
                            is_imported: false,
                            ver_idx: elf::VER_NDX_GLOBAL,
                        },
                    );
                }
                continue;
            }

            // Weak references are not strong enough to extract a member.
            if esym.is_weak() {
                continue;
            }

            // Only lazily published definitions can still wake their owner;
            // anything else already belongs to the link.
            if !sym.is_lazy() {
                continue;
            }

            let Some(owner) = sym.file() else {
                continue;
            };
            let Some(target) = ctx.object(owner) else {
                continue;
            };
            if !target.is_alive.swap(true, Relaxed) {
                feed(owner);
            }
        }
    }

    /// Clears every global slot this (now dead) file still owns.
    pub(crate) fn clear_dead_symbols(&self) {
        for (_, _, sym) in self.globals() {
            if sym.owner_is(self.file_id) {
                sym.clear();
            }
        }
    }

    pub(crate) fn resolve_comdat_groups(&self) {
        for group_ref in &self.comdat_groups {
            group_ref.group.owner.fetch_min(self.priority, Relaxed);
        }
    }

    pub(crate) fn eliminate_duplicate_comdat_groups(&mut self) {
        for group_ref in &self.comdat_groups {
            if group_ref.group.owner.load(Relaxed) == self.priority {
                continue;
            }
            for &index in &group_ref.members {
                self.sections[index as usize] = None;
            }
        }
    }

    /// Turns COMMON symbols this object owns into definitions in a fresh
    /// NOBITS input section bound for `.bss`.
    pub(crate) fn convert_common_symbols(&mut self, bss: OutputSectionId) {
        for i in self.first_global..self.elf_syms.len() {
            let esym = self.elf_syms[i];
            if !esym.is_common() || !self.symbols[i].owner_is(self.file_id) {
                continue;
            }

            // For COMMON symbols, st_value carries the required alignment.
            let alignment = esym.value.max(1);
            let shdr = SectionHeader {
                sh_type: elf::SHT_NOBITS,
                sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                sh_size: esym.size,
                sh_addralign: alignment,
                ..Default::default()
            };
            let index = self.sections.len() as u32;
            self.sections.push(Some(InputSection {
                name: ".common",
                shdr,
                data: &[],
                relocs: Vec::new(),
                output_section: bss,
                offset: AtomicU64::new(0),
            }));

            self.elf_syms[i].section = crate::elf::SymbolPlacement::Section(index);
            self.elf_syms[i].value = 0;
            self.symbols[i].set_value(0);
        }
    }

    /// Undefined weak symbols that nothing defined resolve to zero.
    pub(crate) fn convert_undefined_weak_symbols(&self, shared: bool) {
        for (i, esym, sym) in self.globals() {
            if !esym.is_undefined() || !esym.is_weak() {
                continue;
            }
            let rank = resolution_rank(DefinitionClass::UndefWeak, self.priority, self.file_id);
            sym.try_claim(
                rank,
                SymbolClaim {
                    file: self.file_id,
                    value: 0,
                    sym_idx: i as u32,
                    visibility: esym.visibility,
                    is_weak: true,
                    is_lazy: false,
                    // In a shared object the reference stays interposable:
                    // some other module may define it at load time.
                    is_imported: shared,
                    ver_idx: elf::VER_NDX_GLOBAL,
                },
            );
        }
    }
}

impl Display for ObjectFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.archive_name {
            Some(archive) => write!(f, "{}({})", archive, self.name),
            None => Display::fmt(self.name, f),
        }
    }
}

pub struct SharedFile<'data> {
    pub(crate) file_id: FileId,
    pub name: &'data str,
    pub soname: &'data str,
    pub(crate) is_alive: AtomicBool,
    pub(crate) priority: u32,
    pub(crate) elf_syms: Vec<ElfSym<'data>>,
    pub(crate) symbols: Vec<Arc<Symbol>>,
    /// Per-definition read-only classification: whether the symbol's address
    /// falls in one of the DSO's non-writable segments.
    pub(crate) readonly: Vec<bool>,
    /// Per-definition version index into `version_names`.
    pub(crate) versyms: Vec<u16>,
    pub(crate) version_names: Vec<&'data str>,
    pub(crate) undefs: Vec<Arc<Symbol>>,
}

impl<'data> SharedFile<'data> {
    pub(crate) fn new(file_id: FileId, name: &'data str, soname: &'data str) -> Self {
        SharedFile {
            file_id,
            name,
            soname,
            is_alive: AtomicBool::new(false),
            priority: 0,
            elf_syms: Vec::new(),
            symbols: Vec::new(),
            readonly: Vec::new(),
            versyms: Vec::new(),
            version_names: Vec::new(),
            undefs: Vec::new(),
        }
    }

    /// Publishes this DSO's definitions. They rank below any definition from
    /// a regular object and start out weak; a non-weak reference from an
    /// object upgrades them later.
    pub(crate) fn resolve_symbols(&self) {
        for (i, esym) in self.elf_syms.iter().enumerate() {
            if !esym.is_defined() {
                continue;
            }

            let class = if esym.is_weak() {
                DefinitionClass::WeakShared
            } else {
                DefinitionClass::StrongShared
            };
            let rank = resolution_rank(class, self.priority, self.file_id);
            self.symbols[i].try_claim(
                rank,
                SymbolClaim {
                    file: self.file_id,
                    value: esym.value,
                    sym_idx: i as u32,
                    visibility: esym.visibility,
                    is_weak: true,
                    is_lazy: false,
                    is_imported: true,
                    ver_idx: self.versyms.get(i).copied().unwrap_or(elf::VER_NDX_GLOBAL),
                },
            );
        }
    }

    pub(crate) fn clear_dead_symbols(&self) {
        for sym in &self.symbols {
            if sym.owner_is(self.file_id) {
                sym.clear();
            }
        }
    }

    /// Symbols this DSO defines at the same address as `sym` (and therefore
    /// aliased to it once a copy relocation pins the address in the output).
    pub(crate) fn find_aliases(&self, sym: &Arc<Symbol>) -> Vec<Arc<Symbol>> {
        let Some(sym_idx) = sym.sym_idx() else {
            return Vec::new();
        };
        let value = self.elf_syms[sym_idx].value;

        let mut aliases = Vec::new();
        for (i, esym) in self.elf_syms.iter().enumerate() {
            if i == sym_idx || !esym.is_defined() || esym.value != value {
                continue;
            }
            let alias = &self.symbols[i];
            if alias.owner_is(self.file_id) {
                aliases.push(alias.clone());
            }
        }
        aliases
    }

    pub(crate) fn is_readonly(&self, sym: &Arc<Symbol>) -> bool {
        sym.sym_idx()
            .and_then(|i| self.readonly.get(i).copied())
            .unwrap_or(false)
    }

    pub(crate) fn version_string(&self, ver_idx: u16) -> &'data str {
        let idx = usize::from(ver_idx & !elf::VERSYM_HIDDEN);
        self.version_names.get(idx).copied().unwrap_or("")
    }
}

impl Display for SharedFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.name, f)
    }
}
