//! Linker-defined symbols: created before resolution so user code can
//! reference (or override) them, and pinned to their final addresses once
//! layout is done.

use crate::chunks::ChunkKind;
use crate::chunks::ChunkRef;
use crate::context::Context;
use crate::elf::Visibility;
use crate::input_files::FileId;
use crate::symbol::DefinitionClass;
use crate::symbol::resolution_rank;
use crate::symbol::Symbol;
use crate::symbol::SymbolClaim;
use object::elf;
use std::sync::Arc;

/// Handles to the linker-provided symbols, owned by the internal file.
#[derive(Clone)]
pub(crate) struct InternalSymbols {
    pub(crate) bss_start: Arc<Symbol>,
    pub(crate) ehdr_start: Arc<Symbol>,
    pub(crate) executable_start: Arc<Symbol>,
    pub(crate) rela_iplt_start: Arc<Symbol>,
    pub(crate) rela_iplt_end: Arc<Symbol>,
    pub(crate) init_array_start: Arc<Symbol>,
    pub(crate) init_array_end: Arc<Symbol>,
    pub(crate) fini_array_start: Arc<Symbol>,
    pub(crate) fini_array_end: Arc<Symbol>,
    pub(crate) end: Arc<Symbol>,
    pub(crate) etext: Arc<Symbol>,
    pub(crate) edata: Arc<Symbol>,
    pub(crate) dynamic: Arc<Symbol>,
    pub(crate) global_offset_table: Arc<Symbol>,
    pub(crate) gnu_eh_frame_hdr: Arc<Symbol>,
}

/// Claims a symbol for the internal file. The claim is weak so that a real
/// definition in user code silently wins.
fn define_internal(sym: &Arc<Symbol>) {
    let rank = resolution_rank(DefinitionClass::Weak, 1, FileId::INTERNAL);
    sym.try_claim(
        rank,
        SymbolClaim {
            file: FileId::INTERNAL,
            value: 0,
            sym_idx: u32::MAX,
            visibility: Visibility::Default,
            is_weak: true,
            is_lazy: false,
            is_imported: false,
            ver_idx: elf::VER_NDX_GLOBAL,
        },
    );
}

/// Interns and claims the linker-provided symbols, and interns the names the
/// user forced with `-u` so they can serve as liveness roots.
#[tracing::instrument(skip_all, name = "Create internal symbols")]
pub(crate) fn create_internal_symbols(ctx: &mut Context) {
    for name in &ctx.args.undefined {
        ctx.symbol_table.intern(name.as_bytes());
    }

    let define = |name: &[u8]| {
        let sym = ctx.symbol_table.intern(name);
        define_internal(&sym);
        sym
    };

    ctx.internal_symbols = Some(InternalSymbols {
        bss_start: define(b"__bss_start"),
        ehdr_start: define(b"__ehdr_start"),
        executable_start: define(b"__executable_start"),
        rela_iplt_start: define(b"__rela_iplt_start"),
        rela_iplt_end: define(b"__rela_iplt_end"),
        init_array_start: define(b"__init_array_start"),
        init_array_end: define(b"__init_array_end"),
        fini_array_start: define(b"__fini_array_start"),
        fini_array_end: define(b"__fini_array_end"),
        end: define(b"_end"),
        etext: define(b"_etext"),
        edata: define(b"_edata"),
        dynamic: define(b"_DYNAMIC"),
        global_offset_table: define(b"_GLOBAL_OFFSET_TABLE_"),
        gnu_eh_frame_hdr: define(b"__GNU_EH_FRAME_HDR"),
    });
}

fn set_start(ctx: &Context, sym: &Arc<Symbol>, chunk: ChunkRef) {
    if sym.file() != Some(FileId::INTERNAL) {
        // A user definition won; leave it alone.
        return;
    }
    let common = ctx.chunk_common(chunk);
    sym.set_shndx(common.shndx);
    sym.set_value(common.shdr.sh_addr);
}

fn set_stop(ctx: &Context, sym: &Arc<Symbol>, chunk: ChunkRef) {
    if sym.file() != Some(FileId::INTERNAL) {
        return;
    }
    let common = ctx.chunk_common(chunk);
    sym.set_shndx(common.shndx);
    sym.set_value(common.shdr.sh_addr + common.shdr.sh_size);
}

/// Pins every linker-defined symbol to its post-layout address. Symbols
/// bound to a section that does not exist in this link keep their zero
/// value.
#[tracing::instrument(skip_all, name = "Fix synthetic symbols")]
pub(crate) fn fix_synthetic_symbols(ctx: &Context) {
    let Some(internal) = &ctx.internal_symbols else {
        return;
    };

    // __bss_start
    for &chunk in &ctx.chunks {
        let common = ctx.chunk_common(chunk);
        if common.kind == ChunkKind::Regular && common.name == ".bss" {
            set_start(ctx, &internal.bss_start, chunk);
            break;
        }
    }

    // __ehdr_start and __executable_start point at the image base when any
    // real section exists.
    if ctx
        .chunks
        .iter()
        .any(|&c| ctx.chunk_common(c).shndx == 1)
    {
        for sym in [&internal.ehdr_start, &internal.executable_start] {
            if sym.file() == Some(FileId::INTERNAL) {
                sym.set_shndx(1);
                sym.set_value(ctx.ehdr.shdr.sh_addr);
            }
        }
    }

    if ctx.chunks.contains(&ChunkRef::RelPlt) {
        set_start(ctx, &internal.rela_iplt_start, ChunkRef::RelPlt);
        set_stop(ctx, &internal.rela_iplt_end, ChunkRef::RelPlt);
    }

    for &chunk in &ctx.chunks {
        match ctx.chunk_common(chunk).shdr.sh_type {
            elf::SHT_INIT_ARRAY => {
                set_start(ctx, &internal.init_array_start, chunk);
                set_stop(ctx, &internal.init_array_end, chunk);
            }
            elf::SHT_FINI_ARRAY => {
                set_start(ctx, &internal.fini_array_start, chunk);
                set_stop(ctx, &internal.fini_array_end, chunk);
            }
            _ => {}
        }
    }

    // _end, _etext and _edata track the last chunk of their kind in layout
    // order.
    for &chunk in &ctx.chunks {
        let shdr = &ctx.chunk_common(chunk).shdr;
        if ctx.chunk_common(chunk).kind == ChunkKind::Header {
            continue;
        }
        if shdr.is_alloc() {
            set_stop(ctx, &internal.end, chunk);
        }
        if shdr.is_executable() {
            set_stop(ctx, &internal.etext, chunk);
        }
        if shdr.is_alloc() && !shdr.is_nobits() {
            set_stop(ctx, &internal.edata, chunk);
        }
    }

    if ctx.chunks.contains(&ChunkRef::Dynamic) {
        set_start(ctx, &internal.dynamic, ChunkRef::Dynamic);
    }
    if ctx.chunks.contains(&ChunkRef::GotPlt) {
        set_start(ctx, &internal.global_offset_table, ChunkRef::GotPlt);
    }
    if ctx.chunks.contains(&ChunkRef::EhFrameHdr) {
        set_start(ctx, &internal.gnu_eh_frame_hdr, ChunkRef::EhFrameHdr);
    }

    // __start_<name> / __stop_<name> for every chunk whose name works as a C
    // identifier.
    for &chunk in &ctx.chunks {
        let name = ctx.chunk_common(chunk).name;
        if !is_c_identifier(name) {
            continue;
        }
        let start = ctx.symbol_table.intern(format!("__start_{name}").as_bytes());
        let stop = ctx.symbol_table.intern(format!("__stop_{name}").as_bytes());
        define_internal(&start);
        define_internal(&stop);
        set_start(ctx, &start, chunk);
        set_stop(ctx, &stop, chunk);
    }
}

fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_identifier_detection() {
        assert!(is_c_identifier("my_section"));
        assert!(is_c_identifier("_foo1"));
        assert!(!is_c_identifier(".text"));
        assert!(!is_c_identifier(""));
        assert!(!is_c_identifier("1abc"));
    }
}
