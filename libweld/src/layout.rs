//! Chunk ordering and address assignment: ranks chunks into segment order,
//! finalizes synthetic section sizes, and walks the chunk list assigning
//! page-skew-aligned file offsets and virtual addresses.

use crate::alignment::align_to;
use crate::alignment::align_with_skew;
use crate::chunks::ChunkKind;
use crate::chunks::ChunkRef;
use crate::chunks::DynamicEntry;
use crate::context::Context;
use crate::elf::PAGE_SIZE;
use crate::elf::DYNAMIC_ENTRY_SIZE;
use crate::elf::GOT_ENTRY_SIZE;
use crate::elf::PHDR_ENTRY_SIZE;
use crate::elf::PLT_ENTRY_SIZE;
use crate::elf::RELA_ENTRY_SIZE;
use crate::elf::SHDR_ENTRY_SIZE;
use crate::elf::SYM_ENTRY_SIZE;
use crate::elf::VERSYM_ENTRY_SIZE;
use object::elf;
use std::sync::atomic::Ordering::Relaxed;

/// Rank of the section-header pseudo-chunk; sorts after everything.
const SHDR_RANK: u32 = 1 << 20;
/// Rank of non-allocated sections; they trail every allocated chunk.
const NONALLOC_RANK: u32 = (1 << 20) - 1;

/// Orders chunks the way segments want them: headers, `.interp`, notes,
/// read-only, executable, TLS data/bss, RELRO data/bss, writable data/bss,
/// non-alloc, section header.
fn chunk_rank(ctx: &Context, chunk: ChunkRef) -> u32 {
    match chunk {
        ChunkRef::Ehdr => return 0,
        ChunkRef::Phdr => return 1,
        ChunkRef::Interp => return 2,
        ChunkRef::Shdr => return SHDR_RANK,
        _ => {}
    }

    let shdr = &ctx.chunk_common(chunk).shdr;

    if shdr.sh_type == elf::SHT_NOTE {
        return 3;
    }
    if !shdr.is_alloc() {
        return NONALLOC_RANK;
    }

    let writable = shdr.is_writable();
    let exec = shdr.is_executable();
    let tls = shdr.is_tls();
    let relro = is_relro(ctx, chunk);
    let hasbits = !shdr.is_nobits();

    ((u32::from(writable) << 9)
        | (u32::from(exec) << 8)
        | (u32::from(!tls) << 7)
        | (u32::from(!relro) << 6)
        | (u32::from(!hasbits) << 5))
        + 4
}

/// Sections the dynamic linker re-protects read-only after relocation.
fn is_relro(ctx: &Context, chunk: ChunkRef) -> bool {
    match chunk {
        ChunkRef::Got | ChunkRef::Dynamic | ChunkRef::DynbssRelro => true,
        _ => {
            let common = ctx.chunk_common(chunk);
            matches!(
                common.shdr.sh_type,
                elf::SHT_INIT_ARRAY | elf::SHT_FINI_ARRAY | elf::SHT_PREINIT_ARRAY
            ) || matches!(
                common.name,
                ".ctors" | ".dtors" | ".data.rel.ro" | ".preinit_array"
            )
        }
    }
}

/// Fixes the sizes of the synthetic chunks whose content is now known, and
/// builds the `.dynamic` entry list.
#[tracing::instrument(skip_all, name = "Finalize synthetic sizes")]
pub(crate) fn finalize_synthetic_sizes(ctx: &mut Context) {
    build_dynamic_entries(ctx);

    ctx.got.common.shdr.sh_size = u64::from(ctx.got.num_slots()) * GOT_ENTRY_SIZE;
    ctx.pltgot.common.shdr.sh_size = ctx.pltgot.symbols.len() as u64 * 8;
    ctx.relplt.common.shdr.sh_size = u64::from(ctx.relplt.num_relocs) * RELA_ENTRY_SIZE;
    ctx.reldyn.common.shdr.sh_size = ctx.reldyn.num_relocs.load(Relaxed) * RELA_ENTRY_SIZE;
    ctx.versym.common.shdr.sh_size = ctx.versym.contents.len() as u64 * VERSYM_ENTRY_SIZE;

    if ctx.plt.symbols.is_empty() {
        ctx.plt.common.shdr.sh_size = 0;
        ctx.gotplt.common.shdr.sh_size = 0;
    } else {
        // Entry 0 of the PLT is the resolver trampoline.
        ctx.plt.common.shdr.sh_size = (ctx.plt.symbols.len() as u64 + 1) * PLT_ENTRY_SIZE;
        ctx.gotplt.common.shdr.sh_size = u64::from(ctx.gotplt.num_slots()) * GOT_ENTRY_SIZE;
    }

    let is_dynamic = !ctx.dsos.is_empty() || ctx.args.shared;
    let num_dynsym = ctx.dynsym.num_symbols();

    if ctx.dynsym.symbols.is_empty() && !is_dynamic {
        ctx.dynsym.common.shdr.sh_size = 0;
        ctx.dynstr.common.shdr.sh_size = 0;
    } else {
        ctx.dynsym.common.shdr.sh_size = num_dynsym * SYM_ENTRY_SIZE;
        ctx.dynstr.common.shdr.sh_size = ctx.dynstr.len();
    }

    if ctx.dynsym.common.shdr.sh_size != 0 {
        if ctx.args.hash_style_sysv {
            // Header (nbucket, nchain) + one bucket and one chain word per
            // dynamic symbol.
            ctx.hash.shdr.sh_size = (2 + num_dynsym + num_dynsym) * 4;
        }
        if ctx.args.hash_style_gnu {
            let num_hashed = ctx.dynsym.symbols.len() as u64;
            let num_buckets = num_hashed.div_ceil(8).max(1);
            ctx.gnu_hash.shdr.sh_size = 16 + 8 + 4 * num_buckets + 4 * num_hashed;
        }
    }

    if ctx.args.eh_frame_hdr {
        // Table header only; the FDE index is the writer's business.
        ctx.eh_frame_hdr.shdr.sh_size = 12;
    }

    // The static symbol table retains each object's named locals plus the
    // globals the object ended up owning; their names feed .strtab.
    let mut num_symtab = 0u64;
    {
        let objs = &ctx.objs;
        let strtab = &mut ctx.strtab;
        for obj in objs {
            for (i, (esym, sym)) in obj.elf_syms.iter().zip(&obj.symbols).enumerate() {
                if esym.name.is_empty() {
                    continue;
                }
                if i >= obj.first_global && !sym.owner_is(obj.file_id) {
                    continue;
                }
                strtab.pool.add(esym.name);
                num_symtab += 1;
            }
        }
    }
    if num_symtab != 0 {
        // Entry 0 is the null symbol.
        ctx.symtab.shdr.sh_size = (num_symtab + 1) * SYM_ENTRY_SIZE;
        ctx.strtab.common.shdr.sh_size = ctx.strtab.pool.len();
    }

    ctx.dynamic.common.shdr.sh_size =
        ctx.dynamic.entries.len() as u64 * DYNAMIC_ENTRY_SIZE;
}

fn build_dynamic_entries(ctx: &mut Context) {
    if ctx.dsos.is_empty() && !ctx.args.shared {
        return;
    }

    let mut entries = Vec::new();
    let mut push = |tag: u32, value: u64| {
        entries.push(DynamicEntry {
            tag: u64::from(tag),
            value,
        });
    };

    for i in 0..ctx.dsos.len() {
        let soname = ctx.dsos[i].soname;
        let offset = ctx.dynstr.add_string(soname.as_bytes());
        push(elf::DT_NEEDED, u64::from(offset));
    }

    if let Some(soname) = &ctx.args.soname {
        let offset = ctx.dynstr.add_string(soname.as_bytes());
        push(elf::DT_SONAME, u64::from(offset));
    }

    // Table addresses are filled in by the writer once layout is final; the
    // entry list exists so the section can be sized and ordered now.
    if ctx.reldyn.num_relocs.load(Relaxed) != 0 {
        push(elf::DT_RELA, 0);
        push(elf::DT_RELASZ, ctx.reldyn.num_relocs.load(Relaxed) * RELA_ENTRY_SIZE);
        push(elf::DT_RELAENT, RELA_ENTRY_SIZE);
    }
    if ctx.relplt.num_relocs != 0 {
        push(elf::DT_JMPREL, 0);
        push(elf::DT_PLTRELSZ, u64::from(ctx.relplt.num_relocs) * RELA_ENTRY_SIZE);
        push(elf::DT_PLTREL, u64::from(elf::DT_RELA));
        push(elf::DT_PLTGOT, 0);
    }

    push(elf::DT_SYMTAB, 0);
    push(elf::DT_SYMENT, SYM_ENTRY_SIZE);
    push(elf::DT_STRTAB, 0);
    push(elf::DT_STRSZ, ctx.dynstr.len());

    if ctx.args.hash_style_sysv {
        push(elf::DT_HASH, 0);
    }
    if ctx.args.hash_style_gnu {
        push(elf::DT_GNU_HASH, 0);
    }
    if !ctx.args.version_definitions.is_empty() {
        push(elf::DT_VERDEF, 0);
        push(elf::DT_VERDEFNUM, ctx.args.version_definitions.len() as u64 + 1);
    }
    if !ctx.verneed.contents.is_empty() {
        push(elf::DT_VERNEED, 0);
        push(elf::DT_VERNEEDNUM, u64::from(ctx.verneed.common.shdr.sh_info));
    }
    if !ctx.versym.contents.is_empty() {
        push(elf::DT_VERSYM, 0);
    }
    if !ctx.args.shared {
        push(elf::DT_DEBUG, 0);
    }
    push(elf::DT_NULL, 0);

    ctx.dynamic.entries = entries;
}

/// Drops content-less synthetic chunks and sorts the rest into segment
/// order. Ties break on `(name, sh_type, sh_flags)` so the output is stable.
#[tracing::instrument(skip_all, name = "Sort chunks")]
pub(crate) fn sort_chunks(ctx: &mut Context) {
    let keep: Vec<ChunkRef> = ctx
        .chunks
        .iter()
        .copied()
        .filter(|&chunk| {
            // .shstrtab is sized later, once the surviving names are known.
            if chunk == ChunkRef::Shstrtab {
                return true;
            }
            let common = ctx.chunk_common(chunk);
            common.kind != ChunkKind::Synthetic || common.shdr.sh_size != 0
        })
        .collect();
    ctx.chunks = keep;

    let mut order: Vec<(u32, ChunkRef)> = ctx
        .chunks
        .iter()
        .map(|&chunk| (chunk_rank(ctx, chunk), chunk))
        .collect();

    order.sort_by(|&(rank_a, a), &(rank_b, b)| {
        rank_a.cmp(&rank_b).then_with(|| {
            let a = ctx.chunk_common(a);
            let b = ctx.chunk_common(b);
            (a.name, a.shdr.sh_type, a.shdr.sh_flags).cmp(&(
                b.name,
                b.shdr.sh_type,
                b.shdr.sh_flags,
            ))
        })
    });

    ctx.chunks = order.into_iter().map(|(_, chunk)| chunk).collect();
}

/// Sets `new_page` where a loadable segment with different permissions
/// starts and `new_page_end` where the RELRO region ends, then sizes the
/// program- and section-header chunks and fills `.shstrtab`.
#[tracing::instrument(skip_all, name = "Mark segment boundaries")]
pub(crate) fn mark_segment_boundaries(ctx: &mut Context) {
    let order: Vec<ChunkRef> = ctx.chunks.clone();

    // Loadable permission runs become PT_LOAD segments; each run after the
    // first starts on a fresh page.
    let mut num_loads = 0u64;
    let mut prev_perm = None;
    for &chunk in &order {
        let shdr = &ctx.chunk_common(chunk).shdr;
        if !shdr.is_alloc() {
            continue;
        }
        let perm = (shdr.is_writable(), shdr.is_executable());
        if prev_perm != Some(perm) {
            num_loads += 1;
            if prev_perm.is_some() {
                ctx.chunk_common_mut(chunk).new_page = true;
            }
        }
        prev_perm = Some(perm);
    }

    // The RELRO region must end on a page boundary for mprotect.
    let mut has_relro = false;
    for i in 0..order.len() {
        if !is_relro(ctx, order[i]) {
            continue;
        }
        has_relro = true;
        let next_is_relro = order
            .get(i + 1)
            .is_some_and(|&next| is_relro(ctx, next));
        if !next_is_relro {
            ctx.chunk_common_mut(order[i]).new_page_end = true;
        }
    }

    let mut num_segments = num_loads + 2; // PT_PHDR + PT_GNU_STACK
    if order.contains(&ChunkRef::Interp) {
        num_segments += 1;
    }
    if order.contains(&ChunkRef::Dynamic) {
        num_segments += 1;
    }
    if order.contains(&ChunkRef::EhFrameHdr) {
        num_segments += 1;
    }
    if order
        .iter()
        .any(|&c| ctx.chunk_common(c).shdr.is_tls())
    {
        num_segments += 1;
    }
    if has_relro {
        num_segments += 1;
    }
    ctx.phdr.shdr.sh_size = num_segments * PHDR_ENTRY_SIZE;

    let num_sections = order
        .iter()
        .filter(|&&c| ctx.chunk_common(c).kind != ChunkKind::Header)
        .count() as u64;
    ctx.shdr.shdr.sh_size = (num_sections + 1) * SHDR_ENTRY_SIZE;

    for &chunk in &order {
        let name = ctx.chunk_common(chunk).name;
        if !name.is_empty() {
            ctx.shstrtab.pool.add(name.as_bytes());
        }
    }
    ctx.shstrtab.common.shdr.sh_size = ctx.shstrtab.pool.len();
}

/// Numbers the output sections. Header pseudo-chunks are not sections and
/// keep index 0.
#[tracing::instrument(skip_all, name = "Assign section indices")]
pub(crate) fn assign_shndx(ctx: &mut Context) {
    let order: Vec<ChunkRef> = ctx.chunks.clone();
    let mut shndx = 1;
    for chunk in order {
        if ctx.chunk_common(chunk).kind == ChunkKind::Header {
            continue;
        }
        ctx.chunk_common_mut(chunk).shndx = shndx;
        shndx += 1;
    }
}

/// Walks the sorted chunks assigning file offsets and virtual addresses.
/// File offsets keep the invariant `offset % PAGE_SIZE == vaddr % PAGE_SIZE`
/// so that segments can be mmapped directly. Returns the output file size.
#[tracing::instrument(skip_all, name = "Assign chunk offsets")]
pub(crate) fn assign_chunk_offsets(ctx: &mut Context) -> u64 {
    let order: Vec<ChunkRef> = ctx.chunks.clone();

    let mut fileoff = 0u64;
    let mut vaddr = ctx.args.image_base;

    for chunk in order {
        let common = ctx.chunk_common_mut(chunk);

        if common.new_page {
            vaddr = align_to(vaddr, PAGE_SIZE);
        }

        vaddr = align_to(vaddr, common.shdr.sh_addralign.max(1));
        fileoff = align_with_skew(fileoff, PAGE_SIZE, vaddr % PAGE_SIZE);

        common.shdr.sh_offset = fileoff;
        if common.shdr.is_alloc() {
            common.shdr.sh_addr = vaddr;
        }

        let is_bss = common.shdr.is_nobits();
        if !is_bss {
            fileoff += common.shdr.sh_size;
        }

        // TLS bss occupies no address space in the image; its template is
        // materialized per thread.
        let is_tbss = is_bss && common.shdr.is_tls();
        if !is_tbss {
            vaddr += common.shdr.sh_size;
        }

        if common.new_page_end {
            vaddr = align_to(vaddr, PAGE_SIZE);
        }
    }

    ctx.file_size = fileoff;
    fileoff
}

/// Zero-fills every inter-chunk gap in the output buffer, skipping the file
/// ranges NOBITS chunks do not occupy.
#[tracing::instrument(skip_all, name = "Clear padding")]
pub(crate) fn clear_padding(ctx: &mut Context) {
    let filesize = ctx.file_size as usize;
    if ctx.buf.len() != filesize {
        ctx.buf.resize(filesize, 0);
    }

    let ends: Vec<(usize, usize)> = ctx
        .chunks
        .iter()
        .map(|&chunk| {
            let shdr = &ctx.chunk_common(chunk).shdr;
            let mut end = shdr.sh_offset as usize;
            if !shdr.is_nobits() {
                end += shdr.sh_size as usize;
            }
            (end, shdr.sh_offset as usize)
        })
        .collect();

    for i in 1..ends.len() {
        let (prev_end, _) = ends[i - 1];
        let (_, next_start) = ends[i];
        if prev_end < next_start {
            ctx.buf[prev_end..next_start].fill(0);
        }
    }
    if let Some(&(last_end, _)) = ends.last() {
        if last_end < filesize {
            ctx.buf[last_end..filesize].fill(0);
        }
    }
}
