//! Relocation scanning: walks every input section's relocations to decide
//! what each symbol needs from the synthetic tables, then allocates the
//! table slots.
//!
//! The scan itself runs in parallel and only touches per-symbol atomics and
//! the `.rela.dyn` counter. Slot allocation runs single-threaded over files
//! in priority order so that every index in `.dynsym`, `.got` and friends is
//! a deterministic function of the input.

use crate::context::Context;
use crate::elf::RelocationKind;
use crate::error::Result;
use crate::input_files::FileId;
use crate::input_files::ObjectFile;
use crate::symbol::Symbol;
use crate::symbol::SymbolFlags;
use anyhow::anyhow;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::sync::Arc;

#[tracing::instrument(skip_all, name = "Scan relocations")]
pub(crate) fn scan_relocations(ctx: &mut Context) -> Result {
    {
        let ctx_ref: &Context = ctx;
        ctx.objs
            .par_iter()
            .for_each(|obj| scan_object(ctx_ref, obj));
    }

    // A reference to a symbol nobody defines is fatal, but only after every
    // object had the chance to report its own.
    ctx.errors.checkpoint()?;

    // Anything that crosses the dynamic boundary needs a .dynsym entry.
    ctx.objs.par_iter().for_each(|obj| {
        for (_, _, sym) in obj.globals() {
            if sym.owner_is(obj.file_id) && (sym.is_imported() || sym.is_exported()) {
                sym.add_flags(SymbolFlags::NEEDS_DYNSYM);
            }
        }
    });

    assign_table_slots(ctx);
    Ok(())
}

fn scan_object(ctx: &Context, obj: &ObjectFile) {
    for isec in obj.sections.iter().flatten() {
        for rel in &isec.relocs {
            let Some(esym) = obj.elf_syms.get(rel.sym as usize) else {
                continue;
            };
            let sym = &obj.symbols[rel.sym as usize];
            let is_local = (rel.sym as usize) < obj.first_global;

            if !is_local && sym.file().is_none() {
                if !esym.is_weak() {
                    ctx.errors
                        .report(anyhow!("undefined symbol: {obj}: {sym}"));
                }
                continue;
            }

            let imported = !is_local && sym.is_imported();
            if imported {
                // The dynamic linker resolves this reference by name.
                sym.add_flags(SymbolFlags::NEEDS_DYNSYM);
            }

            match rel.kind {
                RelocationKind::Abs64 | RelocationKind::Abs32 => {
                    if imported {
                        if !ctx.args.shared && !symbol_is_function(ctx, sym) {
                            // Direct address of data living in a DSO: the
                            // executable gets its own copy.
                            sym.add_flags(SymbolFlags::NEEDS_COPYREL);
                        } else {
                            ctx.reldyn.add_reloc();
                        }
                    } else if ctx.args.shared {
                        // Needs a base-relative fixup at load time.
                        ctx.reldyn.add_reloc();
                    }
                }
                RelocationKind::Pc32 | RelocationKind::Plt32 => {
                    if imported {
                        if symbol_is_function(ctx, sym) {
                            sym.add_flags(SymbolFlags::NEEDS_PLT);
                        } else if !ctx.args.shared {
                            sym.add_flags(SymbolFlags::NEEDS_COPYREL);
                        } else {
                            ctx.reldyn.add_reloc();
                        }
                    }
                }
                RelocationKind::GotPcRel => {
                    sym.add_flags(SymbolFlags::NEEDS_GOT);
                }
                RelocationKind::TpOff => {}
                RelocationKind::GotTpOff => {
                    sym.add_flags(SymbolFlags::NEEDS_GOTTPOFF);
                }
                RelocationKind::TlsGd => {
                    sym.add_flags(SymbolFlags::NEEDS_TLSGD);
                }
                RelocationKind::TlsLd => {
                    sym.add_flags(SymbolFlags::NEEDS_TLSLD);
                }
                RelocationKind::TlsDesc => {
                    sym.add_flags(SymbolFlags::NEEDS_TLSDESC);
                }
            }
        }
    }
}

/// Whether the symbol's defining record has a function type.
fn symbol_is_function(ctx: &Context, sym: &Arc<Symbol>) -> bool {
    let (Some(owner), Some(sym_idx)) = (sym.file(), sym.sym_idx()) else {
        return false;
    };
    if let Some(obj) = ctx.object(owner) {
        return obj.elf_syms.get(sym_idx).is_some_and(|e| e.is_function());
    }
    if let Some(dso) = ctx.dso(owner) {
        return dso.elf_syms.get(sym_idx).is_some_and(|e| e.is_function());
    }
    false
}

/// Allocates `.dynsym`, GOT, PLT and copy-relocation slots. Iteration order
/// is files by ascending priority, then each file's symbol-table order,
/// which makes every assigned index reproducible.
fn assign_table_slots(ctx: &mut Context) {
    let mut file_order: Vec<(u32, bool, usize)> = ctx
        .objs
        .iter()
        .enumerate()
        .map(|(i, o)| (o.priority, false, i))
        .chain(
            ctx.dsos
                .iter()
                .enumerate()
                .map(|(i, d)| (d.priority, true, i)),
        )
        .collect();
    file_order.sort_unstable();

    // Collect each file's flagged symbols in parallel; the slow part is the
    // scan over symbol vectors, not the assignment itself.
    let flagged: Vec<Vec<Arc<Symbol>>> = file_order
        .par_iter()
        .map(|&(_, is_dso, index)| {
            let (file_id, symbols): (FileId, &[Arc<Symbol>]) = if is_dso {
                let dso = &ctx.dsos[index];
                (dso.file_id, &dso.symbols)
            } else {
                let obj = &ctx.objs[index];
                (obj.file_id, &obj.symbols)
            };
            symbols
                .iter()
                .filter(|sym| !sym.flags().is_empty() && sym.owner_is(file_id))
                .cloned()
                .collect()
        })
        .collect();

    for sym in flagged.iter().flatten() {
        let flags = sym.flags();

        if flags.contains(SymbolFlags::NEEDS_DYNSYM) {
            ctx.dynsym.add_symbol(&mut ctx.dynstr, sym);
        }

        if flags.contains(SymbolFlags::NEEDS_GOT) {
            ctx.got.add_got_symbol(sym);
        }

        if flags.contains(SymbolFlags::NEEDS_PLT) {
            if flags.contains(SymbolFlags::NEEDS_GOT) {
                // The address already lives in .got; a lighter PLT entry
                // that loads from there is enough.
                ctx.pltgot.add_symbol(sym);
            } else {
                ctx.plt.add_symbol(&mut ctx.gotplt, &mut ctx.relplt, sym);
            }
        }

        if flags.contains(SymbolFlags::NEEDS_GOTTPOFF) {
            ctx.got.add_gottpoff_symbol(sym);
        }

        if flags.contains(SymbolFlags::NEEDS_TLSGD) {
            ctx.got.add_tlsgd_symbol(sym);
        }

        if flags.contains(SymbolFlags::NEEDS_TLSDESC) {
            ctx.got.add_tlsdesc_symbol(sym);
        }

        if flags.contains(SymbolFlags::NEEDS_TLSLD) {
            ctx.got.add_tlsld();
        }

        if flags.contains(SymbolFlags::NEEDS_COPYREL) {
            add_copy_relocation(ctx, sym);
        }
    }
}

/// Reserves `.dynbss` (or `.dynbss.rel.ro`) space for a symbol from a shared
/// object and propagates the placement to every alias the DSO defines at the
/// same address.
fn add_copy_relocation(ctx: &mut Context, sym: &Arc<Symbol>) {
    let Some(owner) = sym.file() else {
        return;
    };

    // Only symbols owned by a DSO can need a copy relocation.
    let (readonly, size, aliases) = {
        let Some(dso) = ctx.dso(owner) else {
            return;
        };
        let size = sym
            .sym_idx()
            .and_then(|i| dso.elf_syms.get(i))
            .map_or(0, |e| e.size);
        (dso.is_readonly(sym), size, dso.find_aliases(sym))
    };

    sym.set_copyrel_readonly(readonly);
    if readonly {
        ctx.dynbss_relro.add_symbol(sym, size);
    } else {
        ctx.dynbss.add_symbol(sym, size);
    }

    for alias in aliases {
        alias.set_has_copyrel();
        alias.set_value(sym.value());
        alias.set_copyrel_readonly(readonly);
        ctx.dynsym.add_symbol(&mut ctx.dynstr, &alias);
    }
}
