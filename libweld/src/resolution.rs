//! Symbol resolution across objects and shared objects, archive liveness,
//! COMDAT deduplication and the related cleanup passes.

use crate::context::Context;
use crate::input_files::FileId;
use crate::input_files::ObjectFile;
use anyhow::anyhow;
use object::elf;
use rayon::Scope;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::IntoParallelRefMutIterator;
use rayon::iter::ParallelIterator;
use std::sync::atomic::Ordering::Relaxed;

/// Flags objects originating from excluded archives; later passes keep their
/// symbols out of the dynamic symbol table.
#[tracing::instrument(skip_all, name = "Apply exclude-libs")]
pub(crate) fn apply_exclude_libs(ctx: &mut Context) {
    if ctx.args.exclude_libs.is_empty() {
        return;
    }

    let all = ctx.args.exclude_libs.iter().any(|n| n == "ALL");
    for obj in &mut ctx.objs {
        if let Some(archive) = obj.archive_name {
            if all || ctx.args.exclude_libs.iter().any(|n| n == archive) {
                obj.exclude_libs = true;
            }
        }
    }
}

/// Assigns resolution priorities: 1 is reserved for the internal file,
/// non-archive objects come next in input order, then archive members, then
/// shared objects.
#[tracing::instrument(skip_all, name = "Assign file priorities")]
pub(crate) fn set_file_priority(ctx: &mut Context) {
    let mut priority = 2;

    for obj in ctx.objs.iter_mut().filter(|o| !o.is_in_lib) {
        obj.priority = priority;
        priority += 1;
    }
    for obj in ctx.objs.iter_mut().filter(|o| o.is_in_lib) {
        obj.priority = priority;
        priority += 1;
    }
    for dso in &mut ctx.dsos {
        dso.priority = priority;
        priority += 1;
    }
}

/// Resolves definitions among relocatable objects and decides which archive
/// members take part in the link.
#[tracing::instrument(skip_all, name = "Resolve object symbols")]
pub(crate) fn resolve_obj_symbols(ctx: &mut Context) {
    // Archive members publish their definitions first, as lazy: this way a
    // regular definition always outranks them no matter the file order.
    ctx.objs
        .par_iter()
        .filter(|o| o.is_in_lib)
        .for_each(ObjectFile::resolve_symbols);

    ctx.objs
        .par_iter()
        .filter(|o| !o.is_in_lib)
        .for_each(ObjectFile::resolve_symbols);

    // Liveness roots: files that are live by construction, plus the owners
    // of names the user forced with `-u`.
    let mut roots: Vec<FileId> = ctx
        .objs
        .iter()
        .filter(|o| o.is_alive.load(Relaxed))
        .map(|o| o.file_id)
        .collect();

    for name in &ctx.args.undefined {
        let Some(sym) = ctx.symbol_table.get(name.as_bytes()) else {
            continue;
        };
        let Some(owner) = sym.file() else {
            continue;
        };
        if let Some(obj) = ctx.object(owner) {
            if !obj.is_alive.swap(true, Relaxed) {
                roots.push(owner);
            }
        }
    }

    // Drain the worklist with a work-stealing scope: every newly woken
    // archive member explores what it pulls in, in parallel.
    let ctx_ref: &Context = ctx;
    rayon::in_place_scope(|scope| {
        for root in roots {
            scope.spawn(move |scope| mark_live(ctx_ref, root, scope));
        }
    });

    // Eliminated objects release their symbol slots before being pruned.
    ctx.objs.par_iter().for_each(|obj| {
        if !obj.is_alive.load(Relaxed) {
            obj.clear_dead_symbols();
        }
    });

    ctx.objs.retain(|o| o.is_alive.load(Relaxed));
    ctx.reindex_files();
}

fn mark_live<'scope, 'data: 'scope>(
    ctx: &'scope Context<'data>,
    file: FileId,
    scope: &Scope<'scope>,
) {
    let Some(obj) = ctx.object(file) else {
        return;
    };
    obj.mark_live_objects(ctx, &|next| {
        scope.spawn(move |scope| mark_live(ctx, next, scope));
    });
}

/// Resolves definitions published by shared objects and decides which DSOs
/// the output will actually depend on.
#[tracing::instrument(skip_all, name = "Resolve shared-object symbols")]
pub(crate) fn resolve_dso_symbols(ctx: &mut Context) {
    ctx.dsos.par_iter().for_each(|dso| dso.resolve_symbols());

    // A DSO stays in the link only if some object references one of its
    // definitions. A non-weak reference also strips the provisional
    // weakness from the DSO definition.
    let ctx_ref: &Context = ctx;
    ctx.objs.par_iter().for_each(|obj| {
        for (_, esym, sym) in obj.globals() {
            if esym.is_defined() {
                continue;
            }

            let Some(owner) = sym.file() else {
                continue;
            };
            let Some(dso) = ctx_ref.dso(owner) else {
                continue;
            };

            dso.is_alive.store(true, Relaxed);

            if !esym.is_weak() {
                sym.clear_weak();
            }
        }
    });

    ctx.dsos.par_iter().for_each(|dso| {
        if !dso.is_alive.load(Relaxed) {
            dso.clear_dead_symbols();
        }
    });

    ctx.dsos.retain(|d| d.is_alive.load(Relaxed));
    ctx.reindex_files();
}

/// Keeps exactly one instance per COMDAT key: each object first bids for its
/// groups, then losing instances null out their member sections.
#[tracing::instrument(skip_all, name = "Eliminate duplicate COMDAT groups")]
pub(crate) fn eliminate_comdats(ctx: &mut Context) {
    ctx.objs
        .par_iter()
        .for_each(ObjectFile::resolve_comdat_groups);

    ctx.objs
        .par_iter_mut()
        .for_each(ObjectFile::eliminate_duplicate_comdat_groups);
}

/// Converts COMMON symbols into `.bss` definitions in their owning objects.
#[tracing::instrument(skip_all, name = "Convert COMMON symbols")]
pub(crate) fn convert_common_symbols(ctx: &mut Context) {
    let bss = ctx.output_section_for(
        ".bss",
        elf::SHT_NOBITS,
        u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
    );

    ctx.objs
        .par_iter_mut()
        .for_each(|obj| obj.convert_common_symbols(bss));
}

/// Reports every pair of conflicting strong definitions, then aborts the
/// link if any were found.
#[tracing::instrument(skip_all, name = "Check duplicate symbols")]
pub(crate) fn check_duplicate_symbols(ctx: &mut Context) -> crate::error::Result {
    let ctx_ref: &Context = ctx;
    ctx.objs.par_iter().for_each(|obj| {
        for (_, esym, sym) in obj.globals() {
            let is_eliminated = match esym.section {
                crate::elf::SymbolPlacement::Section(index) => obj.section(index).is_none(),
                _ => false,
            };

            if !sym.owner_is(obj.file_id)
                && esym.is_defined()
                && !esym.is_common()
                && !esym.is_weak()
                && !is_eliminated
            {
                let owner = sym
                    .file()
                    .map(|id| ctx_ref.file_display(id))
                    .unwrap_or_else(|| "<none>".to_owned());
                ctx_ref.errors.report(anyhow!(
                    "duplicate symbol: {obj}: {owner}: {sym}"
                ));
            }
        }
    });

    ctx.errors.checkpoint()
}

/// Undefined weak symbols that survived resolution unresolved become benign
/// zero-valued definitions.
#[tracing::instrument(skip_all, name = "Convert undefined weak symbols")]
pub(crate) fn convert_undefined_weak_symbols(ctx: &mut Context) {
    let shared = ctx.args.shared;
    ctx.objs
        .par_iter()
        .for_each(|obj| obj.convert_undefined_weak_symbols(shared));
}
