//! Symbol versioning: version-script patterns, embedded `name@ver` suffixes,
//! the import/export policy they feed into, and the `.gnu.version*` tables.

use crate::context::Context;
use crate::elf::VER_NDX_LAST_RESERVED;
use crate::elf::Visibility;
use crate::error::Result;
use crate::hash::elf_hash;
use anyhow::anyhow;
use foldhash::HashMap;
use object::elf;
use object::pod::bytes_of;
use object::LittleEndian as LE;
use object::U16;
use object::U32;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::sync::Arc;
use symbolic_common::Language;
use symbolic_common::Name;
use symbolic_common::NameMangling;
use symbolic_demangle::Demangle;
use symbolic_demangle::DemangleOptions;

const VERDEF_SIZE: usize = size_of::<elf::Verdef<LE>>();
const VERDAUX_SIZE: usize = size_of::<elf::Verdaux<LE>>();
const VERNEED_SIZE: usize = size_of::<elf::Verneed<LE>>();
const VERNAUX_SIZE: usize = size_of::<elf::Vernaux<LE>>();

/// Demangles a C++ name the way version-script `extern "C++"` matching
/// expects; falls back to the raw name when the demangler gives up.
fn demangle_cpp(name: &str) -> String {
    Name::new(name, NameMangling::Mangled, Language::Cpp)
        .demangle(DemangleOptions::complete().return_type(false))
        .unwrap_or_else(|| name.to_owned())
}

/// Applies `--version-script` patterns to the symbols that objects own.
/// Plain names go straight through the intern table; globs are tested
/// against every owned global, first matching pattern wins.
#[tracing::instrument(skip_all, name = "Apply version script")]
pub(crate) fn apply_version_patterns(ctx: &mut Context) {
    let mut globs: Vec<(glob::Pattern, u16, bool)> = Vec::new();

    for pattern in &ctx.args.version_patterns {
        // The universal "*" pattern is resolved by the driver.
        debug_assert!(pattern.pattern != "*");

        if !pattern.is_extern_cpp && !pattern.pattern.contains(['*', '?', '[']) {
            ctx.symbol_table
                .intern(pattern.pattern.as_bytes())
                .set_ver_idx(pattern.ver_idx);
            continue;
        }

        match glob::Pattern::new(&pattern.pattern) {
            Ok(glob) => globs.push((glob, pattern.ver_idx, pattern.is_extern_cpp)),
            Err(_) => ctx.errors.report(anyhow!(
                "invalid version pattern: {}",
                pattern.pattern
            )),
        }
    }

    if globs.is_empty() {
        return;
    }

    ctx.objs.par_iter().for_each(|obj| {
        for (_, _, sym) in obj.globals() {
            if !sym.owner_is(obj.file_id) {
                continue;
            }
            let Ok(raw_name) = str::from_utf8(sym.name()) else {
                continue;
            };

            let mut demangled: Option<String> = None;
            for (glob, ver_idx, is_extern_cpp) in &globs {
                let name: &str = if *is_extern_cpp {
                    demangled.get_or_insert_with(|| demangle_cpp(raw_name))
                } else {
                    raw_name
                };
                if glob.matches(name) {
                    sym.set_ver_idx(*ver_idx);
                    break;
                }
            }
        }
    });
}

/// Resolves `name@ver` suffixes carried by object symbols. A leading `@` in
/// the recorded suffix marks the default version; otherwise the symbol is
/// hidden behind the version.
#[tracing::instrument(skip_all, name = "Parse symbol versions")]
pub(crate) fn parse_symbol_versions(ctx: &mut Context) -> Result {
    let verdefs: HashMap<&str, u16> = ctx
        .args
        .version_definitions
        .iter()
        .enumerate()
        .map(|(i, v)| (v.as_str(), i as u16 + VER_NDX_LAST_RESERVED + 1))
        .collect();

    {
        let ctx_ref: &Context = ctx;
        ctx.objs.par_iter().for_each(|obj| {
            for (i, ver) in obj.symvers.iter().enumerate() {
                let Some(ver) = ver else {
                    continue;
                };
                let sym = &obj.symbols[obj.first_global + i];
                if !sym.owner_is(obj.file_id) {
                    continue;
                }

                let (is_default, ver) = match ver.strip_prefix('@') {
                    Some(rest) => (true, rest),
                    None => (false, *ver),
                };

                match verdefs.get(ver) {
                    Some(&idx) => {
                        sym.set_ver_idx(if is_default {
                            idx
                        } else {
                            idx | elf::VERSYM_HIDDEN
                        });
                    }
                    None => ctx_ref.errors.report(anyhow!(
                        "{obj}: symbol {sym} has undefined version {ver}"
                    )),
                }
            }
        });
    }

    ctx.errors.checkpoint()
}

/// Decides which symbols cross the dynamic boundary in each direction.
#[tracing::instrument(skip_all, name = "Compute import/export")]
pub(crate) fn compute_import_export(ctx: &mut Context) {
    // For executables: a definition a surviving DSO wants becomes exported.
    if !ctx.args.shared {
        let ctx_ref: &Context = ctx;
        ctx.dsos.par_iter().for_each(|dso| {
            for sym in &dso.undefs {
                let Some(owner) = sym.file() else {
                    continue;
                };
                if ctx_ref.dso(owner).is_some() {
                    continue;
                }
                if sym.visibility() != Visibility::Hidden {
                    sym.set_exported(true);
                }
            }
        });
    }

    // Shared objects (and --export-dynamic) export their globals wholesale.
    if ctx.args.shared || ctx.args.export_dynamic {
        let args = ctx.args;
        ctx.objs
            .par_iter()
            .filter(|obj| !obj.exclude_libs)
            .for_each(|obj| {
                for (_, esym, sym) in obj.globals() {
                    if !sym.owner_is(obj.file_id) {
                        continue;
                    }
                    if sym.visibility() == Visibility::Hidden
                        || sym.ver_idx() == elf::VER_NDX_LOCAL
                    {
                        continue;
                    }

                    sym.set_exported(true);

                    // Exported DSO definitions are interposable, so they are
                    // also imports, unless -Bsymbolic pins them locally.
                    // Protected visibility always binds locally.
                    if args.shared
                        && sym.visibility() != Visibility::Protected
                        && !args.bsymbolic
                        && !(args.bsymbolic_functions && esym.is_function())
                    {
                        sym.set_imported(true);
                    }
                }
            });
    }
}

/// Emits `.gnu.version_d` for user-declared versions and stamps `.gnu.version`
/// with each dynamic symbol's version index.
#[tracing::instrument(skip_all, name = "Fill verdef")]
pub(crate) fn fill_verdef(ctx: &mut Context) {
    if ctx.args.version_definitions.is_empty() {
        return;
    }

    ctx.versym.resize_for(ctx.dynsym.num_symbols());

    let num_entries = ctx.args.version_definitions.len() + 1;
    let mut contents = Vec::with_capacity((VERDEF_SIZE + VERDAUX_SIZE) * num_entries);

    let base_name = ctx.args.verdef_base_name().to_owned();
    let entries = std::iter::once((base_name.as_str(), 1u16, elf::VER_FLG_BASE))
        .chain(
            ctx.args
                .version_definitions
                .iter()
                .enumerate()
                .map(|(i, v)| (v.as_str(), i as u16 + 2, 0)),
        )
        .collect::<Vec<_>>();

    for (i, &(verstr, idx, flags)) in entries.iter().enumerate() {
        let is_last = i + 1 == entries.len();
        let verdef = elf::Verdef::<LE> {
            vd_version: U16::new(LE, elf::VER_DEF_CURRENT),
            vd_flags: U16::new(LE, flags),
            vd_ndx: U16::new(LE, idx),
            vd_cnt: U16::new(LE, 1),
            vd_hash: U32::new(LE, elf_hash(verstr.as_bytes())),
            vd_aux: U32::new(LE, VERDEF_SIZE as u32),
            vd_next: U32::new(
                LE,
                if is_last {
                    0
                } else {
                    (VERDEF_SIZE + VERDAUX_SIZE) as u32
                },
            ),
        };
        contents.extend_from_slice(bytes_of(&verdef));

        let aux = elf::Verdaux::<LE> {
            vda_name: U32::new(LE, ctx.dynstr.add_string(verstr.as_bytes())),
            vda_next: U32::new(LE, 0),
        };
        contents.extend_from_slice(bytes_of(&aux));
    }

    ctx.verdef.common.shdr.sh_info = entries.len() as u32;
    ctx.verdef.common.shdr.sh_size = contents.len() as u64;
    ctx.verdef.contents = contents;

    let versym = &mut ctx.versym.contents;
    for sym in &ctx.dynsym.symbols {
        if let Some(idx) = sym.dynsym_idx() {
            versym[idx as usize] = sym.ver_idx();
        }
    }
}

/// Emits `.gnu.version_r`: one `Verneed` per shared object we import
/// versioned symbols from, one `Vernaux` per distinct version of it, and
/// rewrites `.gnu.version` entries with the assigned indices.
#[tracing::instrument(skip_all, name = "Fill verneed")]
pub(crate) fn fill_verneed<'data>(ctx: &mut Context<'data>) {
    if ctx.dynsym.symbols.is_empty() {
        return;
    }

    // Dynamic symbols that came from a DSO with a real version attached.
    let mut candidates: Vec<(&'data str, u16, Arc<crate::symbol::Symbol>)> = Vec::new();
    for sym in &ctx.dynsym.symbols {
        let Some(owner) = sym.file() else {
            continue;
        };
        let Some(dso) = ctx.dso(owner) else {
            continue;
        };
        let ver = sym.ver_idx() & !elf::VERSYM_HIDDEN;
        if ver <= VER_NDX_LAST_RESERVED {
            continue;
        }
        candidates.push((dso.soname, ver, sym.clone()));
    }

    if candidates.is_empty() {
        return;
    }

    candidates.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    ctx.versym.resize_for(ctx.dynsym.num_symbols());

    // Group by soname, then by version index within the group, resolving the
    // version strings through the owning DSO.
    let mut groups: Vec<(&'data str, Vec<(u16, String)>)> = Vec::new();
    for &(soname, ver, ref sym) in &candidates {
        let verstr = sym
            .file()
            .and_then(|owner| ctx.dso(owner))
            .map(|dso| dso.version_string(ver).to_owned())
            .unwrap_or_default();

        match groups.last_mut() {
            Some((last_soname, vers)) if *last_soname == soname => {
                if vers.last().map(|&(v, _)| v) != Some(ver) {
                    vers.push((ver, verstr));
                }
            }
            _ => groups.push((soname, vec![(ver, verstr)])),
        }
    }

    let mut veridx = VER_NDX_LAST_RESERVED + ctx.args.version_definitions.len() as u16;
    let mut assigned: HashMap<(&'data str, u16), u16> = HashMap::default();
    let mut contents = Vec::new();

    for (gi, (soname, vers)) in groups.iter().enumerate() {
        let is_last_group = gi + 1 == groups.len();
        let verneed = elf::Verneed::<LE> {
            vn_version: U16::new(LE, elf::VER_NEED_CURRENT),
            vn_cnt: U16::new(LE, vers.len() as u16),
            vn_file: U32::new(LE, ctx.dynstr.add_string(soname.as_bytes())),
            vn_aux: U32::new(LE, VERNEED_SIZE as u32),
            vn_next: U32::new(
                LE,
                if is_last_group {
                    0
                } else {
                    (VERNEED_SIZE + VERNAUX_SIZE * vers.len()) as u32
                },
            ),
        };
        contents.extend_from_slice(bytes_of(&verneed));

        for (vi, (ver, verstr)) in vers.iter().enumerate() {
            veridx += 1;
            assigned.insert((soname, *ver), veridx);

            let is_last_aux = vi + 1 == vers.len();
            let aux = elf::Vernaux::<LE> {
                vna_hash: U32::new(LE, elf_hash(verstr.as_bytes())),
                vna_flags: U16::new(LE, 0),
                vna_other: U16::new(LE, veridx),
                vna_name: U32::new(LE, ctx.dynstr.add_string(verstr.as_bytes())),
                vna_next: U32::new(LE, if is_last_aux { 0 } else { VERNAUX_SIZE as u32 }),
            };
            contents.extend_from_slice(bytes_of(&aux));
        }
    }

    let versym = &mut ctx.versym.contents;
    for (soname, ver, sym) in &candidates {
        if let (Some(idx), Some(&out)) = (sym.dynsym_idx(), assigned.get(&(*soname, *ver))) {
            versym[idx as usize] = out;
        }
    }

    ctx.verneed.common.shdr.sh_info = groups.len() as u32;
    ctx.verneed.common.shdr.sh_size = contents.len() as u64;
    ctx.verneed.contents = contents;
}
