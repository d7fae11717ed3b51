//! The core pipeline of the weld linker.
//!
//! Given already-parsed relocatable objects and shared objects, this crate
//! resolves symbols, deduplicates COMDAT groups, merges and bins sections,
//! scans relocations to populate the synthetic sections (GOT, PLT, dynamic
//! symbol and version tables), lays the output file out with page-skewed
//! segment offsets, and pins the linker-defined symbols. Parsing inputs and
//! writing section bytes are the driver's and writer's jobs; they talk to
//! this crate through [`Context`].

pub(crate) mod alignment;
pub mod args;
pub(crate) mod binning;
pub(crate) mod chunks;
pub mod context;
pub mod elf;
pub mod error;
pub(crate) mod hash;
pub mod input_files;
pub(crate) mod layout;
pub(crate) mod reloc_scan;
pub(crate) mod resolution;
pub(crate) mod string_merging;
pub mod symbol;
pub(crate) mod symbol_db;
pub(crate) mod synthetic_symbols;
pub(crate) mod versions;

pub use args::Args;
pub use args::BuildIdKind;
pub use args::VersionPattern;
pub use chunks::DynamicEntry;
pub use context::Context;
pub use elf::ElfSym;
pub use elf::PAGE_SIZE;
pub use elf::Rela;
pub use elf::RelocationKind;
pub use elf::SectionHeader;
pub use elf::SymbolPlacement;
pub use elf::Visibility;
pub use error::Result;
pub use input_files::FileId;
pub use symbol::Symbol;
pub use symbol::SymbolFlags;

/// Runs the whole middle-end over a populated [`Context`]. On success the
/// context holds the final chunk layout, the sized output buffer with all
/// padding zeroed, and every synthetic symbol pinned. Returns the output
/// file size.
#[tracing::instrument(skip_all, name = "Link")]
pub fn link(ctx: &mut Context) -> Result<u64> {
    resolution::apply_exclude_libs(ctx);
    synthetic_symbols::create_internal_symbols(ctx);
    ctx.create_synthetic_sections();
    resolution::set_file_priority(ctx);

    resolution::resolve_obj_symbols(ctx);
    resolution::resolve_dso_symbols(ctx);
    resolution::eliminate_comdats(ctx);
    resolution::convert_common_symbols(ctx);

    versions::apply_version_patterns(ctx);
    versions::parse_symbol_versions(ctx)?;
    versions::compute_import_export(ctx);

    resolution::check_duplicate_symbols(ctx)?;

    string_merging::compute_merged_section_sizes(ctx);
    binning::bin_sections(ctx);
    binning::compute_section_sizes(ctx);

    resolution::convert_undefined_weak_symbols(ctx);
    reloc_scan::scan_relocations(ctx)?;

    versions::fill_verdef(ctx);
    versions::fill_verneed(ctx);

    layout::finalize_synthetic_sizes(ctx);
    layout::sort_chunks(ctx);
    layout::mark_segment_boundaries(ctx);
    layout::assign_shndx(ctx);
    let file_size = layout::assign_chunk_offsets(ctx);

    synthetic_symbols::fix_synthetic_symbols(ctx);
    layout::clear_padding(ctx);

    Ok(file_size)
}
