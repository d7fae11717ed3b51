//! Builds the reverse edges from output sections to their input sections and
//! computes output section sizes.
//!
//! An output section may aggregate millions of input sections, so both the
//! binning and the size computation are sharded: binning shards over objects
//! with per-shard sink vectors merged afterwards, sizing shards each output
//! section's member list into fixed-size slabs.

use crate::alignment::align_to;
use crate::chunks::ChunkRef;
use crate::chunks::InputSectionRef;
use crate::context::Context;
use crate::input_files::ObjectFile;
use itertools::Itertools;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelIterator;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::IntoParallelRefMutIterator;
use rayon::iter::ParallelIterator;
use std::sync::atomic::Ordering::Relaxed;

/// Input sections per sizing slab.
const SIZING_SLAB: usize = 10_000;

/// Number of object shards used when binning.
const BIN_SHARDS: usize = 128;

#[tracing::instrument(skip_all, name = "Bin sections")]
pub(crate) fn bin_sections(ctx: &mut Context) {
    let num_osec = ctx.output_sections.len();
    if num_osec == 0 {
        collect_output_chunks(ctx);
        return;
    }

    let unit = ctx.objs.len().div_ceil(BIN_SHARDS).max(1);
    let shards = ctx.objs.chunks(unit).collect_vec();

    // Each shard fills its own per-output-section sink so no locking is
    // needed while scanning.
    let sinks: Vec<Vec<Vec<InputSectionRef>>> = shards
        .par_iter()
        .map(|shard| {
            let mut sink = vec![Vec::new(); num_osec];
            for obj in *shard {
                for (index, isec) in obj.sections.iter().enumerate() {
                    let Some(isec) = isec else {
                        continue;
                    };
                    sink[isec.output_section.as_usize()].push(InputSectionRef {
                        file: obj.file_id,
                        index: index as u32,
                    });
                }
            }
            sink
        })
        .collect();

    let mut sizes = vec![0usize; num_osec];
    for sink in &sinks {
        for (i, members) in sink.iter().enumerate() {
            sizes[i] += members.len();
        }
    }

    // Appending shard sinks in shard order keeps member order deterministic.
    ctx.output_sections
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, osec)| {
            osec.members.reserve(sizes[i]);
            for sink in &sinks {
                osec.members.extend_from_slice(&sink[i]);
            }
        });

    collect_output_chunks(ctx);
}

/// Appends the non-empty regular and merged sections to the chunk list,
/// sorted by `(name, sh_type, sh_flags)` for deterministic output.
fn collect_output_chunks(ctx: &mut Context) {
    let mut chunks: Vec<ChunkRef> = Vec::new();

    for (i, osec) in ctx.output_sections.iter().enumerate() {
        if !osec.members.is_empty() {
            chunks.push(ChunkRef::Output(crate::chunks::OutputSectionId(i as u32)));
        }
    }
    for (i, sec) in ctx.merged_sections.iter().enumerate() {
        if sec.common.shdr.sh_size != 0 {
            chunks.push(ChunkRef::Merged(crate::chunks::MergedSectionId(i as u32)));
        }
    }

    chunks.sort_by(|&a, &b| {
        let a = ctx.chunk_common(a);
        let b = ctx.chunk_common(b);
        (a.name, a.shdr.sh_type, a.shdr.sh_flags).cmp(&(
            b.name,
            b.shdr.sh_type,
            b.shdr.sh_flags,
        ))
    });

    ctx.chunks.extend(chunks);
}

/// Assigns every input section its offset within its output section and
/// fixes the output section's size and alignment.
#[tracing::instrument(skip_all, name = "Compute section sizes")]
pub(crate) fn compute_section_sizes(ctx: &mut Context) {
    let objs = &ctx.objs;

    ctx.output_sections.par_iter_mut().for_each(|osec| {
        if osec.members.is_empty() {
            return;
        }

        let slabs = osec.members.chunks(SIZING_SLAB).collect_vec();

        // Per slab: local offsets and the largest member alignment.
        let slab_results: Vec<(u64, u64)> = slabs
            .par_iter()
            .map(|slab| {
                let mut offset = 0;
                let mut alignment = 1;
                for member in *slab {
                    let Some(isec) = section_for(objs, member) else {
                        continue;
                    };
                    offset = align_to(offset, isec.shdr.sh_addralign);
                    isec.offset.store(offset, Relaxed);
                    offset += isec.shdr.sh_size;
                    alignment = alignment.max(isec.shdr.sh_addralign);
                }
                (offset, alignment)
            })
            .collect();

        let alignment = slab_results
            .iter()
            .map(|&(_, a)| a)
            .max()
            .unwrap_or(1);

        // Slab start offsets: cumulative, aligning each slab boundary to the
        // section's global alignment.
        let mut starts = vec![0u64; slabs.len()];
        for i in 1..slabs.len() {
            starts[i] = align_to(starts[i - 1] + slab_results[i - 1].0, alignment);
        }

        (1..slabs.len()).into_par_iter().for_each(|i| {
            for member in slabs[i] {
                if let Some(isec) = section_for(objs, member) {
                    isec.offset.fetch_add(starts[i], Relaxed);
                }
            }
        });

        osec.common.shdr.sh_size = starts.last().copied().unwrap_or(0)
            + slab_results.last().map(|&(size, _)| size).unwrap_or(0);
        osec.common.shdr.sh_addralign = alignment;
    });
}

fn section_for<'a, 'data>(
    objs: &'a [ObjectFile<'data>],
    member: &InputSectionRef,
) -> Option<&'a crate::input_files::InputSection<'data>> {
    // Objects stay sorted by file ID through pruning, so a binary search is
    // enough to get from a member reference back to its section.
    let index = objs
        .binary_search_by_key(&member.file, |o| o.file_id)
        .ok()?;
    objs[index].section(member.index)
}
