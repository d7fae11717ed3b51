//! Merged sections deduplicate byte fragments (strings, constants) across
//! input files. Parsers intern each mergeable piece of an input section here
//! and keep a fragment reference; equal content collapses to one fragment.
//!
//! Fragment liveness starts false and flips on when something references the
//! fragment. With `--gc-sections` disabled, every fragment reachable from a
//! live object is marked alive wholesale before offsets are assigned.

use crate::alignment::align_to;
use crate::chunks::ChunkCommon;
use crate::chunks::ChunkKind;
use crate::context::Context;
use crate::hash::hash_bytes;
use crate::hash::PreHashed;
use hashbrown::hash_table;
use hashbrown::HashTable;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::IntoParallelRefMutIterator;
use rayon::iter::ParallelIterator;
use std::borrow::Cow;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;

pub(crate) struct SectionFragment<'data> {
    bytes: Cow<'data, [u8]>,
    pub(crate) alignment: u64,
    pub(crate) offset: u64,
    pub(crate) is_alive: AtomicBool,
}

impl SectionFragment<'_> {
    pub(crate) fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub struct MergedSection<'data> {
    pub(crate) common: ChunkCommon<'data>,
    pub(crate) fragments: Vec<SectionFragment<'data>>,
    /// Fragment indices keyed by content, prehashed so growth never rehashes
    /// the fragment bytes.
    lookup: HashTable<PreHashed<u32>>,
}

impl<'data> MergedSection<'data> {
    pub(crate) fn new(name: &'data str, sh_type: u32, sh_flags: u64) -> Self {
        MergedSection {
            common: ChunkCommon::new(name, ChunkKind::Synthetic, sh_type, sh_flags, 1),
            fragments: Vec::new(),
            lookup: HashTable::new(),
        }
    }

    /// Interns `bytes`, returning the index of its fragment. Equal content
    /// across inputs collapses to a single fragment; the fragment keeps the
    /// largest alignment any insertion asked for.
    pub(crate) fn insert(&mut self, bytes: Cow<'data, [u8]>, alignment: u64) -> u32 {
        let hash = hash_bytes(&bytes);
        let fragments = &self.fragments;

        match self.lookup.entry(
            hash,
            |entry| *fragments[**entry as usize].bytes == *bytes,
            |entry| entry.hash(),
        ) {
            hash_table::Entry::Occupied(entry) => {
                let idx = **entry.get();
                let frag = &mut self.fragments[idx as usize];
                frag.alignment = frag.alignment.max(alignment);
                idx
            }
            hash_table::Entry::Vacant(entry) => {
                let idx = self.fragments.len() as u32;
                entry.insert(PreHashed::new(idx, hash));
                self.fragments.push(SectionFragment {
                    bytes,
                    alignment: alignment.max(1),
                    offset: 0,
                    is_alive: AtomicBool::new(false),
                });
                idx
            }
        }
    }

    pub(crate) fn fragment(&self, idx: u32) -> &SectionFragment<'data> {
        &self.fragments[idx as usize]
    }

    /// Assigns intra-section offsets to live fragments. Fragments are laid
    /// out in content order so the result does not depend on insertion
    /// interleaving.
    pub(crate) fn assign_offsets(&mut self) {
        let mut live: Vec<usize> = (0..self.fragments.len())
            .filter(|&i| self.fragments[i].is_alive.load(Relaxed))
            .collect();
        live.sort_by(|&a, &b| self.fragments[a].bytes.cmp(&self.fragments[b].bytes));

        let mut offset = 0;
        let mut max_alignment = 1;
        for idx in live {
            let frag = &mut self.fragments[idx];
            offset = align_to(offset, frag.alignment);
            frag.offset = offset;
            offset += frag.len();
            max_alignment = max_alignment.max(frag.alignment);
        }

        self.common.shdr.sh_size = offset;
        self.common.shdr.sh_addralign = max_alignment;
    }
}

/// Computes merged section contents: marks fragments, injects the `.comment`
/// identification strings, then assigns offsets per section in parallel.
#[tracing::instrument(skip_all, name = "Compute merged section sizes")]
pub(crate) fn compute_merged_section_sizes(ctx: &mut Context) {
    // Without section GC, every fragment of every live object survives.
    if !ctx.args.gc_sections {
        let merged = &ctx.merged_sections;
        ctx.objs.par_iter().for_each(|obj| {
            for frag_ref in &obj.fragments {
                merged[frag_ref.sec.as_usize()]
                    .fragment(frag_ref.frag)
                    .is_alive
                    .store(true, Relaxed);
            }
        });
    }

    let version_tag = format!("weld {}", env!("CARGO_PKG_VERSION")).into_bytes();
    add_comment_string(ctx, version_tag);

    let cmdline = format!("weld command line: {}", ctx.args.cmdline()).into_bytes();
    add_comment_string(ctx, cmdline);

    ctx.merged_sections
        .par_iter_mut()
        .for_each(MergedSection::assign_offsets);
}

fn add_comment_string(ctx: &mut Context, mut bytes: Vec<u8>) {
    bytes.push(0);
    let id = ctx.merged_section_for(".comment", object::elf::SHT_PROGBITS, 0);
    let sec = &mut ctx.merged_sections[id.as_usize()];
    let frag = sec.insert(Cow::Owned(bytes), 1);
    sec.fragment(frag).is_alive.store(true, Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_dedupes_and_keeps_max_alignment() {
        let mut sec = MergedSection::new(".rodata.str1.1", object::elf::SHT_PROGBITS, 0);
        let a = sec.insert(Cow::Borrowed(b"hello\0"), 1);
        let b = sec.insert(Cow::Borrowed(b"hello\0"), 8);
        let c = sec.insert(Cow::Borrowed(b"world\0"), 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(sec.fragment(a).alignment, 8);
    }

    #[test]
    fn offsets_cover_live_fragments_only() {
        let mut sec = MergedSection::new(".rodata.cst8", object::elf::SHT_PROGBITS, 0);
        let a = sec.insert(Cow::Borrowed(&[1u8; 8]), 8);
        let dead = sec.insert(Cow::Borrowed(&[2u8; 8]), 8);
        let b = sec.insert(Cow::Borrowed(&[3u8; 4]), 4);
        sec.fragment(a).is_alive.store(true, Relaxed);
        sec.fragment(b).is_alive.store(true, Relaxed);
        sec.assign_offsets();

        assert_eq!(sec.common.shdr.sh_addralign, 8);
        let frag_a = sec.fragment(a);
        let frag_b = sec.fragment(b);
        // Fragments appear at most once and fit within the section.
        assert!(frag_a.offset + frag_a.len() <= sec.common.shdr.sh_size);
        assert!(frag_b.offset + frag_b.len() <= sec.common.shdr.sh_size);
        assert_ne!(frag_a.offset, frag_b.offset);
        let _ = dead;
    }
}
