//! End-to-end tests for the link pipeline, driving it the way a parser
//! front-end would: build a `Context`, feed it pre-parsed inputs, link, then
//! inspect symbols and the chunk layout.

use libweld::Args;
use libweld::Context;
use libweld::ElfSym;
use libweld::FileId;
use libweld::PAGE_SIZE;
use libweld::Rela;
use libweld::RelocationKind;
use libweld::SymbolPlacement;
use libweld::VersionPattern;
use libweld::Visibility;
use libweld::link;
use object::LittleEndian as LE;
use object::elf;
use object::pod::from_bytes;

static CODE: [u8; 0x10] = [0; 0x10];
static RODATA: [u8; 0x100] = [0; 0x100];
static DATA: [u8; 0x50] = [0; 0x50];

fn sym(
    name: &'static str,
    bind: u8,
    st_type: u8,
    section: SymbolPlacement,
    value: u64,
    size: u64,
) -> ElfSym<'static> {
    ElfSym {
        name: name.as_bytes(),
        value,
        size,
        st_type,
        bind,
        visibility: Visibility::Default,
        section,
    }
}

fn global(name: &'static str, section: u32, value: u64) -> ElfSym<'static> {
    sym(
        name,
        elf::STB_GLOBAL,
        elf::STT_OBJECT,
        SymbolPlacement::Section(section),
        value,
        8,
    )
}

fn func(name: &'static str, section: u32, value: u64) -> ElfSym<'static> {
    sym(
        name,
        elf::STB_GLOBAL,
        elf::STT_FUNC,
        SymbolPlacement::Section(section),
        value,
        8,
    )
}

fn weak(name: &'static str, section: u32, value: u64) -> ElfSym<'static> {
    sym(
        name,
        elf::STB_WEAK,
        elf::STT_OBJECT,
        SymbolPlacement::Section(section),
        value,
        8,
    )
}

fn undef(name: &'static str) -> ElfSym<'static> {
    sym(
        name,
        elf::STB_GLOBAL,
        elf::STT_NOTYPE,
        SymbolPlacement::Undefined,
        0,
        0,
    )
}

fn weak_undef(name: &'static str) -> ElfSym<'static> {
    sym(
        name,
        elf::STB_WEAK,
        elf::STT_NOTYPE,
        SymbolPlacement::Undefined,
        0,
        0,
    )
}

fn text_flags() -> u64 {
    u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR)
}

fn add_text(ctx: &mut Context<'_>, file: FileId) -> u32 {
    ctx.add_input_section(
        file,
        ".text",
        elf::SHT_PROGBITS,
        text_flags(),
        16,
        &CODE,
        CODE.len() as u64,
    )
}

fn rela(kind: RelocationKind, sym: u32) -> Rela {
    Rela {
        offset: 0,
        kind,
        sym,
        addend: 0,
    }
}

/// Reads a NUL-terminated string out of a string table.
fn table_str(table: &[u8], offset: u32) -> String {
    let start = offset as usize;
    let end = start
        + table[start..]
            .iter()
            .position(|&b| b == 0)
            .expect("unterminated string");
    String::from_utf8_lossy(&table[start..end]).into_owned()
}

#[test]
fn strong_definition_beats_weak() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![weak("w", sa, 1)], 0, vec![None]);

    let b = ctx.add_object("b.o", None);
    let sb = add_text(&mut ctx, b);
    ctx.set_object_symbols(b, vec![global("w", sb, 2)], 0, vec![None]);

    link(&mut ctx).unwrap();

    let w = ctx.symbol(b"w").unwrap();
    assert_eq!(w.file(), Some(b));
    assert_eq!(w.value(), 2);
    assert!(!w.is_weak());
}

#[test]
fn weak_definition_beats_nothing() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![weak("w", sa, 1)], 0, vec![None]);

    link(&mut ctx).unwrap();

    let w = ctx.symbol(b"w").unwrap();
    assert_eq!(w.file(), Some(a));
    assert_eq!(w.value(), 1);
    assert!(w.is_weak());
}

#[test]
fn archive_members_are_pulled_in_transitively() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("f")], 0, vec![None]);

    let x = ctx.add_object("x.o", Some("libx.a"));
    let sx = add_text(&mut ctx, x);
    ctx.set_object_symbols(x, vec![func("f", sx, 0), undef("g")], 0, vec![None, None]);

    let y = ctx.add_object("y.o", Some("liby.a"));
    let sy = add_text(&mut ctx, y);
    ctx.set_object_symbols(y, vec![func("g", sy, 4)], 0, vec![None]);

    let z = ctx.add_object("z.o", Some("libz.a"));
    let sz = add_text(&mut ctx, z);
    ctx.set_object_symbols(z, vec![func("unused", sz, 0)], 0, vec![None]);

    link(&mut ctx).unwrap();

    let names: Vec<&str> = ctx.objs.iter().map(|o| o.name).collect();
    assert_eq!(names, ["a.o", "x.o", "y.o"]);

    assert_eq!(ctx.symbol(b"f").unwrap().file(), Some(x));
    assert_eq!(ctx.symbol(b"g").unwrap().file(), Some(y));
    // The dead member released its slot.
    assert_eq!(ctx.symbol(b"unused").unwrap().file(), None);
}

#[test]
fn forced_undefined_name_extracts_archive_member() {
    let args = Args {
        undefined: vec!["keep_me".to_owned()],
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let x = ctx.add_object("x.o", Some("libx.a"));
    let sx = add_text(&mut ctx, x);
    ctx.set_object_symbols(x, vec![func("keep_me", sx, 0)], 0, vec![None]);

    link(&mut ctx).unwrap();

    assert_eq!(ctx.objs.len(), 1);
    assert_eq!(ctx.symbol(b"keep_me").unwrap().file(), Some(x));
}

#[test]
fn duplicate_strong_definitions_fail_the_link() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![func("main", sa, 0)], 0, vec![None]);

    let b = ctx.add_object("b.o", None);
    let sb = add_text(&mut ctx, b);
    ctx.set_object_symbols(b, vec![func("main", sb, 0)], 0, vec![None]);

    let message = link(&mut ctx).unwrap_err().to_string();
    assert!(message.contains("duplicate symbol"), "{message}");
    assert!(message.contains("a.o"), "{message}");
    assert!(message.contains("b.o"), "{message}");
}

#[test]
fn unresolved_reference_fails_at_the_scan_checkpoint() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("missing")], 0, vec![None]);
    ctx.add_relocations(a, text, vec![rela(RelocationKind::Pc32, 0)]);

    let message = link(&mut ctx).unwrap_err().to_string();
    assert!(message.contains("undefined symbol"), "{message}");
    assert!(message.contains("missing"), "{message}");
}

#[test]
fn undefined_weak_resolves_to_zero_without_dynamic_linkage() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![weak_undef("maybe")], 0, vec![None]);
    ctx.add_relocations(a, text, vec![rela(RelocationKind::Pc32, 0)]);

    link(&mut ctx).unwrap();

    let maybe = ctx.symbol(b"maybe").unwrap();
    assert_eq!(maybe.file(), Some(a));
    assert_eq!(maybe.value(), 0);
    assert!(maybe.is_weak());
    assert_eq!(maybe.dynsym_idx(), None);
}

fn copyrel_scenario(readonly: bool) {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("x")], 0, vec![None]);
    ctx.add_relocations(a, text, vec![rela(RelocationKind::Abs64, 0)]);

    let dso = ctx.add_dso("libfoo.so", "libfoo.so.1");
    ctx.set_dso_symbols(
        dso,
        vec![global("x", 1, 0x1000), global("y", 1, 0x1000)],
        vec![readonly, readonly],
        vec![elf::VER_NDX_GLOBAL, elf::VER_NDX_GLOBAL],
        vec![],
    );

    link(&mut ctx).unwrap();

    let x = ctx.symbol(b"x").unwrap();
    let y = ctx.symbol(b"y").unwrap();

    assert_eq!(x.file(), Some(dso));
    assert!(x.has_copyrel());
    assert_eq!(x.copyrel_readonly(), readonly);
    assert_eq!(x.dynsym_idx(), Some(1));

    // The alias inherits the placement and gets its own dynsym slot.
    assert!(y.has_copyrel());
    assert_eq!(y.value(), x.value());
    assert_eq!(y.copyrel_readonly(), readonly);
    assert_eq!(y.dynsym_idx(), Some(2));

    let section = if readonly { ".dynbss.rel.ro" } else { ".dynbss" };
    let shdr = ctx.find_chunk(section).expect("copy-reloc section");
    assert_eq!(shdr.sh_size, 8);
    assert_eq!(shdr.sh_type, elf::SHT_NOBITS);
}

#[test]
fn copyrel_places_symbol_and_aliases() {
    copyrel_scenario(false);
}

#[test]
fn copyrel_readonly_goes_to_relro_dynbss() {
    copyrel_scenario(true);
}

#[test]
fn layout_respects_page_skew() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let _ro = ctx.add_input_section(
        a,
        ".rodata",
        elf::SHT_PROGBITS,
        u64::from(elf::SHF_ALLOC),
        4,
        &RODATA,
        RODATA.len() as u64,
    );
    let _rw = ctx.add_input_section(
        a,
        ".data",
        elf::SHT_PROGBITS,
        u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
        8,
        &DATA,
        DATA.len() as u64,
    );
    ctx.set_object_symbols(a, vec![], 0, vec![]);

    let file_size = link(&mut ctx).unwrap();
    assert_eq!(file_size, ctx.file_size());

    let rodata = ctx.find_chunk(".rodata").expect(".rodata chunk");
    assert_eq!(rodata.sh_addr, 0x400120);
    assert_eq!(rodata.sh_offset, 0x120);

    // The writable segment starts on a fresh page with offset and address
    // congruent modulo the page size.
    let data = ctx.find_chunk(".data").expect(".data chunk");
    assert_eq!(data.sh_addr, 0x401000);
    assert_eq!(data.sh_offset % PAGE_SIZE, 0);

    for (name, shdr) in ctx.chunk_headers() {
        if shdr.sh_flags & u64::from(elf::SHF_ALLOC) != 0 && shdr.sh_addr != 0 {
            assert_eq!(
                shdr.sh_offset % PAGE_SIZE,
                shdr.sh_addr % PAGE_SIZE,
                "page skew violated for {name}"
            );
        }
    }
}

#[test]
fn input_section_offsets_stay_within_their_output_section() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let mut sections = Vec::new();
    for align in [1u64, 16, 4, 32] {
        sections.push(ctx.add_input_section(
            a,
            ".text",
            elf::SHT_PROGBITS,
            text_flags(),
            align,
            &CODE,
            CODE.len() as u64,
        ));
    }
    ctx.set_object_symbols(a, vec![], 0, vec![]);

    link(&mut ctx).unwrap();

    let text = ctx.find_chunk(".text").expect(".text chunk");
    assert_eq!(text.sh_addralign, 32);

    let obj = &ctx.objs[0];
    for &index in &sections {
        let isec = obj.section(index).unwrap();
        assert_eq!(isec.offset() % isec.shdr.sh_addralign, 0);
        assert!(isec.offset() + isec.shdr.sh_size <= text.sh_size);
    }
}

#[test]
fn comdat_keeps_exactly_one_group() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.add_comdat_group(a, b"inline_fn", vec![sa]);
    ctx.set_object_symbols(a, vec![], 0, vec![]);

    let b = ctx.add_object("b.o", None);
    let sb = add_text(&mut ctx, b);
    ctx.add_comdat_group(b, b"inline_fn", vec![sb]);
    ctx.set_object_symbols(b, vec![], 0, vec![]);

    link(&mut ctx).unwrap();

    // The lower-priority file keeps its instance; the loser's sections are
    // nulled out.
    assert!(ctx.objs[0].section(sa).is_some());
    assert!(ctx.objs[1].section(sb).is_none());

    let text = ctx.find_chunk(".text").expect(".text chunk");
    assert_eq!(text.sh_size, CODE.len() as u64);
}

#[test]
fn common_symbols_become_bss_definitions() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    add_text(&mut ctx, a);
    ctx.set_object_symbols(
        a,
        vec![sym(
            "buffer",
            elf::STB_GLOBAL,
            elf::STT_OBJECT,
            SymbolPlacement::Common,
            8, // alignment carried in st_value for COMMON
            32,
        )],
        0,
        vec![None],
    );

    link(&mut ctx).unwrap();

    let buffer = ctx.symbol(b"buffer").unwrap();
    assert_eq!(buffer.file(), Some(a));
    assert_eq!(buffer.value(), 0);

    let bss = ctx.find_chunk(".bss").expect(".bss chunk");
    assert_eq!(bss.sh_type, elf::SHT_NOBITS);
    assert_eq!(bss.sh_size, 32);
}

#[test]
fn merged_fragments_dedupe_across_objects() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let merge_flags = u64::from(elf::SHF_ALLOC | elf::SHF_MERGE | elf::SHF_STRINGS);

    let a = ctx.add_object("a.o", None);
    add_text(&mut ctx, a);
    ctx.add_merged_fragment(a, ".rodata.str1.1", elf::SHT_PROGBITS, merge_flags, b"hello\0", 1);
    ctx.set_object_symbols(a, vec![], 0, vec![]);

    let b = ctx.add_object("b.o", None);
    add_text(&mut ctx, b);
    ctx.add_merged_fragment(b, ".rodata.str1.1", elf::SHT_PROGBITS, merge_flags, b"hello\0", 1);
    ctx.add_merged_fragment(b, ".rodata.str1.1", elf::SHT_PROGBITS, merge_flags, b"world\0", 1);
    ctx.set_object_symbols(b, vec![], 0, vec![]);

    link(&mut ctx).unwrap();

    // "hello\0" appears once.
    let merged = ctx.find_chunk(".rodata.str1.1").expect("merged chunk");
    assert_eq!(merged.sh_size, 12);

    // The identification strings always land in .comment.
    let comment = ctx.find_chunk(".comment").expect(".comment chunk");
    assert!(comment.sh_size > 0);
}

#[test]
fn no_version_tables_without_versions() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("f")], 0, vec![None]);
    ctx.add_relocations(a, text, vec![rela(RelocationKind::GotPcRel, 0)]);

    let dso = ctx.add_dso("libc.so", "libc.so.6");
    ctx.set_dso_symbols(
        dso,
        vec![func("f", 1, 0x100)],
        vec![false],
        vec![elf::VER_NDX_GLOBAL],
        vec![],
    );

    link(&mut ctx).unwrap();

    assert!(ctx.find_chunk(".gnu.version_d").is_none());
    assert!(ctx.find_chunk(".gnu.version_r").is_none());
    assert!(ctx.find_chunk(".dynsym").is_some());
}

#[test]
fn verdef_encodes_base_and_user_versions() {
    let args = Args {
        shared: true,
        soname: Some("libx.so.1".to_owned()),
        version_definitions: vec!["VERS_1".to_owned()],
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![func("foo", sa, 0)], 0, vec![Some("@VERS_1")]);

    link(&mut ctx).unwrap();

    let foo = ctx.symbol(b"foo").unwrap();
    assert_eq!(foo.ver_idx(), 2);
    assert_eq!(foo.dynsym_idx(), Some(1));

    // .gnu.version: entry 0 is local, foo carries its version index.
    assert_eq!(ctx.versym_table(), &[0, 2]);

    let bytes = ctx.verdef_bytes();
    let verdef = ctx.find_chunk(".gnu.version_d").expect("verdef chunk");
    assert_eq!(verdef.sh_size as usize, bytes.len());
    assert_eq!(verdef.sh_info, 2);

    let (base, _) = from_bytes::<elf::Verdef<LE>>(bytes).unwrap();
    assert_eq!(base.vd_version.get(LE), elf::VER_DEF_CURRENT);
    assert_eq!(base.vd_flags.get(LE), elf::VER_FLG_BASE);
    assert_eq!(base.vd_ndx.get(LE), 1);
    assert_eq!(base.vd_cnt.get(LE), 1);

    let aux_offset = base.vd_aux.get(LE) as usize;
    let (base_aux, _) = from_bytes::<elf::Verdaux<LE>>(&bytes[aux_offset..]).unwrap();
    assert_eq!(
        table_str(ctx.dynstr_bytes(), base_aux.vda_name.get(LE)),
        "libx.so.1"
    );

    let next = base.vd_next.get(LE) as usize;
    let (user, _) = from_bytes::<elf::Verdef<LE>>(&bytes[next..]).unwrap();
    assert_eq!(user.vd_ndx.get(LE), 2);
    assert_eq!(user.vd_next.get(LE), 0);

    let aux_offset = next + user.vd_aux.get(LE) as usize;
    let (user_aux, _) = from_bytes::<elf::Verdaux<LE>>(&bytes[aux_offset..]).unwrap();
    assert_eq!(
        table_str(ctx.dynstr_bytes(), user_aux.vda_name.get(LE)),
        "VERS_1"
    );
}

#[test]
fn symbol_version_suffix_controls_hidden_bit() {
    let args = Args {
        shared: true,
        version_definitions: vec!["V1".to_owned()],
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(
        a,
        vec![func("foo", sa, 0), func("bar", sa, 4)],
        0,
        vec![Some("@V1"), Some("V1")],
    );

    link(&mut ctx).unwrap();

    // `@V1` is the default version; a bare `V1` hides the symbol behind it.
    assert_eq!(ctx.symbol(b"foo").unwrap().ver_idx(), 2);
    assert_eq!(
        ctx.symbol(b"bar").unwrap().ver_idx(),
        2 | elf::VERSYM_HIDDEN
    );
}

#[test]
fn unknown_symbol_version_is_an_error() {
    let args = Args {
        shared: true,
        version_definitions: vec!["V1".to_owned()],
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![func("foo", sa, 0)], 0, vec![Some("NOPE")]);

    let message = link(&mut ctx).unwrap_err().to_string();
    assert!(message.contains("undefined version"), "{message}");
    assert!(message.contains("NOPE"), "{message}");
}

#[test]
fn version_patterns_assign_indices() {
    let args = Args {
        shared: true,
        version_patterns: vec![
            VersionPattern {
                pattern: "foo".to_owned(),
                ver_idx: 5,
                is_extern_cpp: false,
            },
            VersionPattern {
                pattern: "bar*".to_owned(),
                ver_idx: 6,
                is_extern_cpp: false,
            },
            VersionPattern {
                pattern: "ns::*".to_owned(),
                ver_idx: 7,
                is_extern_cpp: true,
            },
        ],
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(
        a,
        vec![
            func("foo", sa, 0),
            func("bar_one", sa, 4),
            func("_ZN2ns3funEv", sa, 8),
            func("plain", sa, 12),
        ],
        0,
        vec![None; 4],
    );

    link(&mut ctx).unwrap();

    assert_eq!(ctx.symbol(b"foo").unwrap().ver_idx(), 5);
    assert_eq!(ctx.symbol(b"bar_one").unwrap().ver_idx(), 6);
    assert_eq!(ctx.symbol(b"_ZN2ns3funEv").unwrap().ver_idx(), 7);
    assert_eq!(
        ctx.symbol(b"plain").unwrap().ver_idx(),
        elf::VER_NDX_GLOBAL
    );
}

#[test]
fn verneed_round_trips_soname_version_pairs() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("f1"), undef("f2")], 0, vec![None, None]);
    ctx.add_relocations(
        a,
        text,
        vec![
            rela(RelocationKind::GotPcRel, 0),
            rela(RelocationKind::GotPcRel, 1),
        ],
    );

    let dso = ctx.add_dso("libv.so", "libv.so.6");
    ctx.set_dso_symbols(
        dso,
        vec![func("f1", 1, 0x10), func("f2", 1, 0x20)],
        vec![false, false],
        vec![2, 3],
        vec!["", "", "V1", "V2"],
    );

    link(&mut ctx).unwrap();

    let bytes = ctx.verneed_bytes();
    let verneed = ctx.find_chunk(".gnu.version_r").expect("verneed chunk");
    assert_eq!(verneed.sh_size as usize, bytes.len());
    assert_eq!(verneed.sh_info, 1);

    // Decode the chain back into (soname, version) pairs.
    let dynstr = ctx.dynstr_bytes();
    let mut pairs = Vec::new();
    let mut offset = 0usize;
    loop {
        let (vn, _) = from_bytes::<elf::Verneed<LE>>(&bytes[offset..]).unwrap();
        let soname = table_str(dynstr, vn.vn_file.get(LE));

        let mut aux_offset = offset + vn.vn_aux.get(LE) as usize;
        for _ in 0..vn.vn_cnt.get(LE) {
            let (aux, _) = from_bytes::<elf::Vernaux<LE>>(&bytes[aux_offset..]).unwrap();
            pairs.push((
                soname.clone(),
                table_str(dynstr, aux.vna_name.get(LE)),
                aux.vna_other.get(LE),
            ));
            if aux.vna_next.get(LE) == 0 {
                break;
            }
            aux_offset += aux.vna_next.get(LE) as usize;
        }

        if vn.vn_next.get(LE) == 0 {
            break;
        }
        offset += vn.vn_next.get(LE) as usize;
    }

    assert_eq!(
        pairs,
        [
            ("libv.so.6".to_owned(), "V1".to_owned(), 2),
            ("libv.so.6".to_owned(), "V2".to_owned(), 3),
        ]
    );

    // .gnu.version reflects the assigned indices.
    let f1 = ctx.symbol(b"f1").unwrap();
    let f2 = ctx.symbol(b"f2").unwrap();
    assert_eq!(ctx.versym_table()[f1.dynsym_idx().unwrap() as usize], 2);
    assert_eq!(ctx.versym_table()[f2.dynsym_idx().unwrap() as usize], 3);
}

#[test]
fn got_and_plt_slots_are_assigned() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("qux"), undef("gdat")], 0, vec![None, None]);
    ctx.add_relocations(
        a,
        text,
        vec![
            rela(RelocationKind::Plt32, 0),
            rela(RelocationKind::GotPcRel, 1),
        ],
    );

    let dso = ctx.add_dso("libq.so", "libq.so.1");
    ctx.set_dso_symbols(
        dso,
        vec![func("qux", 1, 0x10), global("gdat", 1, 0x20)],
        vec![false, false],
        vec![elf::VER_NDX_GLOBAL, elf::VER_NDX_GLOBAL],
        vec![],
    );

    link(&mut ctx).unwrap();

    let qux = ctx.symbol(b"qux").unwrap();
    let gdat = ctx.symbol(b"gdat").unwrap();

    assert_eq!(qux.plt_idx(), Some(0));
    // Slots 0..3 of .got.plt are reserved for the dynamic linker.
    assert_eq!(qux.gotplt_idx(), Some(3));
    assert_eq!(gdat.got_idx(), Some(0));
    assert_eq!(qux.dynsym_idx(), Some(1));
    assert_eq!(gdat.dynsym_idx(), Some(2));

    assert_eq!(ctx.find_chunk(".plt").unwrap().sh_size, 32);
    assert_eq!(ctx.find_chunk(".got.plt").unwrap().sh_size, 32);
    assert_eq!(ctx.find_chunk(".rela.plt").unwrap().sh_size, 24);
    assert_eq!(ctx.find_chunk(".got").unwrap().sh_size, 8);
}

#[test]
fn plt_entry_reuses_got_slot_when_both_needed() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("qux")], 0, vec![None]);
    ctx.add_relocations(
        a,
        text,
        vec![
            rela(RelocationKind::Plt32, 0),
            rela(RelocationKind::GotPcRel, 0),
        ],
    );

    let dso = ctx.add_dso("libq.so", "libq.so.1");
    ctx.set_dso_symbols(
        dso,
        vec![func("qux", 1, 0x10)],
        vec![false],
        vec![elf::VER_NDX_GLOBAL],
        vec![],
    );

    link(&mut ctx).unwrap();

    let qux = ctx.symbol(b"qux").unwrap();
    assert_eq!(qux.got_idx(), Some(0));
    assert_eq!(qux.pltgot_idx(), Some(0));
    assert_eq!(qux.plt_idx(), None);
    assert_eq!(ctx.find_chunk(".plt.got").unwrap().sh_size, 8);
    assert!(ctx.find_chunk(".plt").is_none());
}

#[test]
fn shared_library_export_and_import_policy() {
    let args = Args {
        shared: true,
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    let mut hidden = func("internal", sa, 4);
    hidden.visibility = Visibility::Hidden;
    let mut protected = func("guarded", sa, 8);
    protected.visibility = Visibility::Protected;
    ctx.set_object_symbols(
        a,
        vec![func("api", sa, 0), hidden, protected],
        0,
        vec![None; 3],
    );

    link(&mut ctx).unwrap();

    let api = ctx.symbol(b"api").unwrap();
    assert!(api.is_exported());
    assert!(api.is_imported());

    let internal = ctx.symbol(b"internal").unwrap();
    assert!(!internal.is_exported());
    assert!(!internal.is_imported());

    // Protected symbols are exported but always bind locally.
    let guarded = ctx.symbol(b"guarded").unwrap();
    assert!(guarded.is_exported());
    assert!(!guarded.is_imported());
}

#[test]
fn bsymbolic_disables_import() {
    let args = Args {
        shared: true,
        bsymbolic: true,
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![func("api", sa, 0)], 0, vec![None]);

    link(&mut ctx).unwrap();

    let api = ctx.symbol(b"api").unwrap();
    assert!(api.is_exported());
    assert!(!api.is_imported());
}

#[test]
fn executables_export_what_dsos_reference() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![func("callback", sa, 0), undef("f")], 0, vec![None, None]);
    ctx.add_relocations(a, sa, vec![rela(RelocationKind::Plt32, 1)]);

    let dso = ctx.add_dso("libcb.so", "libcb.so.1");
    ctx.set_dso_symbols(
        dso,
        vec![func("f", 1, 0x10)],
        vec![false],
        vec![elf::VER_NDX_GLOBAL],
        vec![],
    );
    ctx.add_dso_undef(dso, b"callback");

    link(&mut ctx).unwrap();

    let callback = ctx.symbol(b"callback").unwrap();
    assert!(callback.is_exported());
    assert!(callback.dynsym_idx().is_some());
}

#[test]
fn excluded_archives_do_not_export() {
    let args = Args {
        export_dynamic: true,
        exclude_libs: vec!["libx.a".to_owned()],
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("f")], 0, vec![None]);

    let x = ctx.add_object("x.o", Some("libx.a"));
    let sx = add_text(&mut ctx, x);
    ctx.set_object_symbols(x, vec![func("f", sx, 0)], 0, vec![None]);

    link(&mut ctx).unwrap();

    let f = ctx.symbol(b"f").unwrap();
    assert_eq!(f.file(), Some(x));
    assert!(!f.is_exported());
}

#[test]
fn dynamic_section_names_needed_libraries() {
    let args = Args {
        soname: Some("libme.so.1".to_owned()),
        shared: true,
        ..Args::default()
    };
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let text = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![undef("f")], 0, vec![None]);
    ctx.add_relocations(a, text, vec![rela(RelocationKind::GotPcRel, 0)]);

    let dso = ctx.add_dso("libc.so", "libc.so.6");
    ctx.set_dso_symbols(
        dso,
        vec![func("f", 1, 0x10)],
        vec![false],
        vec![elf::VER_NDX_GLOBAL],
        vec![],
    );

    link(&mut ctx).unwrap();

    let entries = ctx.dynamic_entries();
    let needed = entries
        .iter()
        .find(|e| e.tag == u64::from(elf::DT_NEEDED))
        .expect("DT_NEEDED entry");
    assert_eq!(table_str(ctx.dynstr_bytes(), needed.value as u32), "libc.so.6");

    let soname = entries
        .iter()
        .find(|e| e.tag == u64::from(elf::DT_SONAME))
        .expect("DT_SONAME entry");
    assert_eq!(table_str(ctx.dynstr_bytes(), soname.value as u32), "libme.so.1");

    assert_eq!(entries.last().unwrap().tag, u64::from(elf::DT_NULL));

    let dynamic = ctx.find_chunk(".dynamic").expect(".dynamic chunk");
    assert_eq!(dynamic.sh_size, entries.len() as u64 * 16);
}

#[test]
fn start_and_stop_symbols_cover_custom_sections() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    ctx.add_input_section(
        a,
        "my_section",
        elf::SHT_PROGBITS,
        u64::from(elf::SHF_ALLOC),
        8,
        &CODE,
        CODE.len() as u64,
    );
    ctx.set_object_symbols(a, vec![], 0, vec![]);

    link(&mut ctx).unwrap();

    let chunk = ctx.find_chunk("my_section").expect("custom chunk");
    let start = ctx.symbol(b"__start_my_section").expect("start symbol");
    let stop = ctx.symbol(b"__stop_my_section").expect("stop symbol");

    assert_eq!(start.value(), chunk.sh_addr);
    assert_eq!(stop.value(), chunk.sh_addr + chunk.sh_size);
    assert_ne!(start.shndx(), 0);
}

#[test]
fn linker_defined_symbols_track_layout() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    add_text(&mut ctx, a);
    ctx.add_input_section(
        a,
        ".bss",
        elf::SHT_NOBITS,
        u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
        8,
        &[],
        64,
    );
    ctx.set_object_symbols(a, vec![], 0, vec![]);

    link(&mut ctx).unwrap();

    let bss = *ctx.find_chunk(".bss").expect(".bss chunk");
    let bss_start = ctx.symbol(b"__bss_start").unwrap();
    assert_eq!(bss_start.value(), bss.sh_addr);

    let ehdr_start = ctx.symbol(b"__ehdr_start").unwrap();
    assert_eq!(ehdr_start.value(), args.image_base);
    assert_eq!(ehdr_start.shndx(), 1);

    // _end covers the last allocated chunk, _etext the last executable one.
    let end = ctx.symbol(b"_end").unwrap();
    assert_eq!(end.value(), bss.sh_addr + bss.sh_size);

    let text = ctx.find_chunk(".text").expect(".text chunk");
    let etext = ctx.symbol(b"_etext").unwrap();
    assert_eq!(etext.value(), text.sh_addr + text.sh_size);
}

#[test]
fn user_definition_overrides_linker_symbol() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![global("__bss_start", sa, 0x77)], 0, vec![None]);

    link(&mut ctx).unwrap();

    let sym = ctx.symbol(b"__bss_start").unwrap();
    assert_eq!(sym.file(), Some(a));
    assert_eq!(sym.value(), 0x77);
}

fn layout_summary(ctx: &Context) -> Vec<(String, u64, u64, u64)> {
    ctx.chunk_headers()
        .map(|(name, shdr)| (name.to_owned(), shdr.sh_offset, shdr.sh_addr, shdr.sh_size))
        .collect()
}

#[test]
fn linking_twice_is_deterministic() {
    fn run() -> (Vec<(String, u64, u64, u64)>, Vec<Vec<u8>>, u64) {
        let args = Args::default();
        let mut ctx = Context::new(&args);

        let a = ctx.add_object("a.o", None);
        let text = add_text(&mut ctx, a);
        ctx.set_object_symbols(a, vec![undef("f"), undef("x")], 0, vec![None, None]);
        ctx.add_relocations(
            a,
            text,
            vec![
                rela(RelocationKind::Plt32, 0),
                rela(RelocationKind::Abs64, 1),
            ],
        );

        let x = ctx.add_object("x.o", Some("libx.a"));
        let sx = add_text(&mut ctx, x);
        ctx.set_object_symbols(x, vec![func("g", sx, 0)], 0, vec![None]);

        let dso = ctx.add_dso("libd.so", "libd.so.1");
        ctx.set_dso_symbols(
            dso,
            vec![func("f", 1, 0x10), global("x", 1, 0x20)],
            vec![false, false],
            vec![elf::VER_NDX_GLOBAL, elf::VER_NDX_GLOBAL],
            vec![],
        );

        let size = link(&mut ctx).unwrap();
        let dynsyms = ctx
            .dynsym_symbols()
            .iter()
            .map(|s| s.name().to_vec())
            .collect();
        (layout_summary(&ctx), dynsyms, size)
    }

    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn tls_relocations_get_dedicated_got_slots() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let tls_flags = u64::from(elf::SHF_ALLOC | elf::SHF_WRITE | elf::SHF_TLS);

    let a = ctx.add_object("a.o", None);
    let text_a = add_text(&mut ctx, a);
    let tdata_a = ctx.add_input_section(
        a,
        ".tdata",
        elf::SHT_PROGBITS,
        tls_flags,
        8,
        &CODE,
        CODE.len() as u64,
    );
    ctx.set_object_symbols(
        a,
        vec![
            sym(
                "tvar",
                elf::STB_LOCAL,
                elf::STT_TLS,
                SymbolPlacement::Section(tdata_a),
                0,
                8,
            ),
            undef("gvar"),
            undef("etvar"),
        ],
        1,
        vec![None, None],
    );
    ctx.add_relocations(
        a,
        text_a,
        vec![
            rela(RelocationKind::TlsLd, 0),
            rela(RelocationKind::TlsGd, 1),
            rela(RelocationKind::GotTpOff, 2),
        ],
    );

    let b = ctx.add_object("b.o", None);
    let text_b = add_text(&mut ctx, b);
    let tdata_b = ctx.add_input_section(
        b,
        ".tdata",
        elf::SHT_PROGBITS,
        tls_flags,
        8,
        &CODE,
        CODE.len() as u64,
    );
    ctx.set_object_symbols(
        b,
        vec![
            sym(
                "tvar2",
                elf::STB_LOCAL,
                elf::STT_TLS,
                SymbolPlacement::Section(tdata_b),
                0,
                8,
            ),
            sym(
                "gvar",
                elf::STB_GLOBAL,
                elf::STT_TLS,
                SymbolPlacement::Section(tdata_b),
                8,
                8,
            ),
        ],
        1,
        vec![None],
    );
    ctx.add_relocations(b, text_b, vec![rela(RelocationKind::TlsLd, 0)]);

    let dso = ctx.add_dso("libt.so", "libt.so.1");
    ctx.set_dso_symbols(
        dso,
        vec![sym(
            "etvar",
            elf::STB_GLOBAL,
            elf::STT_TLS,
            SymbolPlacement::Section(1),
            0,
            8,
        )],
        vec![false],
        vec![elf::VER_NDX_GLOBAL],
        vec![],
    );

    link(&mut ctx).unwrap();

    // a.o's local claims the module-global TLSLD pair (slots 0-1); b.o's
    // request reuses it. gvar's general-dynamic pair follows, then the
    // IE-model slot for the DSO variable.
    let gvar = ctx.symbol(b"gvar").unwrap();
    let etvar = ctx.symbol(b"etvar").unwrap();
    assert_eq!(gvar.tlsgd_idx(), Some(2));
    assert_eq!(etvar.gottpoff_idx(), Some(4));
    assert_eq!(ctx.find_chunk(".got").unwrap().sh_size, 5 * 8);

    // The imported TLS variable is dynamic; the locally defined one is not.
    assert!(etvar.dynsym_idx().is_some());
    assert_eq!(gvar.dynsym_idx(), None);
}

#[test]
fn static_symbol_table_covers_retained_symbols() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    let sa = add_text(&mut ctx, a);
    ctx.set_object_symbols(
        a,
        vec![
            sym(
                "local_lab",
                elf::STB_LOCAL,
                elf::STT_NOTYPE,
                SymbolPlacement::Section(sa),
                0,
                0,
            ),
            func("entry", sa, 0),
        ],
        1,
        vec![None],
    );

    link(&mut ctx).unwrap();

    // Null entry + the named local + the owned global.
    let symtab = ctx.find_chunk(".symtab").expect(".symtab chunk");
    assert_eq!(symtab.sh_size, 3 * 24);
    assert_eq!(symtab.sh_type, elf::SHT_SYMTAB);

    // Leading NUL plus both names with their terminators.
    let strtab = ctx.find_chunk(".strtab").expect(".strtab chunk");
    assert_eq!(strtab.sh_size, 1 + 10 + 6);
}

#[test]
fn output_buffer_is_sized_and_zero_filled() {
    let args = Args::default();
    let mut ctx = Context::new(&args);

    let a = ctx.add_object("a.o", None);
    add_text(&mut ctx, a);
    ctx.set_object_symbols(a, vec![], 0, vec![]);

    let size = link(&mut ctx).unwrap();
    assert_eq!(ctx.buf.len() as u64, size);
    assert!(ctx.buf.iter().all(|&b| b == 0));
}
