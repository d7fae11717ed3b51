//! Link configuration. The driver parses the command line and linker scripts
//! into this structure; the core pipeline only ever reads it.

/// Strategy for the `.note.gnu.build-id` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BuildIdKind {
    #[default]
    None,
    Uuid,
    Sha1,
    Hex(Vec<u8>),
}

impl BuildIdKind {
    pub(crate) fn digest_len(&self) -> u64 {
        match self {
            BuildIdKind::None => 0,
            BuildIdKind::Uuid => 16,
            BuildIdKind::Sha1 => 20,
            BuildIdKind::Hex(bytes) => bytes.len() as u64,
        }
    }
}

/// A `--version-script` pattern, already flattened by the driver: `ver_idx`
/// is the version-table index the pattern assigns, patterns appear in
/// decreasing priority order.
#[derive(Clone, Debug)]
pub struct VersionPattern {
    pub pattern: String,
    pub ver_idx: u16,
    pub is_extern_cpp: bool,
}

pub struct Args {
    /// Output path; used as the Verdef base name when no soname is set.
    pub output: String,
    pub soname: Option<String>,
    pub image_base: u64,
    pub shared: bool,
    pub export_dynamic: bool,
    pub bsymbolic: bool,
    pub bsymbolic_functions: bool,
    pub gc_sections: bool,
    pub eh_frame_hdr: bool,
    pub hash_style_sysv: bool,
    pub hash_style_gnu: bool,
    /// When non-empty, a `.interp` section naming this path is emitted.
    pub dynamic_linker: Option<String>,
    pub build_id: BuildIdKind,
    /// Archive names (or the wildcard `"ALL"`) whose member objects should
    /// not export their symbols.
    pub exclude_libs: Vec<String>,
    /// Symbol names forced to be treated as referenced (`-u`).
    pub undefined: Vec<String>,
    /// User version names, in declaration order.
    pub version_definitions: Vec<String>,
    pub version_patterns: Vec<VersionPattern>,
    /// The verbatim command line, embedded into `.comment`.
    pub cmdline_args: Vec<String>,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            output: "a.out".to_owned(),
            soname: None,
            image_base: 0x40_0000,
            shared: false,
            export_dynamic: false,
            bsymbolic: false,
            bsymbolic_functions: false,
            gc_sections: false,
            eh_frame_hdr: false,
            hash_style_sysv: false,
            hash_style_gnu: true,
            dynamic_linker: None,
            build_id: BuildIdKind::None,
            exclude_libs: Vec::new(),
            undefined: Vec::new(),
            version_definitions: Vec::new(),
            version_patterns: Vec::new(),
            cmdline_args: Vec::new(),
        }
    }
}

impl Args {
    /// The name advertised by the Verdef base entry.
    pub(crate) fn verdef_base_name(&self) -> &str {
        self.soname.as_deref().unwrap_or(&self.output)
    }

    pub(crate) fn cmdline(&self) -> String {
        self.cmdline_args.join(" ")
    }
}
