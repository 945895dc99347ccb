//! Shading programs and the user-facing shading selection.
//!
//! Programs are WGSL files named after their [`ShadingKind`]. Each one is
//! parsed and validated once at backend init; the immediate backend consumes
//! the WGSL source and the explicit backend the SPIR-V emitted from it.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

/// Every shading program a backend knows about.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ShadingKind {
    Wireframe,
    Solid,
    MaterialPreview,
    /// Highlight drawn over selected models; auxiliary.
    Outline,
    /// Model index encoded as an integer colour; auxiliary.
    Index,
    Custom,
}

/// Fill mode a program rasterizes with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
}

impl ShadingKind {
    pub const ALL: [ShadingKind; 6] = [
        ShadingKind::Wireframe,
        ShadingKind::Solid,
        ShadingKind::MaterialPreview,
        ShadingKind::Outline,
        ShadingKind::Index,
        ShadingKind::Custom,
    ];

    /// File stem of the program source.
    pub fn name(self) -> &'static str {
        match self {
            ShadingKind::Wireframe => "wireframe",
            ShadingKind::Solid => "solid",
            ShadingKind::MaterialPreview => "material_preview",
            ShadingKind::Outline => "outline",
            ShadingKind::Index => "index",
            ShadingKind::Custom => "custom",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ShadingKind::Wireframe => "Wireframe",
            ShadingKind::Solid => "Solid",
            ShadingKind::MaterialPreview => "Material Preview",
            ShadingKind::Outline => "Outline",
            ShadingKind::Index => "Index",
            ShadingKind::Custom => "Custom",
        }
    }

    /// Outline and Index are passes, never the viewport shading.
    pub fn is_user_selectable(self) -> bool {
        !matches!(self, ShadingKind::Outline | ShadingKind::Index)
    }

    pub fn polygon_mode(self) -> PolygonMode {
        match self {
            ShadingKind::Wireframe | ShadingKind::Outline => PolygonMode::Line,
            _ => PolygonMode::Fill,
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.wgsl", self.name())
    }
}

impl fmt::Display for ShadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated shading program.
pub struct Program {
    kind: ShadingKind,
    path: PathBuf,
    source: String,
    spirv: Vec<u32>,
}

impl Program {
    pub const VERTEX_ENTRY: &'static str = "vs_main";
    pub const FRAGMENT_ENTRY: &'static str = "fs_main";

    /// Parses, validates and lowers `source` to SPIR-V.
    pub fn compile(kind: ShadingKind, path: PathBuf, source: String) -> Result<Self> {
        let module = naga::front::wgsl::parse_str(&source)
            .map_err(|e| anyhow!(e.emit_to_string(&source)))
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| anyhow!(e.emit_to_string(&source)))
        .with_context(|| format!("failed to validate {}", path.display()))?;

        for entry in [Self::VERTEX_ENTRY, Self::FRAGMENT_ENTRY] {
            anyhow::ensure!(
                module.entry_points.iter().any(|ep| ep.name == entry),
                "{} has no `{entry}` entry point",
                path.display()
            );
        }

        let options = naga::back::spv::Options::default();
        let spirv = naga::back::spv::write_vec(&module, &info, &options, None)
            .with_context(|| format!("failed to emit SPIR-V for {}", path.display()))?;

        Ok(Self { kind, path, source, spirv })
    }

    pub fn kind(&self) -> ShadingKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn wgsl(&self) -> &str {
        &self.source
    }

    /// One module holding both entry points.
    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("spirv_words", &self.spirv.len())
            .finish()
    }
}

/// The compiled program set of one backend instance.
#[derive(Debug, Default)]
pub struct ProgramLibrary {
    programs: Vec<Program>,
}

impl ProgramLibrary {
    /// Compiles every [`ShadingKind`] from `dir`. The first failure aborts.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut programs = Vec::with_capacity(ShadingKind::ALL.len());
        for kind in ShadingKind::ALL {
            let path = dir.join(kind.file_name());
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read shading program {}", path.display()))?;
            programs.push(Program::compile(kind, path, source)?);
            log::debug!("compiled shading program {kind}");
        }
        Ok(Self { programs })
    }

    pub fn get(&self, kind: ShadingKind) -> Option<&Program> {
        self.programs.iter().find(|p| p.kind == kind)
    }

    pub fn require(&self, kind: ShadingKind) -> Result<&Program> {
        self.get(kind)
            .ok_or_else(|| anyhow!("shading program {kind} is not compiled"))
    }

    pub fn kinds(&self) -> Vec<ShadingKind> {
        self.programs.iter().map(|p| p.kind).collect()
    }

    pub fn contains(&self, kind: ShadingKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn clear(&mut self) {
        self.programs.clear();
    }
}

/// The program used by the main pass.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ShadingSelection {
    current: ShadingKind,
}

impl Default for ShadingSelection {
    fn default() -> Self {
        Self { current: ShadingKind::MaterialPreview }
    }
}

impl ShadingSelection {
    pub fn current(&self) -> ShadingKind {
        self.current
    }

    /// Switches to `kind` if it is user-selectable and compiled.
    pub fn set(&mut self, kind: ShadingKind, library: &ProgramLibrary) -> bool {
        if !kind.is_user_selectable() {
            log::warn!("{kind} is an auxiliary pass and cannot be the viewport shading");
            return false;
        }
        if !library.contains(kind) {
            log::warn!("{kind} is not compiled; keeping {}", self.current);
            return false;
        }
        self.current = kind;
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn shader_dir() -> PathBuf {
        PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders"))
    }

    #[test]
    fn shipped_programs_compile() {
        let lib = ProgramLibrary::load(&shader_dir()).unwrap();
        assert_eq!(lib.kinds(), ShadingKind::ALL.to_vec());
        for kind in ShadingKind::ALL {
            let spirv = lib.require(kind).unwrap().spirv();
            assert_eq!(spirv.first(), Some(&0x0723_0203), "{kind} SPIR-V magic");
        }
    }

    #[test]
    fn invalid_source_is_fatal() {
        let err = Program::compile(
            ShadingKind::Custom,
            PathBuf::from("broken.wgsl"),
            "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return 1.0; }".into(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("broken.wgsl"));
    }

    #[test]
    fn missing_entry_point_is_fatal() {
        let src = "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }";
        let err = Program::compile(ShadingKind::Custom, PathBuf::from("half.wgsl"), src.into())
            .unwrap_err();
        assert!(err.to_string().contains("fs_main"));
    }

    #[test]
    fn missing_directory_is_fatal() {
        assert!(ProgramLibrary::load(Path::new("no/such/dir")).is_err());
    }

    #[test]
    fn auxiliary_programs_are_not_selectable() {
        let lib = ProgramLibrary::load(&shader_dir()).unwrap();
        let mut sel = ShadingSelection::default();
        assert_eq!(sel.current(), ShadingKind::MaterialPreview);

        assert!(!sel.set(ShadingKind::Outline, &lib));
        assert!(!sel.set(ShadingKind::Index, &lib));
        assert_eq!(sel.current(), ShadingKind::MaterialPreview);

        assert!(sel.set(ShadingKind::Wireframe, &lib));
        assert_eq!(sel.current(), ShadingKind::Wireframe);
    }

    #[test]
    fn uncompiled_programs_are_not_selectable() {
        let mut sel = ShadingSelection::default();
        assert!(!sel.set(ShadingKind::Solid, &ProgramLibrary::default()));
    }
}
