use std::fmt;
use std::path::{Path, PathBuf};

/// Crate type of the one target we know how to bind.
pub const CDYLIB: &str = "cdylib";

/// Platform every compile step targets.
pub const WASM_TARGET: &str = "wasm32-unknown-unknown";

/// A crate that can be turned into a loadable module.
///
/// Resolved from `cargo read-manifest`; only the outputs derived from it are
/// cached, never the descriptor itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescriptor {
    /// Absolute path of the `Cargo.toml`.
    pub manifest_path: PathBuf,
    /// Directory owning the manifest.
    pub root: PathBuf,
    /// Name of the `cdylib` target.
    pub target_name: String,
}

impl ProjectDescriptor {
    pub fn new(manifest_path: PathBuf, target_name: String) -> Self {
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            manifest_path,
            root,
            target_name,
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// File stem cargo and wasm-bindgen use for this target's outputs.
    pub fn artifact_stem(&self) -> String {
        self.target_name.replace('-', "_")
    }
}

/// Files produced by one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// JavaScript glue module handed back to the host in place of the import.
    pub bridge_module: PathBuf,
    /// The `.wasm` binary loaded by the bridge module. Its mtime is what
    /// staleness is measured against.
    pub binary: PathBuf,
    pub type_declarations: Option<PathBuf>,
}

impl CacheEntry {
    /// The files the binder writes for `name` into `out_dir`. Declarations are
    /// only listed when they exist.
    pub fn in_dir(out_dir: &Path, name: &str) -> Self {
        let declarations = out_dir.join(format!("{name}.d.ts"));
        Self {
            bridge_module: out_dir.join(format!("{name}.js")),
            binary: out_dir.join(format!("{name}_bg.wasm")),
            type_declarations: declarations.is_file().then_some(declarations),
        }
    }

    pub fn primary_artifact(&self) -> &Path {
        &self.binary
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        [Some(&self.bridge_module), Some(&self.binary), self.type_declarations.as_ref()]
            .into_iter()
            .flatten()
            .map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStep {
    Compile,
    Optimize,
    Bind,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Compile => write!(f, "compile"),
            BuildStep::Optimize => write!(f, "optimize"),
            BuildStep::Bind => write!(f, "bind"),
        }
    }
}

/// What a request hands back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub descriptor: ProjectDescriptor,
    pub entry: CacheEntry,
    /// Every file the host should watch for this import, cache hit or not.
    pub dependencies: Vec<PathBuf>,
    pub cache_hit: bool,
}

impl Resolution {
    /// Path that replaces the original import.
    pub fn bridge_module(&self) -> &Path {
        &self.entry.bridge_module
    }
}
