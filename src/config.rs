use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name used under `.cache/` when no cache directory is configured.
pub const NAMESPACE: &str = "wasmbuild";

/// Picked up from the working directory when no config path is given.
pub const CONFIG_FILE: &str = "wasmbuild.json";

/// Options handed to the orchestrator by its host.
///
/// Every field is optional in the JSON form; missing fields take the
/// defaults below.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    /// Where bound modules are written, one subdirectory per crate.
    /// Relative paths are resolved against the orchestrator's root.
    pub cache_directory: PathBuf,
    /// Appended verbatim after the fixed `cargo build` flags.
    pub extra_compiler_flags: Vec<String>,
    /// Appended verbatim after the fixed `wasm-bindgen` flags.
    pub extra_binding_flags: Vec<String>,
    /// Run `wasm-opt` between compiling and binding.
    pub enable_optimization: bool,
    pub cargo: String,
    pub wasm_bindgen: String,
    pub wasm_opt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_directory: Path::new(".cache").join(NAMESPACE),
            extra_compiler_flags: vec![String::from("--release")],
            extra_binding_flags: vec![],
            enable_optimization: false,
            cargo: String::from("cargo"),
            wasm_bindgen: String::from("wasm-bindgen"),
            wasm_opt: String::from("wasm-opt"),
        }
    }
}

/// Reads `explicit` if given, otherwise `<root>/wasmbuild.json` when it
/// exists, otherwise the defaults.
pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => Config::new(path),
        None => {
            let path = root.join(CONFIG_FILE);
            if path.is_file() {
                log::debug!("Using config file {}", path.display());
                Config::new(&path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

impl Config {
    pub fn new(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file at {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Could not parse config file at {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Absolute cache directory for an orchestrator rooted at `root`.
    pub fn get_cache_dir(&self, root: &Path) -> PathBuf {
        if self.cache_directory.is_absolute() {
            self.cache_directory.clone()
        } else {
            root.join(&self.cache_directory)
        }
    }

    /// Digest of every option that shapes the bound artifacts. Output left
    /// behind under a different fingerprint is not reused.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for tool in [&self.cargo, &self.wasm_opt, &self.wasm_bindgen] {
            hasher.update(tool.as_bytes()).update(&[0]);
        }
        hasher.update(&[u8::from(self.enable_optimization)]);
        for flags in [&self.extra_compiler_flags, &self.extra_binding_flags] {
            hasher.update(&(flags.len() as u64).to_le_bytes());
            for flag in flags {
                hasher.update(flag.as_bytes()).update(&[0]);
            }
        }
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }

    /// Cargo profile directory the extra compiler flags select.
    pub fn get_profile_dir(&self) -> String {
        let mut flags = self.extra_compiler_flags.iter();
        let mut profile = None;
        while let Some(flag) = flags.next() {
            match flag.as_str() {
                "--release" | "-r" => profile = Some(String::from("release")),
                "--profile" => profile = flags.next().cloned(),
                other => {
                    if let Some(name) = other.strip_prefix("--profile=") {
                        profile = Some(name.to_string());
                    }
                }
            }
        }
        match profile.as_deref() {
            None | Some("dev") | Some("test") => String::from("debug"),
            Some("bench") => String::from("release"),
            Some(name) => name.to_string(),
        }
    }
}
