//! Scratch projects and a recording [`ToolRunner`] for the build tests.
//!
//! `FakeRunner` plays every external tool the orchestrator drives. Unless a
//! canned response is registered, it behaves like the real toolchain would
//! on a healthy crate: `cargo build` drops a `.wasm` into the target dir,
//! `wasm-opt` writes its `-o` path, and `wasm-bindgen` writes the bridge,
//! binary and declarations. Bound artifacts get their mtimes from a fake
//! clock (`time_at(100)`, `time_at(200)`, ...) so staleness is deterministic.

use ahash::{AHashMap, AHashSet};
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;

use super::build_types::{ProjectDescriptor, WASM_TARGET};
use super::error::BuildError;
use super::toolchain::{Invocation, ToolOutput, ToolRunner};

pub fn time_at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000 + secs)
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// What `cargo read-manifest` prints for a crate with one `cdylib` target.
pub fn manifest_json(manifest_path: &Path, target_name: &str) -> String {
    json!({
        "name": target_name,
        "version": "0.1.0",
        "manifest_path": manifest_path,
        "targets": [{
            "name": target_name,
            "kind": ["cdylib", "rlib"],
            "crate_types": ["cdylib", "rlib"],
            "src_path": manifest_path.with_file_name("src").join("lib.rs"),
        }],
    })
    .to_string()
}

/// Lays out a small crate under `dir` with every file stamped at `time_at(0)`.
pub fn scratch_project(dir: &Path, target_name: &str) -> ProjectDescriptor {
    let files = [
        (
            "Cargo.toml",
            format!(
                "[package]\nname = \"{target_name}\"\nversion = \"0.1.0\"\n\n\
                 [lib]\ncrate-type = [\"cdylib\", \"rlib\"]\n"
            ),
        ),
        ("src/lib.rs", "mod filters;\n".to_string()),
        ("src/filters/mod.rs", "mod blur;\n".to_string()),
        ("src/filters/blur.rs", "pub fn blur() {}\n".to_string()),
    ];
    for (relative, contents) in files {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        set_mtime(&path, time_at(0));
    }
    ProjectDescriptor::new(dir.join("Cargo.toml"), target_name.to_string())
}

fn arg_after(invocation: &Invocation, flag: &str) -> Option<PathBuf> {
    invocation
        .args
        .iter()
        .position(|arg| arg == flag)
        .and_then(|i| invocation.args.get(i + 1))
        .map(PathBuf::from)
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "").unwrap();
}

pub struct FakeRunner {
    target_name: String,
    calls: Mutex<Vec<Invocation>>,
    responses: Mutex<AHashMap<String, ToolOutput>>,
    gates: Mutex<AHashMap<String, Arc<Notify>>>,
    missing: Mutex<AHashSet<String>>,
    bind_runs: AtomicU64,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::with_target("app")
    }

    pub fn with_target(target_name: &str) -> Self {
        Self {
            target_name: target_name.to_string(),
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(AHashMap::new()),
            gates: Mutex::new(AHashMap::new()),
            missing: Mutex::new(AHashSet::new()),
            bind_runs: AtomicU64::new(0),
        }
    }

    /// `cargo <subcommand>` for cargo, the bare program name otherwise.
    pub fn key(invocation: &Invocation) -> String {
        if invocation.program == "cargo" {
            invocation.short_name()
        } else {
            invocation.program.clone()
        }
    }

    pub fn respond(&self, name: &str, stdout: String) {
        self.responses.lock().unwrap().insert(
            name.to_string(),
            ToolOutput {
                success: true,
                exit_code: Some(0),
                stdout,
                stderr: String::new(),
            },
        );
    }

    pub fn fail(&self, name: &str, exit_code: i32, stderr: &str) {
        self.responses.lock().unwrap().insert(
            name.to_string(),
            ToolOutput {
                success: false,
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn clear(&self, name: &str) {
        self.responses.lock().unwrap().remove(name);
        self.missing.lock().unwrap().remove(name);
    }

    /// Makes `name` fail to start, as if it were not installed.
    pub fn uninstall(&self, name: &str) {
        self.missing.lock().unwrap().insert(name.to_string());
    }

    /// Holds every later run of `name` until the returned handle is notified.
    pub fn gate(&self, name: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(name.to_string(), notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| Self::key(call) == name)
            .count()
    }

    fn default_output(&self, key: &str, invocation: &Invocation) -> ToolOutput {
        let stdout = match key {
            "cargo read-manifest" => {
                manifest_json(&invocation.current_dir.join("Cargo.toml"), &self.target_name)
            }
            "cargo metadata" => json!({
                "packages": [],
                "target_directory": invocation.current_dir.join("target"),
                "version": 1,
            })
            .to_string(),
            "cargo build" => self.fake_compile(invocation),
            "wasm-opt" => {
                if let Some(output) = arg_after(invocation, "-o") {
                    touch(&output);
                }
                String::new()
            }
            "wasm-bindgen" => {
                self.fake_bind(invocation);
                String::new()
            }
            _ => String::new(),
        };
        ToolOutput {
            success: true,
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        }
    }

    fn fake_compile(&self, invocation: &Invocation) -> String {
        let target_dir = arg_after(invocation, "--target-dir").unwrap();
        let release = invocation.args.iter().any(|arg| arg == "--release");
        let wasm = target_dir
            .join(WASM_TARGET)
            .join(if release { "release" } else { "debug" })
            .join(format!("{}.wasm", self.target_name.replace('-', "_")));
        touch(&wasm);

        let artifact = json!({
            "reason": "compiler-artifact",
            "target": { "name": self.target_name, "kind": ["cdylib", "rlib"] },
            "filenames": [wasm.with_extension("rlib"), wasm],
        });
        let finished = json!({ "reason": "build-finished", "success": true });
        format!("{artifact}\n{finished}\n")
    }

    fn fake_bind(&self, invocation: &Invocation) {
        let out_dir = arg_after(invocation, "--out-dir").unwrap();
        let out_name = arg_after(invocation, "--out-name").unwrap();
        let out_name = out_name.to_string_lossy();
        let run = self.bind_runs.fetch_add(1, Ordering::SeqCst) + 1;
        for file in [
            format!("{out_name}.js"),
            format!("{out_name}_bg.wasm"),
            format!("{out_name}.d.ts"),
        ] {
            let path = out_dir.join(file);
            touch(&path);
            set_mtime(&path, time_at(100 * run));
        }
    }
}

impl ToolRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        let key = Self::key(invocation);
        self.calls.lock().unwrap().push(invocation.clone());

        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.missing.lock().unwrap().contains(&key) {
            return Err(BuildError::ToolchainSpawn {
                command: invocation.display(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        let canned = self.responses.lock().unwrap().get(&key).cloned();
        Ok(canned.unwrap_or_else(|| self.default_output(&key, invocation)))
    }
}
