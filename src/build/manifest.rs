//! Finds the crate behind a request and the target that yields a `.wasm`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::build_types::{CDYLIB, ProjectDescriptor};
use super::error::{BuildError, InvocationFailure};
use super::toolchain::{Invocation, ToolRunner};
use crate::config::Config;

#[derive(Debug, Deserialize)]
struct ManifestTarget {
    name: String,
    #[serde(default)]
    kind: Vec<String>,
    #[serde(default)]
    crate_types: Vec<String>,
}

impl ManifestTarget {
    fn is_cdylib(&self) -> bool {
        let types = if self.crate_types.is_empty() {
            &self.kind
        } else {
            &self.crate_types
        };
        types.iter().any(|t| t == CDYLIB)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    manifest_path: PathBuf,
    targets: Vec<ManifestTarget>,
}

pub fn read_manifest_invocation(config: &Config, dir: &Path) -> Invocation {
    Invocation::new(&config.cargo, dir).arg("read-manifest")
}

/// Resolves the descriptor of the crate in `dir`.
pub async fn resolve<T: ToolRunner>(
    runner: &T,
    config: &Config,
    dir: &Path,
) -> Result<ProjectDescriptor, BuildError> {
    let invocation = read_manifest_invocation(config, dir);
    let stdout = runner.run(&invocation).await?.into_query_result(&invocation)?;
    parse(&stdout, &invocation.short_name())
}

fn parse(stdout: &str, command: &str) -> Result<ProjectDescriptor, BuildError> {
    let manifest: Manifest =
        serde_json::from_str(stdout).map_err(|e| BuildError::ToolchainInvocation {
            command: command.to_string(),
            failure: InvocationFailure::MalformedOutput(e.to_string()),
        })?;

    match manifest.targets.iter().find(|target| target.is_cdylib()) {
        Some(target) => {
            log::debug!(
                "Found {CDYLIB} target \"{}\" in {}",
                target.name,
                manifest.manifest_path.display()
            );
            Ok(ProjectDescriptor::new(manifest.manifest_path, target.name.clone()))
        }
        None => Err(BuildError::NoSuchTarget {
            manifest: manifest.manifest_path,
            expected: CDYLIB,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::test_support::{FakeRunner, manifest_json};

    #[test]
    fn picks_the_cdylib_target() {
        let stdout = r#"{
            "name": "filters",
            "manifest_path": "/work/filters/Cargo.toml",
            "targets": [
                { "name": "filters-cli", "kind": ["bin"], "crate_types": ["bin"] },
                { "name": "filters", "kind": ["cdylib", "rlib"], "crate_types": ["cdylib", "rlib"] }
            ]
        }"#;
        let descriptor = parse(stdout, "cargo read-manifest").unwrap();
        assert_eq!(descriptor.target_name, "filters");
        assert_eq!(descriptor.manifest_path, PathBuf::from("/work/filters/Cargo.toml"));
        assert_eq!(descriptor.root, PathBuf::from("/work/filters"));
    }

    #[test]
    fn falls_back_to_kind_when_crate_types_are_absent() {
        let stdout = r#"{
            "manifest_path": "/work/old/Cargo.toml",
            "targets": [{ "name": "old", "kind": ["cdylib"] }]
        }"#;
        assert_eq!(parse(stdout, "cargo read-manifest").unwrap().target_name, "old");
    }

    #[test]
    fn missing_cdylib_is_no_such_target() {
        let stdout = r#"{
            "manifest_path": "/work/lib-only/Cargo.toml",
            "targets": [{ "name": "lib-only", "kind": ["lib"], "crate_types": ["lib"] }]
        }"#;
        match parse(stdout, "cargo read-manifest") {
            Err(BuildError::NoSuchTarget { manifest, expected }) => {
                assert_eq!(manifest, PathBuf::from("/work/lib-only/Cargo.toml"));
                assert_eq!(expected, "cdylib");
            }
            other => panic!("expected NoSuchTarget, got {other:?}"),
        }
    }

    #[test]
    fn garbage_output_is_malformed() {
        assert!(matches!(
            parse("warning: something\n{", "cargo read-manifest"),
            Err(BuildError::ToolchainInvocation {
                failure: InvocationFailure::MalformedOutput(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn resolve_runs_read_manifest_in_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        runner.respond(
            "cargo read-manifest",
            manifest_json(&dir.path().join("Cargo.toml"), "app"),
        );

        let descriptor = resolve(&runner, &Config::default(), dir.path()).await.unwrap();

        assert_eq!(descriptor.target_name, "app");
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].current_dir, dir.path());
    }

    #[tokio::test]
    async fn non_zero_exit_is_invocation_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        runner.fail("cargo read-manifest", 101, "error: could not find `Cargo.toml`");

        match resolve(&runner, &Config::default(), dir.path()).await {
            Err(BuildError::ToolchainInvocation {
                command,
                failure: InvocationFailure::Exit { exit_code, .. },
            }) => {
                assert_eq!(command, "cargo read-manifest");
                assert_eq!(exit_code, Some(101));
            }
            other => panic!("expected invocation error, got {other:?}"),
        }
    }
}
