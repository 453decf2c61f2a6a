//! Process boundary for every external tool the orchestrator drives.
//!
//! Nothing else in the crate spawns processes directly; the pipeline and
//! resolvers describe an [`Invocation`] and hand it to a [`ToolRunner`].

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::error::{BuildError, InvocationFailure};

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub current_dir: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, current_dir: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: current_dir.to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Human readable command line, used in logs and error messages.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// The program and its first argument, e.g. `cargo metadata`.
    pub fn short_name(&self) -> String {
        match self.args.first() {
            Some(first) if !first.to_string_lossy().starts_with('-') => {
                format!("{} {}", self.program, first.to_string_lossy())
            }
            _ => self.program.clone(),
        }
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Converts a non-zero exit into the toolchain-query failure shape.
    pub fn into_query_result(self, invocation: &Invocation) -> Result<String, BuildError> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(BuildError::ToolchainInvocation {
                command: invocation.short_name(),
                failure: InvocationFailure::Exit {
                    exit_code: self.exit_code,
                    stderr: self.stderr,
                },
            })
        }
    }
}

/// Runs external commands to completion.
///
/// Implementations must only fail with [`BuildError::ToolchainSpawn`]; a
/// process that starts and exits non-zero is reported through
/// [`ToolOutput::success`].
pub trait ToolRunner: Send + Sync {
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<ToolOutput, BuildError>> + Send;
}

/// Spawns real processes on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        log::debug!(
            "Running `{}` in {}",
            invocation.display(),
            invocation.current_dir.display()
        );

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.current_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| BuildError::ToolchainSpawn {
                command: invocation.display(),
                source,
            })?;

        Ok(ToolOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_keeps_subcommand() {
        let invocation = Invocation::new("cargo", Path::new("/tmp"))
            .arg("metadata")
            .args(["--format-version", "1"]);
        assert_eq!(invocation.short_name(), "cargo metadata");
        assert_eq!(invocation.display(), "cargo metadata --format-version 1");

        let flags_only = Invocation::new("wasm-opt", Path::new("/tmp")).arg("-O");
        assert_eq!(flags_only.short_name(), "wasm-opt");
    }

    #[test]
    fn failed_query_becomes_invocation_error() {
        let invocation = Invocation::new("cargo", Path::new("/tmp")).arg("metadata");
        let output = ToolOutput {
            success: false,
            exit_code: Some(101),
            stdout: String::new(),
            stderr: "error: manifest path `Cargo.toml` does not exist".to_string(),
        };
        match output.into_query_result(&invocation) {
            Err(BuildError::ToolchainInvocation {
                command,
                failure: InvocationFailure::Exit { exit_code, stderr },
            }) => {
                assert_eq!(command, "cargo metadata");
                assert_eq!(exit_code, Some(101));
                assert!(stderr.contains("does not exist"));
            }
            other => panic!("expected invocation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let invocation =
            Invocation::new("wasmbuild-definitely-not-installed", dir.path()).arg("--version");
        match SystemRunner.run(&invocation).await {
            Err(BuildError::ToolchainSpawn { command, .. }) => {
                assert_eq!(command, "wasmbuild-definitely-not-installed --version");
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation::new("sh", dir.path())
            .arg("-c")
            .arg("echo out; echo err >&2; exit 7");
        let output = SystemRunner.run(&invocation).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(7));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
