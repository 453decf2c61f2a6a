//! Failure taxonomy for a single resolve-and-build request.
//!
//! Every variant is terminal for the request that produced it. The cache is
//! never touched on the failure path and the cycle's barrier signal is still
//! released, so these only ever travel back to the caller.

use std::fmt;
use std::path::PathBuf;

use super::build_types::BuildStep;

/// Why a toolchain query (`cargo read-manifest`, `cargo metadata`) was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    /// The tool ran and exited unsuccessfully.
    Exit { exit_code: Option<i32>, stderr: String },
    /// The tool exited successfully but its stdout could not be understood.
    MalformedOutput(String),
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationFailure::Exit { exit_code, stderr } => {
                write!(f, "exited with {}", describe_exit(exit_code))?;
                if !stderr.trim().is_empty() {
                    write!(f, ":\n{}", stderr.trim_end())?;
                }
                Ok(())
            }
            InvocationFailure::MalformedOutput(reason) => {
                write!(f, "produced output that could not be parsed: {reason}")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The crate has no target that produces a dynamically loadable binary.
    #[error(
        "no target with crate type `{expected}` found in {}; \
         add `crate-type = [\"{expected}\"]` to the [lib] section",
        .manifest.display()
    )]
    NoSuchTarget { manifest: PathBuf, expected: &'static str },

    /// A toolchain query exited non-zero or printed something unparseable.
    #[error("`{command}` {failure}")]
    ToolchainInvocation { command: String, failure: InvocationFailure },

    /// The process could not be started at all (missing binary, permissions).
    #[error("could not run `{command}`: {source}")]
    ToolchainSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// One of the pipeline steps rejected its input.
    #[error("{step} step failed with {}:\n{}", describe_exit(.exit_code), .stderr.trim_end())]
    StepFailed {
        step: BuildStep,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("could not write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// The pipeline step this error is attributed to, if any.
    pub fn step(&self) -> Option<BuildStep> {
        match self {
            BuildError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
