//! Runs the user's `--after-build` command through the platform shell.

use anyhow::{Result, anyhow};
use std::path::Path;

use crate::build::toolchain::{Invocation, ToolRunner};
use crate::build::{BuildProgress, BuildReporter};

pub fn shell_invocation(command: &str, working_dir: &Path) -> Invocation {
    if cfg!(target_os = "windows") {
        Invocation::new("cmd", working_dir).args(["/C", command])
    } else {
        Invocation::new("sh", working_dir).args(["-c", command])
    }
}

pub async fn run<T: ToolRunner, R: BuildReporter>(
    runner: &T,
    command: &str,
    working_dir: &Path,
    reporter: &R,
) -> Result<()> {
    let output = runner.run(&shell_invocation(command, working_dir)).await?;

    if !output.stdout.trim().is_empty() {
        reporter.report(BuildProgress::AfterBuildOutput {
            command: command.to_string(),
            stdout: Some(output.stdout.trim().to_string()),
            stderr: None,
        });
    }
    if !output.stderr.trim().is_empty() {
        reporter.report(BuildProgress::AfterBuildOutput {
            command: command.to_string(),
            stdout: None,
            stderr: Some(output.stderr.trim().to_string()),
        });
    }

    if output.success {
        Ok(())
    } else {
        Err(anyhow!("after-build command `{command}` failed"))
    }
}
