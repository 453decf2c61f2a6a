//! The three external steps that turn a crate into a loadable module:
//! compile, optionally optimize, then bind. Each step starts only after the
//! previous process has exited, and the first failure stops the run.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::build_types::{BuildStep, CacheEntry, ProjectDescriptor, WASM_TARGET};
use super::error::BuildError;
use super::toolchain::{Invocation, ToolOutput, ToolRunner};
use super::{BuildProgress, BuildReporter};
use crate::config::Config;

#[derive(Debug, Deserialize)]
struct ArtifactTarget {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
enum CargoMessage {
    CompilerArtifact {
        target: ArtifactTarget,
        #[serde(default)]
        filenames: Vec<PathBuf>,
    },
    #[serde(other)]
    Other,
}

/// Written into the output directory once every step has succeeded.
pub const PACKAGE_JSON: &str = "package.json";

#[derive(Debug, serde::Serialize)]
struct PackageJson<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    module_type: &'static str,
    main: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    types: Option<String>,
    files: Vec<String>,
    #[serde(rename = "wasmbuildConfig")]
    config_fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct PackageStamp {
    #[serde(rename = "wasmbuildConfig")]
    config_fingerprint: Option<String>,
}

/// Everything a pipeline run needs besides the runner.
pub struct PipelineContext<'a, R: BuildReporter> {
    pub config: &'a Config,
    pub descriptor: &'a ProjectDescriptor,
    pub target_dir: &'a Path,
    /// `<cacheDir>/<target_name>`; the binder writes here.
    pub out_dir: PathBuf,
    pub reporter: &'a R,
}

pub async fn run<T: ToolRunner, R: BuildReporter>(
    runner: &T,
    ctx: &PipelineContext<'_, R>,
) -> Result<CacheEntry, BuildError> {
    // Until this run writes its own, the directory holds no complete build.
    remove_package_json(&ctx.out_dir)?;
    let compiled = compile(runner, ctx).await?;
    let bind_input = if ctx.config.enable_optimization {
        optimize(runner, ctx, &compiled).await?
    } else {
        compiled
    };
    let entry = bind(runner, ctx, &bind_input).await?;
    write_package_json(ctx, &entry)?;
    Ok(entry)
}

pub fn compile_invocation(config: &Config, descriptor: &ProjectDescriptor, target_dir: &Path) -> Invocation {
    Invocation::new(&config.cargo, &descriptor.root)
        .arg("build")
        .args(["--lib", "--target", WASM_TARGET, "--target-dir"])
        .arg(target_dir)
        .arg("--message-format=json-render-diagnostics")
        .args(&config.extra_compiler_flags)
}

async fn compile<T: ToolRunner, R: BuildReporter>(
    runner: &T,
    ctx: &PipelineContext<'_, R>,
) -> Result<PathBuf, BuildError> {
    let invocation = compile_invocation(ctx.config, ctx.descriptor, ctx.target_dir);
    let output = run_step(runner, ctx, BuildStep::Compile, &invocation).await?;

    if output.stderr.contains("warning:") {
        ctx.reporter
            .report(BuildProgress::CompilerWarning(output.stderr.trim_end().to_string()));
    }

    let wasm = find_compiled_artifact(&output.stdout, ctx.descriptor).unwrap_or_else(|| {
        log::debug!("No compiler-artifact message for the wasm file, deriving its path");
        ctx.target_dir
            .join(WASM_TARGET)
            .join(ctx.config.get_profile_dir())
            .join(format!("{}.wasm", ctx.descriptor.artifact_stem()))
    });
    expect_output(BuildStep::Compile, &output, &wasm)?;
    Ok(wasm)
}

/// Picks the `.wasm` file cargo reported for our target from its JSON
/// message stream. Lines that are not JSON are ignored.
fn find_compiled_artifact(stdout: &str, descriptor: &ProjectDescriptor) -> Option<PathBuf> {
    let stem = descriptor.artifact_stem();
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<CargoMessage>(line).ok())
        .filter_map(|message| match message {
            CargoMessage::CompilerArtifact { target, filenames } if target.name.replace('-', "_") == stem => {
                filenames
                    .into_iter()
                    .find(|file| file.extension().is_some_and(|ext| ext == "wasm"))
            }
            _ => None,
        })
        .last()
}

async fn optimize<T: ToolRunner, R: BuildReporter>(
    runner: &T,
    ctx: &PipelineContext<'_, R>,
    input: &Path,
) -> Result<PathBuf, BuildError> {
    let optimized = input.with_file_name(format!("{}.opt.wasm", ctx.descriptor.artifact_stem()));
    let invocation = Invocation::new(&ctx.config.wasm_opt, &ctx.descriptor.root)
        .arg(input)
        .arg("-o")
        .arg(&optimized)
        .arg("-O");
    let output = run_step(runner, ctx, BuildStep::Optimize, &invocation).await?;
    expect_output(BuildStep::Optimize, &output, &optimized)?;
    Ok(optimized)
}

async fn bind<T: ToolRunner, R: BuildReporter>(
    runner: &T,
    ctx: &PipelineContext<'_, R>,
    input: &Path,
) -> Result<CacheEntry, BuildError> {
    let name = &ctx.descriptor.target_name;
    fs::create_dir_all(&ctx.out_dir).map_err(|source| BuildError::Io {
        path: ctx.out_dir.clone(),
        source,
    })?;

    let invocation = Invocation::new(&ctx.config.wasm_bindgen, &ctx.descriptor.root)
        .arg(input)
        .arg("--out-dir")
        .arg(&ctx.out_dir)
        .args(["--out-name", name.as_str(), "--typescript"])
        .args(&ctx.config.extra_binding_flags);
    let output = run_step(runner, ctx, BuildStep::Bind, &invocation).await?;

    // `--no-typescript` in the extra flags suppresses the declarations.
    let entry = CacheEntry::in_dir(&ctx.out_dir, name);
    expect_output(BuildStep::Bind, &output, &entry.bridge_module)?;
    expect_output(BuildStep::Bind, &output, &entry.binary)?;
    Ok(entry)
}

/// Config fingerprint recorded by the run that completed in `out_dir`, if
/// any run did.
pub fn completed_fingerprint(out_dir: &Path) -> Option<String> {
    let contents = fs::read_to_string(out_dir.join(PACKAGE_JSON)).ok()?;
    match serde_json::from_str::<PackageStamp>(&contents) {
        Ok(stamp) => stamp.config_fingerprint,
        Err(e) => {
            log::debug!("Ignoring unreadable {} in {}: {e}", PACKAGE_JSON, out_dir.display());
            None
        }
    }
}

fn remove_package_json(out_dir: &Path) -> Result<(), BuildError> {
    let path = out_dir.join(PACKAGE_JSON);
    match fs::remove_file(&path) {
        Ok(()) => {
            log::debug!("Removed {} from an earlier run", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BuildError::Io { path, source }),
    }
}

fn write_package_json<R: BuildReporter>(
    ctx: &PipelineContext<'_, R>,
    entry: &CacheEntry,
) -> Result<(), BuildError> {
    let file_name = |path: &Path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    let main = file_name(&entry.bridge_module);
    let types = entry.type_declarations.as_deref().map(file_name);
    let files = entry.artifacts().map(file_name).collect();
    let package = PackageJson {
        name: &ctx.descriptor.target_name,
        module_type: "module",
        main,
        types,
        files,
        config_fingerprint: ctx.config.fingerprint(),
    };

    let path = ctx.out_dir.join(PACKAGE_JSON);
    let contents = serde_json::to_string_pretty(&package).map_err(|e| BuildError::Io {
        path: path.clone(),
        source: e.into(),
    })?;
    fs::write(&path, contents + "\n").map_err(|source| BuildError::Io { path, source })
}

async fn run_step<T: ToolRunner, R: BuildReporter>(
    runner: &T,
    ctx: &PipelineContext<'_, R>,
    step: BuildStep,
    invocation: &Invocation,
) -> Result<ToolOutput, BuildError> {
    let target_name = ctx.descriptor.target_name.clone();
    ctx.reporter.report(BuildProgress::StepStarted {
        target_name: target_name.clone(),
        step,
    });
    let start = Instant::now();

    let output = runner.run(invocation).await?;
    if !output.success {
        log::debug!("{step} step exited with {:?}", output.exit_code);
        return Err(BuildError::StepFailed {
            step,
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    ctx.reporter.report(BuildProgress::StepFinished {
        target_name,
        step,
        duration_seconds: start.elapsed().as_secs_f64(),
    });
    Ok(output)
}

/// A step that exits zero without producing its output still failed.
fn expect_output(step: BuildStep, output: &ToolOutput, path: &Path) -> Result<(), BuildError> {
    if path.is_file() {
        return Ok(());
    }
    let mut stderr = format!("missing output: {} was not produced", path.display());
    if !output.stderr.trim().is_empty() {
        stderr.push('\n');
        stderr.push_str(output.stderr.trim_end());
    }
    Err(BuildError::StepFailed {
        step,
        exit_code: output.exit_code,
        stderr,
    })
}
