pub mod barrier;
pub mod build_types;
pub mod cache;
pub mod deps;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod target_dir;
pub mod toolchain;

#[cfg(test)]
pub(crate) mod test_support;

use self::barrier::{CompletionBarrier, CycleOutcome};
use self::cache::ResultCache;
use self::deps::DependencySet;
use self::pipeline::PipelineContext;
use self::target_dir::TargetDirResolver;
use self::toolchain::{SystemRunner, ToolRunner};
use crate::config::Config;
use crate::helpers;
use ahash::{AHashMap, AHashSet};
use build_types::*;
use error::BuildError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Instant, SystemTime};

/// Progress events emitted during a build cycle
#[derive(Debug, Clone)]
pub enum BuildProgress {
    /// A cycle started for the project directory
    CycleStarted { project: PathBuf },
    /// Cached artifacts were still valid, nothing ran
    CacheHit {
        target_name: String,
        bridge_module: PathBuf,
    },
    /// Artifacts left on disk by an earlier run were picked up
    Adopted {
        target_name: String,
        bridge_module: PathBuf,
    },
    StepStarted { target_name: String, step: BuildStep },
    StepFinished {
        target_name: String,
        step: BuildStep,
        duration_seconds: f64,
    },
    /// Compiler warnings (pass-through from cargo, already rendered)
    CompilerWarning(String),
    /// Pipeline finished and the result was cached
    Built {
        target_name: String,
        bridge_module: PathBuf,
        duration_seconds: f64,
    },
    BuildFailed { project: PathBuf, message: String },
    /// Output of the `--after-build` command
    AfterBuildOutput {
        command: String,
        stdout: Option<String>,
        stderr: Option<String>,
    },
}

/// Trait for reporting build progress
pub trait BuildReporter: Send + Sync {
    fn report(&self, progress: BuildProgress);
}

/// A no-op reporter that discards all progress messages.
pub struct NoopReporter;

impl BuildReporter for NoopReporter {
    fn report(&self, _progress: BuildProgress) {}
}

struct DescriptorMemo {
    descriptor: ProjectDescriptor,
    manifest_modified: SystemTime,
}

/// Owns every cache and the completion barrier, and answers
/// [`resolve_and_build`](Orchestrator::resolve_and_build) requests.
///
/// Requests for different projects can run concurrently. Two concurrent
/// cold requests for the same project both run the pipeline; the last one to
/// finish wins the cache slot.
pub struct Orchestrator<T: ToolRunner = SystemRunner> {
    config: Config,
    root: PathBuf,
    runner: T,
    adopt_existing: bool,
    descriptors: Mutex<AHashMap<PathBuf, DescriptorMemo>>,
    /// Manifests this orchestrator has already run a cycle past the cache for.
    visited: Mutex<AHashSet<PathBuf>>,
    target_dirs: TargetDirResolver,
    cache: ResultCache,
    barrier: CompletionBarrier,
}

impl Orchestrator<SystemRunner> {
    pub fn new(config: Config, root: &Path) -> Self {
        Self::with_runner(config, root, SystemRunner)
    }
}

impl<T: ToolRunner> Orchestrator<T> {
    pub fn with_runner(config: Config, root: &Path, runner: T) -> Self {
        Self {
            config,
            root: root.to_path_buf(),
            runner,
            adopt_existing: true,
            descriptors: Mutex::new(AHashMap::new()),
            visited: Mutex::new(AHashSet::new()),
            target_dirs: TargetDirResolver::new(),
            cache: ResultCache::new(),
            barrier: CompletionBarrier::new(),
        }
    }

    /// Whether artifacts found in the cache directory on a cold start may be
    /// reused without running the pipeline. On by default.
    pub fn adopt_existing(mut self, adopt: bool) -> Self {
        self.adopt_existing = adopt;
        self
    }

    pub fn barrier(&self) -> &CompletionBarrier {
        &self.barrier
    }

    /// Directory that identifies a project: the request itself, or the
    /// directory holding it when the request names a `Cargo.toml`.
    pub fn project_dir(&self, request: &Path) -> PathBuf {
        // Collecting components drops `.` segments, so `.` and the root agree.
        let request: PathBuf = if request.is_absolute() {
            request.components().collect()
        } else {
            self.root.join(request).components().collect()
        };
        if request.file_name().is_some_and(|name| name == "Cargo.toml") {
            request.parent().map(Path::to_path_buf).unwrap_or(request)
        } else {
            request
        }
    }

    /// `<cacheDirectory>/<target_name>-<hash>`, where the hash is taken over
    /// the manifest path relative to the root (absolute when outside it).
    /// Crates sharing a target name never share a directory.
    pub fn out_dir(&self, descriptor: &ProjectDescriptor) -> PathBuf {
        let manifest = descriptor
            .manifest_path
            .strip_prefix(&self.root)
            .unwrap_or(&descriptor.manifest_path);
        let hash = blake3::hash(manifest.to_string_lossy().as_bytes());
        self.config.get_cache_dir(&self.root).join(format!(
            "{}-{}",
            descriptor.target_name,
            &hash.to_hex().as_str()[..8]
        ))
    }

    /// Produces up-to-date artifacts for the crate at `request`.
    ///
    /// Every call is one build cycle: the barrier signal for the project is
    /// replaced on entry and released on every exit path.
    pub async fn resolve_and_build<R: BuildReporter>(
        &self,
        request: &Path,
        reporter: &R,
    ) -> Result<Resolution, BuildError> {
        let project = self.project_dir(request);
        let guard = self.barrier.begin(&project);
        reporter.report(BuildProgress::CycleStarted {
            project: project.clone(),
        });

        let result = self.run_cycle(&project, reporter).await;
        match &result {
            Ok(_) => guard.release(CycleOutcome::Succeeded),
            Err(e) => {
                log::debug!("Build cycle {} for {} failed: {e}", guard.id(), project.display());
                reporter.report(BuildProgress::BuildFailed {
                    project,
                    message: e.to_string(),
                });
                guard.release(CycleOutcome::Failed(e.to_string()));
            }
        }
        result
    }

    async fn run_cycle<R: BuildReporter>(
        &self,
        project: &Path,
        reporter: &R,
    ) -> Result<Resolution, BuildError> {
        let start = Instant::now();
        let descriptor = self.descriptor(project).await?;
        let target_dir = self
            .target_dirs
            .resolve(&self.runner, &self.config, &descriptor.root)
            .await?;
        let dependencies = deps::enumerate(&descriptor);
        let out_dir = self.out_dir(&descriptor);

        if let Some(entry) = self.cache.lookup(&descriptor.manifest_path, &dependencies) {
            log::debug!("Cache hit for {}", descriptor.target_name);
            reporter.report(BuildProgress::CacheHit {
                target_name: descriptor.target_name.clone(),
                bridge_module: entry.bridge_module.clone(),
            });
            return Ok(resolution(descriptor, entry, &dependencies, true));
        }

        if let Some(entry) = self.adopt(&descriptor, &out_dir, &dependencies) {
            reporter.report(BuildProgress::Adopted {
                target_name: descriptor.target_name.clone(),
                bridge_module: entry.bridge_module.clone(),
            });
            return Ok(resolution(descriptor, entry, &dependencies, true));
        }

        log::info!("Building {}", descriptor.target_name);
        let ctx = PipelineContext {
            config: &self.config,
            descriptor: &descriptor,
            target_dir: &target_dir,
            out_dir,
            reporter,
        };
        let entry = pipeline::run(&self.runner, &ctx).await?;
        self.cache.store(&descriptor.manifest_path, entry.clone());

        reporter.report(BuildProgress::Built {
            target_name: descriptor.target_name.clone(),
            bridge_module: entry.bridge_module.clone(),
            duration_seconds: start.elapsed().as_secs_f64(),
        });
        Ok(resolution(descriptor, entry, &dependencies, false))
    }

    /// Reuses artifacts from an earlier process the first time this
    /// orchestrator misses on a project. `package.json` only exists once a
    /// pipeline run completed, and it records the config that run used.
    fn adopt(
        &self,
        descriptor: &ProjectDescriptor,
        out_dir: &Path,
        dependencies: &DependencySet,
    ) -> Option<CacheEntry> {
        let first_visit = self
            .visited
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(descriptor.manifest_path.clone());
        if !self.adopt_existing || !first_visit {
            return None;
        }
        let fingerprint = self.config.fingerprint();
        match pipeline::completed_fingerprint(out_dir) {
            Some(recorded) if recorded == fingerprint => {}
            Some(recorded) => {
                log::debug!(
                    "Not adopting artifacts in {}: built with config {recorded}, now {fingerprint}",
                    out_dir.display()
                );
                return None;
            }
            None => return None,
        }
        let entry = CacheEntry::in_dir(out_dir, &descriptor.target_name);
        match cache::check(&entry, dependencies) {
            Ok(()) => {
                log::debug!("Adopting existing artifacts in {}", out_dir.display());
                self.cache.store(&descriptor.manifest_path, entry.clone());
                Some(entry)
            }
            Err(reason) => {
                log::debug!("Not adopting artifacts in {}: {reason}", out_dir.display());
                None
            }
        }
    }

    /// Descriptor for `project`, re-read whenever its `Cargo.toml` changes.
    async fn descriptor(&self, project: &Path) -> Result<ProjectDescriptor, BuildError> {
        if let Some(descriptor) = self.memoized_descriptor(project) {
            return Ok(descriptor);
        }

        let descriptor = manifest::resolve(&self.runner, &self.config, project).await?;
        if let Some(manifest_modified) = helpers::modified_time(&descriptor.manifest_path) {
            self.descriptors.lock().unwrap_or_else(|e| e.into_inner()).insert(
                project.to_path_buf(),
                DescriptorMemo {
                    descriptor: descriptor.clone(),
                    manifest_modified,
                },
            );
        }
        Ok(descriptor)
    }

    fn memoized_descriptor(&self, project: &Path) -> Option<ProjectDescriptor> {
        let descriptors = self.descriptors.lock().unwrap_or_else(|e| e.into_inner());
        let memo = descriptors.get(project)?;
        let modified = helpers::modified_time(&memo.descriptor.manifest_path);
        (modified == Some(memo.manifest_modified)).then(|| memo.descriptor.clone())
    }

    /// Files the host should watch for `request`, without building.
    pub async fn dependencies(&self, request: &Path) -> Result<DependencySet, BuildError> {
        let project = self.project_dir(request);
        let descriptor = self.descriptor(&project).await?;
        Ok(deps::enumerate(&descriptor))
    }

    /// Drops the cached result for `request`, if this orchestrator knows the
    /// project. Returns whether an entry was removed.
    pub fn invalidate(&self, request: &Path) -> bool {
        let project = self.project_dir(request);
        let manifest_path = self
            .descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&project)
            .map(|memo| memo.descriptor.manifest_path.clone());
        match manifest_path {
            Some(manifest_path) => self.cache.invalidate(&manifest_path),
            None => false,
        }
    }
}

fn resolution(
    descriptor: ProjectDescriptor,
    entry: CacheEntry,
    dependencies: &DependencySet,
    cache_hit: bool,
) -> Resolution {
    Resolution {
        descriptor,
        entry,
        dependencies: dependencies.watch_files(),
        cache_hit,
    }
}
