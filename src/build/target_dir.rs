//! Memoized lookup of cargo's target directory per project root.
//!
//! Entries are never invalidated: the toolchain's output location is assumed
//! to stay put for as long as the orchestrator lives.

use ahash::AHashMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::{BuildError, InvocationFailure};
use super::toolchain::{Invocation, ToolRunner};
use crate::config::Config;

#[derive(Debug, Deserialize)]
struct Metadata {
    target_directory: PathBuf,
}

#[derive(Debug, Default)]
pub struct TargetDirResolver {
    target_dirs: Mutex<AHashMap<PathBuf, PathBuf>>,
}

impl TargetDirResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, root: &Path) -> Option<PathBuf> {
        self.target_dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(root)
            .cloned()
    }

    pub async fn resolve<T: ToolRunner>(
        &self,
        runner: &T,
        config: &Config,
        root: &Path,
    ) -> Result<PathBuf, BuildError> {
        if let Some(target_dir) = self.cached(root) {
            return Ok(target_dir);
        }

        let invocation = Invocation::new(&config.cargo, root)
            .arg("metadata")
            .args(["--format-version", "1", "--no-deps"]);
        let stdout = runner.run(&invocation).await?.into_query_result(&invocation)?;
        let metadata: Metadata =
            serde_json::from_str(&stdout).map_err(|e| BuildError::ToolchainInvocation {
                command: invocation.short_name(),
                failure: InvocationFailure::MalformedOutput(e.to_string()),
            })?;

        log::debug!(
            "Target directory for {} is {}",
            root.display(),
            metadata.target_directory.display()
        );
        self.target_dirs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(root.to_path_buf(), metadata.target_directory.clone());
        Ok(metadata.target_directory)
    }
}
