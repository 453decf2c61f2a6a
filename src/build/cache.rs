//! In-memory result cache and the staleness rules that guard it.
//!
//! An entry is trusted only while every artifact it names exists and neither
//! the manifest nor any source file is newer than the primary artifact. Any
//! file that cannot be stat'ed counts as stale; staleness is never an error.

use ahash::AHashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::build_types::CacheEntry;
use super::deps::DependencySet;
use crate::helpers;

/// Why a cached entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    MissingArtifact(PathBuf),
    ManifestUnreadable,
    ManifestNewer,
    SourceNewer,
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::MissingArtifact(path) => write!(f, "artifact {} is missing", path.display()),
            Staleness::ManifestUnreadable => write!(f, "manifest could not be read"),
            Staleness::ManifestNewer => write!(f, "manifest changed after the last build"),
            Staleness::SourceNewer => write!(f, "sources changed after the last build"),
        }
    }
}

/// Checks an entry against the current state of the crate.
pub fn check(entry: &CacheEntry, dependencies: &DependencySet) -> Result<(), Staleness> {
    for artifact in entry.artifacts() {
        if !artifact.is_file() {
            return Err(Staleness::MissingArtifact(artifact.to_path_buf()));
        }
    }

    let primary = entry.primary_artifact();
    let Some(artifact_modified) = helpers::modified_time(primary) else {
        return Err(Staleness::MissingArtifact(primary.to_path_buf()));
    };

    let Some(manifest_modified) = helpers::modified_time(&dependencies.manifest_path) else {
        return Err(Staleness::ManifestUnreadable);
    };
    if manifest_modified > artifact_modified {
        return Err(Staleness::ManifestNewer);
    }

    match dependencies.newest_modified {
        Some(newest) if newest > artifact_modified => Err(Staleness::SourceNewer),
        _ => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<AHashMap<PathBuf, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `manifest_path` when it is still valid.
    pub fn lookup(&self, manifest_path: &Path, dependencies: &DependencySet) -> Option<CacheEntry> {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(manifest_path)
            .cloned()?;

        match check(&entry, dependencies) {
            Ok(()) => Some(entry),
            Err(reason) => {
                log::debug!("Cache entry for {} is stale: {}", manifest_path.display(), reason);
                None
            }
        }
    }

    pub fn store(&self, manifest_path: &Path, entry: CacheEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(manifest_path.to_path_buf(), entry);
    }

    pub fn invalidate(&self, manifest_path: &Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(manifest_path)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
