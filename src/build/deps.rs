use ahash::AHashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::build_types::ProjectDescriptor;
use crate::helpers;

/// Source files of a crate as they are on disk right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    pub manifest_path: PathBuf,
    pub source_files: Vec<PathBuf>,
    /// Newest modification time among `source_files`.
    pub newest_modified: Option<SystemTime>,
}

impl DependencySet {
    /// Paths the host should register for rebuild notifications. Includes the
    /// descriptor itself.
    pub fn watch_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(self.source_files.len() + 1);
        files.push(self.manifest_path.clone());
        files.extend(self.source_files.iter().cloned());
        files
    }
}

/// Walks `<root>/src` and collects every `.rs` file.
///
/// A directory that cannot be read contributes nothing; it never fails the
/// walk. Symlinked directories are followed, but each real directory is
/// walked once, so a link back to an ancestor ends there.
pub fn enumerate(descriptor: &ProjectDescriptor) -> DependencySet {
    let mut source_files = Vec::new();
    let mut newest_modified: Option<SystemTime> = None;
    let mut pending = vec![descriptor.source_dir()];
    let mut walked = AHashSet::new();

    while let Some(dir) = pending.pop() {
        let real = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
        if !walked.insert(real) {
            log::trace!("Already walked {}", dir.display());
            continue;
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let is_dir = file_type.is_dir() || (file_type.is_symlink() && path.is_dir());
            if is_dir {
                pending.push(path);
            } else if is_source_file(&path) {
                if let Some(modified) = helpers::modified_time(&path) {
                    newest_modified =
                        Some(newest_modified.map_or(modified, |newest| newest.max(modified)));
                }
                source_files.push(path);
            }
        }
    }

    source_files.sort();
    DependencySet {
        manifest_path: descriptor.manifest_path.clone(),
        source_files,
        newest_modified,
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "rs")
}
