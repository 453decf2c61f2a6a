use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub mod emojis {
    use console::Emoji;
    pub static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
    pub static SWORDS: Emoji<'_, '_> = Emoji("⚔️  ", "");
    pub static ZAP: Emoji<'_, '_> = Emoji("⚡ ", "");
    pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "");
    pub static RECYCLE: Emoji<'_, '_> = Emoji("♻️  ", "");
    pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "");
    pub static SPARKLES: Emoji<'_, '_> = Emoji("✨ ", "");
    pub static LINE_CLEAR: &str = "\x1b[2K\r";
}

/// Modification time of `path`, or `None` when it cannot be stat'ed.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

pub fn get_abs_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_has_no_mtime() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(modified_time(&dir.path().join("nope.rs")), None);

        let file = dir.path().join("lib.rs");
        std::fs::write(&file, "").unwrap();
        assert!(modified_time(&file).is_some());
    }

    #[test]
    fn abs_path_falls_back_to_input() {
        let missing = Path::new("/definitely/not/here");
        assert_eq!(get_abs_path(missing), missing.to_path_buf());
    }
}
