//! Source discovery
//!
//! Finds the Python sources a run will target. An explicit file list (from
//! `--files-to-debug`) wins; otherwise everything under `code_dir` is
//! walked, skipping the usual vendored/generated directories and remedy's
//! own artifact directory.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IGNORE_DIRS: &[&str] = &[
    ".git",
    ".remedy",
    "__pycache__",
    ".venv",
    "venv",
    "node_modules",
    "dist",
    "build",
];

/// Paths of target sources, relative to `code_dir`, in stable order.
pub fn discover_files(code_dir: &Path, explicit: Option<&[PathBuf]>) -> Vec<PathBuf> {
    if let Some(files) = explicit {
        return files.to_vec();
    }

    let mut found = Vec::new();

    for entry in WalkDir::new(code_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !should_ignore(e))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }

        if let Ok(relative) = path.strip_prefix(code_dir) {
            found.push(relative.to_path_buf());
        }
    }

    found.sort();
    found
}

fn should_ignore(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORE_DIRS.contains(&name))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discovers_python_sources_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/b.py"), "y = 2\n").unwrap();

        let files = discover_files(dir.path(), None);
        assert_eq!(files, vec![PathBuf::from("a.py"), PathBuf::from("nested/b.py")]);
    }

    #[test]
    fn test_ignored_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["__pycache__", "venv", ".remedy"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join("c.py"), "z = 3\n").unwrap();
        }
        fs::write(dir.path().join("keep.py"), "k = 4\n").unwrap();

        let files = discover_files(dir.path(), None);
        assert_eq!(files, vec![PathBuf::from("keep.py")]);
    }

    #[test]
    fn test_explicit_list_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();

        let explicit = vec![PathBuf::from("b.py")];
        let files = discover_files(dir.path(), Some(&explicit));
        assert_eq!(files, explicit);
    }
}
