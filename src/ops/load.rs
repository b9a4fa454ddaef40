use std::path::Path;

use glob::Pattern;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, IoResultExt, Result};
use crate::types::{FileEntry, FileMode, FileSet, RelativePath};

/// read a skill directory into a file set
///
/// walks `dir` in file-name order, skipping anything matching one of
/// `excludes` (matched against the '/'-joined path relative to `dir`).
/// only regular files are collected; symlinks are not followed.
pub fn load_skill_dir(dir: &Path, excludes: &[String]) -> Result<FileSet> {
    let patterns = excludes
        .iter()
        .map(|p| Pattern::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut entries = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(dir, e, &patterns));

    for entry in walker {
        let entry = entry.map_err(|e| walk_error(dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = RelativePath::parse(relative_name(dir, &entry)?)?;
        let content = std::fs::read(entry.path()).with_path(entry.path())?;
        let mut file = FileEntry::new(path, content);
        if is_executable(&entry)? {
            file.mode = FileMode::Executable;
        }
        entries.push(file);
    }

    tracing::debug!(dir = %dir.display(), files = entries.len(), "skill directory loaded");
    FileSet::new(entries)
}

fn relative_name(root: &Path, entry: &DirEntry) -> Result<String> {
    let rel = entry
        .path()
        .strip_prefix(root)
        .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;

    let mut segments = Vec::new();
    for component in rel.components() {
        let segment = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::InvalidPath(rel.display().to_string()))?;
        segments.push(segment);
    }
    Ok(segments.join("/"))
}

fn is_excluded(root: &Path, entry: &DirEntry, patterns: &[Pattern]) -> bool {
    match relative_name(root, entry) {
        Ok(name) => patterns.iter().any(|p| p.matches(&name)),
        // non-utf8 names are rejected later with a proper error
        Err(_) => false,
    }
}

#[cfg(unix)]
fn is_executable(entry: &DirEntry) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let meta = entry.metadata().map_err(|e| walk_error(entry.path(), e))?;
    Ok(meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_entry: &DirEntry) -> Result<bool> {
    Ok(false)
}

fn walk_error(fallback: &Path, e: walkdir::Error) -> Error {
    let path = e.path().unwrap_or(fallback).to_path_buf();
    let source = e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "directory loop"));
    Error::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use std::fs;

    fn paths(set: &FileSet) -> Vec<&str> {
        set.entries().iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_load_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SKILL.md"), "# Skill").unwrap();
        fs::create_dir_all(dir.path().join("scripts")).unwrap();
        fs::write(dir.path().join("scripts/run.py"), "print(1)").unwrap();
        fs::create_dir_all(dir.path().join("references/deep")).unwrap();
        fs::write(dir.path().join("references/deep/api.md"), "api").unwrap();

        let set = load_skill_dir(dir.path(), &[]).unwrap();
        assert_eq!(
            paths(&set),
            vec!["SKILL.md", "references/deep/api.md", "scripts/run.py"]
        );
        assert_eq!(set.entries()[0].content, b"# Skill");
    }

    #[test]
    fn test_default_excludes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SKILL.md"), "# Skill").unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(dir.path().join(".git/objects/x"), "x").unwrap();

        let excludes = DeployConfig::default().exclude;
        let set = load_skill_dir(dir.path(), &excludes).unwrap();
        assert_eq!(paths(&set), vec!["SKILL.md"]);
    }

    #[test]
    fn test_custom_exclude() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SKILL.md"), "# Skill").unwrap();
        fs::write(dir.path().join("notes.tmp"), "scratch").unwrap();

        let set = load_skill_dir(dir.path(), &["*.tmp".to_string()]).unwrap();
        assert_eq!(paths(&set), vec!["SKILL.md"]);
    }

    #[test]
    fn test_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("SKILL.md"), "# Skill").unwrap();
        let result = load_skill_dir(dir.path(), &["[".to_string()]);
        assert!(matches!(result, Err(Error::Pattern(_))));
    }

    #[test]
    fn test_empty_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_skill_dir(dir.path(), &[]);
        assert!(matches!(result, Err(Error::EmptySubmission)));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.path().join("SKILL.md"), "# Skill").unwrap();

        let set = load_skill_dir(dir.path(), &[]).unwrap();
        let modes: Vec<_> = set.entries().iter().map(|e| e.mode).collect();
        assert_eq!(modes, vec![FileMode::Regular, FileMode::Executable]);
    }
}
