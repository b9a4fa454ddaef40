use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// a POSIX-style path relative to a tree root
///
/// never empty, no leading or trailing '/', no empty, '.' or '..'
/// segments, no NUL bytes and no backslashes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    pub fn parse(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// join another relative path below this one
    pub fn join(&self, other: &RelativePath) -> RelativePath {
        RelativePath(format!("{}/{}", self.0, other.0))
    }

    /// path segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl TryFrom<String> for RelativePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<RelativePath> for String {
    fn from(value: RelativePath) -> Self {
        value.0
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("empty path".to_string()));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(Error::InvalidPath(format!(
            "path cannot start or end with '/': {}",
            path
        )));
    }
    if path.contains('\0') {
        return Err(Error::InvalidPath(format!(
            "path contains null byte: {:?}",
            path
        )));
    }
    if path.contains('\\') {
        return Err(Error::InvalidPath(format!(
            "path contains backslash: {}",
            path
        )));
    }
    for segment in path.split('/') {
        match segment {
            "" => {
                return Err(Error::InvalidPath(format!(
                    "path contains empty segment: {}",
                    path
                )))
            }
            "." | ".." => {
                return Err(Error::InvalidPath(format!(
                    "path cannot contain '.' or '..': {}",
                    path
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// file mode recorded in the tree
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    #[default]
    Regular,
    Executable,
}

impl FileMode {
    /// git octal mode string
    pub fn as_git_mode(&self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
        }
    }
}

/// one file of a deployment
#[derive(Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: RelativePath,
    pub content: Vec<u8>,
    pub mode: FileMode,
}

impl FileEntry {
    pub fn new(path: RelativePath, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path,
            content: content.into(),
            mode: FileMode::Regular,
        }
    }

    /// build from an unchecked path string
    pub fn from_str_path(path: &str, content: impl Into<Vec<u8>>) -> Result<Self> {
        Ok(Self::new(RelativePath::parse(path)?, content))
    }

    /// mark the entry executable
    pub fn executable(mut self) -> Self {
        self.mode = FileMode::Executable;
        self
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("path", &self.path)
            .field("len", &self.content.len())
            .field("mode", &self.mode)
            .finish()
    }
}

/// a validated submission: non-empty, unique paths, submission order kept
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSet {
    entries: Vec<FileEntry>,
}

impl FileSet {
    /// validate a submission
    ///
    /// duplicates are rejected rather than letting the last entry win
    /// inside the remote tree.
    pub fn new(entries: Vec<FileEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptySubmission);
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.path.as_str()) {
                return Err(Error::DuplicatePath(entry.path.to_string()));
            }
        }

        // a file cannot also be a directory of another entry
        for entry in &entries {
            let mut prefix = String::new();
            for segment in entry.path.segments() {
                if !prefix.is_empty() && seen.contains(prefix.as_str()) {
                    return Err(Error::InvalidPath(format!(
                        "{} is both a file and a directory",
                        prefix
                    )));
                }
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(segment);
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// always false for a constructed set
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// total content size in bytes
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.content.len() as u64).sum()
    }
}
