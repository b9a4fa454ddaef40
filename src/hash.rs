use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::Error;

/// content address of a remote object (blob, tree or commit)
///
/// the remote store owns the hashing scheme; this is only a validated,
/// lowercase hex rendering of whatever it returned. SHA-1 hosts produce
/// 40 hex chars, SHA-256 hosts 64.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    /// parse from a hex string returned by the remote
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if !matches!(s.len(), 40 | 64) || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidObjectId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// full hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// kind of object being addressed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }
}

/// compute a git-style SHA-256 address over a serialized object
///
/// format: `<kind> <payload_len>\0<payload>`
pub fn compute_object_id(kind: ObjectKind, payload: &[u8]) -> ObjectId {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(payload.len().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(payload);
    ObjectId(hex::encode(hasher.finalize()))
}

/// address of a blob holding `content`
pub fn compute_blob_id(content: &[u8]) -> ObjectId {
    compute_object_id(ObjectKind::Blob, content)
}
