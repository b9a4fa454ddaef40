use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{FileSet, RelativePath};

/// repository visibility for newly created repositories
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn is_private(&self) -> bool {
        matches!(self, Visibility::Private)
    }
}

/// "owner/name" identifier of a hosted repository
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoFullName {
    owner: String,
    name: String,
}

impl RepoFullName {
    pub fn new(owner: &str, name: &str) -> Result<Self> {
        validate_repo_segment(owner)?;
        validate_repo_segment(name)?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for RepoFullName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (owner, name) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidName(format!("expected owner/name: {}", s)))?;
        Self::new(owner, name)
    }
}

impl TryFrom<String> for RepoFullName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RepoFullName> for String {
    fn from(value: RepoFullName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RepoFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl fmt::Debug for RepoFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoFullName({})", self)
    }
}

/// validate one half of an owner/name pair
///
/// hosted names are ASCII alphanumerics plus '-', '_' and '.'.
pub fn validate_repo_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::InvalidName("empty repository segment".to_string()));
    }
    if segment.len() > 100 {
        return Err(Error::InvalidName(format!(
            "repository segment too long: {}",
            segment
        )));
    }
    if segment == "." || segment == ".." {
        return Err(Error::InvalidName(format!("reserved name: {}", segment)));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::InvalidName(format!(
            "invalid character {:?} in {}",
            c, segment
        )));
    }
    Ok(())
}

/// turn a human-readable skill name into a directory name
///
/// lowercase ASCII alphanumerics, runs of anything else collapse into a
/// single '-', no leading or trailing '-'.
pub fn slugify(name: &str) -> Result<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        return Err(Error::InvalidName(format!(
            "name has no usable characters: {:?}",
            name
        )));
    }
    Ok(slug)
}

/// where a deployment goes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentTarget {
    /// create `name` under the authenticated account and make it the root commit
    NewRepository { name: String, visibility: Visibility },
    /// layer the files into an existing repository's default branch
    ExistingRepository {
        full_name: RepoFullName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_path: Option<RelativePath>,
    },
}

impl DeploymentTarget {
    pub fn new_repository(name: impl Into<String>, visibility: Visibility) -> Self {
        Self::NewRepository {
            name: name.into(),
            visibility,
        }
    }

    pub fn existing_repository(full_name: RepoFullName, base_path: Option<RelativePath>) -> Self {
        Self::ExistingRepository {
            full_name,
            base_path,
        }
    }

    /// short label for log lines
    pub fn describe(&self) -> String {
        match self {
            DeploymentTarget::NewRepository { name, .. } => format!("new:{}", name),
            DeploymentTarget::ExistingRepository { full_name, .. } => {
                format!("existing:{}", full_name)
            }
        }
    }
}

/// a single deployment request
#[derive(Clone, Debug)]
pub struct Deployment {
    /// human-readable skill name
    pub name: String,
    pub description: Option<String>,
    pub files: FileSet,
    pub target: DeploymentTarget,
}

impl Deployment {
    pub fn new(name: impl Into<String>, files: FileSet, target: DeploymentTarget) -> Self {
        Self {
            name: name.into(),
            description: None,
            files,
            target,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// directory the files land in for existing-repository targets
    pub fn unit_dir(&self) -> Result<Option<RelativePath>> {
        match &self.target {
            DeploymentTarget::NewRepository { .. } => Ok(None),
            DeploymentTarget::ExistingRepository { base_path, .. } => {
                let unit = RelativePath::parse(slugify(&self.name)?)?;
                Ok(Some(match base_path {
                    Some(base) => base.join(&unit),
                    None => unit,
                }))
            }
        }
    }
}
