//! Document locations within a hosted repository.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("Repository must be given as owner/repo, got '{0}'")]
    InvalidRepository(String),

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must not contain '/': {value}")]
    UnexpectedSlash { field: &'static str, value: String },

    #[error("Path contains directory traversal: {0}")]
    DirectoryTraversal(String),

    #[error("Path contains an empty segment: {0}")]
    EmptySegment(String),
}

/// Identifies a single versioned document: which repository, which file,
/// which branch.
///
/// Fixed for the lifetime of an editing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentLocation {
    owner: String,
    repo: String,
    path: String,
    branch: String,
}

impl DocumentLocation {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        path: impl AsRef<str>,
        branch: impl Into<String>,
    ) -> Result<Self, LocationError> {
        let owner = validate_name("owner", owner.into())?;
        let repo = validate_name("repo", repo.into())?;
        let path = validate_path(path.as_ref())?;
        let branch = branch.into();
        if branch.trim().is_empty() {
            return Err(LocationError::Empty { field: "branch" });
        }

        Ok(Self {
            owner,
            repo,
            path,
            branch,
        })
    }

    /// Build a location from an `owner/repo` slug.
    pub fn parse(slug: &str, path: &str, branch: &str) -> Result<Self, LocationError> {
        let (owner, repo) = slug
            .split_once('/')
            .ok_or_else(|| LocationError::InvalidRepository(slug.to_string()))?;
        Self::new(owner, repo, path, branch)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Path of the file relative to the repository root, without a leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Final path segment, e.g. `notes.md` for `docs/notes.md`.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl std::fmt::Display for DocumentLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}@{}", self.owner, self.repo, self.path, self.branch)
    }
}

fn validate_name(field: &'static str, value: String) -> Result<String, LocationError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(LocationError::Empty { field });
    }
    if value.contains('/') {
        return Err(LocationError::UnexpectedSlash { field, value });
    }
    Ok(value)
}

fn validate_path(path: &str) -> Result<String, LocationError> {
    let clean = path.trim().trim_start_matches('/');
    if clean.is_empty() {
        return Err(LocationError::Empty { field: "path" });
    }

    for segment in clean.split('/') {
        match segment {
            "" => return Err(LocationError::EmptySegment(path.to_string())),
            "." | ".." => return Err(LocationError::DirectoryTraversal(path.to_string())),
            _ => {}
        }
    }

    Ok(clean.to_string())
}
