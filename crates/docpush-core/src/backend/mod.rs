//! ContentsBackend trait: raw per-ref access to a repository contents store.
//!
//! Implementations:
//! - `GitHubContents` - GitHub REST contents API over HTTP
//! - `InMemoryContents` - For testing
//!
//! Backends do one request per call. Branch fallback, credential checks and
//! conflict retries live in `RemoteGateway`.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::location::DocumentLocation;
use crate::token::{Credential, VersionToken};

mod github;
mod memory;

pub use github::{DEFAULT_API_URL, GitHubContents};
pub use memory::{BackendCall, InMemoryContents};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// A file as described by the structured (JSON) contents response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Version token of the stored revision
    pub sha: VersionToken,
    /// Decoded text, absent when the store did not inline the content
    pub content: Option<String>,
}

/// A conditional write of one file.
#[derive(Debug, Clone, Copy)]
pub struct PutRequest<'a> {
    pub content: &'a str,
    pub message: &'a str,
    /// Token the write is conditioned on; `None` creates a new file
    pub sha: Option<&'a VersionToken>,
}

#[async_trait]
pub trait ContentsBackend: Send + Sync {
    /// Read the structured entry for the file at `git_ref`.
    async fn fetch_entry(
        &self,
        location: &DocumentLocation,
        git_ref: &str,
        credential: Option<&Credential>,
    ) -> Result<RemoteEntry>;

    /// Read the file at `git_ref` as raw text (authenticated shortcut).
    async fn fetch_raw(
        &self,
        location: &DocumentLocation,
        git_ref: &str,
        credential: &Credential,
    ) -> Result<String>;

    /// Write the file to the location's branch, returning the new token.
    async fn put_entry(
        &self,
        location: &DocumentLocation,
        request: PutRequest<'_>,
        credential: &Credential,
    ) -> Result<VersionToken>;
}
