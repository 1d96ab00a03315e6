//! Remote content gateway: the read/write primitives a session uses.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backend::{ContentsBackend, PutRequest, RemoteEntry};
use crate::conflict::is_version_conflict;
use crate::error::GatewayError;
use crate::location::DocumentLocation;
use crate::token::{Credential, VersionToken};

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Ref tried when the configured branch does not exist.
pub const DEFAULT_FALLBACK_REF: &str = "master";

/// A conditional write of a document.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub content: &'a str,
    pub message: &'a str,
    /// Token the write is conditioned on. When `None` the gateway reads a
    /// fresh token itself and retries once if that one goes stale.
    pub expected: Option<&'a VersionToken>,
}

/// The primitive remote operations on a single document.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Read the current version token of the document.
    async fn read_version_token(
        &self,
        location: &DocumentLocation,
        credential: Option<&Credential>,
    ) -> Result<VersionToken>;

    /// Read the document as plain text.
    async fn read_document(
        &self,
        location: &DocumentLocation,
        credential: Option<&Credential>,
    ) -> Result<String>;

    /// Write the document, returning the token of the new revision.
    ///
    /// Fails with `CredentialRequired` before any network call when no
    /// credential is given, and with `VersionConflict` when the expected
    /// token is no longer current.
    async fn write_document(
        &self,
        location: &DocumentLocation,
        request: WriteRequest<'_>,
        credential: Option<&Credential>,
    ) -> Result<VersionToken>;
}

/// `ContentGateway` over any `ContentsBackend`.
pub struct RemoteGateway<B> {
    backend: B,
    fallback_ref: String,
}

impl<B: ContentsBackend> RemoteGateway<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            fallback_ref: DEFAULT_FALLBACK_REF.to_string(),
        }
    }

    pub fn with_fallback_ref(mut self, fallback_ref: impl Into<String>) -> Self {
        self.fallback_ref = fallback_ref.into();
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn fallback_for(&self, location: &DocumentLocation) -> Option<&str> {
        (location.branch() != self.fallback_ref).then_some(self.fallback_ref.as_str())
    }

    /// Structured read with branch fallback.
    async fn read_entry(
        &self,
        location: &DocumentLocation,
        credential: Option<&Credential>,
    ) -> Result<RemoteEntry> {
        let primary = self
            .backend
            .fetch_entry(location, location.branch(), credential)
            .await;

        match (primary, self.fallback_for(location)) {
            (Err(e), Some(fallback)) if e.is_not_found() => {
                debug!(
                    "{} not found on {}, trying {}",
                    location.path(),
                    location.branch(),
                    fallback
                );
                self.backend.fetch_entry(location, fallback, credential).await
            }
            (result, _) => result,
        }
    }

    /// Raw read with branch fallback.
    async fn read_raw(
        &self,
        location: &DocumentLocation,
        credential: &Credential,
    ) -> Result<String> {
        let primary = self
            .backend
            .fetch_raw(location, location.branch(), credential)
            .await;

        match (primary, self.fallback_for(location)) {
            (Err(e), Some(fallback)) if e.is_not_found() => {
                debug!(
                    "{} not found on {}, trying {}",
                    location.path(),
                    location.branch(),
                    fallback
                );
                self.backend.fetch_raw(location, fallback, credential).await
            }
            (result, _) => result,
        }
    }

    /// Token on the configured branch only; `None` when the file is new.
    async fn write_target_token(
        &self,
        location: &DocumentLocation,
        credential: &Credential,
    ) -> Result<Option<VersionToken>> {
        match self
            .backend
            .fetch_entry(location, location.branch(), Some(credential))
            .await
        {
            Ok(entry) => Ok(Some(entry.sha)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(
        &self,
        location: &DocumentLocation,
        request: WriteRequest<'_>,
        sha: Option<&VersionToken>,
        credential: &Credential,
    ) -> Result<VersionToken> {
        let put = PutRequest {
            content: request.content,
            message: request.message,
            sha,
        };
        self.backend.put_entry(location, put, credential).await
    }
}

#[async_trait]
impl<B: ContentsBackend> ContentGateway for RemoteGateway<B> {
    async fn read_version_token(
        &self,
        location: &DocumentLocation,
        credential: Option<&Credential>,
    ) -> Result<VersionToken> {
        Ok(self.read_entry(location, credential).await?.sha)
    }

    async fn read_document(
        &self,
        location: &DocumentLocation,
        credential: Option<&Credential>,
    ) -> Result<String> {
        if let Some(credential) = credential {
            return self.read_raw(location, credential).await;
        }

        self.read_entry(location, None).await?.content.ok_or_else(|| {
            GatewayError::MalformedResponse(format!(
                "no inline content returned for {}",
                location.path()
            ))
        })
    }

    async fn write_document(
        &self,
        location: &DocumentLocation,
        request: WriteRequest<'_>,
        credential: Option<&Credential>,
    ) -> Result<VersionToken> {
        let credential = credential.ok_or(GatewayError::CredentialRequired)?;

        if let Some(expected) = request.expected {
            return self.put(location, request, Some(expected), credential).await;
        }

        let fresh = self.write_target_token(location, credential).await?;
        match self.put(location, request, fresh.as_ref(), credential).await {
            Err(e) if is_version_conflict(&e) => {
                warn!("Write to {} conflicted, retrying once with a fresh token", location);
                let retry = self.write_target_token(location, credential).await?;
                self.put(location, request, retry.as_ref(), credential).await
            }
            result => result,
        }
    }
}
