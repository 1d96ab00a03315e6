//! In-memory contents store for testing and offline use.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ContentsBackend, PutRequest, RemoteEntry, Result};
use crate::error::GatewayError;
use crate::location::DocumentLocation;
use crate::token::{Credential, VersionToken};

/// A request seen by `InMemoryContents`, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    FetchEntry { path: String, git_ref: String },
    FetchRaw { path: String, git_ref: String },
    PutEntry {
        path: String,
        branch: String,
        sha: Option<VersionToken>,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileKey {
    owner: String,
    repo: String,
    git_ref: String,
    path: String,
}

impl FileKey {
    fn new(location: &DocumentLocation, git_ref: &str) -> Self {
        Self {
            owner: location.owner().to_string(),
            repo: location.repo().to_string(),
            git_ref: git_ref.to_string(),
            path: location.path().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    sha: VersionToken,
}

type Observer = Arc<dyn Fn(&BackendCall) + Send + Sync>;

/// Contents store kept in memory.
///
/// Writes are checked against the stored token the same way the hosted API
/// does it. Failures can be scripted per call, and every call is logged.
#[derive(Default)]
pub struct InMemoryContents {
    files: RwLock<HashMap<FileKey, StoredFile>>,
    calls: RwLock<Vec<BackendCall>>,
    entry_failures: RwLock<VecDeque<GatewayError>>,
    raw_failures: RwLock<VecDeque<GatewayError>>,
    put_failures: RwLock<VecDeque<GatewayError>>,
    write_tokens: RwLock<VecDeque<VersionToken>>,
    observer: RwLock<Option<Observer>>,
}

impl InMemoryContents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file on the location's branch, as another writer would.
    pub fn insert(&self, location: &DocumentLocation, content: &str) -> VersionToken {
        self.insert_at(location, location.branch(), content)
    }

    /// Store a file on an arbitrary ref.
    pub fn insert_at(
        &self,
        location: &DocumentLocation,
        git_ref: &str,
        content: &str,
    ) -> VersionToken {
        let sha = content_token(content);
        self.store(FileKey::new(location, git_ref), content, sha.clone());
        sha
    }

    /// Store a file on the location's branch under a chosen token.
    pub fn insert_with_token(&self, location: &DocumentLocation, content: &str, sha: VersionToken) {
        self.store(FileKey::new(location, location.branch()), content, sha);
    }

    /// Content currently stored on the location's branch.
    pub fn content(&self, location: &DocumentLocation) -> Option<String> {
        self.read_files()
            .get(&FileKey::new(location, location.branch()))
            .map(|file| file.content.clone())
    }

    /// Token currently stored on the location's branch.
    pub fn token(&self, location: &DocumentLocation) -> Option<VersionToken> {
        self.read_files()
            .get(&FileKey::new(location, location.branch()))
            .map(|file| file.sha.clone())
    }

    /// Fail the next structured read with `error`.
    pub fn fail_next_entry(&self, error: GatewayError) {
        self.entry_failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Fail the next raw read with `error`.
    pub fn fail_next_raw(&self, error: GatewayError) {
        self.raw_failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Fail the next write with `error`, leaving the stored file untouched.
    pub fn fail_next_put(&self, error: GatewayError) {
        self.put_failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Use `sha` as the token of the next successful write.
    pub fn queue_write_token(&self, sha: VersionToken) {
        self.write_tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(sha);
    }

    /// Called with every request before it is served.
    pub fn set_observer(&self, observer: impl Fn(&BackendCall) + Send + Sync + 'static) {
        *self.observer.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(observer));
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of requests served so far.
    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn store(&self, key: FileKey, content: &str, sha: VersionToken) {
        self.files.write().unwrap_or_else(|e| e.into_inner()).insert(
            key,
            StoredFile {
                content: content.to_string(),
                sha,
            },
        );
    }

    fn read_files(&self) -> std::sync::RwLockReadGuard<'_, HashMap<FileKey, StoredFile>> {
        self.files.read().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: BackendCall) {
        let observer = self.observer.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(observer) = observer {
            observer(&call);
        }
        self.calls.write().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn lookup(
        &self,
        failures: &RwLock<VecDeque<GatewayError>>,
        location: &DocumentLocation,
        git_ref: &str,
    ) -> Result<StoredFile> {
        if let Some(error) = failures.write().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return Err(error);
        }

        self.read_files()
            .get(&FileKey::new(location, git_ref))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                location: format!(
                    "{}/{}:{}@{}",
                    location.owner(),
                    location.repo(),
                    location.path(),
                    git_ref
                ),
            })
    }
}

#[async_trait]
impl ContentsBackend for InMemoryContents {
    async fn fetch_entry(
        &self,
        location: &DocumentLocation,
        git_ref: &str,
        _credential: Option<&Credential>,
    ) -> Result<RemoteEntry> {
        self.record(BackendCall::FetchEntry {
            path: location.path().to_string(),
            git_ref: git_ref.to_string(),
        });

        let file = self.lookup(&self.entry_failures, location, git_ref)?;
        Ok(RemoteEntry {
            sha: file.sha,
            content: Some(file.content),
        })
    }

    async fn fetch_raw(
        &self,
        location: &DocumentLocation,
        git_ref: &str,
        _credential: &Credential,
    ) -> Result<String> {
        self.record(BackendCall::FetchRaw {
            path: location.path().to_string(),
            git_ref: git_ref.to_string(),
        });

        Ok(self.lookup(&self.raw_failures, location, git_ref)?.content)
    }

    async fn put_entry(
        &self,
        location: &DocumentLocation,
        request: PutRequest<'_>,
        _credential: &Credential,
    ) -> Result<VersionToken> {
        self.record(BackendCall::PutEntry {
            path: location.path().to_string(),
            branch: location.branch().to_string(),
            sha: request.sha.cloned(),
            content: request.content.to_string(),
        });

        if let Some(error) = self
            .put_failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(error);
        }

        let key = FileKey::new(location, location.branch());
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());

        match (files.get(&key), request.sha) {
            (Some(current), Some(expected)) if &current.sha != expected => {
                return Err(GatewayError::VersionConflict {
                    message: format!("{} does not match {}", location.path(), expected),
                });
            }
            (Some(_), None) => {
                return Err(GatewayError::VersionConflict {
                    message: "Invalid request. \"sha\" wasn't supplied.".to_string(),
                });
            }
            (None, Some(expected)) => {
                return Err(GatewayError::VersionConflict {
                    message: format!("{} does not match {}", location.path(), expected),
                });
            }
            _ => {}
        }

        let queued = self
            .write_tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let sha = queued.unwrap_or_else(|| content_token(request.content));

        files.insert(
            key,
            StoredFile {
                content: request.content.to_string(),
                sha: sha.clone(),
            },
        );

        Ok(sha)
    }
}

/// SHA-256 of the content, hex encoded.
fn content_token(content: &str) -> VersionToken {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    VersionToken::new(hex::encode(hasher.finalize()))
}
