//! Session state owned by a `Coordinator` and observed by its host.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::ErrorDescriptor;
use crate::token::VersionToken;

/// What the coordinator is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Saving,
    Fetching,
    /// Refreshing the token and then writing, as part of a retry.
    FetchingThenSaving,
}

/// State of one editing session.
///
/// Created when the session starts and dropped with it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Token of the most recent successful read or write
    pub current_version_token: Option<VersionToken>,
    pub is_saving: bool,
    pub is_fetching: bool,
    pub save_failure: Option<ErrorDescriptor>,
    pub fetch_failure: Option<ErrorDescriptor>,
    /// Set when the last save was rejected because its token was stale.
    /// Cleared only when a new save attempt or a fetch-and-retry begins,
    /// or when a fetch that is part of a retry completes.
    pub is_version_conflict: bool,
}

impl SessionState {
    pub fn new(initial_token: Option<VersionToken>) -> Self {
        Self {
            current_version_token: initial_token,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> Phase {
        match (self.is_fetching, self.is_saving) {
            (false, false) => Phase::Idle,
            (false, true) => Phase::Saving,
            (true, false) => Phase::Fetching,
            (true, true) => Phase::FetchingThenSaving,
        }
    }
}

/// Shared handle to a session's state.
///
/// Cloning is cheap. The lock is only taken for the duration of a snapshot
/// or an update, never across a remote call.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}
