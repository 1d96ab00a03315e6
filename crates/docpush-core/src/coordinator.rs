//! Save / fetch-latest / fetch-and-retry coordinator.
//!
//! Sequences the gateway calls for one editing session and records every
//! outcome in `SessionState`. Nothing is returned to the host as an error:
//! hosts observe the state (via `SessionHandle`) and the `SessionHost`
//! callbacks.
//!
//! The coordinator does not reject reentrant calls. Hosts should not start a
//! save while `is_saving` is set.

use std::sync::RwLock;

use tracing::{debug, info, warn};

use crate::conflict::is_version_conflict;
use crate::convert::DocumentConverter;
use crate::error::{ErrorDescriptor, FailureKind, GatewayError};
use crate::gateway::{ContentGateway, WriteRequest};
use crate::location::DocumentLocation;
use crate::session::{SessionHandle, SessionState};
use crate::token::{Credential, VersionToken};

/// Shown instead of the server message whenever a save hits a stale token.
pub const VERSION_CONFLICT_NOTICE: &str = "This file was changed remotely since you loaded it. \
     Use \"Fetch latest & retry\" to pick up the current version and save your changes again.";

pub const MISSING_DOCUMENT_MESSAGE: &str =
    "No document is loaded: a location and version token are required to save.";
pub const MISSING_LOCATION_MESSAGE: &str = "No document location is set.";
pub const MISSING_CREDENTIAL_MESSAGE: &str = "A token is required. Sign in and try again.";
pub const MISSING_COMMIT_MESSAGE: &str = "Please enter a commit message.";

/// Success reports delivered to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Saved,
    Fetched,
}

/// How an entry point ended. The session state carries the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    /// Preconditions were not met and nothing was recorded.
    Skipped,
}

/// The host integration surface.
pub trait SessionHost<D>: Send + Sync {
    /// Document to persist, already in the stored plain format.
    fn current_document(&self) -> String;

    /// A save completed.
    fn on_saved(&self);

    /// Fetched content, in display form and as stored.
    fn on_content_fetched(&self, display: D, plain: &str);

    fn on_notice(&self, _notice: Notice) {}
}

pub struct Coordinator<G, C, H> {
    gateway: G,
    converter: C,
    host: H,
    location: Option<DocumentLocation>,
    credential: RwLock<Option<Credential>>,
    state: SessionHandle,
}

impl<G, C, H> Coordinator<G, C, H>
where
    G: ContentGateway,
    C: DocumentConverter,
    H: SessionHost<C::Display>,
{
    /// Start a session on `location`, loaded at `initial_token`.
    pub fn new(
        gateway: G,
        converter: C,
        host: H,
        location: Option<DocumentLocation>,
        initial_token: Option<VersionToken>,
    ) -> Self {
        Self {
            gateway,
            converter,
            host,
            location,
            credential: RwLock::new(None),
            state: SessionHandle::new(SessionState::new(initial_token)),
        }
    }

    pub fn with_credential(self, credential: Option<Credential>) -> Self {
        self.set_credential(credential);
        self
    }

    /// Replace the credential, e.g. after the user re-authenticates.
    pub fn set_credential(&self, credential: Option<Credential>) {
        *self.credential.write().unwrap_or_else(|e| e.into_inner()) = credential;
    }

    pub fn handle(&self) -> SessionHandle {
        self.state.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.snapshot()
    }

    pub fn location(&self) -> Option<&DocumentLocation> {
        self.location.as_ref()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Save the host's document, conditioned on the cached version token.
    pub async fn save(&self, commit_message: &str) -> Outcome {
        let cached = self.state.snapshot().current_version_token;
        let (Some(location), Some(cached)) = (self.location.as_ref(), cached) else {
            return self.reject_save(MISSING_DOCUMENT_MESSAGE);
        };
        let Some(credential) = self.credential() else {
            return self.reject_save(MISSING_CREDENTIAL_MESSAGE);
        };
        let message = commit_message.trim();
        if message.is_empty() {
            return self.reject_save(MISSING_COMMIT_MESSAGE);
        }

        self.state.update(|state| {
            state.is_saving = true;
            state.save_failure = None;
            state.is_version_conflict = false;
        });
        debug!("Saving {}", location);

        let token = self.refresh_token(location, &credential, cached).await;
        let content = self.host.current_document();
        let request = WriteRequest {
            content: &content,
            message,
            expected: Some(&token),
        };
        let result = self
            .gateway
            .write_document(location, request, Some(&credential))
            .await;
        let outcome = self.finish_write(location, result);

        self.state.update(|state| state.is_saving = false);
        outcome
    }

    /// Load the current remote document into the host.
    ///
    /// With `is_part_of_retry` no success notice is sent; instead the save
    /// failure and conflict flag are cleared for the save that follows.
    pub async fn fetch_latest(&self, is_part_of_retry: bool) -> Outcome {
        let Some(location) = self.location.as_ref() else {
            return self.reject_fetch(MISSING_LOCATION_MESSAGE);
        };
        let Some(credential) = self.credential() else {
            return self.reject_fetch(MISSING_CREDENTIAL_MESSAGE);
        };

        self.state.update(|state| {
            state.is_fetching = true;
            state.fetch_failure = None;
        });
        debug!("Fetching latest {}", location);

        let plain = match self.gateway.read_document(location, Some(&credential)).await {
            Ok(plain) => plain,
            Err(e) => {
                warn!("Fetch of {} failed: {}", location, e);
                self.state.update(|state| {
                    state.fetch_failure = Some(ErrorDescriptor::from(&e));
                    state.is_fetching = false;
                });
                return Outcome::Failed;
            }
        };

        let display = self.converter.from_plain(&plain);
        self.host.on_content_fetched(display, &plain);

        match self.gateway.read_version_token(location, Some(&credential)).await {
            Ok(token) => self.adopt_token(token),
            Err(e) => warn!("Fetched {} but could not refresh its version token: {}", location, e),
        }

        if is_part_of_retry {
            self.state.update(|state| {
                state.save_failure = None;
                state.is_version_conflict = false;
            });
        } else {
            self.host.on_notice(Notice::Fetched);
        }

        self.state.update(|state| state.is_fetching = false);
        Outcome::Completed
    }

    /// Recover from a version conflict: take the current remote token and
    /// write the local document over whatever is stored.
    ///
    /// The remote document is not re-read, so intervening remote changes are
    /// overwritten. Unmet preconditions make this a silent no-op.
    pub async fn fetch_latest_and_retry(&self, commit_message: &str) -> Outcome {
        let message = commit_message.trim();
        let (Some(location), Some(credential)) = (self.location.as_ref(), self.credential()) else {
            debug!("Skipping retry: no location or credential");
            return Outcome::Skipped;
        };
        if message.is_empty() {
            debug!("Skipping retry: empty commit message");
            return Outcome::Skipped;
        }

        self.state.update(|state| {
            state.is_fetching = true;
            state.save_failure = None;
            state.is_version_conflict = false;
        });
        debug!("Refreshing version token of {} before retrying", location);

        let token = match self.gateway.read_version_token(location, Some(&credential)).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Retry of {} aborted, token refresh failed: {}", location, e);
                self.state.update(|state| {
                    state.save_failure = Some(ErrorDescriptor::from(&e));
                    state.is_fetching = false;
                });
                return Outcome::Failed;
            }
        };

        self.state.update(|state| {
            state.current_version_token = Some(token.clone());
            state.is_saving = true;
        });

        let content = self.host.current_document();
        let request = WriteRequest {
            content: &content,
            message,
            expected: Some(&token),
        };
        let result = self
            .gateway
            .write_document(location, request, Some(&credential))
            .await;
        let outcome = self.finish_write(location, result);
        if outcome == Outcome::Completed {
            self.host.on_notice(Notice::Saved);
        }

        self.state.update(|state| {
            state.is_saving = false;
            state.is_fetching = false;
        });
        outcome
    }

    /// Best-effort token refresh before a write. Failures keep the cached
    /// token; a stale one is caught by the write itself.
    async fn refresh_token(
        &self,
        location: &DocumentLocation,
        credential: &Credential,
        cached: VersionToken,
    ) -> VersionToken {
        match self.gateway.read_version_token(location, Some(credential)).await {
            Ok(fresh) if fresh != cached => {
                info!("Remote version of {} moved from {} to {}", location, cached, fresh);
                self.adopt_token(fresh.clone());
                fresh
            }
            Ok(_) => cached,
            Err(e) => {
                warn!("Could not refresh version token of {}, using cached: {}", location, e);
                cached
            }
        }
    }

    fn adopt_token(&self, token: VersionToken) {
        self.state
            .update(|state| state.current_version_token = Some(token));
    }

    /// Record a write result. The saving flag is left to the caller.
    fn finish_write(
        &self,
        location: &DocumentLocation,
        result: Result<VersionToken, GatewayError>,
    ) -> Outcome {
        match result {
            Ok(token) => {
                info!("Saved {} at {}", location, token);
                self.state.update(|state| {
                    state.current_version_token = Some(token);
                    state.save_failure = None;
                    state.is_version_conflict = false;
                });
                self.host.on_saved();
                Outcome::Completed
            }
            Err(e) if is_version_conflict(&e) => {
                warn!("Save of {} rejected, version token is stale: {}", location, e);
                self.state.update(|state| {
                    state.is_version_conflict = true;
                    state.save_failure = Some(ErrorDescriptor::new(
                        FailureKind::VersionConflict,
                        VERSION_CONFLICT_NOTICE,
                    ));
                });
                Outcome::Failed
            }
            Err(e) => {
                warn!("Save of {} failed: {}", location, e);
                self.state.update(|state| {
                    state.is_version_conflict = false;
                    state.save_failure = Some(ErrorDescriptor::from(&e));
                });
                Outcome::Failed
            }
        }
    }

    fn reject_save(&self, message: &str) -> Outcome {
        debug!("Save rejected locally: {}", message);
        self.state
            .update(|state| state.save_failure = Some(ErrorDescriptor::precondition(message)));
        Outcome::Failed
    }

    fn reject_fetch(&self, message: &str) -> Outcome {
        debug!("Fetch rejected locally: {}", message);
        self.state
            .update(|state| state.fetch_failure = Some(ErrorDescriptor::precondition(message)));
        Outcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::backend::{BackendCall, InMemoryContents};
    use crate::convert::{MarkdownConverter, NoteContent};
    use crate::gateway::RemoteGateway;
    use crate::session::Phase;

    #[derive(Default)]
    struct TestHost {
        document: Mutex<String>,
        saved: AtomicUsize,
        fetched: Mutex<Vec<(NoteContent, String)>>,
        notices: Mutex<Vec<Notice>>,
    }

    impl SessionHost<NoteContent> for TestHost {
        fn current_document(&self) -> String {
            self.document.lock().unwrap().clone()
        }

        fn on_saved(&self) {
            self.saved.fetch_add(1, Ordering::SeqCst);
        }

        fn on_content_fetched(&self, display: NoteContent, plain: &str) {
            self.fetched.lock().unwrap().push((display, plain.to_string()));
        }

        fn on_notice(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    type TestCoordinator =
        Coordinator<RemoteGateway<InMemoryContents>, MarkdownConverter, TestHost>;

    fn location() -> DocumentLocation {
        DocumentLocation::parse("octo/notes", "test.md", "main").unwrap()
    }

    fn session(
        location: Option<DocumentLocation>,
        initial_token: Option<VersionToken>,
        credential: Option<&str>,
        document: &str,
    ) -> TestCoordinator {
        let host = TestHost {
            document: Mutex::new(document.to_string()),
            ..TestHost::default()
        };
        Coordinator::new(
            RemoteGateway::new(InMemoryContents::new()),
            MarkdownConverter,
            host,
            location,
            initial_token,
        )
        .with_credential(credential.map(Credential::new))
    }

    fn backend(coordinator: &TestCoordinator) -> &InMemoryContents {
        coordinator.gateway().backend()
    }

    /// Record the session phase at every backend call.
    fn record_phases(coordinator: &TestCoordinator) -> Arc<Mutex<Vec<Phase>>> {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        let handle = coordinator.handle();
        backend(coordinator)
            .set_observer(move |_| sink.lock().unwrap().push(handle.snapshot().phase()));
        phases
    }

    fn puts(coordinator: &TestCoordinator) -> Vec<(Option<VersionToken>, String)> {
        backend(coordinator)
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::PutEntry { sha, content, .. } => Some((sha, content)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_save_adopts_written_token() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("abc123")),
            Some("token"),
            "# Fixed",
        );
        backend(&coordinator).insert_with_token(&loc, "# Fxied", VersionToken::new("abc123"));
        backend(&coordinator).queue_write_token(VersionToken::new("newsha"));

        let outcome = coordinator.save("fix typo").await;

        assert_eq!(outcome, Outcome::Completed);
        let state = coordinator.state();
        assert_eq!(state.current_version_token, Some(VersionToken::new("newsha")));
        assert_eq!(state.save_failure, None);
        assert!(!state.is_version_conflict);
        assert_eq!(coordinator.host().saved.load(Ordering::SeqCst), 1);
        assert_eq!(backend(&coordinator).content(&loc).unwrap(), "# Fixed");
        assert_eq!(
            puts(&coordinator),
            vec![(Some(VersionToken::new("abc123")), "# Fixed".to_string())]
        );
    }

    #[tokio::test]
    async fn test_save_conditions_write_on_refreshed_token() {
        let loc = location();
        let coordinator = session(Some(loc.clone()), None, Some("token"), "mine");
        let stale = backend(&coordinator).insert(&loc, "v1");
        let fresh = backend(&coordinator).insert(&loc, "v2");
        coordinator
            .handle()
            .update(|state| state.current_version_token = Some(stale));

        assert_eq!(coordinator.save("update").await, Outcome::Completed);
        assert_eq!(puts(&coordinator)[0].0, Some(fresh));
    }

    #[tokio::test]
    async fn test_save_proceeds_with_cached_token_when_refresh_fails() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("t1")),
            Some("token"),
            "mine",
        );
        backend(&coordinator).insert_with_token(&loc, "v1", VersionToken::new("t1"));
        backend(&coordinator).fail_next_entry(GatewayError::Transport("timed out".to_string()));

        assert_eq!(coordinator.save("update").await, Outcome::Completed);
        assert_eq!(puts(&coordinator)[0].0, Some(VersionToken::new("t1")));
    }

    #[tokio::test]
    async fn test_conflict_shows_recovery_notice() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("abc123")),
            Some("token"),
            "mine",
        );
        backend(&coordinator).insert_with_token(&loc, "theirs", VersionToken::new("abc123"));
        backend(&coordinator).fail_next_put(GatewayError::Rejected {
            status: None,
            message: "test.md does not match sha abc123".to_string(),
        });

        assert_eq!(coordinator.save("fix typo").await, Outcome::Failed);

        let state = coordinator.state();
        assert!(state.is_version_conflict);
        let failure = state.save_failure.expect("save failure");
        assert_eq!(failure.kind, FailureKind::VersionConflict);
        assert_eq!(failure.message, VERSION_CONFLICT_NOTICE);
        assert_eq!(backend(&coordinator).content(&loc).unwrap(), "theirs");
        assert_eq!(coordinator.host().saved.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_token_from_store_is_a_conflict() {
        let loc = location();
        let stale = VersionToken::new("stale");
        let coordinator = session(Some(loc.clone()), Some(stale), Some("token"), "mine");
        backend(&coordinator).insert(&loc, "theirs");
        // Refresh fails, so the write goes out with the stale cached token.
        backend(&coordinator).fail_next_entry(GatewayError::Transport("timed out".to_string()));

        assert_eq!(coordinator.save("update").await, Outcome::Failed);
        assert!(coordinator.state().is_version_conflict);
        assert_eq!(backend(&coordinator).content(&loc).unwrap(), "theirs");
    }

    #[tokio::test]
    async fn test_conflict_classification_by_message() {
        let cases = [
            ("a.md does not match 123", true),
            ("\"sha\" wasn't supplied", true),
            ("File was MODIFIED upstream", true),
            ("modified", true),
            ("Internal Server Error", false),
            ("SHA required", false),
        ];

        for (message, expected) in cases {
            let loc = location();
            let token = VersionToken::new("t1");
            let coordinator = session(
                Some(loc.clone()),
                Some(token.clone()),
                Some("token"),
                "mine",
            );
            backend(&coordinator).insert_with_token(&loc, "v1", token);
            backend(&coordinator).fail_next_put(GatewayError::Rejected {
                status: None,
                message: message.to_string(),
            });

            coordinator.save("update").await;

            let state = coordinator.state();
            assert_eq!(state.is_version_conflict, expected, "message: {}", message);
            if !expected {
                assert_eq!(state.save_failure.unwrap().message, message);
            }
        }
    }

    #[tokio::test]
    async fn test_other_failure_clears_previous_conflict() {
        let loc = location();
        let token = VersionToken::new("t1");
        let coordinator = session(Some(loc.clone()), Some(token.clone()), Some("token"), "mine");
        backend(&coordinator).insert_with_token(&loc, "v1", token);
        backend(&coordinator).fail_next_put(GatewayError::VersionConflict {
            message: "conflict".to_string(),
        });
        backend(&coordinator)
            .fail_next_put(GatewayError::Transport("connection reset".to_string()));

        coordinator.save("first").await;
        assert!(coordinator.state().is_version_conflict);

        coordinator.save("second").await;
        let state = coordinator.state();
        assert!(!state.is_version_conflict);
        let failure = state.save_failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Transport);
        assert!(failure.message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unauthorized_write_asks_to_reauthenticate() {
        let loc = location();
        let token = VersionToken::new("t1");
        let coordinator = session(Some(loc.clone()), Some(token.clone()), Some("token"), "mine");
        backend(&coordinator).insert_with_token(&loc, "v1", token);
        backend(&coordinator)
            .fail_next_put(GatewayError::Unauthorized("Bad credentials".to_string()));

        coordinator.save("update").await;

        let failure = coordinator.state().save_failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Unauthorized);
        assert!(failure.message.contains("Re-authenticate"));
    }

    #[tokio::test]
    async fn test_save_preconditions_are_checked_in_order() {
        let token = Some(VersionToken::new("t1"));

        let no_location = session(None, token.clone(), None, "mine");
        assert_eq!(no_location.save("").await, Outcome::Failed);
        assert_eq!(
            no_location.state().save_failure.unwrap().message,
            MISSING_DOCUMENT_MESSAGE
        );
        assert_eq!(backend(&no_location).call_count(), 0);

        let no_token = session(Some(location()), None, None, "mine");
        no_token.save("").await;
        assert_eq!(no_token.state().save_failure.unwrap().message, MISSING_DOCUMENT_MESSAGE);
        assert_eq!(backend(&no_token).call_count(), 0);

        let no_credential = session(Some(location()), token.clone(), None, "mine");
        no_credential.save("").await;
        assert_eq!(
            no_credential.state().save_failure.unwrap().message,
            MISSING_CREDENTIAL_MESSAGE
        );
        assert_eq!(backend(&no_credential).call_count(), 0);

        let no_message = session(Some(location()), token, Some("token"), "mine");
        let phases = record_phases(&no_message);
        no_message.save("   ").await;
        let state = no_message.state();
        let failure = state.save_failure.unwrap();
        assert_eq!(failure.kind, FailureKind::MissingPrecondition);
        assert!(failure.message.contains("commit message"));
        assert!(!state.is_saving);
        assert_eq!(backend(&no_message).call_count(), 0);
        assert!(phases.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credential_can_be_supplied_later() {
        let loc = location();
        let token = VersionToken::new("t1");
        let coordinator = session(Some(loc.clone()), Some(token.clone()), None, "mine");
        backend(&coordinator).insert_with_token(&loc, "v1", token);

        assert_eq!(coordinator.save("update").await, Outcome::Failed);
        coordinator.set_credential(Some(Credential::new("token")));
        assert_eq!(coordinator.save("update").await, Outcome::Completed);
        assert_eq!(coordinator.state().save_failure, None);
    }

    #[tokio::test]
    async fn test_saving_flag_brackets_remote_calls() {
        let loc = location();
        let token = VersionToken::new("t1");
        let coordinator = session(Some(loc.clone()), Some(token.clone()), Some("token"), "mine");
        backend(&coordinator).insert_with_token(&loc, "v1", token);
        let phases = record_phases(&coordinator);

        coordinator.save("update").await;
        assert_eq!(*phases.lock().unwrap(), vec![Phase::Saving, Phase::Saving]);
        assert_eq!(coordinator.state().phase(), Phase::Idle);

        phases.lock().unwrap().clear();
        backend(&coordinator).fail_next_put(GatewayError::Transport("reset".to_string()));
        coordinator.save("update").await;
        assert_eq!(*phases.lock().unwrap(), vec![Phase::Saving, Phase::Saving]);
        assert_eq!(coordinator.state().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_fetch_latest_hands_content_to_host() {
        let loc = location();
        let coordinator = session(Some(loc.clone()), None, Some("token"), "");
        let sha = backend(&coordinator).insert(&loc, "# Latest");
        let phases = record_phases(&coordinator);

        assert_eq!(coordinator.fetch_latest(false).await, Outcome::Completed);

        let fetched = coordinator.host().fetched.lock().unwrap().clone();
        assert_eq!(
            fetched,
            vec![(
                NoteContent {
                    frontmatter: None,
                    body: "# Latest".to_string()
                },
                "# Latest".to_string()
            )]
        );
        assert_eq!(*coordinator.host().notices.lock().unwrap(), vec![Notice::Fetched]);
        let state = coordinator.state();
        assert_eq!(state.current_version_token, Some(sha));
        assert_eq!(state.fetch_failure, None);
        assert_eq!(*phases.lock().unwrap(), vec![Phase::Fetching, Phase::Fetching]);
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_fetch_latest_as_part_of_retry_clears_save_failure() {
        let loc = location();
        let token = VersionToken::new("t1");
        let coordinator = session(Some(loc.clone()), Some(token.clone()), Some("token"), "mine");
        backend(&coordinator).insert_with_token(&loc, "v1", token);
        backend(&coordinator).fail_next_put(GatewayError::VersionConflict {
            message: "conflict".to_string(),
        });
        coordinator.save("update").await;
        assert!(coordinator.state().is_version_conflict);

        assert_eq!(coordinator.fetch_latest(true).await, Outcome::Completed);

        let state = coordinator.state();
        assert!(!state.is_version_conflict);
        assert_eq!(state.save_failure, None);
        assert!(coordinator.host().notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recorded() {
        let loc = location();
        let coordinator = session(Some(loc), None, Some("token"), "");

        assert_eq!(coordinator.fetch_latest(false).await, Outcome::Failed);

        let state = coordinator.state();
        assert_eq!(state.fetch_failure.unwrap().kind, FailureKind::NotFound);
        assert!(!state.is_fetching);
        assert!(coordinator.host().fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_swallows_token_refresh_failure() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("old")),
            Some("token"),
            "",
        );
        backend(&coordinator).insert(&loc, "# Latest");
        backend(&coordinator).fail_next_entry(GatewayError::Transport("timed out".to_string()));

        assert_eq!(coordinator.fetch_latest(false).await, Outcome::Completed);

        let state = coordinator.state();
        assert_eq!(state.current_version_token, Some(VersionToken::new("old")));
        assert_eq!(state.fetch_failure, None);
        assert_eq!(coordinator.host().fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_preconditions() {
        let no_location = session(None, None, Some("token"), "");
        assert_eq!(no_location.fetch_latest(false).await, Outcome::Failed);
        assert_eq!(
            no_location.state().fetch_failure.unwrap().kind,
            FailureKind::MissingPrecondition
        );

        let no_credential = session(Some(location()), None, None, "");
        assert_eq!(no_credential.fetch_latest(false).await, Outcome::Failed);
        assert_eq!(
            no_credential.state().fetch_failure.unwrap().message,
            MISSING_CREDENTIAL_MESSAGE
        );
        assert_eq!(backend(&no_credential).call_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_overwrites_with_local_content() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("t1")),
            Some("token"),
            "local edit",
        );
        backend(&coordinator).insert_with_token(&loc, "remote change", VersionToken::new("t2"));
        backend(&coordinator).queue_write_token(VersionToken::new("t3"));
        let phases = record_phases(&coordinator);

        assert_eq!(coordinator.fetch_latest_and_retry("retry save").await, Outcome::Completed);

        let state = coordinator.state();
        assert_eq!(state.current_version_token, Some(VersionToken::new("t3")));
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(
            puts(&coordinator),
            vec![(Some(VersionToken::new("t2")), "local edit".to_string())]
        );
        assert!(!backend(&coordinator)
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::FetchRaw { .. })));
        assert_eq!(backend(&coordinator).content(&loc).unwrap(), "local edit");
        assert!(coordinator.host().fetched.lock().unwrap().is_empty());
        assert_eq!(coordinator.host().saved.load(Ordering::SeqCst), 1);
        assert_eq!(*coordinator.host().notices.lock().unwrap(), vec![Notice::Saved]);
        assert_eq!(
            *phases.lock().unwrap(),
            vec![Phase::Fetching, Phase::FetchingThenSaving]
        );
    }

    #[tokio::test]
    async fn test_conflict_then_retry_recovers() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("t1")),
            Some("token"),
            "mine",
        );
        backend(&coordinator).insert(&loc, "theirs");
        backend(&coordinator).fail_next_entry(GatewayError::Transport("timed out".to_string()));

        coordinator.save("update").await;
        assert!(coordinator.state().is_version_conflict);

        assert_eq!(coordinator.fetch_latest_and_retry("update").await, Outcome::Completed);
        let state = coordinator.state();
        assert!(!state.is_version_conflict);
        assert_eq!(state.save_failure, None);
        assert_eq!(state.current_version_token, backend(&coordinator).token(&loc));
        assert_eq!(backend(&coordinator).content(&loc).unwrap(), "mine");
    }

    #[tokio::test]
    async fn test_retry_is_silent_without_preconditions() {
        let loc = location();

        let no_credential = session(Some(loc.clone()), None, None, "mine");
        no_credential.save("update").await;
        let before = no_credential.state();
        assert_eq!(no_credential.fetch_latest_and_retry("update").await, Outcome::Skipped);
        assert_eq!(no_credential.state(), before);
        assert_eq!(backend(&no_credential).call_count(), 0);

        let no_message = session(Some(loc), None, Some("token"), "mine");
        assert_eq!(no_message.fetch_latest_and_retry("  ").await, Outcome::Skipped);
        assert_eq!(no_message.state(), SessionState::default());
        assert_eq!(backend(&no_message).call_count(), 0);

        let no_location = session(None, None, Some("token"), "mine");
        assert_eq!(no_location.fetch_latest_and_retry("update").await, Outcome::Skipped);
    }

    #[tokio::test]
    async fn test_retry_token_failure_is_a_save_failure() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("t1")),
            Some("token"),
            "mine",
        );

        assert_eq!(coordinator.fetch_latest_and_retry("update").await, Outcome::Failed);

        let state = coordinator.state();
        assert_eq!(state.save_failure.as_ref().unwrap().kind, FailureKind::NotFound);
        assert_eq!(state.fetch_failure, None);
        assert_eq!(state.phase(), Phase::Idle);
        assert!(puts(&coordinator).is_empty());
    }

    #[tokio::test]
    async fn test_retry_conflict_is_reported_again() {
        let loc = location();
        let coordinator = session(
            Some(loc.clone()),
            Some(VersionToken::new("t1")),
            Some("token"),
            "mine",
        );
        backend(&coordinator).insert(&loc, "theirs");
        backend(&coordinator).fail_next_put(GatewayError::VersionConflict {
            message: "test.md does not match".to_string(),
        });

        assert_eq!(coordinator.fetch_latest_and_retry("update").await, Outcome::Failed);

        let state = coordinator.state();
        assert!(state.is_version_conflict);
        assert_eq!(state.save_failure.as_ref().unwrap().message, VERSION_CONFLICT_NOTICE);
        assert_eq!(state.phase(), Phase::Idle);
        assert!(coordinator.host().notices.lock().unwrap().is_empty());
    }
}
