//! docpush-core: save documents to a hosted repository contents API without
//! clobbering concurrent edits.
//!
//! This crate provides:
//! - `ContentGateway`: read a document, read its version token, write it
//!   conditionally on that token (with branch fallback for reads)
//! - `ContentsBackend` implementations for the GitHub contents API and for
//!   in-memory testing
//! - `Coordinator`: the save / fetch-latest / fetch-and-retry state machine
//!   that tracks session state for a host UI
//! - `DocumentConverter`: conversion between a host display form and the
//!   plain stored text

pub mod backend;
pub mod conflict;
pub mod convert;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod location;
pub mod session;
pub mod token;

pub use backend::{ContentsBackend, GitHubContents, InMemoryContents, PutRequest, RemoteEntry};
pub use convert::{DocumentConverter, MarkdownConverter, NoteContent, PlainConverter};
pub use coordinator::{Coordinator, Notice, Outcome, SessionHost, VERSION_CONFLICT_NOTICE};
pub use error::{ErrorDescriptor, FailureKind, GatewayError};
pub use gateway::{ContentGateway, DEFAULT_FALLBACK_REF, RemoteGateway, WriteRequest};
pub use location::{DocumentLocation, LocationError};
pub use session::{Phase, SessionHandle, SessionState};
pub use token::{Credential, VersionToken};
