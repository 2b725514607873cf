#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! Client core for the stepfn playground: the identity of the document being
//! edited, the capability keys that prove ownership of saved documents, and
//! the session state machine that sequences load, edit, and execute.
//!
//! Browser concerns are ports: [`storage::Persistence`] stands in for local
//! storage, [`route::Navigation`] for the location fragment, and
//! [`sync::SyncTransport`] for the execution service.

pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod route;
pub mod session;
pub mod storage;
pub mod sync;

pub use config::{ConfigError, ExecutePath};
pub use document::{DEFAULT_OUTPUT_PLACEHOLDER, Document, DocumentSource, DocumentStore};
pub use error::{SessionError, StorageError, SyncError};
pub use identity::{Identity, IdentityManager, issue_key};
pub use route::{MemoryNavigation, Navigation};
pub use session::{
    ExecuteDisposition, LoadDisposition, SessionController, SessionSnapshot, SessionState,
};
pub use storage::{FileStorage, MemoryStorage, Persistence};
pub use sync::{ExecuteRequest, ExecutionOutcome, SyncTransport};
