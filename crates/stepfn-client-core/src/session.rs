use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::document::{Document, DocumentField, DocumentSource, DocumentStore};
use crate::error::{SessionError, SyncError};
use crate::identity::{Identity, IdentityManager};
use crate::route::Navigation;
use crate::storage::Persistence;
use crate::sync::{ExecutionOutcome, SyncTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    Executing,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Executing => "executing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadDisposition {
    /// A saved document was fetched.
    Loaded { id: String },
    /// No id: the local draft (or the example when there is none) is open.
    Draft { restored: bool },
    /// The location still names the active document.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteDisposition {
    Completed { id: String, new_id_assigned: bool },
    /// Another execute was outstanding; no request was sent.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub id: String,
    pub document: Document,
}

struct SessionInner<P, N> {
    state: SessionState,
    identity: IdentityManager<P, N>,
    documents: DocumentStore<P>,
    /// Set when the active id failed to load over the network; executing would
    /// overwrite the remote document with whatever is on screen.
    unloaded: bool,
}

impl<P: Persistence, N: Navigation> SessionInner<P, N> {
    fn require_ready(&self) -> Result<(), SessionError> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(SessionError::NotReady { state: self.state })
        }
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        self.documents.set_output(error.to_string(), true);
        error
    }

    fn open_draft(&mut self) -> Result<LoadDisposition, SessionError> {
        self.unloaded = false;
        let restored = match self.documents.restore_draft() {
            Ok(restored) => restored,
            Err(error) => {
                tracing::warn!(%error, "Local draft unavailable; opening the example");
                false
            }
        };
        if !restored {
            self.documents.reset_to_example();
        }
        self.state = SessionState::Ready;
        Ok(LoadDisposition::Draft { restored })
    }

    fn persist_draft_if_local(&self) -> Result<(), SessionError> {
        if self.identity.active_id().is_empty() {
            self.documents.persist_draft()?;
        }
        Ok(())
    }

    fn apply_load(
        &mut self,
        id: String,
        result: Result<DocumentSource, SyncError>,
    ) -> Result<LoadDisposition, SessionError> {
        self.state = SessionState::Ready;
        match result {
            Ok(source) => {
                tracing::info!(id = %id, "Loaded document");
                self.unloaded = false;
                self.documents.replace_source(source);
                Ok(LoadDisposition::Loaded { id })
            }
            Err(SyncError::NotFound { id: missing }) => {
                tracing::warn!(id = %missing, "Document not found; detaching to a new draft");
                self.unloaded = false;
                self.identity.set_id("");
                self.identity.release_draft_key();
                self.documents.reset_to_example();
                self.documents.set_output(
                    format!(
                        "// Step function {missing} was not found. Showing the example instead; executing it saves a new step function."
                    ),
                    true,
                );
                Err(SessionError::Sync(SyncError::NotFound { id: missing }))
            }
            Err(error) => {
                tracing::warn!(id = %id, %error, "Document load failed");
                self.unloaded = true;
                self.documents.replace_source(DocumentSource::default());
                Err(self.fail(SessionError::Sync(error)))
            }
        }
    }

    fn apply_execution(
        &mut self,
        identity: &Identity,
        result: Result<ExecutionOutcome, SyncError>,
    ) -> Result<ExecuteDisposition, SessionError> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(id = %identity.id, %error, "Execute request failed");
                return Err(self.fail(SessionError::Sync(error)));
            }
        };

        let display = outcome.display_output();
        let assigned_id = match outcome {
            ExecutionOutcome::Failed { cause } => {
                self.documents.set_output(display, true);
                return Err(SessionError::Execution { cause });
            }
            ExecutionOutcome::Completed { id, .. } => id,
        };
        self.documents.set_output(display, false);

        let Some(new_id) = assigned_id.filter(|new_id| *new_id != identity.id) else {
            return Ok(ExecuteDisposition::Completed {
                id: identity.id.clone(),
                new_id_assigned: false,
            });
        };

        // The key must be durable before the id becomes visible.
        if let Err(error) = self.identity.adopt(&new_id, &identity.key) {
            tracing::warn!(id = %new_id, %error, "Could not persist capability key; id not applied");
            return Err(self.fail(error));
        }
        self.identity.set_id(&new_id);
        if identity.id.is_empty() {
            self.identity.release_draft_key();
            if let Err(error) = self.documents.clear_draft() {
                tracing::warn!(%error, "Could not clear saved draft");
            }
        }
        tracing::info!(previous = %identity.id, id = %new_id, "Document saved under new id");
        Ok(ExecuteDisposition::Completed {
            id: new_id,
            new_id_assigned: true,
        })
    }
}

/// Orchestrates load, edit, and execute for one playground session.
///
/// All methods take `&self`; state lives behind a mutex that is never held
/// across a network round trip, so a second `execute` issued while one is in
/// flight observes `Executing` and is dropped.
pub struct SessionController<T, P, N> {
    transport: T,
    inner: Mutex<SessionInner<P, N>>,
}

impl<T, P, N> SessionController<T, P, N>
where
    T: SyncTransport,
    P: Persistence + Clone,
    N: Navigation,
{
    pub fn new(transport: T, storage: P, navigation: N) -> Self {
        Self {
            transport,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                identity: IdentityManager::new(storage.clone(), navigation),
                documents: DocumentStore::new(storage),
                unloaded: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner<P, N>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    #[must_use]
    pub fn document(&self) -> Document {
        self.lock().documents.document().clone()
    }

    #[must_use]
    pub fn active_id(&self) -> String {
        self.lock().identity.active_id().to_string()
    }

    #[must_use]
    pub fn share_link(&self, origin: &str) -> Option<String> {
        self.lock().identity.share_link(origin)
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            state: inner.state,
            id: inner.identity.active_id().to_string(),
            document: inner.documents.document().clone(),
        }
    }

    /// Leaves `Idle` by opening whatever the location names.
    pub async fn start(&self) -> Result<LoadDisposition, SessionError> {
        let id = {
            let mut inner = self.lock();
            if inner.state != SessionState::Idle {
                return Err(SessionError::NotReady { state: inner.state });
            }
            inner.identity.acknowledge_location()
        };
        tracing::debug!(id = %id, "Starting session");
        self.open(id).await
    }

    /// Reacts to the location changing underneath the session. Changes the
    /// session made itself through `set_id` are ignored.
    pub async fn on_location_changed(&self) -> Result<LoadDisposition, SessionError> {
        let id = {
            let mut inner = self.lock();
            if !inner.identity.location_changed_externally() {
                return Ok(LoadDisposition::Unchanged);
            }
            inner.require_ready()?;
            inner.identity.release_draft_key();
            inner.identity.acknowledge_location()
        };
        tracing::info!(id = %id, "Location changed; opening document");
        self.open(id).await
    }

    /// Fetches the active document again, e.g. after a failed load.
    pub async fn reload(&self) -> Result<LoadDisposition, SessionError> {
        let id = {
            let inner = self.lock();
            inner.require_ready()?;
            inner.identity.active_id().to_string()
        };
        self.open(id).await
    }

    async fn open(&self, id: String) -> Result<LoadDisposition, SessionError> {
        {
            let mut inner = self.lock();
            if id.is_empty() {
                return inner.open_draft();
            }
            inner.state = SessionState::Loading;
        }
        let result = self.transport.load_document(&id).await;
        self.lock().apply_load(id, result)
    }

    pub fn edit_definition(&self, value: impl Into<String>) -> Result<(), SessionError> {
        self.edit(DocumentField::Definition, value.into())
    }

    pub fn edit_script(&self, value: impl Into<String>) -> Result<(), SessionError> {
        self.edit(DocumentField::Script, value.into())
    }

    pub fn edit_input(&self, value: impl Into<String>) -> Result<(), SessionError> {
        self.edit(DocumentField::Input, value.into())
    }

    fn edit(&self, field: DocumentField, value: String) -> Result<(), SessionError> {
        let mut inner = self.lock();
        inner.require_ready()?;
        tracing::trace!(field = field.as_str(), "Editing document");
        inner.documents.edit(field, value);
        inner.persist_draft_if_local()
    }

    /// Sends the document for execution. Runs at most once at a time: a call
    /// made while another is outstanding returns `Dropped` without a request.
    pub async fn execute(&self) -> Result<ExecuteDisposition, SessionError> {
        let (source, identity) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Executing => {
                    tracing::debug!("Execute already in flight; dropping request");
                    return Ok(ExecuteDisposition::Dropped);
                }
                SessionState::Idle | SessionState::Loading => {
                    return Err(SessionError::NotReady { state: inner.state });
                }
                SessionState::Ready => {}
            }

            let id = inner.identity.active_id().to_string();
            if inner.unloaded {
                return Err(inner.fail(SessionError::Unloaded { id }));
            }
            let key = if id.is_empty() {
                inner.identity.draft_key()
            } else {
                let stored = inner.identity.key_for(&id);
                match stored {
                    Ok(Some(key)) => key,
                    Ok(None) => {
                        tracing::warn!(id = %id, "No capability key held for document");
                        return Err(inner.fail(SessionError::IdentityConflict { id }));
                    }
                    Err(error) => return Err(inner.fail(error.into())),
                }
            };
            inner.state = SessionState::Executing;
            (inner.documents.document().source(), Identity { id, key })
        };

        tracing::info!(id = %identity.id, "Executing document");
        let result = self.transport.execute_document(&source, &identity).await;

        let mut inner = self.lock();
        let disposition = inner.apply_execution(&identity, result);
        inner.state = SessionState::Ready;
        disposition
    }

    /// Detaches from any saved id and opens the example as a fresh draft.
    pub fn new_document(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        inner.require_ready()?;
        inner.unloaded = false;
        inner.identity.set_id("");
        inner.identity.release_draft_key();
        inner.documents.reset_to_example();
        inner.documents.persist_draft()?;
        Ok(())
    }

    /// Detaches from the saved id but keeps the content as the local draft, so
    /// the next execute saves a copy under a new key. This is how a viewer who
    /// does not hold a document's key runs their own changes.
    pub fn fork(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        inner.require_ready()?;
        let previous = inner.identity.active_id().to_string();
        inner.unloaded = false;
        inner.identity.set_id("");
        inner.identity.release_draft_key();
        inner.documents.persist_draft()?;
        tracing::info!(previous = %previous, "Forked document into a local draft");
        Ok(())
    }
}
