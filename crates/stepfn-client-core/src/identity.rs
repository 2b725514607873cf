use rand::RngCore;

use crate::error::{SessionError, StorageError};
use crate::route::{Navigation, fragment_for_id, id_from_fragment, share_link};
use crate::storage::{Persistence, capability_storage_key};

const KEY_BYTES: usize = 32;

/// A fresh bearer token from the thread-local CSPRNG.
#[must_use]
pub fn issue_key() -> String {
    let mut bytes = [0_u8; KEY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The (Id, Key) pair attached to an execute request. An empty `id` is an
/// unsaved document; `key` is then the draft key the first save will adopt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub key: String,
}

/// Owns the active document id, its reflection in the location fragment, and
/// the capability keys held for saved ids.
#[derive(Debug)]
pub struct IdentityManager<P, N> {
    storage: P,
    navigation: N,
    active_id: String,
    draft_key: Option<String>,
}

impl<P: Persistence, N: Navigation> IdentityManager<P, N> {
    pub fn new(storage: P, navigation: N) -> Self {
        Self {
            storage,
            navigation,
            active_id: String::new(),
            draft_key: None,
        }
    }

    /// The id the location currently points at.
    #[must_use]
    pub fn current_id(&self) -> String {
        id_from_fragment(&self.navigation.fragment())
    }

    /// The id the session is working on: the last one applied by `set_id` or
    /// accepted from the location.
    #[must_use]
    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    /// Accepts whatever the location holds as the active id.
    pub fn acknowledge_location(&mut self) -> String {
        self.active_id = self.current_id();
        self.active_id.clone()
    }

    /// True when the location names a different document than the one the
    /// session last applied, i.e. the user navigated rather than `set_id`.
    #[must_use]
    pub fn location_changed_externally(&self) -> bool {
        self.current_id() != self.active_id
    }

    pub fn set_id(&mut self, id: &str) {
        self.active_id = id.to_string();
        self.navigation.replace_fragment(&fragment_for_id(id));
    }

    pub fn key_for(&self, id: &str) -> Result<Option<String>, StorageError> {
        self.storage.get(&capability_storage_key(id))
    }

    /// Persists `key` as the capability for `id`. Callers must not treat `id`
    /// as current until this returns `Ok`.
    pub fn adopt(&mut self, id: &str, key: &str) -> Result<(), SessionError> {
        if id.trim().is_empty() {
            return Err(SessionError::EmptyId);
        }
        self.storage.set(&capability_storage_key(id), key)?;
        tracing::info!(id, "Adopted capability key for document");
        Ok(())
    }

    /// The key of the unsaved document, issued on first use and kept until the
    /// document is saved or abandoned so retries present the same key.
    pub fn draft_key(&mut self) -> String {
        self.draft_key.get_or_insert_with(issue_key).clone()
    }

    pub fn release_draft_key(&mut self) {
        self.draft_key = None;
    }

    #[must_use]
    pub fn share_fragment(&self) -> Option<String> {
        if self.active_id.is_empty() {
            None
        } else {
            Some(fragment_for_id(&self.active_id))
        }
    }

    #[must_use]
    pub fn share_link(&self, origin: &str) -> Option<String> {
        if self.active_id.is_empty() {
            None
        } else {
            Some(share_link(origin, &self.active_id))
        }
    }
}
