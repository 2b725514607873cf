use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const ROUTE_SEGMENT: &str = "/sfn/";

/// Extracts the document id from a location fragment such as `#/sfn/<id>`.
/// Anything that does not split into exactly two parts around `/sfn/` is a
/// local draft.
#[must_use]
pub fn id_from_fragment(fragment: &str) -> String {
    let mut parts = fragment.split(ROUTE_SEGMENT);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(id), None) => id.to_string(),
        _ => String::new(),
    }
}

#[must_use]
pub fn fragment_for_id(id: &str) -> String {
    format!("#{ROUTE_SEGMENT}{id}")
}

/// Normalizes what a user may paste as a document reference: a full share
/// link, a bare fragment, or a bare id.
#[must_use]
pub fn fragment_from_link(link: &str) -> String {
    let trimmed = link.trim();
    if let Some(index) = trimmed.find('#') {
        return trimmed[index..].to_string();
    }
    if trimmed.contains(ROUTE_SEGMENT) {
        return format!("#{trimmed}");
    }
    fragment_for_id(trimmed)
}

#[must_use]
pub fn share_link(origin: &str, id: &str) -> String {
    format!("{}/{}", origin.trim_end_matches('/'), fragment_for_id(id))
}

/// The navigable-location port. `replace_fragment` rewrites the location in
/// place and must not raise a navigation signal of its own.
pub trait Navigation: Send + Sync {
    fn fragment(&self) -> String;
    fn replace_fragment(&self, fragment: &str);
}

/// In-memory location. Clones share the same fragment; `navigate` stands in
/// for a user following a different link.
#[derive(Debug, Clone, Default)]
pub struct MemoryNavigation {
    fragment: Arc<Mutex<String>>,
    replacements: Arc<Mutex<Vec<String>>>,
}

impl MemoryNavigation {
    #[must_use]
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: Arc::new(Mutex::new(fragment.into())),
            replacements: Arc::default(),
        }
    }

    pub fn navigate(&self, fragment: impl Into<String>) {
        *lock(&self.fragment) = fragment.into();
    }

    /// Fragments written through `replace_fragment`, oldest first.
    #[must_use]
    pub fn replacements(&self) -> Vec<String> {
        lock(&self.replacements).clone()
    }
}

impl Navigation for MemoryNavigation {
    fn fragment(&self) -> String {
        lock(&self.fragment).clone()
    }

    fn replace_fragment(&self, fragment: &str) {
        *lock(&self.fragment) = fragment.to_string();
        lock(&self.replacements).push(fragment.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
