//! Pending request table
//!
//! Single source of truth for correlating responses with the requests that
//! produced them. The lock is only held for map operations, never across I/O.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::error;

/// An in-flight request awaiting its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: u64,
    pub method: String,
    /// File the request was issued for, when there is one
    pub context: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PendingError {
    #[error("request id {0} is already pending")]
    DuplicateId(u64),
}

#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<u64, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        // A panic while holding the lock leaves a consistent map behind
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a request. A duplicate id means the id counter was reused.
    pub fn put(
        &self,
        id: u64,
        method: impl Into<String>,
        context: Option<PathBuf>,
    ) -> Result<(), PendingError> {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            error!("Pending request id {} reused", id);
            return Err(PendingError::DuplicateId(id));
        }
        entries.insert(
            id,
            PendingRequest {
                id,
                method: method.into(),
                context,
            },
        );
        Ok(())
    }

    /// Remove the entry at `id` only if it was issued for `expected_method`
    ///
    /// The outer `Option` is `None` when nothing matched and the table was
    /// left untouched; the inner one is the stored context.
    pub fn take_by_method(&self, id: u64, expected_method: &str) -> Option<Option<PathBuf>> {
        let mut entries = self.entries();
        match entries.get(&id) {
            Some(entry) if entry.method == expected_method => {
                entries.remove(&id).map(|entry| entry.context)
            }
            _ => None,
        }
    }

    /// Remove the entry at `id` whatever its method
    pub fn take(&self, id: u64) -> Option<PendingRequest> {
        self.entries().remove(&id)
    }

    /// Method recorded for `id`, without removing it
    pub fn method_of(&self, id: u64) -> Option<String> {
        self.entries().get(&id).map(|entry| entry.method.clone())
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries().contains_key(&id)
    }

    /// Empty the table, returning every orphaned request in id order
    pub fn drop_all(&self) -> Vec<PendingRequest> {
        let mut orphans: Vec<PendingRequest> =
            self.entries().drain().map(|(_, entry)| entry).collect();
        orphans.sort_by_key(|entry| entry.id);
        orphans
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
