//! Open document tracking
//!
//! Owns the per-file version counter sent with `didOpen`/`didChange` and a
//! content hash so unchanged text is never re-sent.

use crate::lsp::params::language_id_for;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Version a document gets when it is (re)opened
pub const INITIAL_VERSION: i32 = 1;

#[derive(Debug, Clone)]
struct DocumentEntry {
    version: i32,
    /// SHA-256 of the last full text sent; `None` after a ranged edit
    content_hash: Option<String>,
}

/// What the session has to send to bring a document up to date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSync {
    Open {
        version: i32,
        language_id: &'static str,
    },
    Change {
        version: i32,
    },
    Unchanged,
}

#[derive(Debug, Default)]
pub struct DocumentTracker {
    documents: HashMap<PathBuf, DocumentEntry>,
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute_hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Record a `didOpen`; the version restarts at [`INITIAL_VERSION`]
    pub fn open(&mut self, path: &Path, text: &str) -> i32 {
        self.documents.insert(
            path.to_path_buf(),
            DocumentEntry {
                version: INITIAL_VERSION,
                content_hash: Some(Self::compute_hash(text)),
            },
        );
        INITIAL_VERSION
    }

    /// Allocate the next `didChange` version: always previous + 1
    ///
    /// Pass the full new text when known so later [`Self::sync`] calls can
    /// skip identical content.
    pub fn next_change(&mut self, path: &Path, full_text: Option<&str>) -> Option<i32> {
        let entry = self.documents.get_mut(path)?;
        entry.version += 1;
        entry.content_hash = full_text.map(Self::compute_hash);
        Some(entry.version)
    }

    /// Record a `didClose`. Returns false when the file was not open.
    pub fn close(&mut self, path: &Path) -> bool {
        self.documents.remove(path).is_some()
    }

    /// Decide between open, change and nothing for `text`, updating state
    /// as if the returned action has been sent
    pub fn sync(&mut self, path: &Path, text: &str) -> DocumentSync {
        let hash = Self::compute_hash(text);

        match self.documents.get_mut(path) {
            Some(entry) if entry.content_hash.as_deref() == Some(hash.as_str()) => {
                debug!("{} unchanged at version {}", path.display(), entry.version);
                DocumentSync::Unchanged
            }
            Some(entry) => {
                entry.version += 1;
                entry.content_hash = Some(hash);
                DocumentSync::Change {
                    version: entry.version,
                }
            }
            None => {
                self.documents.insert(
                    path.to_path_buf(),
                    DocumentEntry {
                        version: INITIAL_VERSION,
                        content_hash: Some(hash),
                    },
                );
                DocumentSync::Open {
                    version: INITIAL_VERSION,
                    language_id: language_id_for(path),
                }
            }
        }
    }

    pub fn version(&self, path: &Path) -> Option<i32> {
        self.documents.get(path).map(|entry| entry.version)
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    pub fn open_documents(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.documents.keys().cloned().collect();
        paths.sort();
        paths
    }
}
