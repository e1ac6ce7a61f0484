//! Document snapshot + store revision pairing.

use crate::AllocationDocument;
use portside_types::RevisionToken;

/// A document snapshot together with the store revision it was read at.
///
/// The revision is what makes a later `save` optimistic: the store rejects
/// the write if someone else advanced the revision in between. A snapshot
/// with `revision: None` has never been stored (or the store is about to
/// create it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedDocument {
    /// The document contents.
    pub body: AllocationDocument,
    /// The store revision this snapshot was read at, if any.
    pub revision: Option<RevisionToken>,
}

impl VersionedDocument {
    /// Wraps a document read at a known revision.
    #[must_use]
    pub fn new(body: AllocationDocument, revision: RevisionToken) -> Self {
        Self {
            body,
            revision: Some(revision),
        }
    }

    /// An empty, never-stored document.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The revision string, if this snapshot came from the store.
    #[must_use]
    pub fn revision(&self) -> Option<&RevisionToken> {
        self.revision.as_ref()
    }
}
