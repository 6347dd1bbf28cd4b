//! Reference resolution against the documents of a plan
//!
//! Resolution happens in two phases. Local references become graph edges while
//! the plan is built. Everything else is deferred and looked up in the cluster
//! just before the referring document is submitted.

use crate::resource::{ResourceDocument, ResourceId, ResourceRef};

/// Where a reference points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Satisfied by a document in the same plan
    Local(ResourceId),
    /// Must already exist in the cluster
    Deferred(ResourceRef),
}

/// Resolves references against a fixed set of documents
pub struct ReferenceResolver<'a> {
    documents: &'a [ResourceDocument],
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(documents: &'a [ResourceDocument]) -> Self {
        Self { documents }
    }

    /// Find the plan document a reference targets
    ///
    /// Matching is on `(kind, group, name)`. Namespaces are not compared:
    /// identities are unique per kind within a plan.
    pub fn resolve_local(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.documents
            .iter()
            .find(|doc| reference.matches(doc))
            .map(ResourceDocument::id)
    }

    pub fn resolve(&self, reference: &ResourceRef) -> Resolution {
        match self.resolve_local(reference) {
            Some(id) => Resolution::Local(id),
            None => Resolution::Deferred(reference.clone()),
        }
    }

    /// Resolve every reference a document makes, in declaration order
    ///
    /// Self references are dropped; a document never waits on itself.
    pub fn resolve_all(&self, document: &ResourceDocument) -> Vec<Resolution> {
        let own = document.id();
        document
            .references()
            .iter()
            .map(|r| self.resolve(r))
            .filter(|res| !matches!(res, Resolution::Local(id) if *id == own))
            .collect()
    }
}
