//! Query descriptors for the local content index.
//!
//! A [`Query`] is both the request a selection sends to the index and the
//! continuation cursor the index hands back for the next page. Selections
//! treat a returned continuation as opaque and reuse it verbatim.

use serde::{Deserialize, Serialize};

/// Default page size when a caller does not specify one.
pub const DEFAULT_LIMIT: usize = 10;

/// One page-sized request against the local content index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Free-text search terms, matched against title and synopsis.
    pub search_terms: Option<String>,

    /// Match models carrying at least one of these tags.
    pub tags_match_any: Vec<String>,

    /// Number of leading matches to skip.
    pub offset: usize,

    /// Maximum number of matches to return.
    pub limit: usize,
}

impl Query {
    /// A full-text query over the given terms.
    #[must_use]
    pub fn search(terms: impl Into<String>) -> Self {
        Self {
            search_terms: Some(terms.into()),
            tags_match_any: Vec::new(),
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }

    /// A set-membership query over the given tags.
    #[must_use]
    pub fn tagged(tags: Vec<String>) -> Self {
        Self {
            search_terms: None,
            tags_match_any: tags,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Same query with a different page size.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Same query starting at a different offset. This is how the index
    /// builds the continuation for the next page.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}
