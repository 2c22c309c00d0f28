//! Local query engine collaborator trait and an in-memory implementation.
//!
//! The engine is the selection subsystem's seam onto the local full-text
//! index. Strategies only depend on [`QueryEngine`]; the in-memory
//! [`MemoryEngine`] backs tests and small bundled corpora.

use async_trait::async_trait;

use aisle_core::{ContentObject, Query};
use parking_lot::RwLock;

/// One page of results from the local index.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// Matches in index order, at most `limit` of them.
    pub models: Vec<ContentObject>,

    /// The engine's estimate of the total number of matches for the query.
    pub upper_bound: usize,

    /// Continuation for the next page, or `None` when the query is exhausted.
    pub more_results: Option<Query>,
}

/// Asynchronous access to the local content index.
///
/// Used as `Arc<dyn QueryEngine>`. Implementations: the bundled in-memory
/// corpus, the on-disk index bridge (separate crate).
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Executes one query and returns a page of matches plus continuation
    /// metadata.
    async fn query(&self, query: &Query) -> anyhow::Result<QueryResponse>;
}

/// In-memory [`QueryEngine`] over a fixed corpus of models.
///
/// Matching rules: every whitespace-separated search term must appear
/// (case-insensitively) in the title or synopsis; `tags_match_any` requires
/// at least one overlapping tag. A query with neither constraint matches
/// everything.
pub struct MemoryEngine {
    corpus: RwLock<Vec<ContentObject>>,
}

impl MemoryEngine {
    /// Creates an engine over the given corpus.
    #[must_use]
    pub fn new(corpus: Vec<ContentObject>) -> Self {
        Self {
            corpus: RwLock::new(corpus),
        }
    }

    /// Adds one model to the corpus.
    pub fn insert(&self, model: ContentObject) {
        self.corpus.write().push(model);
    }

    fn matches(query: &Query, model: &ContentObject) -> bool {
        if let Some(terms) = &query.search_terms {
            let haystack = format!("{} {}", model.title, model.synopsis).to_lowercase();
            let all_present = terms
                .split_whitespace()
                .all(|term| haystack.contains(&term.to_lowercase()));
            if !all_present {
                return false;
            }
        }
        if !query.tags_match_any.is_empty() {
            let overlaps = model
                .tags
                .iter()
                .any(|tag| query.tags_match_any.contains(tag));
            if !overlaps {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl QueryEngine for MemoryEngine {
    async fn query(&self, query: &Query) -> anyhow::Result<QueryResponse> {
        let corpus = self.corpus.read();
        let matched: Vec<&ContentObject> = corpus
            .iter()
            .filter(|model| Self::matches(query, model))
            .collect();
        let upper_bound = matched.len();

        let models: Vec<ContentObject> = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();

        let next_offset = query.offset + models.len();
        let more_results = if next_offset < upper_bound {
            Some(query.clone().with_offset(next_offset))
        } else {
            None
        };

        Ok(QueryResponse {
            models,
            upper_bound,
            more_results,
        })
    }
}
