//! Local-index selection strategy with staged queries and over-fetch
//! compensation.
//!
//! [`LocalIndexSelection`] pages through the local content index. When the
//! current query's continuation is exhausted it advances to the next
//! fallback *stage* from its [`QueryPlanner`] (e.g. the user's search text
//! first, then a spelling correction). When a downstream model filter is
//! configured, the request limit is inflated to compensate for models the
//! filter will reject.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use aisle_core::{ContentObject, Query};

use super::{Selection, SelectionCore, SelectionError, SelectionEvent};
use crate::engine::QueryEngine;

/// Fixed heuristic compensating for models lost to the configured filter:
/// request three times as many as desired.
const FILTER_OVERFETCH_FACTOR: usize = 3;

/// Hook producing the query for each fallback stage.
///
/// The planner is the strategy's only variable part; it is resolved at
/// construction time. Returning `None` at stage 0 means there is nothing to
/// fetch at all; `None` at a later stage means no further fallback exists.
pub trait QueryPlanner: Send + Sync {
    /// Query for `stage`, sized to `limit`, or `None` when the stage does
    /// not exist.
    fn plan(&self, limit: usize, stage: usize) -> Option<Query>;
}

/// Two-stage keyword planner: the user's text first, then an optional
/// corrected fallback (e.g. a spelling suggestion).
pub struct SearchPlanner {
    terms: String,
    corrected_terms: Option<String>,
}

impl SearchPlanner {
    /// Planner with no fallback stage.
    #[must_use]
    pub fn new(terms: impl Into<String>) -> Self {
        Self {
            terms: terms.into(),
            corrected_terms: None,
        }
    }

    /// Planner that falls back to `corrected` once the primary terms are
    /// exhausted.
    #[must_use]
    pub fn with_correction(terms: impl Into<String>, corrected: impl Into<String>) -> Self {
        Self {
            terms: terms.into(),
            corrected_terms: Some(corrected.into()),
        }
    }
}

impl QueryPlanner for SearchPlanner {
    fn plan(&self, limit: usize, stage: usize) -> Option<Query> {
        match stage {
            0 => Some(Query::search(&self.terms).with_limit(limit)),
            1 => self
                .corrected_terms
                .as_ref()
                .filter(|corrected| **corrected != self.terms)
                .map(|corrected| Query::search(corrected).with_limit(limit)),
            _ => None,
        }
    }
}

/// Single-stage planner selecting every model tagged into a content set.
pub struct SetPlanner {
    tags: Vec<String>,
}

impl SetPlanner {
    /// Planner over the set's tags.
    #[must_use]
    pub fn new(tags: Vec<String>) -> Self {
        Self { tags }
    }
}

impl QueryPlanner for SetPlanner {
    fn plan(&self, limit: usize, stage: usize) -> Option<Query> {
        match stage {
            0 => Some(Query::tagged(self.tags.clone()).with_limit(limit)),
            _ => None,
        }
    }
}

/// Downstream predicate; models it rejects never enter the accumulated set.
pub type ModelFilter = Arc<dyn Fn(&ContentObject) -> bool + Send + Sync>;

struct LocalState {
    loading: bool,
    can_load_more: bool,
    /// Continuation cached from the previous fetch, reused verbatim.
    next_query: Option<Query>,
    stage: usize,
    error_state: bool,
    last_error: Option<Arc<SelectionError>>,
    /// Bumped by `clear`; a completion captured under an older generation
    /// is discarded.
    generation: u64,
}

/// Outcome of one backend round trip.
enum BatchOutcome {
    /// Another fetch is already in flight.
    Busy,
    /// The planner had no query for the current stage.
    NothingToFetch,
    /// `clear` was called while the fetch was in flight.
    Stale,
    /// The backend call failed; error state is set.
    Failed,
    /// The backend answered.
    Fetched {
        /// Models newly inserted after filtering and deduplication.
        added: usize,
        /// Raw result count before filtering and deduplication.
        raw_len: usize,
    },
}

/// Cursor-based selection over the local content index.
pub struct LocalIndexSelection {
    core: SelectionCore,
    engine: Arc<dyn QueryEngine>,
    planner: Arc<dyn QueryPlanner>,
    filter: Option<ModelFilter>,
    state: Mutex<LocalState>,
}

impl LocalIndexSelection {
    /// Creates a selection over `engine` with the given stage planner.
    #[must_use]
    pub fn new(engine: Arc<dyn QueryEngine>, planner: Arc<dyn QueryPlanner>) -> Self {
        Self {
            core: SelectionCore::new(),
            engine,
            planner,
            filter: None,
            state: Mutex::new(LocalState {
                loading: false,
                can_load_more: true,
                next_query: None,
                stage: 0,
                error_state: false,
                last_error: None,
                generation: 0,
            }),
        }
    }

    /// Same, with a downstream model filter. The request limit sent to the
    /// engine is inflated to offset expected filter losses.
    #[must_use]
    pub fn with_filter(
        engine: Arc<dyn QueryEngine>,
        planner: Arc<dyn QueryPlanner>,
        filter: ModelFilter,
    ) -> Self {
        let mut selection = Self::new(engine, planner);
        selection.filter = Some(filter);
        selection
    }

    /// Flags that the upstream context changed and a fresh
    /// `queue_load_more` is worthwhile.
    pub fn mark_needs_refresh(&self) {
        self.core.set_needs_refresh(true);
    }

    /// Holds back models-changed notifications during a visual transition.
    pub fn defer_models_changed(&self) {
        self.core.defer_models_changed();
    }

    /// Resumes models-changed notifications, emitting one if any were held.
    pub fn resume_models_changed(&self) {
        self.core.resume_models_changed();
    }

    async fn fetch_batch(&self, num_desired: usize) -> BatchOutcome {
        // Resolve the query and flip the loading guard under one lock.
        let (query, generation) = {
            let mut state = self.state.lock();
            if state.loading {
                return BatchOutcome::Busy;
            }
            // Clone rather than take: a failed fetch must not lose the
            // continuation.
            let query = if let Some(cached) = state.next_query.clone() {
                cached
            } else {
                let mut limit = num_desired;
                if self.filter.is_some() {
                    limit *= FILTER_OVERFETCH_FACTOR;
                }
                match self.planner.plan(limit, state.stage) {
                    Some(query) => query,
                    None => {
                        drop(state);
                        self.core.set_needs_refresh(false);
                        return BatchOutcome::NothingToFetch;
                    }
                }
            };
            state.loading = true;
            (query, state.generation)
        };
        self.core.emit(SelectionEvent::Loading);

        let result = self.engine.query(&query).await;

        {
            let mut state = self.state.lock();
            state.loading = false;
            if state.generation != generation {
                drop(state);
                debug!("discarding engine response for a cleared context");
                self.core.emit(SelectionEvent::Loading);
                return BatchOutcome::Stale;
            }
        }
        self.core.emit(SelectionEvent::Loading);
        self.core.set_needs_refresh(false);

        let response = match result {
            Ok(response) => {
                let was_errored = {
                    let mut state = self.state.lock();
                    state.last_error = None;
                    std::mem::take(&mut state.error_state)
                };
                if was_errored {
                    self.core.emit(SelectionEvent::InErrorState);
                }
                response
            }
            Err(error) => {
                warn!(%error, "failed to load content from engine");
                let flipped = {
                    let mut state = self.state.lock();
                    state.last_error = Some(Arc::new(SelectionError::Engine(error)));
                    !std::mem::replace(&mut state.error_state, true)
                };
                if flipped {
                    self.core.emit(SelectionEvent::InErrorState);
                }
                return BatchOutcome::Failed;
            }
        };

        let raw_len = response.models.len();
        let mut continuation = response.more_results;
        let can_load_more_changed = {
            let mut state = self.state.lock();
            let mut entered_new_stage = false;
            if continuation.is_none() {
                state.stage += 1;
                entered_new_stage = true;
                continuation = self.planner.plan(num_desired, state.stage);
            }
            let can_load_more = continuation.is_some()
                && (response.upper_bound > raw_len || entered_new_stage);
            state.next_query = continuation;
            std::mem::replace(&mut state.can_load_more, can_load_more) != can_load_more
        };
        if can_load_more_changed {
            self.core.emit(SelectionEvent::CanLoadMore);
        }

        let mut added = 0;
        for model in response.models {
            if let Some(filter) = &self.filter {
                if !filter(&model) {
                    continue;
                }
            }
            if self.core.add_model(model) {
                added += 1;
            }
        }
        BatchOutcome::Fetched { added, raw_len }
    }
}

#[async_trait]
impl Selection for LocalIndexSelection {
    fn loading(&self) -> bool {
        self.state.lock().loading
    }

    fn can_load_more(&self) -> bool {
        self.state.lock().can_load_more
    }

    fn in_error_state(&self) -> bool {
        self.state.lock().error_state
    }

    fn error(&self) -> Option<Arc<SelectionError>> {
        self.state.lock().last_error.clone()
    }

    fn needs_refresh(&self) -> bool {
        self.core.needs_refresh()
    }

    fn models(&self) -> Vec<ContentObject> {
        self.core.models()
    }

    fn clear(&self) {
        let can_load_more_changed = {
            let mut state = self.state.lock();
            state.next_query = None;
            state.stage = 0;
            state.generation += 1;
            state.error_state = false;
            state.last_error = None;
            !std::mem::replace(&mut state.can_load_more, true)
        };
        if can_load_more_changed {
            self.core.emit(SelectionEvent::CanLoadMore);
        }
        self.core.set_needs_refresh(true);
        self.core.clear_models();
    }

    async fn queue_load_more(&self, num_desired: usize) {
        let mut want = num_desired;
        loop {
            match self.fetch_batch(want).await {
                BatchOutcome::Busy
                | BatchOutcome::NothingToFetch
                | BatchOutcome::Stale
                | BatchOutcome::Failed => return,
                BatchOutcome::Fetched { added, raw_len } => {
                    self.core.emit_models_changed();
                    if added >= want || !self.can_load_more() {
                        return;
                    }
                    if raw_len == 0 {
                        // A backend claiming more data while returning empty
                        // pages would otherwise loop forever.
                        warn!("engine returned an empty, non-exhausting page; stopping");
                        return;
                    }
                    want -= added;
                }
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.core.subscribe()
    }
}
