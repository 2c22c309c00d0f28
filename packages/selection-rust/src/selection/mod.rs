//! The Selection contract: accumulation, deduplication, and notifications.
//!
//! Every pagination strategy satisfies the same behavioral contract
//! ([`Selection`]): readable `loading` / `can_load_more` / error state, an
//! idempotent `queue_load_more`, identifier-deduplicated accumulation, and
//! change notifications on a per-selection event channel. [`SelectionCore`]
//! carries the parts every strategy shares.

pub mod local;
pub mod remote;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use aisle_core::ContentObject;

/// Buffered events per subscriber before a slow listener starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Property and collection change notifications emitted by a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    /// The `loading` property toggled.
    Loading,
    /// The `can_load_more` property changed.
    CanLoadMore,
    /// The `in_error_state` property changed.
    InErrorState,
    /// The `needs_refresh` property changed.
    NeedsRefresh,
    /// The accumulated model list changed.
    ModelsChanged,
}

/// Typed failure recorded by a selection after a fetch attempt.
///
/// Fetch failures are never propagated to the caller of `queue_load_more`;
/// they are stored here and surfaced through [`Selection::error`].
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// The local query engine rejected or failed a query.
    #[error("query engine failure: {0}")]
    Engine(anyhow::Error),

    /// The remote API call failed or returned an unusable payload.
    #[error("remote api failure: {0}")]
    Remote(anyhow::Error),
}

/// Common contract every pagination strategy satisfies.
///
/// Used as `Arc<dyn Selection>` by the presentation layer, which re-reads
/// [`Selection::models`] after each [`SelectionEvent::ModelsChanged`].
#[async_trait]
pub trait Selection: Send + Sync {
    /// Whether a fetch is currently in flight.
    fn loading(&self) -> bool;

    /// Whether the backend may still have more data.
    fn can_load_more(&self) -> bool;

    /// Whether the last fetch attempt failed.
    fn in_error_state(&self) -> bool;

    /// The last fetch failure, if the selection is in an error state.
    fn error(&self) -> Option<Arc<SelectionError>>;

    /// Whether the upstream context changed since the last fetch attempt,
    /// making a `queue_load_more` call worthwhile.
    fn needs_refresh(&self) -> bool;

    /// Snapshot of the accumulated, deduplicated model list.
    fn models(&self) -> Vec<ContentObject>;

    /// Resets the selection in place for a new upstream context.
    fn clear(&self);

    /// Requests `num_desired` further models.
    ///
    /// A call while `loading` is true is a silent no-op. If, after
    /// deduplication, fewer than `num_desired` new models were obtained and
    /// more data is available, the strategy keeps fetching the shortfall on
    /// its own.
    async fn queue_load_more(&self, num_desired: usize);

    /// Subscribes to this selection's change notifications.
    fn subscribe(&self) -> broadcast::Receiver<SelectionEvent>;
}

struct CoreState {
    models: Vec<ContentObject>,
    seen_ids: HashSet<String>,
    needs_refresh: bool,
    deferring: bool,
    pending_models_changed: bool,
}

/// State and notification plumbing shared by every strategy.
///
/// Owns the ordered, identifier-deduplicated model list, the needs-refresh
/// flag, the event channel, and the models-changed deferral latch used while
/// a visual transition is in progress.
pub struct SelectionCore {
    state: Mutex<CoreState>,
    events: broadcast::Sender<SelectionEvent>,
}

impl SelectionCore {
    /// Creates an empty core with `needs_refresh` set.
    #[must_use]
    pub fn new() -> Self {
        let (events, _receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(CoreState {
                models: Vec::new(),
                seen_ids: HashSet::new(),
                needs_refresh: true,
                deferring: false,
                pending_models_changed: false,
            }),
            events,
        }
    }

    /// Subscribes to this core's event channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.events.subscribe()
    }

    /// Emits an event. Lapsed subscribers are not an error.
    pub fn emit(&self, event: SelectionEvent) {
        let _ = self.events.send(event);
    }

    /// Inserts `model` unless its identifier is already present.
    ///
    /// Returns whether the model was newly inserted.
    pub fn add_model(&self, model: ContentObject) -> bool {
        let mut state = self.state.lock();
        if state.seen_ids.insert(model.id.clone()) {
            state.models.push(model);
            true
        } else {
            false
        }
    }

    /// Snapshot of the accumulated model list.
    #[must_use]
    pub fn models(&self) -> Vec<ContentObject> {
        self.state.lock().models.clone()
    }

    /// Number of accumulated models.
    #[must_use]
    pub fn model_count(&self) -> usize {
        self.state.lock().models.len()
    }

    /// Drops every accumulated model and emits a models-changed event.
    pub fn clear_models(&self) {
        {
            let mut state = self.state.lock();
            state.models.clear();
            state.seen_ids.clear();
        }
        self.emit_models_changed();
    }

    /// Whether the upstream context changed since the last fetch attempt.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.state.lock().needs_refresh
    }

    /// Sets the needs-refresh flag, notifying if it changed.
    pub fn set_needs_refresh(&self, value: bool) {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.needs_refresh, value) != value
        };
        if changed {
            self.emit(SelectionEvent::NeedsRefresh);
        }
    }

    /// Holds back models-changed events until
    /// [`resume_models_changed`](Self::resume_models_changed) is called.
    ///
    /// Requested by the presentation layer while a visual transition is in
    /// progress; fetch and merge logic is unaffected.
    pub fn defer_models_changed(&self) {
        self.state.lock().deferring = true;
    }

    /// Stops deferring and emits one models-changed event if any were held.
    pub fn resume_models_changed(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.deferring = false;
            std::mem::take(&mut state.pending_models_changed)
        };
        if pending {
            self.emit(SelectionEvent::ModelsChanged);
        }
    }

    /// Emits a models-changed event, or latches it while deferred.
    pub fn emit_models_changed(&self) {
        let deferred = {
            let mut state = self.state.lock();
            if state.deferring {
                state.pending_models_changed = true;
                true
            } else {
                false
            }
        };
        if !deferred {
            self.emit(SelectionEvent::ModelsChanged);
        }
    }
}

impl Default for SelectionCore {
    fn default() -> Self {
        Self::new()
    }
}
