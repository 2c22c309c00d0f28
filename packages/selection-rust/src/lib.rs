//! Aisle Selection — incremental content selections, the bounded model
//! cache, and the backends they page through.
//!
//! A [`Selection`] accumulates content models batch by batch: the
//! presentation layer asks for more items with `queue_load_more`, the
//! strategy fetches from its backend, deduplicates, updates its continuation
//! state, and emits a [`SelectionEvent::ModelsChanged`] notification. Two
//! families of strategy exist: [`LocalIndexSelection`] over the local
//! full-text index, and the remote strategies ([`SearchSelection`],
//! [`TimelineSelection`]) paging a cursor-based REST API.

pub mod cache;
pub mod dispatcher;
pub mod engine;
pub mod selection;

pub use cache::ModelCache;
pub use dispatcher::Dispatcher;
pub use engine::{MemoryEngine, QueryEngine, QueryResponse};
pub use selection::local::{
    LocalIndexSelection, ModelFilter, QueryPlanner, SearchPlanner, SetPlanner,
};
pub use selection::remote::{
    HttpRestClient, RestClient, SearchSelection, TimelineSelection,
};
pub use selection::{Selection, SelectionCore, SelectionError, SelectionEvent};
