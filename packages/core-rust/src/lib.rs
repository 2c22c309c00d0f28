//! Aisle Core — content object models, query descriptors, and action payloads.

pub mod actions;
pub mod model;
pub mod query;

pub use actions::Action;
pub use model::ContentObject;
pub use query::Query;
