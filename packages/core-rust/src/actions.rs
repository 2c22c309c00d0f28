//! Action payloads carried on the shared dispatcher stream.

use serde::{Deserialize, Serialize};

use crate::model::ContentObject;

/// One user-driven action broadcast to every registered module.
///
/// Selections pattern-match on the variant to decide whether their upstream
/// context changed and they must reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// The user entered new search text.
    SearchTextEntered {
        /// The raw search text.
        query: String,
    },

    /// The user selected a different content set.
    SetSelected {
        /// The set's representative model.
        model: ContentObject,
    },
}
