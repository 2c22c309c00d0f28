//! Content object model shared by every selection backend.
//!
//! A [`ContentObject`] is the marshalled form of one piece of content,
//! whether it came from the local index or a remote API. The `id` is the
//! stable identity used for deduplication and cache lookups.

use serde::{Deserialize, Serialize};

/// One marshalled content item.
///
/// Identity is carried by `id` alone; two objects with the same `id` are the
/// same content as far as deduplication and caching are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentObject {
    /// Stable content identifier (e.g. `aisle:///history/battle-of-hastings`).
    #[serde(rename = "@id")]
    pub id: String,

    /// Display title.
    #[serde(default)]
    pub title: String,

    /// Short summary shown on cards.
    #[serde(default)]
    pub synopsis: String,

    /// Tags used for set membership queries.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ContentObject {
    /// Creates a model with just an identifier and title.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            synopsis: String::new(),
            tags: Vec::new(),
        }
    }

    /// Adds a synopsis.
    #[must_use]
    pub fn with_synopsis(mut self, synopsis: impl Into<String>) -> Self {
        self.synopsis = synopsis.into();
        self
    }

    /// Adds tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Marshals a JSON-LD-style record (`@id`, `title`, `synopsis`, `tags`)
    /// into a model.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the payload has no `@id` or the
    /// fields have the wrong shape.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
