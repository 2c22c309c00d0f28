//! Shared action stream connecting presentation modules to selections.
//!
//! A thin broadcast wrapper: anything with a [`Dispatcher`] handle can
//! dispatch an [`Action`], and every registered receiver sees every action.
//! Strategies get their subscription handed to them at construction instead
//! of reaching for a global default instance.

use aisle_core::Action;
use tokio::sync::broadcast;

/// Buffered actions per receiver before a slow listener starts lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Handle to the shared action stream.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sender: broadcast::Sender<Action>,
}

impl Dispatcher {
    /// Creates a new, empty action stream.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Broadcasts an action to every registered receiver.
    ///
    /// Dispatching with no receivers is not an error; the action is dropped.
    pub fn dispatch(&self, action: Action) {
        let _ = self.sender.send(action);
    }

    /// Registers a new receiver on the stream.
    ///
    /// The receiver only sees actions dispatched after registration.
    #[must_use]
    pub fn register(&self) -> broadcast::Receiver<Action> {
        self.sender.subscribe()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
