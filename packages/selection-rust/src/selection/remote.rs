//! Remote-API selection strategies paging a rate-limited REST backend.
//!
//! Two interchangeable strategies page a cursor-paginated microblog API:
//! [`SearchSelection`] by keyword and [`TimelineSelection`] by account. Both
//! track a numeric `max_id` watermark equal to the smallest identifier seen
//! so far; the API's `max_id` boundary is inclusive, so follow-up pages ask
//! for one extra item and drop the repeated boundary item.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use aisle_core::{Action, ContentObject};

use super::{Selection, SelectionCore, SelectionError, SelectionEvent};
use crate::dispatcher::Dispatcher;

/// Keyword-search endpoint, relative to the client's base URL.
pub const SEARCH_ENDPOINT: &str = "search/tweets.json";

/// Per-account timeline endpoint, relative to the client's base URL.
pub const TIMELINE_ENDPOINT: &str = "statuses/user_timeline.json";

/// Identifier prefix for models synthesized from remote payloads.
const REMOTE_ID_PREFIX: &str = "remote:///";

/// Authenticated access to the remote REST API.
///
/// Used as `Arc<dyn RestClient>`. One call per page; retry and timeout
/// policy, if any, belong to the implementation's transport.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Issues one GET against `endpoint` with the given query parameters.
    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> anyhow::Result<Value>;
}

/// [`RestClient`] over reqwest with bearer-token authentication.
pub struct HttpRestClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl HttpRestClient {
    /// Creates a client rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
        }
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> anyhow::Result<Value> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        debug!(%url, "remote api request");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Synthesizes a content model from one raw status payload.
fn model_from_raw(item: &Value) -> Option<ContentObject> {
    let id_str = item.get("id_str").and_then(Value::as_str)?;
    let text = item.get("text").and_then(Value::as_str).unwrap_or_default();
    let user = item.get("user");
    let name = user
        .and_then(|u| u.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let screen_name = user
        .and_then(|u| u.get("screen_name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(
        ContentObject::new(
            format!("{REMOTE_ID_PREFIX}{id_str}"),
            format!("{name} (@{screen_name})"),
        )
        .with_synopsis(text),
    )
}

struct RemoteState {
    loading: bool,
    can_load_more: bool,
    /// Smallest raw identifier seen so far; 0 means "no cursor yet".
    max_id: u64,
    error_state: bool,
    last_error: Option<Arc<SelectionError>>,
    generation: u64,
}

/// Cursor bookkeeping and fetch plumbing shared by both remote strategies.
struct RemotePager {
    core: SelectionCore,
    client: Arc<dyn RestClient>,
    state: Mutex<RemoteState>,
}

impl RemotePager {
    fn new(client: Arc<dyn RestClient>) -> Self {
        Self {
            core: SelectionCore::new(),
            client,
            state: Mutex::new(RemoteState {
                loading: false,
                can_load_more: true,
                max_id: 0,
                error_state: false,
                last_error: None,
                generation: 0,
            }),
        }
    }

    fn set_can_load_more(&self, value: bool) {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.can_load_more, value) != value
        };
        if changed {
            self.core.emit(SelectionEvent::CanLoadMore);
        }
    }

    fn record_failure(&self, error: SelectionError) {
        let flipped = {
            let mut state = self.state.lock();
            state.last_error = Some(Arc::new(error));
            !std::mem::replace(&mut state.error_state, true)
        };
        if flipped {
            self.core.emit(SelectionEvent::InErrorState);
        }
        self.set_can_load_more(false);
    }

    fn clear_failure(&self) {
        let was_errored = {
            let mut state = self.state.lock();
            state.last_error = None;
            std::mem::take(&mut state.error_state)
        };
        if was_errored {
            self.core.emit(SelectionEvent::InErrorState);
        }
    }

    /// Full in-place reset for a new upstream context: cursor back to 0,
    /// accumulated set dropped, more data assumed available again.
    fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.max_id = 0;
            state.generation += 1;
            state.error_state = false;
            state.last_error = None;
        }
        self.core.set_needs_refresh(true);
        self.core.clear_models();
        self.set_can_load_more(true);
    }

    async fn load_more<F>(
        &self,
        endpoint: &str,
        mut params: Vec<(&'static str, String)>,
        extract: F,
        num_desired: usize,
    ) where
        F: FnOnce(Value) -> Option<Vec<Value>> + Send,
    {
        let (max_id, generation) = {
            let mut state = self.state.lock();
            if state.loading {
                return;
            }
            state.loading = true;
            (state.max_id, state.generation)
        };
        self.core.emit(SelectionEvent::Loading);

        if max_id == 0 {
            params.push(("count", num_desired.to_string()));
        } else {
            // max_id is inclusive, so the boundary item comes back again;
            // fetch one extra and drop it below.
            params.push(("max_id", max_id.to_string()));
            params.push(("count", (num_desired + 1).to_string()));
        }

        let result = self.client.get(endpoint, &params).await;

        {
            let mut state = self.state.lock();
            state.loading = false;
            if state.generation != generation {
                drop(state);
                debug!("discarding remote response for a cleared context");
                self.core.emit(SelectionEvent::Loading);
                return;
            }
        }
        self.core.emit(SelectionEvent::Loading);
        self.core.set_needs_refresh(false);

        let body = match result {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "could not load more remote content");
                self.record_failure(SelectionError::Remote(error));
                return;
            }
        };
        self.clear_failure();

        let Some(mut raw_items) = extract(body) else {
            warn!("remote api payload had an unexpected shape");
            self.record_failure(SelectionError::Remote(anyhow::anyhow!(
                "unexpected payload shape from {endpoint}"
            )));
            return;
        };

        if max_id != 0 && !raw_items.is_empty() {
            // The repeated inclusive-boundary item.
            raw_items.remove(0);
        }

        let min_id = raw_items
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_u64))
            .min();
        if let Some(min_id) = min_id {
            self.state.lock().max_id = min_id;
        }

        // Exhaustion is only ever discovered by a later empty or failed
        // fetch, never predicted here.
        self.set_can_load_more(true);

        let mut any_added = false;
        for item in &raw_items {
            if let Some(model) = model_from_raw(item) {
                if self.core.add_model(model) {
                    any_added = true;
                }
            }
        }
        if any_added {
            self.core.emit_models_changed();
        }
    }
}

/// Remote strategy paging keyword-search results.
///
/// The fixed `topic` scopes every request; the live search text comes from
/// [`Action::SearchTextEntered`] on the dispatcher stream.
pub struct SearchSelection {
    pager: RemotePager,
    topic: String,
    query: Mutex<String>,
}

impl SearchSelection {
    /// Creates a search selection scoped to `topic`.
    #[must_use]
    pub fn new(client: Arc<dyn RestClient>, topic: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            pager: RemotePager::new(client),
            topic: topic.into(),
            query: Mutex::new(String::new()),
        })
    }

    /// Subscribes this selection to the action stream.
    ///
    /// The listener task holds only a weak handle and exits when the
    /// selection is dropped or the dispatcher closes.
    pub fn attach(self: &Arc<Self>, dispatcher: &Dispatcher) -> tokio::task::JoinHandle<()> {
        let mut receiver = dispatcher.register();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(action) => {
                        let Some(selection) = weak.upgrade() else { break };
                        selection.handle_action(&action);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "search selection lagged behind the action stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Reacts to one dispatched action.
    pub fn handle_action(&self, action: &Action) {
        if let Action::SearchTextEntered { query } = action {
            *self.query.lock() = query.clone();
            self.pager.reset();
        }
    }
}

#[async_trait]
impl Selection for SearchSelection {
    fn loading(&self) -> bool {
        self.pager.state.lock().loading
    }

    fn can_load_more(&self) -> bool {
        self.pager.state.lock().can_load_more
    }

    fn in_error_state(&self) -> bool {
        self.pager.state.lock().error_state
    }

    fn error(&self) -> Option<Arc<SelectionError>> {
        self.pager.state.lock().last_error.clone()
    }

    fn needs_refresh(&self) -> bool {
        self.pager.core.needs_refresh()
    }

    fn models(&self) -> Vec<ContentObject> {
        self.pager.core.models()
    }

    fn clear(&self) {
        self.pager.reset();
    }

    async fn queue_load_more(&self, num_desired: usize) {
        let text = format!("{} {}", self.topic, self.query.lock());
        self.pager
            .load_more(
                SEARCH_ENDPOINT,
                vec![("q", text)],
                |body| match body {
                    Value::Object(mut map) => match map.remove("statuses") {
                        Some(Value::Array(items)) => Some(items),
                        _ => None,
                    },
                    _ => None,
                },
                num_desired,
            )
            .await;
    }

    fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.pager.core.subscribe()
    }
}

/// Remote strategy paging one account's timeline.
///
/// The account is taken from the title of the model carried by
/// [`Action::SetSelected`], minus its leading `@`.
pub struct TimelineSelection {
    pager: RemotePager,
    account: Mutex<Option<String>>,
}

impl TimelineSelection {
    /// Creates a timeline selection with no account bound yet.
    #[must_use]
    pub fn new(client: Arc<dyn RestClient>) -> Arc<Self> {
        Arc::new(Self {
            pager: RemotePager::new(client),
            account: Mutex::new(None),
        })
    }

    /// Subscribes this selection to the action stream.
    pub fn attach(self: &Arc<Self>, dispatcher: &Dispatcher) -> tokio::task::JoinHandle<()> {
        let mut receiver = dispatcher.register();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(action) => {
                        let Some(selection) = weak.upgrade() else { break };
                        selection.handle_action(&action);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "timeline selection lagged behind the action stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Reacts to one dispatched action.
    pub fn handle_action(&self, action: &Action) {
        if let Action::SetSelected { model } = action {
            let account = model
                .title
                .strip_prefix('@')
                .unwrap_or(&model.title)
                .to_string();
            *self.account.lock() = Some(account);
            self.pager.reset();
        }
    }
}

#[async_trait]
impl Selection for TimelineSelection {
    fn loading(&self) -> bool {
        self.pager.state.lock().loading
    }

    fn can_load_more(&self) -> bool {
        self.pager.state.lock().can_load_more
    }

    fn in_error_state(&self) -> bool {
        self.pager.state.lock().error_state
    }

    fn error(&self) -> Option<Arc<SelectionError>> {
        self.pager.state.lock().last_error.clone()
    }

    fn needs_refresh(&self) -> bool {
        self.pager.core.needs_refresh()
    }

    fn models(&self) -> Vec<ContentObject> {
        self.pager.core.models()
    }

    fn clear(&self) {
        self.pager.reset();
    }

    async fn queue_load_more(&self, num_desired: usize) {
        let Some(account) = self.account.lock().clone() else {
            // No set selected yet: nothing to fetch.
            self.pager.core.set_needs_refresh(false);
            return;
        };
        self.pager
            .load_more(
                TIMELINE_ENDPOINT,
                vec![("screen_name", account), ("include_rts", "1".to_string())],
                |body| match body {
                    Value::Array(items) => Some(items),
                    _ => None,
                },
                num_desired,
            )
            .await;
    }

    fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.pager.core.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use serde_json::json;

    use super::*;

    type RecordedCall = (String, Vec<(String, String)>);

    /// Client that replays scripted payloads and records every call.
    struct ScriptedClient {
        responses: Mutex<VecDeque<anyhow::Result<Value>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<anyhow::Result<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn recorded_calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RestClient for ScriptedClient {
        async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> anyhow::Result<Value> {
            self.calls.lock().push((
                endpoint.to_string(),
                params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), v.clone()))
                    .collect(),
            ));
            self.responses
                .lock()
                .pop_front()
                .expect("script exhausted: unexpected api call")
        }
    }

    fn status(id: u64, text: &str) -> Value {
        json!({
            "id": id,
            "id_str": id.to_string(),
            "text": text,
            "user": { "name": "Ada Lovelace", "screen_name": "ada" },
        })
    }

    fn param<'a>(call: &'a RecordedCall, key: &str) -> Option<&'a str> {
        call.1
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn first_page_requests_exactly_num_desired() {
        let client = ScriptedClient::new(vec![Ok(json!({
            "statuses": [status(100, "one"), status(99, "two")],
        }))]);
        let selection = SearchSelection::new(client.clone(), "#history");

        selection.queue_load_more(2).await;

        let calls = client.recorded_calls();
        assert_eq!(calls[0].0, SEARCH_ENDPOINT);
        assert_eq!(param(&calls[0], "count"), Some("2"));
        assert_eq!(param(&calls[0], "max_id"), None);
        assert_eq!(selection.models().len(), 2);
        assert!(selection.can_load_more());
    }

    #[tokio::test]
    async fn follow_up_page_drops_the_inclusive_boundary_item() {
        let client = ScriptedClient::new(vec![
            Ok(json!({ "statuses": [status(100, "a"), status(99, "b")] })),
            Ok(json!({ "statuses": [status(99, "b"), status(98, "c"), status(97, "d")] })),
        ]);
        let selection = SearchSelection::new(client.clone(), "#history");

        selection.queue_load_more(2).await;
        selection.queue_load_more(2).await;

        let calls = client.recorded_calls();
        // Cursor from page one is the minimum id seen; one extra item is
        // requested to cover the repeated boundary.
        assert_eq!(param(&calls[1], "max_id"), Some("99"));
        assert_eq!(param(&calls[1], "count"), Some("3"));
        // 3 items came back, the boundary duplicate was dropped: 2 added.
        assert_eq!(selection.models().len(), 4);
    }

    #[tokio::test]
    async fn cursor_moves_to_the_minimum_identifier() {
        let client = ScriptedClient::new(vec![
            Ok(json!({ "statuses": [status(50, "x"), status(70, "y"), status(60, "z")] })),
            Ok(json!({ "statuses": [] })),
        ]);
        let selection = SearchSelection::new(client.clone(), "#history");

        selection.queue_load_more(3).await;
        selection.queue_load_more(3).await;

        assert_eq!(param(&client.recorded_calls()[1], "max_id"), Some("50"));
    }

    #[tokio::test]
    async fn empty_page_leaves_the_cursor_unchanged() {
        let client = ScriptedClient::new(vec![
            Ok(json!({ "statuses": [status(40, "x")] })),
            Ok(json!({ "statuses": [] })),
            Ok(json!({ "statuses": [] })),
        ]);
        let selection = SearchSelection::new(client.clone(), "#history");

        selection.queue_load_more(1).await;
        selection.queue_load_more(1).await;
        selection.queue_load_more(1).await;

        let calls = client.recorded_calls();
        assert_eq!(param(&calls[1], "max_id"), Some("40"));
        assert_eq!(param(&calls[2], "max_id"), Some("40"));
        assert_eq!(selection.models().len(), 1);
    }

    #[tokio::test]
    async fn failure_disables_loading_more_until_reset() {
        let client = ScriptedClient::new(vec![Err(anyhow::anyhow!("rate limited"))]);
        let selection = SearchSelection::new(client, "#history");

        selection.queue_load_more(5).await;

        assert!(!selection.can_load_more());
        assert!(!selection.loading());
        assert!(selection.in_error_state());
        assert!(selection.error().is_some());
        assert!(selection.models().is_empty());
    }

    #[tokio::test]
    async fn unexpected_payload_shape_counts_as_failure() {
        let client = ScriptedClient::new(vec![Ok(json!({ "unrelated": true }))]);
        let selection = SearchSelection::new(client, "#history");

        selection.queue_load_more(5).await;

        assert!(!selection.can_load_more());
        assert!(selection.in_error_state());
    }

    #[tokio::test]
    async fn search_action_resets_cursor_models_and_query_text() {
        let client = ScriptedClient::new(vec![
            Ok(json!({ "statuses": [status(10, "old")] })),
            Ok(json!({ "statuses": [status(20, "new")] })),
        ]);
        let selection = SearchSelection::new(client.clone(), "#history");

        selection.handle_action(&Action::SearchTextEntered {
            query: "hastings".into(),
        });
        selection.queue_load_more(1).await;
        assert_eq!(selection.models().len(), 1);

        selection.handle_action(&Action::SearchTextEntered {
            query: "normandy".into(),
        });
        assert!(selection.models().is_empty());
        assert!(selection.can_load_more());
        assert!(selection.needs_refresh());

        selection.queue_load_more(1).await;
        let calls = client.recorded_calls();
        assert_eq!(param(&calls[0], "q"), Some("#history hastings"));
        assert_eq!(param(&calls[1], "q"), Some("#history normandy"));
        // Cursor was reset: no max_id on the first post-reset request.
        assert_eq!(param(&calls[1], "max_id"), None);
    }

    #[tokio::test]
    async fn models_synthesize_identifier_title_and_synopsis() {
        let client = ScriptedClient::new(vec![Ok(json!({
            "statuses": [status(42, "the text")],
        }))]);
        let selection = SearchSelection::new(client, "#history");

        selection.queue_load_more(1).await;

        let models = selection.models();
        assert_eq!(models[0].id, "remote:///42");
        assert_eq!(models[0].title, "Ada Lovelace (@ada)");
        assert_eq!(models[0].synopsis, "the text");
    }

    #[tokio::test]
    async fn timeline_reads_the_account_from_the_selected_set() {
        let client = ScriptedClient::new(vec![Ok(json!([status(7, "tl")]))]);
        let selection = TimelineSelection::new(client.clone());

        selection.handle_action(&Action::SetSelected {
            model: ContentObject::new("aisle:///sets/ada", "@ada"),
        });
        selection.queue_load_more(1).await;

        let calls = client.recorded_calls();
        assert_eq!(calls[0].0, TIMELINE_ENDPOINT);
        assert_eq!(param(&calls[0], "screen_name"), Some("ada"));
        assert_eq!(param(&calls[0], "include_rts"), Some("1"));
        assert_eq!(selection.models().len(), 1);
    }

    #[tokio::test]
    async fn timeline_without_an_account_fetches_nothing() {
        let client = ScriptedClient::new(Vec::new());
        let selection = TimelineSelection::new(client.clone());

        selection.queue_load_more(5).await;

        assert!(client.recorded_calls().is_empty());
        assert!(!selection.needs_refresh());
    }

    #[tokio::test]
    async fn models_changed_only_fires_when_something_new_arrived() {
        let client = ScriptedClient::new(vec![
            Ok(json!({ "statuses": [status(5, "x")] })),
            // Only the boundary duplicate comes back: nothing new.
            Ok(json!({ "statuses": [status(5, "x")] })),
        ]);
        let selection = SearchSelection::new(client, "#history");
        let mut receiver = selection.subscribe();

        selection.queue_load_more(1).await;
        selection.queue_load_more(1).await;

        let mut models_changed = 0;
        while let Ok(event) = receiver.try_recv() {
            if event == SelectionEvent::ModelsChanged {
                models_changed += 1;
            }
        }
        assert_eq!(models_changed, 1);
    }

    #[tokio::test]
    async fn attached_selection_resets_on_dispatched_action() {
        let client = ScriptedClient::new(vec![Ok(json!({
            "statuses": [status(3, "seed")],
        }))]);
        let dispatcher = Dispatcher::new();
        let selection = SearchSelection::new(client, "#history");
        let listener = selection.attach(&dispatcher);

        selection.queue_load_more(1).await;
        assert_eq!(selection.models().len(), 1);

        dispatcher.dispatch(Action::SearchTextEntered {
            query: "fresh".into(),
        });
        // Give the listener task time to process the action.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(selection.models().is_empty());
        assert_eq!(*selection.query.lock(), "fresh");
        listener.abort();
    }
}
