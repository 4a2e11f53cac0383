//! Cross-connection response serializer: chooses which completed response
//! may next be written to its client, enforcing a priority model derived
//! from a reference request-order file and a prefetch list. This is the
//! only synchronization point shared across proxy connections.
//!
//! The two-mutex idiom from the original source (one mutex guarding state,
//! one paired with the condition variable) is collapsed into a single
//! `tokio::sync::Mutex<SerializerState>` plus a `tokio::sync::Notify` used
//! in broadcast mode, per spec §9's explicit license to do so.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use retrace_core::config::{PrefetchSet, RequestOrderTable};
use retrace_core::url_util::escape_page_url;
use tokio::sync::{Mutex, Notify};

/// Immutable configuration injected at construction (spec §9: "no
/// process-wide singletons are required").
pub struct SerializerConfig {
    pub request_order: RequestOrderTable,
    pub prefetch: PrefetchSet,
    /// Normalized (scheme/`www.`/trailing-slash stripped) main page URL.
    pub page_url: String,
    /// Open Question 1: whether prefetch resources (other than the main
    /// page) are classified low-priority. Defaults to `true` upstream.
    pub classify_prefetch_as_low: bool,
}

impl SerializerConfig {
    pub fn new(
        request_order: RequestOrderTable,
        prefetch: PrefetchSet,
        page_url: &str,
        classify_prefetch_as_low: bool,
    ) -> Self {
        Self {
            request_order,
            prefetch,
            page_url: escape_page_url(page_url),
            classify_prefetch_as_low,
        }
    }

    fn is_page_url(&self, url: &str) -> bool {
        escape_page_url(url) == self.page_url
    }
}

#[derive(Default)]
struct SerializerState {
    low_priorities: HashMap<u64, String>,
    seen_high_pri_resp: BTreeSet<u64>,
    seen_low_pri_resp: BTreeSet<u64>,
    url_to_req_id: HashMap<String, u64>,
    next_req_id: u64,
    next_synthetic: u64,
    last_request_order_seen: u64,
}

impl SerializerState {
    fn clear_queues(&mut self) {
        self.low_priorities.clear();
        self.seen_high_pri_resp.clear();
        self.seen_low_pri_resp.clear();
    }
}

pub struct Serializer {
    config: SerializerConfig,
    state: Mutex<SerializerState>,
    notify: Notify,
}

impl Serializer {
    pub fn new(config: SerializerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SerializerState::default()),
            notify: Notify::new(),
        }
    }

    /// Admission (spec §4.3 "Admission"): called when a proxy task is about
    /// to forward a request to the origin. Returns the assigned request-id.
    pub async fn admit(&self, url: &str) -> u64 {
        let mut state = self.state.lock().await;

        let req_id = match self.config.request_order.ordinal(url) {
            Some(ordinal) => {
                state.last_request_order_seen = state.last_request_order_seen.max(ordinal);
                ordinal
            }
            None => {
                let table_len = self.config.request_order.len() as u64;
                let id = table_len + state.next_synthetic;
                state.next_synthetic += 1;
                id
            }
        };
        state.url_to_req_id.insert(url.to_string(), req_id);

        let is_page = self.config.is_page_url(url);
        let low = !is_page
            && self.config.classify_prefetch_as_low
            && self.config.prefetch.contains(url);
        if low {
            state.low_priorities.insert(req_id, url.to_string());
        }

        reprioritize(&mut state, &self.config.request_order);
        drop(state);
        self.notify.notify_waiters();
        req_id
    }

    /// Emission (spec §4.3 "Emission"): blocks until `url`'s response is
    /// next in its priority class, then calls `write` while still holding
    /// the serializer's lock (so that the emission order it enforces is
    /// actually the order sockets are written in), then performs the
    /// bookkeeping in step 4 and broadcasts via `notify_all`.
    ///
    /// The main page bypasses the priority predicate entirely (spec §4.3
    /// "Main-page exception") and bounds its *lock acquisition* at 50ms so
    /// a wedged mutex can never starve the top-level document (spec §5).
    pub async fn emit<W, Fut, T>(&self, url: &str, write: W) -> T
    where
        W: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let req_id = {
            let mut state = self.state.lock().await;
            let req_id = *state
                .url_to_req_id
                .get(url)
                .expect("emit() called for a URL that was never admitted");
            if state.low_priorities.contains_key(&req_id) {
                state.seen_low_pri_resp.insert(req_id);
            } else {
                state.seen_high_pri_resp.insert(req_id);
            }
            req_id
        };

        let is_page = self.config.is_page_url(url);

        if is_page {
            let mut guard = match tokio::time::timeout(Duration::from_millis(50), self.state.lock()).await
            {
                Ok(guard) => Some(guard),
                Err(_) => None,
            };

            let result = write().await;

            match guard.as_mut() {
                Some(state) => self.finish_emit(state, req_id, true),
                None => {
                    // Lock acquisition timed out; take it now (blocking is
                    // fine here, we already wrote) to keep bookkeeping
                    // consistent rather than skip it.
                    let mut state = self.state.lock().await;
                    self.finish_emit(&mut state, req_id, true);
                }
            }
            self.notify.notify_waiters();
            return result;
        }

        let mut state = loop {
            let state = self.state.lock().await;
            if predicate_holds(&state, req_id) {
                break state;
            }
            // Register for notification *before* releasing the lock: a
            // `notify_waiters()` between dropping the lock and awaiting
            // would otherwise be missed, since it only wakes already
            // registered waiters (lost-wakeup).
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(state);
            notified.await;
        };

        let result = write().await;
        self.finish_emit(&mut state, req_id, false);
        drop(state);
        self.notify.notify_waiters();
        result
    }

    fn finish_emit(&self, state: &mut SerializerState, req_id: u64, is_page: bool) {
        state.next_req_id = state.next_req_id.max(req_id + 1);
        state.seen_high_pri_resp.remove(&req_id);
        state.seen_low_pri_resp.remove(&req_id);
        state.low_priorities.remove(&req_id);
        if is_page {
            state.clear_queues();
        }
    }

    /// Releases a request that was admitted but will never be emitted,
    /// because its connection tore down before the response arrived or
    /// before `emit` could run. Without this, a request-id stuck in
    /// `low_priorities`/the `seen_*` sets could permanently block every
    /// later request in its priority class (spec §7: connection teardown
    /// must not wedge unrelated connections).
    pub async fn release(&self, url: &str) {
        let mut state = self.state.lock().await;
        if let Some(req_id) = state.url_to_req_id.remove(url) {
            state.seen_high_pri_resp.remove(&req_id);
            state.seen_low_pri_resp.remove(&req_id);
            state.low_priorities.remove(&req_id);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Whether `url` is the configured main page, after normalization.
    pub fn is_main_page(&self, url: &str) -> bool {
        self.config.is_page_url(url)
    }

    /// Builds the synthesized preload `Link:` header for the main page's
    /// response (spec §4.3): one entry per prefetch URL, in prefetch-file
    /// order.
    pub fn preload_link_header(&self) -> Option<String> {
        if self.config.prefetch.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .config
            .prefetch
            .ordered()
            .into_iter()
            .map(|(url, kind)| format!("<{url}>; rel=preload{}", kind.as_link_attr()))
            .collect();
        Some(parts.join(", "))
    }
}

fn predicate_holds(state: &SerializerState, req_id: u64) -> bool {
    if state.seen_low_pri_resp.contains(&req_id) {
        state.seen_high_pri_resp.is_empty() && state.seen_low_pri_resp.iter().next() == Some(&req_id)
    } else {
        state.seen_high_pri_resp.iter().next() == Some(&req_id)
    }
}

/// Reprioritization (spec §4.3): promote any pending low-priority request
/// whose reference-order rank is strictly behind the furthest-seen rank.
fn reprioritize(state: &mut SerializerState, table: &RequestOrderTable) {
    let promote: Vec<u64> = state
        .low_priorities
        .iter()
        .filter_map(|(&req_id, url)| {
            table
                .ordinal(url)
                .filter(|&rank| rank < state.last_request_order_seen)
                .map(|_| req_id)
        })
        .collect();

    for req_id in promote {
        // Unconditionally reclassify for when its response eventually
        // arrives; additionally move it out of the low-priority emission
        // queue right now if its response already arrived and is waiting.
        state.low_priorities.remove(&req_id);
        if state.seen_low_pri_resp.remove(&req_id) {
            state.seen_high_pri_resp.insert(req_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::config::{PrefetchSet, RequestOrderTable};
    use std::io::Write;
    use std::sync::Arc;

    fn table_with(urls: &[&str]) -> RequestOrderTable {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        for u in urls {
            writeln!(f, "{u}").unwrap();
        }
        RequestOrderTable::load(&path).unwrap()
    }

    fn prefetch_with(urls: &[&str]) -> PrefetchSet {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefetch.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        for u in urls {
            writeln!(f, "{u} DEFAULT").unwrap();
        }
        PrefetchSet::load(&path).unwrap()
    }

    fn serializer(urls: &[&str], prefetch: &[&str], page: &str) -> Serializer {
        let config = SerializerConfig::new(table_with(urls), prefetch_with(prefetch), page, true);
        Serializer::new(config)
    }

    #[tokio::test]
    async fn high_priority_fifo_by_request_id() {
        let s = Arc::new(serializer(
            &["http://a.com/1", "http://a.com/2"],
            &[],
            "http://a.com/page",
        ));
        let id1 = s.admit("http://a.com/1").await;
        let id2 = s.admit("http://a.com/2").await;
        assert!(id1 < id2);

        // Simulate both responses having already arrived from their
        // respective origins before either is handed to emit().
        {
            let mut state = s.state.lock().await;
            state.seen_high_pri_resp.insert(id1);
            state.seen_high_pri_resp.insert(id2);
        }

        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let s2 = s.clone();
        let order2 = order.clone();
        let second = tokio::spawn(async move {
            s2.emit("http://a.com/2", || async {
                order2.lock().await.push(2u64);
            })
            .await;
        });

        // Give the second request's emit() a chance to register and start
        // waiting behind the still-unresolved lower request-id.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let order1 = order.clone();
        s.emit("http://a.com/1", || async {
            order1.lock().await.push(1u64);
        })
        .await;

        second.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn high_over_low_until_high_set_empties() {
        let s = Arc::new(serializer(
            &["http://a.com/high"],
            &["http://a.com/low"],
            "http://a.com/page",
        ));
        let low_id = s.admit("http://a.com/low").await; // synthetic id, classified low
        let high_id = s.admit("http://a.com/high").await; // ordinal 0

        // Simulate both responses having already arrived.
        {
            let mut state = s.state.lock().await;
            state.seen_low_pri_resp.insert(low_id);
            state.seen_high_pri_resp.insert(high_id);
        }

        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let s2 = s.clone();
        let order2 = order.clone();
        let low_task = tokio::spawn(async move {
            s2.emit("http://a.com/low", || async {
                order2.lock().await.push("low");
            })
            .await;
        });

        // Give the low-priority emit a chance to register itself and start
        // waiting before the high-priority one is even admitted for emission.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let order1 = order.clone();
        s.emit("http://a.com/high", || async {
            order1.lock().await.push("high");
        })
        .await;

        low_task.await.unwrap();
        assert_eq!(*order.lock().await, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn reprioritization_promotes_an_already_arrived_low_response() {
        let s = serializer(
            &["http://a.com/0", "http://a.com/1"],
            &["http://a.com/0"],
            "http://a.com/page",
        );
        // http://a.com/0 has ordinal 0 but is also prefetch -> classified low.
        let low_id = s.admit("http://a.com/0").await;
        {
            // Simulate its response having already arrived and queued for
            // low-priority emission, before any reprioritization happens.
            let mut state = s.state.lock().await;
            state.seen_low_pri_resp.insert(low_id);
        }

        // Admitting ordinal 1 advances last_request_order_seen past 0,
        // which is strictly behind http://a.com/0's own rank -> promote.
        s.admit("http://a.com/1").await;

        let state = s.state.lock().await;
        assert!(!state.low_priorities.contains_key(&low_id));
        assert!(!state.seen_low_pri_resp.contains(&low_id));
        assert!(state.seen_high_pri_resp.contains(&low_id));
    }

    #[tokio::test]
    async fn main_page_clears_residual_queues() {
        let s = serializer(&["http://a.com/page"], &["http://a.com/low"], "http://a.com/page");
        let low_id = s.admit("http://a.com/low").await;
        {
            let mut state = s.state.lock().await;
            state.seen_low_pri_resp.insert(low_id);
        }
        s.admit("http://a.com/page").await;
        s.emit("http://a.com/page", || async {}).await;

        let state = s.state.lock().await;
        assert!(state.low_priorities.is_empty());
        assert!(state.seen_low_pri_resp.is_empty());
        assert!(state.seen_high_pri_resp.is_empty());
    }
}
