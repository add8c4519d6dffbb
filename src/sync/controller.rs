use super::export;
use super::filter::FilterStrategy;
use super::query::{QueryState, DEFAULT_LIMIT};
use super::session::{FetchSession, SessionDone, DEFAULT_TIMEOUT};
use crate::api::resource::{decode_items, Resource};
use crate::api::types::{Record, RecordId, ResolveAck, Timestamp};
use crate::transport::{join_url, FetchError, Request, Transport};
use crossbeam_channel::{never, select, tick, unbounded, Receiver, Sender};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Everything a controller needs to know about its endpoint.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub name: String,
    pub base_url: String,
    pub path: String,
    pub envelope_key: String,
    pub strategy: FilterStrategy,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub page_size: u32,
    /// Prefix of the resolve endpoint; `None` for views that cannot resolve.
    pub resolve_path: Option<String>,
}

impl ControllerConfig {
    pub fn for_resource(resource: Resource, base_url: impl Into<String>) -> Self {
        ControllerConfig {
            name: resource.name().to_string(),
            base_url: base_url.into(),
            path: resource.path().to_string(),
            envelope_key: resource.envelope_key().to_string(),
            strategy: resource.default_strategy(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: resource.default_poll_interval(),
            page_size: DEFAULT_LIMIT,
            resolve_path: resource.resolve_path().map(str::to_string),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_strategy(mut self, strategy: FilterStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Loading,
    Success,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Success => "success",
            Phase::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub requested_at: OffsetDateTime,
    /// Limit of the query this page was fetched for.
    pub limit: u32,
}

/// Serializable view of a controller for whoever renders it.
#[derive(Debug, Serialize)]
pub struct ListSnapshot<'a, T: Serialize> {
    pub view: &'a str,
    pub phase: Phase,
    pub error: Option<&'a str>,
    pub offset: u32,
    pub limit: u32,
    pub has_next: bool,
    pub has_prev: bool,
    pub polling: bool,
    pub requested_at: Option<Timestamp>,
    pub items: &'a [T],
}

/// A running fetch and the query it was issued for.
struct InFlight {
    session: FetchSession,
    query: QueryState,
}

enum Event {
    Fetched(SessionDone),
    Mutated(SessionDone),
    Tick,
}

/// Keeps one list view in sync with the backend.
///
/// All state changes happen on the owning thread: sessions and the polling
/// timer only post events, which `pump`, `wait_event` and `wait_settled`
/// apply. Only the most recently started fetch may update the page.
pub struct ListController<T: Record> {
    config: ControllerConfig,
    transport: Arc<dyn Transport>,
    query: QueryState,
    phase: Phase,
    page: Option<Page<T>>,
    error_message: Option<String>,
    in_flight: Option<InFlight>,
    pending_mutations: HashMap<u64, (RecordId, FetchSession)>,
    next_session_id: u64,
    fetch_tx: Sender<SessionDone>,
    fetch_rx: Receiver<SessionDone>,
    mutation_tx: Sender<SessionDone>,
    mutation_rx: Receiver<SessionDone>,
    ticker: Option<Receiver<Instant>>,
    disposed: bool,
}

impl<T: Record> ListController<T> {
    pub fn new(config: ControllerConfig, transport: Arc<dyn Transport>) -> Self {
        let (fetch_tx, fetch_rx) = unbounded();
        let (mutation_tx, mutation_rx) = unbounded();
        let query = QueryState::new(config.page_size);
        ListController {
            config,
            transport,
            query,
            phase: Phase::Idle,
            page: None,
            error_message: None,
            in_flight: None,
            pending_mutations: HashMap::new(),
            next_session_id: 0,
            fetch_tx,
            fetch_rx,
            mutation_tx,
            mutation_rx,
            ticker: None,
            disposed: false,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    /// Edit the query; nothing is fetched until `refresh` or
    /// `apply_filter_and_search`.
    pub fn query_mut(&mut self) -> &mut QueryState {
        &mut self.query
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn page(&self) -> Option<&Page<T>> {
        self.page.as_ref()
    }

    pub fn items(&self) -> &[T] {
        self.page.as_ref().map(|p| p.items.as_slice()).unwrap_or(&[])
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_polling(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// A full page is the only hint that more items exist.
    pub fn has_next(&self) -> bool {
        self.page
            .as_ref()
            .map(|p| p.items.len() == p.limit as usize)
            .unwrap_or(false)
    }

    pub fn has_prev(&self) -> bool {
        self.query.offset() > 0
    }

    pub fn snapshot(&self) -> ListSnapshot<'_, T> {
        ListSnapshot {
            view: &self.config.name,
            phase: self.phase,
            error: self.error_message(),
            offset: self.query.offset(),
            limit: self.query.limit(),
            has_next: self.has_next(),
            has_prev: self.has_prev(),
            polling: self.is_polling(),
            requested_at: self
                .page
                .as_ref()
                .map(|p| Timestamp::from_datetime(p.requested_at)),
            items: self.items(),
        }
    }

    /// One line describing the view, e.g. `logs: success items=10 offset=0`.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{}: {} items={} offset={}",
            self.config.name,
            self.phase.as_str(),
            self.items().len(),
            self.query.offset()
        );
        if let Some(e) = &self.error_message {
            line.push_str(&format!(" error=\"{}\"", e));
        }
        line
    }

    fn next_id(&mut self) -> u64 {
        self.next_session_id = self.next_session_id.wrapping_add(1);
        self.next_session_id
    }

    /// Start a fetch for the current query, superseding any fetch still in
    /// flight. The held page stays visible while loading.
    pub fn refresh(&mut self) {
        if self.disposed {
            warn!(view = %self.config.name, "refresh on disposed controller ignored");
            return;
        }
        if let Some(mut previous) = self.in_flight.take() {
            debug!(view = %self.config.name, session = previous.session.id(), "superseding in-flight fetch");
            previous.session.cancel();
        }

        let id = self.next_id();
        let params = self.config.strategy.request_params(&self.query);
        let request =
            Request::get(join_url(&self.config.base_url, &self.config.path)).with_params(params);
        debug!(view = %self.config.name, session = id, params = ?request.params, "starting fetch");

        self.phase = Phase::Loading;
        let session = FetchSession::start(
            id,
            self.transport.clone(),
            request,
            self.config.timeout,
            self.fetch_tx.clone(),
        );
        self.in_flight = Some(InFlight {
            session,
            query: self.query.clone(),
        });
    }

    /// Filter changes always restart at the first page.
    pub fn apply_filter_and_search(&mut self) {
        self.query.set_offset(0);
        self.refresh();
    }

    /// Returns false without fetching when the current page is short.
    pub fn next_page(&mut self) -> bool {
        if !self.has_next() {
            return false;
        }
        let offset = self.query.offset().saturating_add(self.query.limit());
        self.query.set_offset(offset);
        self.refresh();
        true
    }

    /// Returns false without fetching when already on the first page.
    pub fn prev_page(&mut self) -> bool {
        if self.query.offset() == 0 {
            return false;
        }
        let offset = self.query.offset().saturating_sub(self.query.limit());
        self.query.set_offset(offset);
        self.refresh();
        true
    }

    /// Returns false when polling was already running.
    pub fn start_polling(&mut self, interval: Duration) -> bool {
        if self.disposed || self.ticker.is_some() {
            return false;
        }
        info!(view = %self.config.name, ?interval, "polling started");
        self.ticker = Some(tick(interval));
        true
    }

    pub fn stop_polling(&mut self) {
        if self.ticker.take().is_some() {
            info!(view = %self.config.name, "polling stopped");
        }
    }

    /// Mark an item resolved on the backend.
    ///
    /// The item leaves the held page immediately. If the request fails it is
    /// not put back; the error is reported and the next refresh shows
    /// whatever the backend still has. Returns whether an item was removed;
    /// views without a resolve endpoint never remove or send anything.
    pub fn resolve_item(&mut self, id: &RecordId) -> bool {
        if self.disposed {
            warn!(view = %self.config.name, %id, "resolve on disposed controller ignored");
            return false;
        }
        let Some(resolve_path) = self.config.resolve_path.as_deref() else {
            warn!(view = %self.config.name, %id, "view has no resolve endpoint");
            return false;
        };
        let url = join_url(
            &self.config.base_url,
            &format!("{}/{}", resolve_path, id),
        );

        let removed = match self.page.as_mut() {
            Some(page) => match page.items.iter().position(|item| item.id() == id) {
                Some(pos) => {
                    page.items.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };

        let session_id = self.next_id();
        info!(view = %self.config.name, %id, removed, "resolving item");
        let session = FetchSession::start(
            session_id,
            self.transport.clone(),
            Request::post(url, None),
            self.config.timeout,
            self.mutation_tx.clone(),
        );
        self.pending_mutations
            .insert(session_id, (id.clone(), session));
        removed
    }

    pub fn export_rows(&self, columns: &[&str]) -> Vec<String> {
        export::rows(self.items(), columns)
    }

    pub fn export_csv(&self, columns: &[&str]) -> String {
        export::document(self.items(), columns)
    }

    /// Apply every event that is already waiting. Returns whether anything
    /// was applied.
    pub fn pump(&mut self) -> bool {
        let mut applied = false;
        while let Some(event) = self.try_next_event() {
            self.handle(event);
            applied = true;
        }
        applied
    }

    /// Block up to `timeout` for one event and apply it.
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        match self.next_event(timeout) {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    /// Block until no fetch or mutation is outstanding. Polling ticks that
    /// arrive meanwhile start new fetches, which are waited for as well.
    pub fn wait_settled(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() || !self.pending_mutations.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_event(remaining) {
                return false;
            }
        }
        true
    }

    /// Stop polling and abandon outstanding requests. The controller keeps
    /// its last state for reading but issues nothing further.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop_polling();
        if let Some(mut fetch) = self.in_flight.take() {
            fetch.session.cancel();
        }
        self.pending_mutations.clear();
        self.disposed = true;
        debug!(view = %self.config.name, "controller disposed");
    }

    fn try_next_event(&self) -> Option<Event> {
        if let Ok(done) = self.fetch_rx.try_recv() {
            return Some(Event::Fetched(done));
        }
        if let Ok(done) = self.mutation_rx.try_recv() {
            return Some(Event::Mutated(done));
        }
        match &self.ticker {
            Some(ticker) if ticker.try_recv().is_ok() => Some(Event::Tick),
            _ => None,
        }
    }

    fn next_event(&self, timeout: Duration) -> Option<Event> {
        let idle = never();
        let ticker: &Receiver<Instant> = self.ticker.as_ref().unwrap_or(&idle);
        select! {
            recv(self.fetch_rx) -> done => done.ok().map(Event::Fetched),
            recv(self.mutation_rx) -> done => done.ok().map(Event::Mutated),
            recv(*ticker) -> _ => Some(Event::Tick),
            default(timeout) => None,
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Fetched(done) => self.apply_fetch(done),
            Event::Mutated(done) => self.apply_mutation(done),
            Event::Tick => {
                debug!(view = %self.config.name, "poll tick");
                self.refresh();
            }
        }
    }

    fn apply_fetch(&mut self, done: SessionDone) {
        let issued = match self.in_flight.take() {
            Some(fetch) if fetch.session.id() == done.id => fetch.query,
            other => {
                self.in_flight = other;
                debug!(view = %self.config.name, session = done.id, "discarding stale fetch result");
                return;
            }
        };

        // Paged against the query that was sent, not one edited since.
        let outcome = done.outcome.and_then(|raw| {
            let items: Vec<T> = decode_items(&raw.body, &self.config.envelope_key)?;
            Ok(Page {
                items: self.config.strategy.page_items(items, &issued),
                requested_at: raw.requested_at,
                limit: issued.limit(),
            })
        });

        match outcome {
            Ok(page) => {
                debug!(view = %self.config.name, items = page.items.len(), "page updated");
                self.page = Some(page);
                self.phase = Phase::Success;
                self.error_message = None;
            }
            Err(FetchError::Aborted) => {}
            Err(e) => {
                warn!(view = %self.config.name, error = %e, "fetch failed");
                self.phase = Phase::Error;
                self.error_message = Some(e.to_string());
            }
        }
    }

    fn apply_mutation(&mut self, done: SessionDone) {
        let Some((id, _session)) = self.pending_mutations.remove(&done.id) else {
            return;
        };

        let result = done.outcome.and_then(|raw| {
            match serde_json::from_str::<ResolveAck>(&raw.body) {
                Ok(ResolveAck {
                    resolved: Some(false),
                }) => Err(FetchError::Backend("not resolved".to_string())),
                _ => Ok(()),
            }
        });

        match result {
            Ok(()) => info!(view = %self.config.name, %id, "item resolved"),
            Err(FetchError::Aborted) => {}
            Err(e) => {
                warn!(view = %self.config.name, %id, error = %e, "resolve failed");
                self.error_message = Some(format!("failed to resolve {}: {}", id, e));
            }
        }
    }
}

impl<T: Record> Drop for ListController<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{Escalation, LogEntry};
    use crate::transport::mock::{ok_json, MockTransport};
    use crossbeam_channel::bounded;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(3);

    fn logs_controller(transport: Arc<MockTransport>) -> ListController<LogEntry> {
        ListController::new(
            ControllerConfig::for_resource(Resource::Logs, "http://backend"),
            transport,
        )
    }

    fn log_items(prefix: &str, n: usize) -> Value {
        Value::Array(
            (0..n)
                .map(|i| json!({"id": format!("{}-{}", prefix, i), "subject": "invoice"}))
                .collect(),
        )
    }

    fn ids<T: Record>(c: &ListController<T>) -> Vec<String> {
        c.items().iter().map(|i| i.id().to_string()).collect()
    }

    #[test]
    fn test_initial_state_is_idle() {
        let c = logs_controller(MockTransport::new(|_| ok_json(json!([]))));
        assert_eq!(c.phase(), Phase::Idle);
        assert!(c.page().is_none());
        assert!(c.error_message().is_none());
        assert!(!c.has_next());
    }

    #[test]
    fn test_refresh_success_then_next_page_requests_offset() {
        let transport = MockTransport::new(|req| {
            let offset = req.param("offset").unwrap_or("0");
            ok_json(log_items(&format!("o{}", offset), 10))
        });
        let mut c = logs_controller(transport.clone());
        c.query_mut().set_free_text("invoice");
        c.query_mut().set_limit(10);

        c.refresh();
        assert_eq!(c.phase(), Phase::Loading);
        assert!(c.wait_settled(WAIT));
        assert_eq!(c.phase(), Phase::Success);
        assert_eq!(c.items().len(), 10);
        assert!(c.has_next());

        assert!(c.next_page());
        assert_eq!(c.phase(), Phase::Loading);
        assert!(c.wait_settled(WAIT));
        assert_eq!(c.phase(), Phase::Success);

        let requests = transport.requests();
        let last = requests.last().unwrap();
        assert_eq!(last.url, "http://backend/logs");
        assert_eq!(last.param("offset"), Some("10"));
        assert_eq!(last.param("query"), Some("invoice"));
        assert_eq!(ids(&c)[0], "o10-0");
    }

    #[test]
    fn test_next_page_noop_on_short_page() {
        let transport = MockTransport::new(|_| ok_json(log_items("a", 3)));
        let mut c = logs_controller(transport.clone());
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert!(!c.has_next());
        assert!(!c.next_page());
        assert_eq!(c.query().offset(), 0);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(c.phase(), Phase::Success);
    }

    #[test]
    fn test_prev_page_clamps_and_noops_at_start() {
        let transport = MockTransport::new(|_| ok_json(log_items("a", 10)));
        let mut c = logs_controller(transport.clone());
        assert!(!c.prev_page());
        c.query_mut().set_offset(5);
        assert!(c.prev_page());
        assert_eq!(c.query().offset(), 0);
        assert!(c.wait_settled(WAIT));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_apply_filter_resets_offset() {
        let transport = MockTransport::new(|_| ok_json(json!([])));
        let mut c = logs_controller(transport.clone());
        c.query_mut().set_offset(40);
        c.query_mut().set_sender("bob@");
        c.apply_filter_and_search();
        assert_eq!(c.query().offset(), 0);
        assert!(c.wait_settled(WAIT));
        let req = transport.requests().pop().unwrap();
        assert_eq!(req.param("offset"), Some("0"));
        assert_eq!(req.param("sender"), Some("bob@"));
    }

    #[test]
    fn test_newest_wins_when_first_response_arrives_late() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let transport = MockTransport::new(move |req| match req.param("query") {
            Some("first") => {
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                ok_json(log_items("first", 2))
            }
            _ => ok_json(log_items("second", 2)),
        });
        let mut c = logs_controller(transport.clone());

        c.query_mut().set_free_text("first");
        c.refresh();
        c.query_mut().set_free_text("second");
        c.refresh();

        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["second-0", "second-1"]);

        // Let the superseded request finish; its answer must be dropped.
        let _ = gate_tx.send_timeout((), Duration::from_secs(1));
        c.wait_event(Duration::from_millis(200));
        c.pump();
        assert_eq!(ids(&c), vec!["second-0", "second-1"]);
        assert_eq!(c.phase(), Phase::Success);
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_stale_result_ignored_even_without_cancel_signal() {
        let transport = MockTransport::new(|_| ok_json(log_items("x", 1)));
        let mut c = logs_controller(transport);
        c.refresh();
        let stale = SessionDone {
            id: 999,
            outcome: Ok(crate::sync::session::RawPage {
                body: log_items("stale", 1).to_string(),
                requested_at: OffsetDateTime::now_utc(),
            }),
        };
        c.apply_fetch(stale);
        assert_eq!(c.phase(), Phase::Loading);
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["x-0"]);
    }

    #[test]
    fn test_timeout_keeps_previous_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_gate_tx, gate_rx) = bounded::<()>(0);
        let counter = calls.clone();
        let transport = MockTransport::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ok_json(log_items("good", 2))
            } else {
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                ok_json(json!([]))
            }
        });
        let mut c = ListController::<LogEntry>::new(
            ControllerConfig::for_resource(Resource::Logs, "http://backend")
                .with_timeout(Duration::from_millis(100)),
            transport,
        );

        c.refresh();
        assert!(c.wait_settled(WAIT));
        let before = c.page().cloned();

        let started = Instant::now();
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(c.phase(), Phase::Error);
        assert_eq!(
            c.error_message(),
            Some("backend did not respond within 0.1s")
        );
        assert_eq!(c.page().cloned(), before);
    }

    #[test]
    fn test_http_error_sets_message_and_keeps_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = MockTransport::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ok_json(log_items("good", 1))
            } else {
                Err(FetchError::Http(503))
            }
        });
        let mut c = logs_controller(transport);
        c.refresh();
        assert!(c.wait_settled(WAIT));
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert_eq!(c.phase(), Phase::Error);
        assert_eq!(c.error_message(), Some("backend returned HTTP 503"));
        assert_eq!(ids(&c), vec!["good-0"]);

        // Recovery clears the error.
        calls.store(0, Ordering::SeqCst);
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert_eq!(c.phase(), Phase::Success);
        assert!(c.error_message().is_none());
    }

    #[test]
    fn test_undecodable_body_is_an_error() {
        let transport = MockTransport::new(|_| ok_json(json!({"unexpected": true})));
        let mut c = logs_controller(transport);
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert_eq!(c.phase(), Phase::Error);
        assert!(c
            .error_message()
            .unwrap()
            .starts_with("unexpected response from backend"));
        assert!(c.page().is_none());
    }

    fn escalation_backend(
        truth: Arc<Mutex<Vec<Value>>>,
        post_gate: Option<crossbeam_channel::Receiver<()>>,
        post_result: Result<Value, FetchError>,
    ) -> Arc<MockTransport> {
        MockTransport::new(move |req| match req.method {
            crate::transport::Method::Get => {
                let list = truth.lock().unwrap().clone();
                ok_json(json!({"status": "success", "escalations": list}))
            }
            crate::transport::Method::Post => {
                if let Some(gate) = &post_gate {
                    let _ = gate.recv_timeout(Duration::from_secs(5));
                }
                post_result.clone().and_then(ok_json)
            }
        })
    }

    fn escalation_controller(transport: Arc<MockTransport>) -> ListController<Escalation> {
        ListController::new(
            ControllerConfig::for_resource(Resource::Escalations, "http://backend"),
            transport,
        )
    }

    fn escalation(id: u32) -> Value {
        json!({"run_id": id, "subject": format!("case {}", id), "timestamp": 1_700_000_000 + id})
    }

    #[test]
    fn test_resolve_removes_immediately_and_refresh_reconciles() {
        let truth = Arc::new(Mutex::new(vec![escalation(41), escalation(42), escalation(43)]));
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let transport = escalation_backend(
            truth.clone(),
            Some(gate_rx),
            Ok(json!({"id": "42", "resolved": true})),
        );
        let mut c = escalation_controller(transport.clone());
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["41", "42", "43"]);

        assert!(c.resolve_item(&RecordId::new("42")));
        // Removed before the backend has answered.
        assert_eq!(ids(&c), vec!["41", "43"]);

        let _ = gate_tx.send_timeout((), Duration::from_secs(1));
        assert!(c.wait_settled(WAIT));
        assert!(c.error_message().is_none());
        let post = transport
            .requests()
            .into_iter()
            .find(|r| r.method == crate::transport::Method::Post)
            .unwrap();
        assert_eq!(post.url, "http://backend/resolve-escalation/42");

        // The backend lags and still lists 42: it comes back.
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["41", "42", "43"]);
    }

    #[test]
    fn test_resolve_failure_is_reported_without_rollback() {
        let truth = Arc::new(Mutex::new(vec![escalation(1), escalation(2)]));
        let transport = escalation_backend(truth, None, Err(FetchError::Http(500)));
        let mut c = escalation_controller(transport);
        c.refresh();
        assert!(c.wait_settled(WAIT));

        assert!(c.resolve_item(&RecordId::new("1")));
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["2"]);
        assert_eq!(c.phase(), Phase::Success);
        assert_eq!(
            c.error_message(),
            Some("failed to resolve 1: backend returned HTTP 500")
        );
    }

    #[test]
    fn test_resolve_negative_ack_is_failure() {
        let truth = Arc::new(Mutex::new(vec![escalation(5)]));
        let transport = escalation_backend(truth, None, Ok(json!({"resolved": false})));
        let mut c = escalation_controller(transport);
        c.refresh();
        assert!(c.wait_settled(WAIT));
        c.resolve_item(&RecordId::new("5"));
        assert!(c.wait_settled(WAIT));
        assert!(c.error_message().unwrap().contains("not resolved"));
    }

    #[test]
    fn test_resolve_unknown_id_removes_nothing() {
        let truth = Arc::new(Mutex::new(vec![escalation(1)]));
        let transport = escalation_backend(truth, None, Ok(json!({"resolved": true})));
        let mut c = escalation_controller(transport);
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert!(!c.resolve_item(&RecordId::new("99")));
        assert_eq!(ids(&c), vec!["1"]);
        assert!(c.wait_settled(WAIT));
    }

    #[test]
    fn test_client_page_uses_query_that_was_sent() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let transport = MockTransport::new(move |_| {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            ok_json(json!({"status": "success", "escalations": [
                {"run_id": 1, "subject": "alpha"},
                {"run_id": 2, "subject": "beta"},
            ]}))
        });
        let mut c = escalation_controller(transport);
        c.query_mut().set_limit(1);
        c.query_mut().set_free_text("alpha");
        c.refresh();

        // Edited after the fetch went out; must not shape its page.
        c.query_mut().set_free_text("beta");
        c.query_mut().set_limit(5);

        let _ = gate_tx.send_timeout((), Duration::from_secs(1));
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["1"]);
        assert_eq!(c.page().unwrap().limit, 1);
        assert!(c.has_next());
    }

    #[test]
    fn test_resolve_refused_on_view_without_endpoint() {
        let transport = MockTransport::new(|_| ok_json(json!([{"id": 3, "subject": "x"}])));
        let mut c = logs_controller(transport.clone());
        c.refresh();
        assert!(c.wait_settled(WAIT));

        assert!(!c.resolve_item(&RecordId::new("3")));
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["3"]);
        assert!(transport
            .requests()
            .iter()
            .all(|r| r.method == crate::transport::Method::Get));
    }

    #[test]
    fn test_client_strategy_filters_locally() {
        let truth = Arc::new(Mutex::new((1..=5).map(escalation).collect::<Vec<_>>()));
        let transport = escalation_backend(truth, None, Ok(json!({})));
        let mut c = escalation_controller(transport.clone());
        c.query_mut().set_limit(2);
        c.query_mut().set_free_text("case");
        c.apply_filter_and_search();
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["1", "2"]);
        assert!(c.next_page());
        assert!(c.wait_settled(WAIT));
        assert_eq!(ids(&c), vec!["3", "4"]);
        assert!(transport.requests().iter().all(|r| r.params.is_empty()));
    }

    #[test]
    fn test_polling_repeats_until_stopped() {
        let transport = MockTransport::new(|_| ok_json(json!([])));
        let mut c = logs_controller(transport.clone());

        assert!(c.start_polling(Duration::from_millis(30)));
        assert!(!c.start_polling(Duration::from_millis(30)));
        assert!(c.is_polling());

        let deadline = Instant::now() + WAIT;
        while transport.request_count() < 3 && Instant::now() < deadline {
            c.wait_event(Duration::from_millis(50));
        }
        assert!(transport.request_count() >= 3);

        c.stop_polling();
        assert!(!c.is_polling());
        assert!(c.wait_settled(WAIT));
        let count = transport.request_count();
        std::thread::sleep(Duration::from_millis(100));
        c.pump();
        assert_eq!(transport.request_count(), count);
    }

    #[test]
    fn test_dispose_stops_everything() {
        let (_gate_tx, gate_rx) = bounded::<()>(0);
        let transport = MockTransport::new(move |_| {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            ok_json(json!([]))
        });
        let mut c = logs_controller(transport.clone());
        c.start_polling(Duration::from_millis(20));
        c.refresh();
        c.dispose();

        assert!(!c.is_polling());
        assert!(!c.is_loading());
        assert!(!c.start_polling(Duration::from_millis(20)));
        c.refresh();
        assert!(!c.is_loading());
        std::thread::sleep(Duration::from_millis(60));
        c.pump();
        assert_eq!(c.phase(), Phase::Loading);
        assert!(c.page().is_none());
    }

    #[test]
    fn test_summary_line_tracks_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = MockTransport::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ok_json(log_items("a", 3))
            } else {
                Err(FetchError::Http(500))
            }
        });
        let mut c = logs_controller(transport);
        assert_eq!(c.summary_line(), "logs: idle items=0 offset=0");
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert_eq!(c.summary_line(), "logs: success items=3 offset=0");
        c.refresh();
        assert!(c.wait_settled(WAIT));
        assert_eq!(
            c.summary_line(),
            "logs: error items=3 offset=0 error=\"backend returned HTTP 500\""
        );
    }

    #[test]
    fn test_export_rows_from_current_page() {
        let transport = MockTransport::new(|_| {
            ok_json(json!([
                {"id": 1, "subject": "a\"b"},
                {"id": 2, "subject": "c"}
            ]))
        });
        let mut c = logs_controller(transport);
        assert!(c.export_rows(&["id"]).is_empty());
        c.refresh();
        assert!(c.wait_settled(WAIT));
        let rows = c.export_rows(&["id", "subject"]);
        assert_eq!(rows, vec!["\"1\",\"a\"\"b\"", "\"2\",\"c\""]);
        assert!(c.export_csv(&["id", "subject"]).starts_with("\"id\",\"subject\"\n"));
    }
}
