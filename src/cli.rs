use crate::api::client::ApiClient;
use crate::api::resource::Resource;
use crate::api::types::{Escalation, HistoryEntry, LogEntry, Record, RecordId, Settings, Timestamp};
use crate::config::Config;
use crate::sync::controller::{ControllerConfig, ListController};
use crate::sync::export;
use crate::sync::query::{parse_date, DateRange, QueryState};
use crate::transport::Transport;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Object-safe face of a `ListController` so views of different record
/// types can share one table.
trait ListView {
    fn query_mut(&mut self) -> &mut QueryState;
    fn refresh(&mut self);
    fn apply_filter_and_search(&mut self);
    fn next_page(&mut self) -> bool;
    fn prev_page(&mut self) -> bool;
    fn start_polling(&mut self, interval: Duration) -> bool;
    fn stop_polling(&mut self);
    fn resolve_item(&mut self, id: &RecordId) -> bool;
    fn export_csv(&self, columns: &[&str]) -> String;
    fn pump(&mut self) -> bool;
    fn wait_settled(&mut self, timeout: Duration) -> bool;
    fn snapshot(&self) -> Result<Value, String>;
}

impl<T: Record> ListView for ListController<T> {
    fn query_mut(&mut self) -> &mut QueryState {
        ListController::query_mut(self)
    }

    fn refresh(&mut self) {
        ListController::refresh(self)
    }

    fn apply_filter_and_search(&mut self) {
        ListController::apply_filter_and_search(self)
    }

    fn next_page(&mut self) -> bool {
        ListController::next_page(self)
    }

    fn prev_page(&mut self) -> bool {
        ListController::prev_page(self)
    }

    fn start_polling(&mut self, interval: Duration) -> bool {
        ListController::start_polling(self, interval)
    }

    fn stop_polling(&mut self) {
        ListController::stop_polling(self)
    }

    fn resolve_item(&mut self, id: &RecordId) -> bool {
        ListController::resolve_item(self, id)
    }

    fn export_csv(&self, columns: &[&str]) -> String {
        ListController::export_csv(self, columns)
    }

    fn pump(&mut self) -> bool {
        ListController::pump(self)
    }

    fn wait_settled(&mut self, timeout: Duration) -> bool {
        ListController::wait_settled(self, timeout)
    }

    fn snapshot(&self) -> Result<Value, String> {
        serde_json::to_value(ListController::snapshot(self)).map_err(|e| e.to_string())
    }
}

pub struct CliState {
    config: Config,
    transport: Arc<dyn Transport>,
    api: ApiClient,
    views: HashMap<Resource, Box<dyn ListView>>,
}

impl CliState {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let api = ApiClient::new(
            config.backend.base_url.clone(),
            transport.clone(),
            config.backend.timeout,
        );
        CliState {
            config,
            transport,
            api,
            views: HashMap::new(),
        }
    }

    fn controller_config(&self, resource: Resource) -> ControllerConfig {
        let mut cc = ControllerConfig::for_resource(resource, self.config.backend.base_url.clone())
            .with_timeout(self.config.backend.timeout)
            .with_page_size(self.config.ui.page_size);
        if let Some(interval) = self.config.poll.for_resource(resource) {
            cc = cc.with_poll_interval(interval);
        }
        cc
    }

    fn open(&mut self, resource: Resource) -> &mut Box<dyn ListView> {
        let cc = self.controller_config(resource);
        let transport = self.transport.clone();
        self.views.entry(resource).or_insert_with(|| {
            info!(view = %resource, "opening view");
            let view: Box<dyn ListView> = match resource {
                Resource::Logs => Box::new(ListController::<LogEntry>::new(cc, transport)),
                Resource::Escalations => {
                    Box::new(ListController::<Escalation>::new(cc, transport))
                }
                Resource::History => Box::new(ListController::<HistoryEntry>::new(cc, transport)),
            };
            view
        })
    }

    fn view_mut(&mut self, resource: Resource) -> Result<&mut Box<dyn ListView>, String> {
        self.views
            .get_mut(&resource)
            .ok_or_else(|| format!("view '{}' is not open", resource))
    }

    fn pump_all(&mut self) {
        for view in self.views.values_mut() {
            view.pump();
        }
    }

    fn default_wait(&self) -> Duration {
        self.config.backend.timeout + Duration::from_secs(1)
    }
}

fn ok_response(data: Value) -> Value {
    let mut obj = match data {
        Value::Object(m) => m,
        _ => {
            let mut m = serde_json::Map::new();
            m.insert("data".to_string(), data);
            m
        }
    };
    obj.insert("ok".to_string(), Value::Bool(true));
    Value::Object(obj)
}

fn err_response(msg: &str) -> Value {
    json!({"ok": false, "error": msg})
}

fn get_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

fn get_resource(input: &Value) -> Result<Resource, String> {
    get_str(input, "view")
        .ok_or_else(|| "missing 'view' field".to_string())?
        .parse()
}

fn get_u64(input: &Value, key: &str) -> Result<Option<u64>, String> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("'{}' must be a non-negative integer", key)),
    }
}

fn get_date(input: &Value, key: &str) -> Result<Option<Option<time::Date>>, String> {
    match input.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Some(None)),
        Some(Value::String(s)) => parse_date(s)
            .map(|d| Some(Some(d)))
            .ok_or_else(|| format!("'{}' must be YYYY-MM-DD, got '{}'", key, s)),
        Some(_) => Err(format!("'{}' must be a string", key)),
    }
}

fn with_state(view: &dyn ListView, mut extra: Value) -> Result<Value, String> {
    let snapshot = view.snapshot()?;
    if let Value::Object(map) = &mut extra {
        map.insert("state".to_string(), snapshot);
    }
    Ok(ok_response(extra))
}

pub fn dispatch(state: &mut CliState, input: &Value) -> Value {
    let command = match get_str(input, "command") {
        Some(c) => c,
        None => return err_response("missing 'command' field"),
    };
    debug!(command, "cli command");
    state.pump_all();

    let result = match command {
        "open" => cmd_open(state, input),
        "close" => cmd_close(state, input),
        "set_query" => cmd_set_query(state, input),
        "clear_query" => cmd_clear_query(state, input),
        "refresh" => cmd_refresh(state, input),
        "next_page" => cmd_page(state, input, true),
        "prev_page" => cmd_page(state, input, false),
        "wait" => cmd_wait(state, input),
        "state" => cmd_state(state, input),
        "start_polling" => cmd_start_polling(state, input),
        "stop_polling" => cmd_stop_polling(state, input),
        "resolve" => cmd_resolve(state, input),
        "export" => cmd_export(state, input),
        "status" => api_value(state.api.status()),
        "analytics" => api_value(state.api.analytics()),
        "get_settings" => api_value(state.api.settings()),
        "update_settings" => cmd_update_settings(state, input),
        _ => Err(format!("unknown command '{}'", command)),
    };

    match result {
        Ok(v) => v,
        Err(e) => {
            warn!(command, error = %e, "cli command failed");
            err_response(&e)
        }
    }
}

fn api_value<T: serde::Serialize, E: std::fmt::Display>(result: Result<T, E>) -> Result<Value, String> {
    let value = result.map_err(|e| e.to_string())?;
    serde_json::to_value(value)
        .map(ok_response)
        .map_err(|e| e.to_string())
}

// --- Command handlers ---

fn cmd_open(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let resource = get_resource(input)?;
    let view = state.open(resource);
    view.refresh();
    with_state(&**view, json!({"view": resource.name()}))
}

fn cmd_close(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let resource = get_resource(input)?;
    let closed = state.views.remove(&resource).is_some();
    Ok(ok_response(json!({"view": resource.name(), "closed": closed})))
}

fn cmd_set_query(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let resource = get_resource(input)?;
    let limit = get_u64(input, "limit")?;
    let start = get_date(input, "start_date")?;
    let end = get_date(input, "end_date")?;
    let view = state.view_mut(resource)?;

    {
        let query = view.query_mut();
        if let Some(text) = get_str(input, "query") {
            query.set_free_text(text);
        }
        if let Some(sender) = get_str(input, "sender") {
            query.set_sender(sender);
        }
        if start.is_some() || end.is_some() {
            let current = query.date_range();
            query.set_date_range(DateRange {
                start: start.unwrap_or(current.start),
                end: end.unwrap_or(current.end),
            });
        }
        if let Some(limit) = limit {
            query.set_limit(u32::try_from(limit).unwrap_or(u32::MAX));
        }
    }
    view.apply_filter_and_search();
    with_state(&**view, json!({}))
}

fn cmd_clear_query(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let view = state.view_mut(get_resource(input)?)?;
    view.query_mut().reset();
    view.refresh();
    with_state(&**view, json!({}))
}

fn cmd_refresh(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let view = state.view_mut(get_resource(input)?)?;
    view.refresh();
    with_state(&**view, json!({}))
}

fn cmd_page(state: &mut CliState, input: &Value, forward: bool) -> Result<Value, String> {
    let view = state.view_mut(get_resource(input)?)?;
    let requested = if forward {
        view.next_page()
    } else {
        view.prev_page()
    };
    with_state(&**view, json!({"requested": requested}))
}

fn cmd_wait(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let timeout = get_u64(input, "timeout_ms")?
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.default_wait());
    let view = state.view_mut(get_resource(input)?)?;
    let settled = view.wait_settled(timeout);
    with_state(&**view, json!({"settled": settled}))
}

fn cmd_state(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let view = state.view_mut(get_resource(input)?)?;
    with_state(&**view, json!({}))
}

fn cmd_start_polling(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let resource = get_resource(input)?;
    let interval = match get_u64(input, "interval_ms")? {
        Some(0) => return Err("'interval_ms' must be greater than 0".to_string()),
        Some(ms) => Duration::from_millis(ms),
        None => state.controller_config(resource).poll_interval,
    };
    let view = state.view_mut(resource)?;
    let started = view.start_polling(interval);
    Ok(ok_response(json!({
        "started": started,
        "interval_ms": interval.as_millis() as u64,
    })))
}

fn cmd_stop_polling(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let view = state.view_mut(get_resource(input)?)?;
    view.stop_polling();
    Ok(ok_response(json!({})))
}

fn cmd_resolve(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let id = match input.get("id") {
        Some(Value::String(s)) => RecordId::new(s.as_str()),
        Some(Value::Number(n)) => RecordId::new(n.to_string()),
        _ => return Err("missing 'id' field".to_string()),
    };
    let resource = match get_str(input, "view") {
        Some(name) => name.parse()?,
        None => Resource::Escalations,
    };
    if resource.resolve_path().is_none() {
        return Err(format!("items in view '{}' cannot be resolved", resource));
    }

    // With the view open the removal is optimistic and the outcome shows up
    // in its state; otherwise resolve synchronously.
    match state.views.get_mut(&resource) {
        Some(view) => {
            let removed = view.resolve_item(&id);
            with_state(&**view, json!({"id": id.as_str(), "removed": removed}))
        }
        None => {
            state.api.resolve(&id).map_err(|e| e.to_string())?;
            Ok(ok_response(json!({"id": id.as_str(), "resolved": true})))
        }
    }
}

fn cmd_export(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let resource = get_resource(input)?;
    let columns: Vec<String> = match input.get("columns") {
        Some(Value::Array(cols)) => cols
            .iter()
            .map(|c| {
                c.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "'columns' must be strings".to_string())
            })
            .collect::<Result<_, _>>()?,
        _ => resource
            .default_columns()
            .iter()
            .map(|c| c.to_string())
            .collect(),
    };
    let write = input.get("write").and_then(Value::as_bool).unwrap_or(false);
    let export_dir = state.config.ui.export_dir.clone();

    let view = state.view_mut(resource)?;
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    let csv = view.export_csv(&column_refs);
    let filename = export::filename(resource.name(), Timestamp::now());

    let mut response = json!({"filename": filename, "csv": csv});
    if write {
        let path = export_dir.join(&filename);
        std::fs::write(&path, &csv)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
        info!(path = %path.display(), "exported csv");
        response["path"] = json!(path.display().to_string());
    }
    Ok(ok_response(response))
}

fn cmd_update_settings(state: &mut CliState, input: &Value) -> Result<Value, String> {
    let mut settings: Settings = state.api.settings().map_err(|e| e.to_string())?;
    if let Some(v) = input.get("notifications").and_then(Value::as_bool) {
        settings.notifications = v;
    }
    if let Some(v) = input.get("auto_reply").and_then(Value::as_bool) {
        settings.auto_reply = v;
    }
    if let Some(Value::Object(extra)) = input.get("extra") {
        for (k, v) in extra {
            settings.extra.insert(k.clone(), v.clone());
        }
    }
    api_value(state.api.update_settings(&settings))
}

pub fn run_cli(config: Config, transport: Arc<dyn Transport>) {
    let mut state = CliState::new(config, transport);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(trimmed) {
            Ok(input) => dispatch(&mut state, &input),
            Err(e) => err_response(&format!("JSON parse error: {}", e)),
        };
        let _ = serde_json::to_writer(&mut stdout, &response);
        let _ = stdout.write_all(b"\n");
        let _ = stdout.flush();
    }

    info!("cli session ended");
}

pub fn print_help_cli() {
    print!(
        r#"maildeck cli: JSON-over-stdin/stdout session mode
=================================================

Send one JSON object per line on stdin, read one JSON response per line on
stdout. Responses carry {{"ok": true, ...}} or {{"ok": false, "error": "..."}}.
Views are "logs", "escalations" and "history". Commands that touch a view
return its "state": phase, error, offset, limit, has_next, has_prev,
polling, requested_at and items.

Views
-----
open:          {{"command": "open", "view": "logs"}}          (starts a fetch)
close:         {{"command": "close", "view": "logs"}}
refresh:       {{"command": "refresh", "view": "logs"}}
wait:          {{"command": "wait", "view": "logs", "timeout_ms": 5000}}
state:         {{"command": "state", "view": "logs"}}
next_page:     {{"command": "next_page", "view": "logs"}}     ("requested": false on a short page)
prev_page:     {{"command": "prev_page", "view": "logs"}}

Filters (fields are optional; any change restarts at offset 0)
-------
set_query:     {{"command": "set_query", "view": "logs", "query": "invoice",
                 "sender": "alice@", "start_date": "2025-01-01",
                 "end_date": "2025-01-31", "limit": 20}}
clear_query:   {{"command": "clear_query", "view": "logs"}}

Polling
-------
start_polling: {{"command": "start_polling", "view": "logs", "interval_ms": 10000}}
stop_polling:  {{"command": "stop_polling", "view": "logs"}}

Actions
-------
resolve:       {{"command": "resolve", "id": "42"}}            (escalations only)
export:        {{"command": "export", "view": "history", "columns": ["run_id", "subject"],
                 "write": true}}

Dashboard
---------
status:          {{"command": "status"}}
analytics:       {{"command": "analytics"}}
get_settings:    {{"command": "get_settings"}}
update_settings: {{"command": "update_settings", "notifications": true, "auto_reply": false}}
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ok_json, MockTransport};
    use crate::transport::Method;

    fn state_with(transport: Arc<MockTransport>) -> CliState {
        let mut config = Config::default();
        config.set_base_url("http://backend").unwrap();
        CliState::new(config, transport)
    }

    fn logs_backend() -> Arc<MockTransport> {
        MockTransport::new(|req| {
            if req.url.ends_with("/logs") {
                let offset: usize = req.param("offset").unwrap_or("0").parse().unwrap();
                let items: Vec<Value> = (offset..offset + 10)
                    .map(|i| json!({"id": i, "subject": format!("invoice {}", i)}))
                    .collect();
                ok_json(Value::Array(items))
            } else {
                ok_json(json!({"status": "idle"}))
            }
        })
    }

    #[test]
    fn test_missing_command() {
        let mut state = state_with(logs_backend());
        let resp = dispatch(&mut state, &json!({"view": "logs"}));
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"], "missing 'command' field");
    }

    #[test]
    fn test_view_must_be_open() {
        let mut state = state_with(logs_backend());
        let resp = dispatch(&mut state, &json!({"command": "refresh", "view": "logs"}));
        assert_eq!(resp["error"], "view 'logs' is not open");
        let resp = dispatch(&mut state, &json!({"command": "open", "view": "inbox"}));
        assert!(resp["error"].as_str().unwrap().contains("unknown view"));
    }

    #[test]
    fn test_open_wait_and_page() {
        let transport = logs_backend();
        let mut state = state_with(transport.clone());

        let resp = dispatch(&mut state, &json!({"command": "open", "view": "logs"}));
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["state"]["phase"], "loading");

        let resp = dispatch(&mut state, &json!({"command": "wait", "view": "logs"}));
        assert_eq!(resp["settled"], true);
        assert_eq!(resp["state"]["phase"], "success");
        assert_eq!(resp["state"]["items"].as_array().unwrap().len(), 10);
        assert_eq!(resp["state"]["has_next"], true);

        let resp = dispatch(&mut state, &json!({"command": "next_page", "view": "logs"}));
        assert_eq!(resp["requested"], true);
        let resp = dispatch(&mut state, &json!({"command": "wait", "view": "logs"}));
        assert_eq!(resp["state"]["offset"], 10);
        assert_eq!(resp["state"]["items"][0]["id"], "10");
        assert_eq!(transport.requests().last().unwrap().param("offset"), Some("10"));
    }

    #[test]
    fn test_set_query_validates_dates() {
        let mut state = state_with(logs_backend());
        dispatch(&mut state, &json!({"command": "open", "view": "logs"}));
        let resp = dispatch(
            &mut state,
            &json!({"command": "set_query", "view": "logs", "start_date": "01/02/2025"}),
        );
        assert_eq!(resp["ok"], false);
        assert!(resp["error"].as_str().unwrap().contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_set_query_sends_params() {
        let transport = logs_backend();
        let mut state = state_with(transport.clone());
        dispatch(&mut state, &json!({"command": "open", "view": "logs"}));
        let resp = dispatch(
            &mut state,
            &json!({
                "command": "set_query", "view": "logs",
                "query": "invoice", "start_date": "2025-01-01", "limit": 5
            }),
        );
        assert_eq!(resp["state"]["limit"], 5);
        dispatch(&mut state, &json!({"command": "wait", "view": "logs"}));
        let req = transport.requests().pop().unwrap();
        assert_eq!(req.param("query"), Some("invoice"));
        assert_eq!(req.param("start_date"), Some("2025-01-01"));
        assert_eq!(req.param("limit"), Some("5"));
    }

    #[test]
    fn test_resolve_without_open_view_is_synchronous() {
        let transport = MockTransport::new(|req| match req.method {
            Method::Post => ok_json(json!({"resolved": true})),
            Method::Get => ok_json(json!([])),
        });
        let mut state = state_with(transport.clone());
        let resp = dispatch(&mut state, &json!({"command": "resolve", "id": 42}));
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["resolved"], true);
        assert_eq!(
            transport.requests()[0].url,
            "http://backend/resolve-escalation/42"
        );
    }

    #[test]
    fn test_resolve_rejected_for_logs_view() {
        let transport = logs_backend();
        let mut state = state_with(transport.clone());
        dispatch(&mut state, &json!({"command": "open", "view": "logs"}));
        dispatch(&mut state, &json!({"command": "wait", "view": "logs"}));
        let before = transport.request_count();

        let resp = dispatch(
            &mut state,
            &json!({"command": "resolve", "view": "logs", "id": "3"}),
        );
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"], "items in view 'logs' cannot be resolved");
        let resp = dispatch(&mut state, &json!({"command": "state", "view": "logs"}));
        assert_eq!(resp["state"]["items"].as_array().unwrap().len(), 10);
        assert_eq!(transport.request_count(), before);
    }

    #[test]
    fn test_export_uses_default_columns() {
        let mut state = state_with(logs_backend());
        dispatch(&mut state, &json!({"command": "open", "view": "logs"}));
        dispatch(&mut state, &json!({"command": "wait", "view": "logs"}));
        let resp = dispatch(&mut state, &json!({"command": "export", "view": "logs"}));
        let csv = resp["csv"].as_str().unwrap();
        assert!(csv.starts_with("\"id\",\"original_sender\",\"subject\""));
        assert_eq!(csv.lines().count(), 11);
        assert!(resp["filename"].as_str().unwrap().starts_with("logs_"));
        assert!(resp.get("path").is_none());
    }

    #[test]
    fn test_status_passthrough() {
        let mut state = state_with(logs_backend());
        let resp = dispatch(&mut state, &json!({"command": "status"}));
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["state"], "idle");
    }
}
