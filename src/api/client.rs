use super::types::{Analytics, RecordId, ResolveAck, Settings, Status};
use crate::sync::session::FetchSession;
use crate::transport::{join_url, FetchError, Request, Transport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("backend did not resolve {0}")]
    NotResolved(RecordId),
}

/// Typed one-shot calls for the endpoints that return a single object.
///
/// Every call goes through a `FetchSession`, so the same deadline applies as
/// for list fetches.
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        ApiClient {
            base_url: base_url.into(),
            transport,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    fn call(&self, request: Request) -> Result<String, ApiError> {
        debug!(url = %request.url, method = ?request.method, "api call");
        let page = FetchSession::run(self.transport.clone(), request, self.timeout)?;
        Ok(page.body)
    }

    fn get<R: DeserializeOwned>(&self, path: &str, key: &str) -> Result<R, ApiError> {
        let body = self.call(Request::get(join_url(&self.base_url, path)))?;
        Ok(decode_object(&body, key)?)
    }

    pub fn status(&self) -> Result<Status, ApiError> {
        self.get("/status", "status")
    }

    pub fn analytics(&self) -> Result<Analytics, ApiError> {
        self.get("/analytics", "analytics")
    }

    pub fn settings(&self) -> Result<Settings, ApiError> {
        self.get("/settings", "settings")
    }

    /// Send the full settings object. Returns what the backend echoes back
    /// under `settings`, or the sent value when it only acknowledges.
    pub fn update_settings(&self, settings: &Settings) -> Result<Settings, ApiError> {
        let body = serde_json::to_value(settings)
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        let url = join_url(&self.base_url, "/settings");
        let reply = self.call(Request::post(url, Some(body)))?;
        info!(
            notifications = settings.notifications,
            auto_reply = settings.auto_reply,
            "settings updated"
        );

        let value: Value = match serde_json::from_str(&reply) {
            Ok(v) => v,
            Err(_) => return Ok(settings.clone()),
        };
        check_envelope_status(&value)?;
        match value.get("settings") {
            Some(echoed @ Value::Object(_)) => serde_json::from_value(echoed.clone())
                .map_err(|e| FetchError::Decode(e.to_string()).into()),
            _ => Ok(settings.clone()),
        }
    }

    pub fn resolve(&self, id: &RecordId) -> Result<(), ApiError> {
        let url = join_url(&self.base_url, &format!("/resolve-escalation/{}", id));
        let reply = self.call(Request::post(url, None))?;
        match serde_json::from_str::<ResolveAck>(&reply) {
            Ok(ResolveAck {
                resolved: Some(false),
            }) => Err(ApiError::NotResolved(id.clone())),
            _ => {
                info!(%id, "resolved");
                Ok(())
            }
        }
    }
}

fn check_envelope_status(value: &Value) -> Result<(), FetchError> {
    let Some(status) = value.get("status").and_then(Value::as_str) else {
        return Ok(());
    };
    if status == "success" || status == "ok" {
        return Ok(());
    }
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("status '{}'", status));
    Err(FetchError::Backend(message))
}

/// Decode a single object that may arrive bare or wrapped under `key`.
fn decode_object<R: DeserializeOwned>(body: &str, key: &str) -> Result<R, FetchError> {
    let mut value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    if !value.is_object() {
        return Err(FetchError::Decode("expected a JSON object".to_string()));
    }
    let inner = match value.get_mut(key) {
        Some(inner @ Value::Object(_)) => Some(inner.take()),
        _ => None,
    };
    let value = match inner {
        Some(inner) => {
            check_envelope_status(&value)?;
            inner
        }
        None => value,
    };
    serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
}
