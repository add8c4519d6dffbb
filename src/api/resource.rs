use crate::sync::filter::FilterStrategy;
use crate::transport::FetchError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The list views the console knows how to synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Logs,
    Escalations,
    History,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Logs, Resource::Escalations, Resource::History];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Logs => "logs",
            Resource::Escalations => "escalations",
            Resource::History => "history",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Resource::Logs => "/logs",
            Resource::Escalations => "/email/escalations",
            Resource::History => "/email/history",
        }
    }

    /// Endpoint prefix for resolving an item, followed by `/{id}`. Only
    /// escalations can be resolved.
    pub fn resolve_path(self) -> Option<&'static str> {
        match self {
            Resource::Escalations => Some("/resolve-escalation"),
            Resource::Logs | Resource::History => None,
        }
    }

    /// Key of the list inside an object-shaped response.
    pub fn envelope_key(self) -> &'static str {
        self.name()
    }

    /// Only `/logs` understands filter and pagination parameters; the other
    /// endpoints return everything and are filtered locally until the
    /// backend grows support.
    pub fn default_strategy(self) -> FilterStrategy {
        match self {
            Resource::Logs => FilterStrategy::Server,
            Resource::Escalations | Resource::History => FilterStrategy::Client,
        }
    }

    pub fn default_poll_interval(self) -> Duration {
        match self {
            Resource::Logs => Duration::from_secs(10),
            Resource::Escalations | Resource::History => Duration::from_secs(30),
        }
    }

    pub fn default_columns(self) -> &'static [&'static str] {
        match self {
            Resource::Logs => &[
                "id",
                "original_sender",
                "subject",
                "status",
                "timestamp",
                "email_content",
                "final_reply",
            ],
            Resource::Escalations => &[
                "run_id",
                "sender",
                "subject",
                "timestamp",
                "escalation_reason",
                "email_content",
                "draft_reply",
            ],
            Resource::History => &[
                "run_id",
                "status",
                "sender",
                "subject",
                "timestamp",
                "rewrite_count",
                "email_content",
                "final_reply",
            ],
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| {
                format!(
                    "unknown view '{}' (expected logs, escalations or history)",
                    s
                )
            })
    }
}

/// Decode a list response.
///
/// Accepts a bare array, or an object carrying the list under
/// `envelope_key`. An object whose `status` is neither `success` nor `ok`
/// is a backend-reported failure and its `message` is surfaced.
pub fn decode_items<T: DeserializeOwned>(body: &str, envelope_key: &str) -> Result<Vec<T>, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => {
            let status = map.get("status").and_then(Value::as_str).map(str::to_string);
            if let Some(status) = &status {
                if status != "success" && status != "ok" {
                    let message = map
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("status '{}'", status));
                    return Err(FetchError::Backend(message));
                }
            }
            match map.remove(envelope_key) {
                Some(list @ Value::Array(_)) => list,
                Some(Value::Null) | None if status.is_some() => Value::Array(Vec::new()),
                _ => {
                    return Err(FetchError::Decode(format!(
                        "missing '{}' list",
                        envelope_key
                    )))
                }
            }
        }
        _ => return Err(FetchError::Decode("expected a JSON array".to_string())),
    };

    serde_json::from_value(list).map_err(|e| FetchError::Decode(e.to_string()))
}
