use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Epoch values below this are read as seconds, at or above as milliseconds.
/// 10^11 seconds is roughly the year 5138, 10^11 milliseconds is March 1973.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// Point in time as milliseconds since the Unix epoch (UTC).
///
/// The backend is inconsistent about units: escalation and history records
/// carry float seconds, log records carry ISO strings or milliseconds. Every
/// variant is normalized here so nothing downstream has to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn now() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    pub fn from_datetime(dt: OffsetDateTime) -> Self {
        Timestamp((dt.unix_timestamp_nanos() / 1_000_000) as i64)
    }

    /// First millisecond of `date` (UTC).
    pub fn start_of_day(date: Date) -> Self {
        Self::from_datetime(date.midnight().assume_utc())
    }

    /// Last millisecond of `date` (UTC).
    pub fn end_of_day(date: Date) -> Self {
        match date.next_day() {
            Some(next) => Timestamp(Self::start_of_day(next).0 - 1),
            None => Timestamp(i64::MAX),
        }
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Interpret a bare epoch number, seconds or milliseconds.
    pub fn from_epoch(value: i64) -> Self {
        if value.abs() < SECONDS_CUTOFF {
            Timestamp(value.saturating_mul(1000))
        } else {
            Timestamp(value)
        }
    }

    fn from_epoch_f64(value: f64) -> Self {
        if value.abs() < SECONDS_CUTOFF as f64 {
            Timestamp((value * 1000.0).round() as i64)
        } else {
            Timestamp(value.round() as i64)
        }
    }

    /// Parse the textual forms the backend emits.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Ok(n) = text.parse::<i64>() {
            return Some(Self::from_epoch(n));
        }
        if let Ok(f) = text.parse::<f64>() {
            return Some(Self::from_epoch_f64(f));
        }
        let normalized = text.replacen(' ', "T", 1);
        if let Ok(dt) = OffsetDateTime::parse(&normalized, &Rfc3339) {
            return Some(Self::from_datetime(dt));
        }
        let with_fraction =
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
        let without_fraction = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
        PrimitiveDateTime::parse(&normalized, with_fraction)
            .or_else(|_| PrimitiveDateTime::parse(&normalized, without_fraction))
            .ok()
            .map(|dt| Self::from_datetime(dt.assume_utc()))
    }

    pub fn to_rfc3339(self) -> Option<String> {
        let dt = OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128 * 1_000_000).ok()?;
        dt.format(&Rfc3339).ok()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rfc3339() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Int(n) => Ok(Timestamp::from_epoch(n)),
            RawTimestamp::Float(f) => Ok(Timestamp::from_epoch_f64(f)),
            RawTimestamp::Text(s) => Timestamp::parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
        }
    }
}

/// Record identifier. Logs use integers, runs use strings; both compare as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecordId {
    Int(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawRecordId::deserialize(deserializer)? {
            RawRecordId::Int(n) => RecordId(n.to_string()),
            RawRecordId::Text(s) => RecordId(s),
        })
    }
}

/// What the sync engine needs to know about a list item.
pub trait Record: DeserializeOwned + Serialize + Clone + Send + 'static {
    fn id(&self) -> &RecordId;
    fn timestamp(&self) -> Option<Timestamp>;
    fn sender(&self) -> Option<&str>;
    /// Content and subject text matched by the free-text filter.
    fn search_fields(&self) -> Vec<&str>;
    /// Export value for a named column, `None` when the column is unknown
    /// or the field is absent.
    fn column(&self, name: &str) -> Option<String>;
}

fn ts_column(ts: Option<Timestamp>) -> Option<String> {
    ts.map(|t| t.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(default)]
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: RecordId,
    #[serde(default)]
    pub original_sender: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub email_content: Option<String>,
    #[serde(default)]
    pub final_reply: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub validation_result: Option<ValidationResult>,
}

impl LogEntry {
    pub fn status(&self) -> &'static str {
        match &self.validation_result {
            Some(v) if v.is_valid => "Valid",
            _ => "Escalated",
        }
    }
}

impl Record for LogEntry {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    fn sender(&self) -> Option<&str> {
        self.original_sender.as_deref()
    }

    fn search_fields(&self) -> Vec<&str> {
        [&self.subject, &self.email_content]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .collect()
    }

    fn column(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.to_string()),
            "original_sender" | "sender" => self.original_sender.clone(),
            "subject" => self.subject.clone(),
            "status" => Some(self.status().to_string()),
            "timestamp" => ts_column(self.timestamp),
            "email_content" => self.email_content.clone(),
            "final_reply" => self.final_reply.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub run_id: RecordId,
    #[serde(default, alias = "original_sender")]
    pub sender: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub email_content: Option<String>,
    #[serde(default)]
    pub draft_reply: Option<String>,
    #[serde(default)]
    pub escalation_reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl Record for Escalation {
    fn id(&self) -> &RecordId {
        &self.run_id
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    fn search_fields(&self) -> Vec<&str> {
        [&self.subject, &self.email_content]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .collect()
    }

    fn column(&self, name: &str) -> Option<String> {
        match name {
            "run_id" | "id" => Some(self.run_id.to_string()),
            "sender" => self.sender.clone(),
            "subject" => self.subject.clone(),
            "timestamp" => ts_column(self.timestamp),
            "email_content" => self.email_content.clone(),
            "draft_reply" => self.draft_reply.clone(),
            "escalation_reason" => self.escalation_reason.clone(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run_id: RecordId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "original_sender")]
    pub sender: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub email_content: Option<String>,
    #[serde(default)]
    pub final_reply: Option<String>,
    #[serde(default)]
    pub rewrite_count: u32,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl Record for HistoryEntry {
    fn id(&self) -> &RecordId {
        &self.run_id
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    fn search_fields(&self) -> Vec<&str> {
        [&self.subject, &self.email_content, &self.final_reply]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .collect()
    }

    fn column(&self, name: &str) -> Option<String> {
        match name {
            "run_id" | "id" => Some(self.run_id.to_string()),
            "status" => self.status.clone(),
            "sender" => self.sender.clone(),
            "subject" => self.subject.clone(),
            "timestamp" => ts_column(self.timestamp),
            "email_content" => self.email_content.clone(),
            "final_reply" => self.final_reply.clone(),
            "rewrite_count" => Some(self.rewrite_count.to_string()),
            _ => None,
        }
    }
}

// Single-object payloads

#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    #[serde(default, alias = "status")]
    state: Option<String>,
    #[serde(default)]
    processed: Option<u64>,
    #[serde(default)]
    pending: Option<u64>,
    #[serde(default)]
    escalated: Option<u64>,
    #[serde(default)]
    metrics: BTreeMap<String, u64>,
}

/// Dashboard run status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStatus")]
pub struct Status {
    pub state: String,
    pub processed: u64,
    pub pending: u64,
    pub escalated: u64,
    pub metrics: BTreeMap<String, u64>,
}

impl From<RawStatus> for Status {
    fn from(raw: RawStatus) -> Self {
        let metric = |key: &str| raw.metrics.get(key).copied().unwrap_or(0);
        let processed = raw.processed.unwrap_or_else(|| metric("runs_sent"));
        let escalated = raw.escalated.unwrap_or_else(|| metric("runs_escalated"));
        let pending = raw.pending.unwrap_or_else(|| {
            metric("runs_started")
                .saturating_sub(metric("runs_sent"))
                .saturating_sub(metric("runs_escalated"))
        });
        Status {
            state: raw.state.unwrap_or_else(|| "unknown".to_string()),
            processed,
            pending,
            escalated,
            metrics: raw.metrics,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub notifications: bool,
    #[serde(default)]
    pub auto_reply: bool,
    /// Keys this client does not interpret; sent back untouched on update.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    #[serde(default, alias = "processed")]
    pub total: u64,
    #[serde(default)]
    pub answered: u64,
    #[serde(default)]
    pub escalated: u64,
    #[serde(default)]
    pub processed_per_day: BTreeMap<String, u64>,
}

/// Body of `POST /resolve-escalation/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveAck {
    #[serde(default)]
    pub resolved: Option<bool>,
}
