use super::controller::Phase;
use crate::api::client::ApiError;
use crate::api::types::{Status, Timestamp};
use tracing::warn;

/// Latest dashboard status as seen by repeated polls.
///
/// A failed poll keeps the last good status and only records the error.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMonitor {
    phase: Phase,
    status: Option<Status>,
    error_message: Option<String>,
    checked_at: Option<Timestamp>,
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMonitor {
    pub fn new() -> Self {
        StatusMonitor {
            phase: Phase::Idle,
            status: None,
            error_message: None,
            checked_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn checked_at(&self) -> Option<Timestamp> {
        self.checked_at
    }

    /// Apply one poll result. Returns whether the summary line changed.
    pub fn record(&mut self, result: Result<Status, ApiError>) -> bool {
        let before = self.summary_line();
        match result {
            Ok(status) => {
                self.status = Some(status);
                self.error_message = None;
                self.phase = Phase::Success;
                self.checked_at = Some(Timestamp::now());
            }
            Err(e) => {
                warn!(error = %e, "status poll failed");
                self.error_message = Some(e.to_string());
                self.phase = Phase::Error;
            }
        }
        self.summary_line() != before
    }

    pub fn summary_line(&self) -> String {
        let mut line = match &self.status {
            Some(s) => format!(
                "{}  processed={} pending={} escalated={}",
                s.state, s.processed, s.pending, s.escalated
            ),
            None => "status unknown".to_string(),
        };
        if let Some(e) = &self.error_message {
            line.push_str(&format!("  (stale: {})", e));
        }
        line
    }
}
