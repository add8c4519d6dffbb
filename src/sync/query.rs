use crate::api::types::{Record, Timestamp};
use time::macros::format_description;
use time::Date;

pub const DEFAULT_LIMIT: u32 = 10;

/// Inclusive calendar-date bounds (UTC).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<Date>,
    pub end: Option<Date>,
}

impl DateRange {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        if let Some(start) = self.start {
            if ts < Timestamp::start_of_day(start) {
                return false;
            }
        }
        if let Some(end) = self.end {
            if ts > Timestamp::end_of_day(end) {
                return false;
            }
        }
        true
    }
}

/// Parse a `YYYY-MM-DD` date as entered in a filter.
pub fn parse_date(input: &str) -> Option<Date> {
    Date::parse(input.trim(), format_description!("[year]-[month]-[day]")).ok()
}

fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

/// Filter predicate and pagination cursor for one list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryState {
    free_text: String,
    sender: String,
    date_range: DateRange,
    limit: u32,
    offset: u32,
}

impl Default for QueryState {
    fn default() -> Self {
        QueryState::new(DEFAULT_LIMIT)
    }
}

impl QueryState {
    pub fn new(limit: u32) -> Self {
        QueryState {
            free_text: String::new(),
            sender: String::new(),
            date_range: DateRange::default(),
            limit: limit.max(1),
            offset: 0,
        }
    }

    pub fn free_text(&self) -> &str {
        &self.free_text
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn set_free_text(&mut self, text: impl Into<String>) {
        self.free_text = text.into();
    }

    pub fn set_sender(&mut self, sender: impl Into<String>) {
        self.sender = sender.into();
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.date_range = range;
    }

    /// Page boundaries are not preserved across page-size changes, so this
    /// always rewinds to the first page. A zero limit is treated as 1.
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit.max(1);
        self.offset = 0;
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.offset = offset;
    }

    /// Clear every filter and rewind; the page size is kept.
    pub fn reset(&mut self) {
        self.free_text.clear();
        self.sender.clear();
        self.date_range = DateRange::default();
        self.offset = 0;
    }

    pub fn has_filters(&self) -> bool {
        !self.free_text.trim().is_empty()
            || !self.sender.trim().is_empty()
            || !self.date_range.is_empty()
    }

    /// Query parameters for a server-side filtered request. Empty filters
    /// are left out; `limit` and `offset` are always sent.
    pub fn serialize(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let free_text = self.free_text.trim();
        if !free_text.is_empty() {
            params.push(("query".to_string(), free_text.to_string()));
        }
        let sender = self.sender.trim();
        if !sender.is_empty() {
            params.push(("sender".to_string(), sender.to_string()));
        }
        if let Some(start) = self.date_range.start {
            params.push(("start_date".to_string(), format_date(start)));
        }
        if let Some(end) = self.date_range.end {
            params.push(("end_date".to_string(), format_date(end)));
        }
        params.push(("limit".to_string(), self.limit.to_string()));
        params.push(("offset".to_string(), self.offset.to_string()));
        params
    }

    /// Client-side equivalent of the server filter.
    pub fn matches<T: Record>(&self, record: &T) -> bool {
        let free_text = self.free_text.trim().to_lowercase();
        if !free_text.is_empty()
            && !record
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&free_text))
        {
            return false;
        }

        let sender = self.sender.trim().to_lowercase();
        if !sender.is_empty() {
            match record.sender() {
                Some(s) if s.to_lowercase().contains(&sender) => {}
                _ => return false,
            }
        }

        if !self.date_range.is_empty() {
            match record.timestamp() {
                Some(ts) if self.date_range.contains(ts) => {}
                _ => return false,
            }
        }

        true
    }
}
