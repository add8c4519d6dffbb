use super::query::QueryState;
use crate::api::types::Record;

/// Where filtering and pagination happen for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    /// The backend applies the query; the serialized QueryState is sent.
    Server,
    /// The backend returns the full list; filter and slice it locally.
    Client,
}

impl FilterStrategy {
    pub fn request_params(self, query: &QueryState) -> Vec<(String, String)> {
        match self {
            FilterStrategy::Server => query.serialize(),
            FilterStrategy::Client => Vec::new(),
        }
    }

    /// Reduce a decoded response to the page for `query`.
    ///
    /// Server results are trusted for content and order but still capped at
    /// `limit`, since a full page is the only "more available" signal.
    pub fn page_items<T: Record>(self, items: Vec<T>, query: &QueryState) -> Vec<T> {
        let limit = query.limit() as usize;
        match self {
            FilterStrategy::Server => {
                let mut items = items;
                items.truncate(limit);
                items
            }
            FilterStrategy::Client => items
                .into_iter()
                .filter(|item| query.matches(item))
                .skip(query.offset() as usize)
                .take(limit)
                .collect(),
        }
    }
}
