use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single round trip to the backend.
///
/// `Display` strings double as the operator-facing error message, so keep
/// them short and free of internal detail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("backend returned HTTP {0}")]
    Http(u16),
    #[error("backend did not respond within {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("request superseded")]
    Aborted,
    #[error("could not reach backend: {0}")]
    Network(String),
    #[error("unexpected response from backend: {0}")]
    Decode(String),
    #[error("backend reported an error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Request {
            method: Method::Get,
            url: url.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Option<Value>) -> Self {
        Request {
            method: Method::Post,
            url: url.into(),
            params: Vec::new(),
            body,
        }
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    /// Look up a query parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A 2xx response body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// The only seam between the sync engine and the network.
///
/// Implementations must be stateless between calls: one instance is shared
/// by every controller and session in the process. Non-2xx answers are
/// reported as `FetchError::Http`.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &Request) -> Result<RawResponse, FetchError>;
}

/// Join a base URL and an endpoint path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    /// `socket_timeout` bounds the underlying socket. Sessions enforce their
    /// own deadline on top of it, so it only has to be generous enough to
    /// reclaim abandoned connections eventually.
    pub fn new(socket_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(socket_timeout)
            .timeout(socket_timeout)
            .build();
        HttpTransport { agent }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &Request) -> Result<RawResponse, FetchError> {
        debug!(
            method = ?request.method,
            url = %request.url,
            params = ?request.params,
            "sending request"
        );

        let mut req = match request.method {
            Method::Get => self.agent.get(&request.url),
            Method::Post => self.agent.post(&request.url),
        };
        for (key, value) in &request.params {
            req = req.query(key, value);
        }

        let result = match (&request.method, &request.body) {
            (Method::Post, Some(body)) => req.send_json(body),
            (Method::Post, None) => req.send_string(""),
            (Method::Get, _) => req.call(),
        };

        match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .into_string()
                    .map_err(|e| FetchError::Network(format!("failed to read response: {}", e)))?;
                debug!(status, bytes = body.len(), "response received");
                Ok(RawResponse { status, body })
            }
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                warn!(code, body = %truncate_str(&body, 200), "backend returned error status");
                Err(FetchError::Http(code))
            }
            Err(ureq::Error::Transport(e)) => {
                warn!(error = %e, url = %request.url, "transport error");
                Err(FetchError::Network(e.to_string()))
            }
        }
    }
}

fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Handler = dyn Fn(&Request) -> Result<RawResponse, FetchError> + Send + Sync;

    /// Transport double that answers through a closure and records every
    /// request it sees, in arrival order.
    pub(crate) struct MockTransport {
        handler: Box<Handler>,
        requests: Mutex<Vec<Request>>,
    }

    impl MockTransport {
        pub(crate) fn new<F>(handler: F) -> Arc<Self>
        where
            F: Fn(&Request) -> Result<RawResponse, FetchError> + Send + Sync + 'static,
        {
            Arc::new(MockTransport {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Transport for MockTransport {
        fn execute(&self, request: &Request) -> Result<RawResponse, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            (self.handler)(request)
        }
    }

    pub(crate) fn ok_json(body: serde_json::Value) -> Result<RawResponse, FetchError> {
        Ok(RawResponse {
            status: 200,
            body: body.to_string(),
        })
    }
}
