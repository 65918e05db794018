//! Request descriptors.
//!
//! An adapter turns an `Operation` into a `RequestDescriptor` (endpoint,
//! method, ordered parameters). The executor clones the descriptor for every
//! attempt, stamps a fresh `Nonce`, and asks the adapter to finalize it into a
//! `WireRequest`: the exact bytes a worker puts on the network.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::pair::{Exchange, Nonce, Pair};
use super::records::OrderRequest;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// A logical operation against one market.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Price,
    Book { depth: usize },
    /// Candles with timestamps in `[start, end]`, `interval` seconds apart.
    Candles { interval: i64, start: i64, end: i64 },
    Balances,
    OpenOrders,
    PlaceOrder(OrderRequest),
    Cancel { order_id: String },
    CancelAll,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Price => "price",
            Operation::Book { .. } => "book",
            Operation::Candles { .. } => "candles",
            Operation::Balances => "balances",
            Operation::OpenOrders => "open_orders",
            Operation::PlaceOrder(_) => "place_order",
            Operation::Cancel { .. } => "cancel",
            Operation::CancelAll => "cancel_all",
        }
    }

    /// Whether the operation needs account credentials.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            Operation::Balances
                | Operation::OpenOrders
                | Operation::PlaceOrder(_)
                | Operation::Cancel { .. }
                | Operation::CancelAll
        )
    }
}

/// Everything needed to make one call, minus the per-attempt nonce and
/// signature.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub exchange: Exchange,
    pub pair: Pair,
    pub operation: Operation,
    /// Path relative to the adapter's base URL.
    pub endpoint: String,
    pub method: Method,
    /// Query or form parameters, in the order they are sent.
    pub params: Vec<(String, String)>,
    /// JSON body for venues that take one.
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Assigned by the executor, once per attempt.
    pub nonce: Option<Nonce>,
    pub timeout: Duration,
}

impl RequestDescriptor {
    pub fn new(exchange: Exchange, pair: &Pair, operation: Operation, method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            exchange,
            pair: pair.clone(),
            operation,
            endpoint: endpoint.into(),
            method,
            params: Vec::new(),
            body: None,
            headers: Vec::new(),
            nonce: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Append a parameter.
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }
}

/// A fully built request. Serializable so it can be piped to a worker
/// process on stdin.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub timeout_secs: u64,
}

impl WireRequest {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, _)| (k.as_str(), "<redacted>"))
            .collect();
        f.debug_struct("WireRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("body", &self.body.as_ref().map(|b| b.len()))
            .field("headers", &headers)
            .finish()
    }
}

/// Percent-encode `params` as `k=v&k=v`, leaving RFC 3986 unreserved
/// characters as-is. Signed requests hash exactly this string.
pub fn encode_query(params: &[(String, String)]) -> String {
    fn encode(out: &mut String, s: &str) {
        for b in s.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(b as char)
                }
                _ => out.push_str(&format!("%{b:02X}")),
            }
        }
    }
    let mut out = String::new();
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        encode(&mut out, k);
        out.push('=');
        encode(&mut out, v);
    }
    out
}
