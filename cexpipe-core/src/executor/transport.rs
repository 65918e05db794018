//! Network transport for finished wire requests.
//!
//! `Transport` is the seam between the executor and the network so that the
//! retry and isolation logic can be exercised against scripted fakes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Method, WireRequest};

/// What a worker hands back through the Channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// 2xx with a JSON body.
    Ok(Value),
    /// A non-retryable refusal (4xx other than 429).
    Rejected { status: u16, body: String },
}

/// Failures worth another attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("server busy (HTTP {status})")]
    Busy { status: u16 },

    #[error("response is not JSON: {0}")]
    Decode(String),

    #[error("cannot build HTTP client: {0}")]
    Client(String),
}

/// Performs one wire request.
pub trait Transport: Send + Sync {
    fn send(&self, request: &WireRequest) -> Result<Delivery, TransportError>;
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cexpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &WireRequest) -> Result<Delivery, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Delete => self.client.delete(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.clone());
        }

        let resp = builder
            .timeout(request.timeout())
            .send()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status().as_u16();

        if status == 429 || resp.status().is_server_error() {
            return Err(TransportError::Busy { status });
        }
        let text = resp
            .text()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Ok(Delivery::Rejected { status, body: text });
        }
        serde_json::from_str(&text)
            .map(Delivery::Ok)
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
