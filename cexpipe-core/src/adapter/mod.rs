//! Exchange adapters.
//!
//! The `Adapter` trait is everything the executor and the candle pipeline
//! know about a venue: how to describe an operation as a request, how to
//! finish (and sign) that request for one attempt, and how to turn the raw
//! JSON answer into a `NormalizedRecord`. Venue quirks stay behind this trait.
//!
//! Candle pages are handed back as loose JSON records rather than typed
//! candles; the pipeline's filter stage decides what is well-formed.

pub mod binance;
pub mod bitfinex;
pub mod coinbase;
pub mod kraken;
pub mod kucoin;
pub mod sign;

pub use binance::Binance;
pub use bitfinex::Bitfinex;
pub use coinbase::Coinbase;
pub use kraken::Kraken;
pub use kucoin::Kucoin;

use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Credentials;
use crate::domain::{Exchange, NormalizedRecord, Operation, Pair, RequestDescriptor, WireRequest};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{exchange} does not support {what}")]
    Unsupported { exchange: Exchange, what: String },

    #[error("{0} needs API credentials for this operation")]
    MissingCredentials(Exchange),

    #[error("{0} has no sandbox environment")]
    NoSandbox(Exchange),

    #[error("{exchange} response format changed: {detail}")]
    Malformed { exchange: Exchange, detail: String },

    #[error("{exchange} reported an error: {message}")]
    Venue { exchange: Exchange, message: String },

    #[error("cannot sign request: {0}")]
    Sign(String),
}

/// One venue's request building and response parsing.
pub trait Adapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Host plus API prefix, honoring the sandbox choice the adapter was
    /// built with.
    fn base_url(&self) -> Result<&'static str, AdapterError>;

    /// Most candles one page request may return.
    fn max_candles(&self) -> usize;

    /// Supported candle intervals, in seconds.
    fn intervals(&self) -> Vec<i64>;

    fn supports_interval(&self, interval: i64) -> bool {
        self.intervals().contains(&interval)
    }

    /// Whether `Operation::CancelAll` is a single native call.
    fn supports_bulk_cancel(&self) -> bool {
        false
    }

    /// Describe `operation` on `pair` as an unsigned request.
    fn build_request(&self, operation: &Operation, pair: &Pair) -> Result<RequestDescriptor, AdapterError>;

    /// Turn a descriptor stamped with its attempt nonce into the exact request
    /// to send. Venues without private endpoints only finalize public calls.
    fn finalize(
        &self,
        descriptor: &RequestDescriptor,
        _credentials: Option<&Credentials>,
    ) -> Result<WireRequest, AdapterError> {
        if descriptor.operation.is_private() {
            return Err(unsupported(self.exchange(), descriptor.operation.name()));
        }
        Ok(public_wire(self.base_url()?, descriptor))
    }

    /// Normalize the raw JSON answer to `operation`.
    fn parse_response(
        &self,
        operation: &Operation,
        pair: &Pair,
        raw: &Value,
    ) -> Result<NormalizedRecord, AdapterError>;
}

/// Adapter for `exchange`, pointed at its sandbox when `sandbox` is set.
pub fn for_exchange(exchange: Exchange, sandbox: bool) -> Box<dyn Adapter> {
    match exchange {
        Exchange::Binance => Box::new(Binance::new(sandbox)),
        Exchange::Bitfinex => Box::new(Bitfinex::new(sandbox)),
        Exchange::Coinbase => Box::new(Coinbase::new(sandbox)),
        Exchange::Kraken => Box::new(Kraken::new(sandbox)),
        Exchange::Kucoin => Box::new(Kucoin::new(sandbox)),
    }
}

pub(crate) fn unsupported(exchange: Exchange, what: impl Into<String>) -> AdapterError {
    AdapterError::Unsupported {
        exchange,
        what: what.into(),
    }
}

pub(crate) fn malformed(exchange: Exchange, detail: impl Into<String>) -> AdapterError {
    AdapterError::Malformed {
        exchange,
        detail: detail.into(),
    }
}

/// Unsigned request: base URL plus endpoint, parameters as the query string.
pub(crate) fn public_wire(base: &str, descriptor: &RequestDescriptor) -> WireRequest {
    WireRequest {
        method: descriptor.method,
        url: format!("{base}{}", descriptor.endpoint),
        query: descriptor.params.clone(),
        body: descriptor.body.as_ref().map(Value::to_string),
        headers: descriptor.headers.clone(),
        timeout_secs: descriptor.timeout.as_secs().max(1),
    }
}

/// Venue code for `interval` from a `(seconds, code)` table.
pub(crate) fn interval_code(
    exchange: Exchange,
    table: &[(i64, &'static str)],
    interval: i64,
) -> Result<&'static str, AdapterError> {
    table
        .iter()
        .find(|(secs, _)| *secs == interval)
        .map(|(_, code)| *code)
        .ok_or_else(|| unsupported(exchange, format!("{interval}s candles")))
}

/// A number sent either as JSON number or numeric string.
pub(crate) fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Order ids arrive as numbers or strings; both become plain text.
pub(crate) fn id_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn field_num(exchange: Exchange, value: &Value, key: &str) -> Result<f64, AdapterError> {
    num(&value[key]).ok_or_else(|| malformed(exchange, format!("missing numeric field '{key}'")))
}

/// One loose candle record. Missing fields become `null` and are dropped by
/// the pipeline's filter stage.
pub(crate) fn candle_record(
    unix: Option<i64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
) -> Value {
    json!({
        "unix": unix,
        "open": open,
        "high": high,
        "low": low,
        "close": close,
        "volume": volume,
    })
}

/// Map each array row of a candle page through `to_record`. Rows that are not
/// arrays pass through untouched for the filter stage to drop. The page itself
/// must be an array.
pub(crate) fn page_records(
    exchange: Exchange,
    raw: &Value,
    to_record: impl Fn(&[Value]) -> Value,
) -> Result<Vec<Value>, AdapterError> {
    let rows = raw
        .as_array()
        .ok_or_else(|| malformed(exchange, "candle page is not an array"))?;
    Ok(rows
        .iter()
        .map(|row| match row.as_array() {
            Some(cells) => to_record(cells),
            None => row.clone(),
        })
        .collect())
}

/// Cell `i` of a row, `null` when the row is short.
pub(crate) fn cell(cells: &[Value], i: usize) -> &Value {
    cells.get(i).unwrap_or(&Value::Null)
}

/// `[[price, size, ...], ...]` book levels.
pub(crate) fn levels(exchange: Exchange, raw: &Value) -> Result<Vec<(f64, f64)>, AdapterError> {
    let rows = raw
        .as_array()
        .ok_or_else(|| malformed(exchange, "book side is not an array"))?;
    rows.iter()
        .map(|row| match (num(&row[0]), num(&row[1])) {
            (Some(price), Some(size)) => Ok((price, size)),
            _ => Err(malformed(exchange, format!("bad book level {row}"))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Method;

    #[test]
    fn numbers_from_strings_and_numbers() {
        assert_eq!(num(&json!("1.5")), Some(1.5));
        assert_eq!(num(&json!(2)), Some(2.0));
        assert_eq!(num(&json!(null)), None);
        assert_eq!(int(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(int(&json!(1.0e3)), Some(1000));
    }

    #[test]
    fn every_exchange_has_an_adapter() {
        for exchange in Exchange::ALL {
            let adapter = for_exchange(exchange, false);
            assert_eq!(adapter.exchange(), exchange);
            assert!(adapter.max_candles() > 5);
            assert!(adapter.supports_interval(3600), "{exchange} lacks 1h");
        }
    }

    #[test]
    fn default_finalize_refuses_private_calls() {
        let adapter = Coinbase::new(false);
        let pair = Pair::new("BTC", "USD");
        let descriptor = RequestDescriptor::new(
            Exchange::Coinbase,
            &pair,
            Operation::Balances,
            Method::Get,
            "/accounts",
        );
        assert!(matches!(
            adapter.finalize(&descriptor, None),
            Err(AdapterError::Unsupported { .. })
        ));
    }

    #[test]
    fn levels_reject_garbage() {
        assert_eq!(
            levels(Exchange::Kraken, &json!([["1.0", "2.0", 123], [3, 4]])).unwrap(),
            vec![(1.0, 2.0), (3.0, 4.0)]
        );
        assert!(levels(Exchange::Kraken, &json!([["x"]])).is_err());
        assert!(levels(Exchange::Kraken, &json!({})).is_err());
    }
}
