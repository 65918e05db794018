//! Kraken public REST API.
//!
//! Every answer is wrapped as `{"error": [...], "result": {...}}`, and the
//! result is keyed by Kraken's own long pair name (e.g. `XXBTZUSD`), which
//! is not the name the request used.

use serde_json::Value;

use super::{
    candle_record, cell, int, interval_code, levels, malformed, num, page_records, unsupported,
    Adapter, AdapterError,
};
use crate::domain::{Book, Exchange, Method, NormalizedRecord, Operation, Pair, RequestDescriptor};

const LIVE: &str = "https://api.kraken.com/0/public";

/// Interval in seconds to the minute count Kraken expects.
const INTERVALS: &[(i64, &str)] = &[
    (60, "1"),
    (300, "5"),
    (900, "15"),
    (1800, "30"),
    (3600, "60"),
    (14400, "240"),
    (86400, "1440"),
    (604800, "10080"),
    (1296000, "21600"),
];

#[derive(Debug, Clone)]
pub struct Kraken {
    sandbox: bool,
}

impl Kraken {
    pub fn new(sandbox: bool) -> Self {
        Self { sandbox }
    }

    /// The single pair entry of `result`, skipping the `last` cursor.
    fn pair_entry(raw: &Value) -> Result<&Value, AdapterError> {
        let ex = Exchange::Kraken;
        if let Some(errors) = raw["error"].as_array() {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .map(|e| e.as_str().unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(AdapterError::Venue {
                    exchange: ex,
                    message,
                });
            }
        }
        raw["result"]
            .as_object()
            .and_then(|result| result.iter().find(|(k, _)| k.as_str() != "last"))
            .map(|(_, v)| v)
            .ok_or_else(|| malformed(ex, "result has no pair entry"))
    }
}

impl Adapter for Kraken {
    fn exchange(&self) -> Exchange {
        Exchange::Kraken
    }

    fn base_url(&self) -> Result<&'static str, AdapterError> {
        if self.sandbox {
            return Err(AdapterError::NoSandbox(Exchange::Kraken));
        }
        Ok(LIVE)
    }

    fn max_candles(&self) -> usize {
        200
    }

    fn intervals(&self) -> Vec<i64> {
        INTERVALS.iter().map(|(secs, _)| *secs).collect()
    }

    fn build_request(&self, operation: &Operation, pair: &Pair) -> Result<RequestDescriptor, AdapterError> {
        let symbol = pair.symbol_for(Exchange::Kraken);
        let request = |endpoint: &str| {
            RequestDescriptor::new(Exchange::Kraken, pair, operation.clone(), Method::Get, endpoint)
                .param("pair", &symbol)
        };
        match operation {
            Operation::Price => Ok(request("/Ticker")),
            Operation::Book { depth } => Ok(request("/Depth").param("count", depth)),
            Operation::Candles { interval, start, .. } => Ok(request("/OHLC")
                .param("interval", interval_code(Exchange::Kraken, INTERVALS, *interval)?)
                .param("since", start)),
            other => Err(unsupported(Exchange::Kraken, other.name())),
        }
    }

    fn parse_response(
        &self,
        operation: &Operation,
        _pair: &Pair,
        raw: &Value,
    ) -> Result<NormalizedRecord, AdapterError> {
        let ex = Exchange::Kraken;
        let entry = Self::pair_entry(raw)?;
        match operation {
            // "c" is [last trade price, lot volume]
            Operation::Price => num(&entry["c"][0])
                .map(NormalizedRecord::Price)
                .ok_or_else(|| malformed(ex, "ticker has no last trade")),
            Operation::Book { depth } => Ok(NormalizedRecord::Book(Book::from_levels(
                levels(ex, &entry["bids"])?,
                levels(ex, &entry["asks"])?,
                *depth,
            ))),
            Operation::Candles { .. } => {
                // [time, open, high, low, close, vwap, volume, count]
                let records = page_records(ex, entry, |row| {
                    candle_record(
                        int(cell(row, 0)),
                        num(cell(row, 1)),
                        num(cell(row, 2)),
                        num(cell(row, 3)),
                        num(cell(row, 4)),
                        num(cell(row, 6)),
                    )
                })?;
                Ok(NormalizedRecord::Candles(records))
            }
            other => Err(unsupported(ex, other.name())),
        }
    }
}
