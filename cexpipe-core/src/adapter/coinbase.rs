//! Coinbase Exchange public REST API.

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

use super::{
    candle_record, cell, field_num, int, levels, malformed, num, page_records, unsupported,
    Adapter, AdapterError,
};
use crate::domain::{Book, Exchange, Method, NormalizedRecord, Operation, Pair, RequestDescriptor};

const LIVE: &str = "https://api.exchange.coinbase.com";
const SANDBOX: &str = "https://api-public.sandbox.exchange.coinbase.com";

/// Granularities the candles endpoint accepts, in seconds.
const GRANULARITIES: [i64; 6] = [60, 300, 900, 3600, 21600, 86400];

#[derive(Debug, Clone)]
pub struct Coinbase {
    sandbox: bool,
}

impl Coinbase {
    pub fn new(sandbox: bool) -> Self {
        Self { sandbox }
    }
}

fn iso8601(unix: i64) -> Result<String, AdapterError> {
    DateTime::from_timestamp(unix, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| malformed(Exchange::Coinbase, format!("timestamp {unix} out of range")))
}

impl Adapter for Coinbase {
    fn exchange(&self) -> Exchange {
        Exchange::Coinbase
    }

    fn base_url(&self) -> Result<&'static str, AdapterError> {
        Ok(if self.sandbox { SANDBOX } else { LIVE })
    }

    fn max_candles(&self) -> usize {
        300
    }

    fn intervals(&self) -> Vec<i64> {
        GRANULARITIES.to_vec()
    }

    fn build_request(&self, operation: &Operation, pair: &Pair) -> Result<RequestDescriptor, AdapterError> {
        let product = pair.symbol_for(Exchange::Coinbase);
        let request = |endpoint: String| {
            RequestDescriptor::new(Exchange::Coinbase, pair, operation.clone(), Method::Get, endpoint)
        };
        match operation {
            Operation::Price => Ok(request(format!("/products/{product}/ticker"))),
            Operation::Book { .. } => Ok(request(format!("/products/{product}/book")).param("level", 2)),
            Operation::Candles {
                interval,
                start,
                end,
            } => {
                if !GRANULARITIES.contains(interval) {
                    return Err(unsupported(Exchange::Coinbase, format!("{interval}s candles")));
                }
                Ok(request(format!("/products/{product}/candles"))
                    .param("granularity", interval)
                    .param("start", iso8601(*start)?)
                    .param("end", iso8601(*end)?))
            }
            other => Err(unsupported(Exchange::Coinbase, other.name())),
        }
    }

    fn parse_response(
        &self,
        operation: &Operation,
        _pair: &Pair,
        raw: &Value,
    ) -> Result<NormalizedRecord, AdapterError> {
        let ex = Exchange::Coinbase;
        match operation {
            Operation::Price => Ok(NormalizedRecord::Price(field_num(ex, raw, "price")?)),
            Operation::Book { depth } => Ok(NormalizedRecord::Book(Book::from_levels(
                levels(ex, &raw["bids"])?,
                levels(ex, &raw["asks"])?,
                *depth,
            ))),
            Operation::Candles { .. } => {
                // [time, low, high, open, close, volume]
                let records = page_records(ex, raw, |row| {
                    candle_record(
                        int(cell(row, 0)),
                        num(cell(row, 3)),
                        num(cell(row, 2)),
                        num(cell(row, 1)),
                        num(cell(row, 4)),
                        num(cell(row, 5)),
                    )
                })?;
                Ok(NormalizedRecord::Candles(records))
            }
            other => Err(unsupported(ex, other.name())),
        }
    }
}
