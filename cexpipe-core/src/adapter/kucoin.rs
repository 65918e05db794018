//! KuCoin public REST API. Answers arrive as `{"code": "200000", "data": ...}`.

use serde_json::Value;

use super::{
    candle_record, cell, field_num, int, interval_code, levels, malformed, num, page_records,
    unsupported, Adapter, AdapterError,
};
use crate::domain::{Book, Exchange, Method, NormalizedRecord, Operation, Pair, RequestDescriptor};

const LIVE: &str = "https://api.kucoin.com";
const SANDBOX: &str = "https://openapi-sandbox.kucoin.com";
const SUCCESS: &str = "200000";

const INTERVALS: &[(i64, &str)] = &[
    (60, "1min"),
    (180, "3min"),
    (300, "5min"),
    (900, "15min"),
    (1800, "30min"),
    (3600, "1hour"),
    (7200, "2hour"),
    (14400, "4hour"),
    (21600, "6hour"),
    (28800, "8hour"),
    (43200, "12hour"),
    (86400, "1day"),
    (604800, "1week"),
];

#[derive(Debug, Clone)]
pub struct Kucoin {
    sandbox: bool,
}

impl Kucoin {
    pub fn new(sandbox: bool) -> Self {
        Self { sandbox }
    }

    fn data(raw: &Value) -> Result<&Value, AdapterError> {
        match raw["code"].as_str() {
            Some(SUCCESS) => Ok(&raw["data"]),
            Some(code) => Err(AdapterError::Venue {
                exchange: Exchange::Kucoin,
                message: format!("{code}: {}", raw["msg"].as_str().unwrap_or("no message")),
            }),
            None => Err(malformed(Exchange::Kucoin, "response has no code")),
        }
    }
}

impl Adapter for Kucoin {
    fn exchange(&self) -> Exchange {
        Exchange::Kucoin
    }

    fn base_url(&self) -> Result<&'static str, AdapterError> {
        Ok(if self.sandbox { SANDBOX } else { LIVE })
    }

    fn max_candles(&self) -> usize {
        1500
    }

    fn intervals(&self) -> Vec<i64> {
        INTERVALS.iter().map(|(secs, _)| *secs).collect()
    }

    fn build_request(&self, operation: &Operation, pair: &Pair) -> Result<RequestDescriptor, AdapterError> {
        let symbol = pair.symbol_for(Exchange::Kucoin);
        let request = |endpoint: &str| {
            RequestDescriptor::new(Exchange::Kucoin, pair, operation.clone(), Method::Get, endpoint)
                .param("symbol", &symbol)
        };
        match operation {
            Operation::Price => Ok(request("/api/v1/market/orderbook/level1")),
            Operation::Book { depth } => Ok(request(if *depth <= 20 {
                "/api/v1/market/orderbook/level2_20"
            } else {
                "/api/v1/market/orderbook/level2_100"
            })),
            Operation::Candles {
                interval,
                start,
                end,
            } => Ok(request("/api/v1/market/candles")
                .param("type", interval_code(Exchange::Kucoin, INTERVALS, *interval)?)
                .param("startAt", start)
                .param("endAt", end)),
            other => Err(unsupported(Exchange::Kucoin, other.name())),
        }
    }

    fn parse_response(
        &self,
        operation: &Operation,
        _pair: &Pair,
        raw: &Value,
    ) -> Result<NormalizedRecord, AdapterError> {
        let ex = Exchange::Kucoin;
        let data = Self::data(raw)?;
        match operation {
            Operation::Price => Ok(NormalizedRecord::Price(field_num(ex, data, "price")?)),
            Operation::Book { depth } => Ok(NormalizedRecord::Book(Book::from_levels(
                levels(ex, &data["bids"])?,
                levels(ex, &data["asks"])?,
                *depth,
            ))),
            Operation::Candles { .. } => {
                // [time, open, close, high, low, volume, turnover]
                let records = page_records(ex, data, |row| {
                    candle_record(
                        int(cell(row, 0)),
                        num(cell(row, 1)),
                        num(cell(row, 3)),
                        num(cell(row, 4)),
                        num(cell(row, 2)),
                        num(cell(row, 5)),
                    )
                })?;
                Ok(NormalizedRecord::Candles(records))
            }
            other => Err(unsupported(ex, other.name())),
        }
    }
}
