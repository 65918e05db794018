//! Binance spot REST API.
//!
//! Private calls are signed with HMAC-SHA256 over the query string, which
//! carries `recvWindow` and a millisecond `timestamp` taken from the attempt
//! nonce.

use serde_json::Value;

use super::sign::hmac_sha256_hex;
use super::{
    candle_record, cell, field_num, id_text, int, interval_code, levels, malformed, num,
    page_records, public_wire, Adapter, AdapterError,
};
use crate::config::Credentials;
use crate::domain::{
    encode_query, Balances, Book, Exchange, Method, Nonce, NormalizedOrder, NormalizedRecord,
    Operation, Orders, Pair, RequestDescriptor, Side, WireRequest,
};

const LIVE: &str = "https://api.binance.com";
const SANDBOX: &str = "https://testnet.binance.vision";
const RECV_WINDOW_MS: u64 = 5000;
const DEPTH_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

const INTERVALS: &[(i64, &str)] = &[
    (60, "1m"),
    (180, "3m"),
    (300, "5m"),
    (900, "15m"),
    (1800, "30m"),
    (3600, "1h"),
    (7200, "2h"),
    (14400, "4h"),
    (21600, "6h"),
    (28800, "8h"),
    (43200, "12h"),
    (86400, "1d"),
    (259200, "3d"),
    (604800, "1w"),
    (2592000, "1M"),
];

#[derive(Debug, Clone)]
pub struct Binance {
    sandbox: bool,
}

impl Binance {
    pub fn new(sandbox: bool) -> Self {
        Self { sandbox }
    }

    /// Asset and currency codes as Binance spells them.
    fn codes(pair: &Pair) -> (String, String) {
        let tether = |code: &str| if code == "USD" { "USDT".to_string() } else { code.to_string() };
        (tether(pair.asset()), tether(pair.currency()))
    }
}

impl Adapter for Binance {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn base_url(&self) -> Result<&'static str, AdapterError> {
        Ok(if self.sandbox { SANDBOX } else { LIVE })
    }

    fn max_candles(&self) -> usize {
        500
    }

    fn intervals(&self) -> Vec<i64> {
        INTERVALS.iter().map(|(secs, _)| *secs).collect()
    }

    fn supports_bulk_cancel(&self) -> bool {
        true
    }

    fn build_request(&self, operation: &Operation, pair: &Pair) -> Result<RequestDescriptor, AdapterError> {
        let symbol = pair.symbol_for(Exchange::Binance);
        let request = |method, endpoint: &str| {
            RequestDescriptor::new(Exchange::Binance, pair, operation.clone(), method, endpoint)
        };
        Ok(match operation {
            Operation::Price => request(Method::Get, "/api/v3/ticker/price").param("symbol", &symbol),
            Operation::Book { depth } => {
                let limit = DEPTH_LIMITS
                    .iter()
                    .copied()
                    .find(|l| l >= depth)
                    .unwrap_or(DEPTH_LIMITS[DEPTH_LIMITS.len() - 1]);
                request(Method::Get, "/api/v3/depth")
                    .param("symbol", &symbol)
                    .param("limit", limit)
            }
            Operation::Candles {
                interval,
                start,
                end,
            } => request(Method::Get, "/api/v3/klines")
                .param("symbol", &symbol)
                .param("interval", interval_code(Exchange::Binance, INTERVALS, *interval)?)
                .param("startTime", start * 1000)
                .param("endTime", end * 1000)
                .param("limit", self.max_candles()),
            Operation::Balances => request(Method::Get, "/api/v3/account"),
            Operation::OpenOrders => request(Method::Get, "/api/v3/openOrders").param("symbol", &symbol),
            Operation::PlaceOrder(order) => request(Method::Post, "/api/v3/order")
                .param("symbol", &symbol)
                .param("side", order.side.as_str().to_ascii_uppercase())
                .param("type", "LIMIT")
                .param("timeInForce", "GTC")
                .param("quantity", order.amount)
                .param("price", order.price),
            Operation::Cancel { order_id } => request(Method::Delete, "/api/v3/order")
                .param("symbol", &symbol)
                .param("orderId", order_id),
            Operation::CancelAll => request(Method::Delete, "/api/v3/openOrders").param("symbol", &symbol),
        })
    }

    fn finalize(
        &self,
        descriptor: &RequestDescriptor,
        credentials: Option<&Credentials>,
    ) -> Result<WireRequest, AdapterError> {
        let base = self.base_url()?;
        if !descriptor.operation.is_private() {
            return Ok(public_wire(base, descriptor));
        }
        let credentials = credentials.ok_or(AdapterError::MissingCredentials(Exchange::Binance))?;
        let nonce = descriptor.nonce.unwrap_or_else(Nonce::next);

        let mut params = descriptor.params.clone();
        params.push(("recvWindow".into(), RECV_WINDOW_MS.to_string()));
        params.push(("timestamp".into(), nonce.as_millis().to_string()));
        let query = encode_query(&params);
        let signature = hmac_sha256_hex(&credentials.secret, &query)?;

        let mut headers = descriptor.headers.clone();
        headers.push(("X-MBX-APIKEY".into(), credentials.key.clone()));
        Ok(WireRequest {
            method: descriptor.method,
            url: format!("{base}{}?{query}&signature={signature}", descriptor.endpoint),
            query: Vec::new(),
            body: None,
            headers,
            timeout_secs: descriptor.timeout.as_secs().max(1),
        })
    }

    fn parse_response(
        &self,
        operation: &Operation,
        pair: &Pair,
        raw: &Value,
    ) -> Result<NormalizedRecord, AdapterError> {
        let ex = Exchange::Binance;
        match operation {
            Operation::Price => Ok(NormalizedRecord::Price(field_num(ex, raw, "price")?)),
            Operation::Book { depth } => Ok(NormalizedRecord::Book(Book::from_levels(
                levels(ex, &raw["bids"])?,
                levels(ex, &raw["asks"])?,
                *depth,
            ))),
            Operation::Candles { .. } => {
                // [open time ms, open, high, low, close, volume, close time ms, ...]
                let records = page_records(ex, raw, |row| {
                    candle_record(
                        int(cell(row, 0)).map(|ms| ms / 1000),
                        num(cell(row, 1)),
                        num(cell(row, 2)),
                        num(cell(row, 3)),
                        num(cell(row, 4)),
                        num(cell(row, 5)),
                    )
                })?;
                Ok(NormalizedRecord::Candles(records))
            }
            Operation::Balances => {
                let accounts = raw["balances"]
                    .as_array()
                    .ok_or_else(|| malformed(ex, "account has no balances array"))?;
                let (asset, currency) = Self::codes(pair);
                let find = |code: &str| -> Result<(f64, f64), AdapterError> {
                    match accounts.iter().find(|a| a["asset"] == code) {
                        Some(a) => Ok((field_num(ex, a, "free")?, field_num(ex, a, "locked")?)),
                        None => Ok((0.0, 0.0)),
                    }
                };
                let (asset_free, asset_tied) = find(&asset)?;
                let (currency_free, currency_tied) = find(&currency)?;
                Ok(NormalizedRecord::Balances(Balances {
                    asset_total: asset_free + asset_tied,
                    asset_free,
                    asset_tied,
                    currency_total: currency_free + currency_tied,
                    currency_free,
                    currency_tied,
                }))
            }
            Operation::OpenOrders => {
                let rows = raw
                    .as_array()
                    .ok_or_else(|| malformed(ex, "open orders is not an array"))?;
                let orders = rows
                    .iter()
                    .map(|o| {
                        let side = match o["side"].as_str() {
                            Some("BUY") => Side::Buy,
                            Some("SELL") => Side::Sell,
                            other => return Err(malformed(ex, format!("unknown side {other:?}"))),
                        };
                        Ok(NormalizedOrder::from_executed(
                            id_text(&o["orderId"]),
                            side,
                            field_num(ex, o, "price")?,
                            field_num(ex, o, "origQty")?,
                            field_num(ex, o, "executedQty")?,
                        ))
                    })
                    .collect::<Result<Orders, AdapterError>>()?;
                Ok(NormalizedRecord::Orders(orders))
            }
            Operation::PlaceOrder(_) | Operation::Cancel { .. } | Operation::CancelAll => {
                Ok(NormalizedRecord::Ack(raw.clone()))
            }
        }
    }
}
