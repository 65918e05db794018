//! Bitfinex v2 REST API.
//!
//! Responses are positional arrays. Private calls are POSTs with a JSON body
//! signed with HMAC-SHA384 over `/api/{path}{nonce}{body}`. Sell orders carry
//! negative amounts, which normalization flips.

use serde_json::{json, Value};

use super::sign::hmac_sha384_hex;
use super::{
    candle_record, cell, id_text, int, interval_code, malformed, num, page_records, unsupported,
    Adapter, AdapterError,
};
use crate::config::Credentials;
use crate::domain::{
    Balances, Book, Exchange, Method, Nonce, NormalizedOrder, NormalizedRecord, Operation, Orders,
    Pair, RequestDescriptor, Side, WireRequest,
};

const PUBLIC: &str = "https://api-pub.bitfinex.com/v2";
const PRIVATE: &str = "https://api.bitfinex.com/v2";

const INTERVALS: &[(i64, &str)] = &[
    (60, "1m"),
    (300, "5m"),
    (900, "15m"),
    (1800, "30m"),
    (3600, "1h"),
    (10800, "3h"),
    (21600, "6h"),
    (43200, "12h"),
    (86400, "1D"),
    (604800, "1W"),
    (1209600, "14D"),
    (2592000, "1M"),
];

// Positions within a v2 order array.
const ORDER_ID: usize = 0;
const ORDER_AMOUNT: usize = 6;
const ORDER_AMOUNT_ORIG: usize = 7;
const ORDER_PRICE: usize = 16;

#[derive(Debug, Clone)]
pub struct Bitfinex {
    sandbox: bool,
}

impl Bitfinex {
    pub fn new(sandbox: bool) -> Self {
        Self { sandbox }
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Adapter for Bitfinex {
    fn exchange(&self) -> Exchange {
        Exchange::Bitfinex
    }

    fn base_url(&self) -> Result<&'static str, AdapterError> {
        if self.sandbox {
            return Err(AdapterError::NoSandbox(Exchange::Bitfinex));
        }
        Ok(PUBLIC)
    }

    fn max_candles(&self) -> usize {
        10_000
    }

    fn intervals(&self) -> Vec<i64> {
        INTERVALS.iter().map(|(secs, _)| *secs).collect()
    }

    fn build_request(&self, operation: &Operation, pair: &Pair) -> Result<RequestDescriptor, AdapterError> {
        let symbol = pair.symbol_for(Exchange::Bitfinex);
        let request = |method, endpoint: String| {
            RequestDescriptor::new(Exchange::Bitfinex, pair, operation.clone(), method, endpoint)
        };
        Ok(match operation {
            Operation::Price => request(Method::Get, format!("/ticker/{symbol}")),
            Operation::Book { depth } => {
                let len = if *depth <= 25 { 25 } else { 100 };
                request(Method::Get, format!("/book/{symbol}/P0")).param("len", len)
            }
            Operation::Candles {
                interval,
                start,
                end,
            } => {
                let code = interval_code(Exchange::Bitfinex, INTERVALS, *interval)?;
                let mut d = request(Method::Get, format!("/candles/trade:{code}:{symbol}/hist"))
                    .param("start", start * 1000);
                // An end in the future makes the venue return nothing.
                if *end < now_secs() {
                    d = d.param("end", end * 1000);
                }
                d.param("limit", self.max_candles()).param("sort", 1)
            }
            Operation::Balances => request(Method::Post, "/auth/r/wallets".into()).body(json!({})),
            Operation::OpenOrders => {
                request(Method::Post, format!("/auth/r/orders/{symbol}")).body(json!({}))
            }
            Operation::PlaceOrder(order) => {
                let amount = match order.side {
                    Side::Buy => order.amount,
                    Side::Sell => -order.amount,
                };
                request(Method::Post, "/auth/w/order/submit".into()).body(json!({
                    "type": "EXCHANGE LIMIT",
                    "symbol": symbol,
                    "amount": amount.to_string(),
                    "price": order.price.to_string(),
                }))
            }
            Operation::Cancel { order_id } => {
                let id: i64 = order_id
                    .parse()
                    .map_err(|_| malformed(Exchange::Bitfinex, format!("order id '{order_id}' is not numeric")))?;
                request(Method::Post, "/auth/w/order/cancel".into()).body(json!({ "id": id }))
            }
            Operation::CancelAll => return Err(unsupported(Exchange::Bitfinex, "bulk cancel")),
        })
    }

    fn finalize(
        &self,
        descriptor: &RequestDescriptor,
        credentials: Option<&Credentials>,
    ) -> Result<WireRequest, AdapterError> {
        let base = self.base_url()?;
        if !descriptor.operation.is_private() {
            return Ok(super::public_wire(base, descriptor));
        }
        let credentials = credentials.ok_or(AdapterError::MissingCredentials(Exchange::Bitfinex))?;
        let nonce = descriptor.nonce.unwrap_or_else(Nonce::next).as_micros().to_string();
        let body = descriptor
            .body
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "{}".into());
        let payload = format!("/api/v2{}{nonce}{body}", descriptor.endpoint);
        let signature = hmac_sha384_hex(&credentials.secret, &payload)?;

        let mut headers = descriptor.headers.clone();
        headers.push(("bfx-nonce".into(), nonce));
        headers.push(("bfx-apikey".into(), credentials.key.clone()));
        headers.push(("bfx-signature".into(), signature));
        Ok(WireRequest {
            method: descriptor.method,
            url: format!("{PRIVATE}{}", descriptor.endpoint),
            query: descriptor.params.clone(),
            body: Some(body),
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
        let ex = Exchange::Bitfinex;
        let rows = || {
            raw.as_array()
                .ok_or_else(|| malformed(ex, format!("{} response is not an array", operation.name())))
        };
        match operation {
            // [BID, BID_SIZE, ASK, ASK_SIZE, CHANGE, CHANGE_REL, LAST_PRICE, ...]
            Operation::Price => num(&raw[6])
                .map(NormalizedRecord::Price)
                .ok_or_else(|| malformed(ex, "ticker has no last price")),
            Operation::Book { depth } => {
                // [PRICE, COUNT, AMOUNT]; negative amounts are asks
                let mut bids = Vec::new();
                let mut asks = Vec::new();
                for level in rows()? {
                    match (num(&level[0]), num(&level[2])) {
                        (Some(price), Some(amount)) if amount >= 0.0 => bids.push((price, amount)),
                        (Some(price), Some(amount)) => asks.push((price, -amount)),
                        _ => return Err(malformed(ex, format!("bad book level {level}"))),
                    }
                }
                Ok(NormalizedRecord::Book(Book::from_levels(bids, asks, *depth)))
            }
            Operation::Candles { start, end, .. } => {
                // [MTS, OPEN, CLOSE, HIGH, LOW, VOLUME]
                let records = page_records(ex, raw, |row| {
                    candle_record(
                        int(cell(row, 0)).map(|ms| ms / 1000),
                        num(cell(row, 1)),
                        num(cell(row, 3)),
                        num(cell(row, 4)),
                        num(cell(row, 2)),
                        num(cell(row, 5)),
                    )
                })?
                .into_iter()
                .filter(|r| match r["unix"].as_i64() {
                    Some(t) => *start <= t && t <= *end,
                    None => true,
                })
                .collect();
                Ok(NormalizedRecord::Candles(records))
            }
            Operation::Balances => {
                // [TYPE, CURRENCY, BALANCE, UNSETTLED, AVAILABLE]
                let wallets = rows()?;
                let find = |code: &str| -> (f64, f64) {
                    wallets
                        .iter()
                        .find(|w| w[0] == "exchange" && w[1] == code)
                        .map(|w| {
                            let total = num(&w[2]).unwrap_or(0.0);
                            let free = num(&w[4]).unwrap_or(total);
                            (total, free)
                        })
                        .unwrap_or((0.0, 0.0))
                };
                let (asset_total, asset_free) = find(pair.asset());
                let (currency_total, currency_free) = find(pair.currency());
                Ok(NormalizedRecord::Balances(Balances {
                    asset_total,
                    asset_free,
                    asset_tied: asset_total - asset_free,
                    currency_total,
                    currency_free,
                    currency_tied: currency_total - currency_free,
                }))
            }
            Operation::OpenOrders => {
                let orders = rows()?
                    .iter()
                    .map(|o| {
                        match (num(&o[ORDER_PRICE]), num(&o[ORDER_AMOUNT_ORIG]), num(&o[ORDER_AMOUNT])) {
                            (Some(price), Some(start), Some(current)) => Ok(
                                NormalizedOrder::from_signed_remaining(id_text(&o[ORDER_ID]), price, start, current),
                            ),
                            _ => Err(malformed(ex, format!("bad order {o}"))),
                        }
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
