//! `Market` facade tests against a routing fake venue.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cexpipe_core::adapter::{Adapter, AdapterError};
use cexpipe_core::channel::{Channel, RetryPolicy};
use cexpipe_core::config::{CexConfig, Credentials};
use cexpipe_core::domain::{
    Exchange, Method, NormalizedOrder, NormalizedRecord, Operation, OrderRequest, Orders, Pair,
    RequestDescriptor, Side, WireRequest,
};
use cexpipe_core::executor::{Delivery, ExecutorSettings, Isolation, Transport, TransportError};
use cexpipe_core::{CexError, Executor, Market};

// ── Fakes ────────────────────────────────────────────────────────────

/// A venue whose private calls need no signature. Everything it sends is
/// a plain GET to `/{operation}` with the operation's fields as parameters.
struct Venue {
    bulk_cancel: bool,
}

impl Adapter for Venue {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn base_url(&self) -> Result<&'static str, AdapterError> {
        Ok("https://venue.test")
    }

    fn max_candles(&self) -> usize {
        100
    }

    fn intervals(&self) -> Vec<i64> {
        vec![60]
    }

    fn supports_bulk_cancel(&self) -> bool {
        self.bulk_cancel
    }

    fn build_request(&self, operation: &Operation, pair: &Pair) -> Result<RequestDescriptor, AdapterError> {
        let d = RequestDescriptor::new(
            Exchange::Binance,
            pair,
            operation.clone(),
            Method::Get,
            format!("/{}", operation.name()),
        );
        Ok(match operation {
            Operation::Book { depth } => d.param("depth", depth),
            Operation::PlaceOrder(order) => d
                .param("side", order.side.as_str())
                .param("amount", order.amount)
                .param("price", order.price),
            Operation::Cancel { order_id } => d.param("id", order_id),
            _ => d,
        })
    }

    fn finalize(
        &self,
        descriptor: &RequestDescriptor,
        credentials: Option<&Credentials>,
    ) -> Result<WireRequest, AdapterError> {
        if descriptor.operation.is_private() && credentials.is_none() {
            return Err(AdapterError::MissingCredentials(Exchange::Binance));
        }
        Ok(WireRequest {
            method: descriptor.method,
            url: format!("https://venue.test{}", descriptor.endpoint),
            query: descriptor.params.clone(),
            body: None,
            headers: Vec::new(),
            timeout_secs: 1,
        })
    }

    fn parse_response(
        &self,
        operation: &Operation,
        _pair: &Pair,
        raw: &Value,
    ) -> Result<NormalizedRecord, AdapterError> {
        Ok(match operation {
            Operation::Price => NormalizedRecord::Price(raw["price"].as_f64().unwrap_or_default()),
            Operation::OpenOrders => NormalizedRecord::Orders(
                raw.as_array()
                    .into_iter()
                    .flatten()
                    .map(|o| {
                        NormalizedOrder::from_signed_remaining(
                            o["id"].as_str().unwrap_or_default().to_string(),
                            o["price"].as_f64().unwrap_or_default(),
                            o["amount"].as_f64().unwrap_or_default(),
                            o["amount"].as_f64().unwrap_or_default(),
                        )
                    })
                    .collect::<Orders>(),
            ),
            Operation::Balances => NormalizedRecord::Balances(Default::default()),
            _ => NormalizedRecord::Ack(raw.clone()),
        })
    }
}

/// Answers by endpoint and keeps every request it saw.
struct Router {
    routes: Vec<(&'static str, Result<Delivery, TransportError>)>,
    seen: Mutex<Vec<WireRequest>>,
}

impl Router {
    fn new(routes: Vec<(&'static str, Result<Delivery, TransportError>)>) -> Arc<Self> {
        Arc::new(Self {
            routes,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self, endpoint: &str) -> Vec<WireRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(endpoint))
            .cloned()
            .collect()
    }
}

impl Transport for Router {
    fn send(&self, request: &WireRequest) -> Result<Delivery, TransportError> {
        self.seen.lock().unwrap().push(request.clone());
        let cancel_id = request
            .query
            .iter()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.as_str());
        if cancel_id == Some("filled") {
            return Ok(Delivery::Rejected {
                status: 400,
                body: "order already filled".into(),
            });
        }
        self.routes
            .iter()
            .find(|(endpoint, _)| request.url.ends_with(endpoint))
            .map(|(_, answer)| answer.clone())
            .unwrap_or(Ok(Delivery::Ok(json!({"ok": true}))))
    }
}

fn ok(value: Value) -> Result<Delivery, TransportError> {
    Ok(Delivery::Ok(value))
}

fn market(dir: &std::path::Path, venue: Venue, router: Arc<Router>, config: CexConfig) -> Market {
    let executor = Executor::new(
        ExecutorSettings {
            timeout: Duration::from_secs(2),
            attempts: 2,
            backoff_unit: Duration::from_millis(1),
            pace: Duration::ZERO,
        },
        Isolation::Thread,
        Channel::new(dir, RetryPolicy::default()),
        router,
    )
    .with_credentials(Some(Credentials {
        key: "k".into(),
        secret: "s".into(),
        passphrase: None,
    }));
    Market::new(Box::new(venue), executor, config)
}

fn open_orders() -> Value {
    json!([
        {"id": "a", "price": 100.0, "amount": 1.0},
        {"id": "filled", "price": 101.0, "amount": -2.0},
        {"id": "c", "price": 102.0, "amount": -0.5}
    ])
}

fn eth() -> Pair {
    Pair::new("ETH", "USD")
}

// ── Reads ────────────────────────────────────────────────────────────

#[test]
fn price_reads_through() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![("/price", ok(json!({"price": 2500.5})))]);
    let m = market(dir.path(), Venue { bulk_cancel: false }, router, CexConfig::default());
    assert_eq!(m.price(&eth()).unwrap(), 2500.5);
}

#[test]
fn empty_price_is_no_data_but_empty_book_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![("/price", ok(json!({}))), ("/book", ok(Value::Null))]);
    let m = market(dir.path(), Venue { bulk_cancel: false }, router, CexConfig::default());

    assert!(matches!(m.price(&eth()), Err(CexError::NoData(_))));
    assert!(m.book(&eth(), 5).unwrap().is_empty());
}

#[test]
fn book_depth_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![("/book", ok(Value::Null))]);
    let config = CexConfig {
        max_depth: 3,
        ..CexConfig::default()
    };
    let m = market(dir.path(), Venue { bulk_cancel: false }, Arc::clone(&router), config);

    m.book(&eth(), 500).unwrap();
    let sent = router.seen("/book");
    assert_eq!(sent[0].query, vec![("depth".to_string(), "3".to_string())]);
}

#[test]
fn open_orders_are_split_by_side() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![("/open_orders", ok(open_orders()))]);
    let m = market(dir.path(), Venue { bulk_cancel: false }, router, CexConfig::default());

    let orders = m.open_orders(&eth()).unwrap();
    assert_eq!(orders.bids.len(), 1);
    assert_eq!(orders.asks.len(), 2);
    assert_eq!(orders.ask_sum, 2.5);
    assert!(orders.asks.iter().all(|o| o.side == Side::Sell));
}

#[test]
fn exhausted_reads_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![(
        "/balances",
        Err(TransportError::Busy { status: 503 }),
    )]);
    let m = market(dir.path(), Venue { bulk_cancel: false }, router, CexConfig::default());

    assert!(matches!(m.balances(&eth()), Err(CexError::Exhausted { attempts: 2, .. })));
    assert!(!m.authenticate(&eth()));
}

// ── Orders ───────────────────────────────────────────────────────────

#[test]
fn orders_are_rounded_and_non_positive_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![]);
    let m = market(dir.path(), Venue { bulk_cancel: false }, Arc::clone(&router), CexConfig::default());

    let acks = m
        .place_orders(
            &eth(),
            &[
                OrderRequest {
                    side: Side::Buy,
                    amount: 1.2345,
                    price: 2000.123456789,
                },
                OrderRequest {
                    side: Side::Sell,
                    amount: 0.0,
                    price: 2100.0,
                },
            ],
        )
        .unwrap();
    assert_eq!(acks.len(), 1);

    let sent = router.seen("/place_order");
    assert_eq!(sent.len(), 1);
    let param = |k: &str| {
        sent[0]
            .query
            .iter()
            .find(|(key, _)| key == k)
            .map(|(_, v)| v.clone())
            .unwrap()
    };
    assert_eq!(param("side"), "buy");
    assert_eq!(param("amount"), "1.2");
    assert_eq!(param("price"), "2000.12345678");
}

#[test]
fn cancel_all_fallback_records_failures_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![("/open_orders", ok(open_orders()))]);
    let m = market(dir.path(), Venue { bulk_cancel: false }, Arc::clone(&router), CexConfig::default());

    let report = m.cancel_all(&eth()).unwrap();
    assert_eq!(report.cancelled, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "filled");
    assert!(!report.is_clean());
    assert_eq!(router.seen("/cancel").len(), 3);
    assert!(router.seen("/cancel_all").is_empty());
}

#[test]
fn cancel_all_uses_native_bulk_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(vec![("/open_orders", ok(open_orders()))]);
    let m = market(dir.path(), Venue { bulk_cancel: true }, Arc::clone(&router), CexConfig::default());

    let report = m.cancel_all(&eth()).unwrap();
    assert_eq!(report.cancelled.len(), 3);
    assert!(report.is_clean());
    assert_eq!(router.seen("/cancel_all").len(), 1);
    assert!(router.seen("/cancel").is_empty());
}

#[test]
fn missing_credentials_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Executor::new(
        ExecutorSettings {
            timeout: Duration::from_secs(1),
            attempts: 3,
            backoff_unit: Duration::from_millis(1),
            pace: Duration::ZERO,
        },
        Isolation::Thread,
        Channel::new(dir.path(), RetryPolicy::default()),
        Router::new(vec![]),
    );
    let m = Market::new(Box::new(Venue { bulk_cancel: false }), executor, CexConfig::default());

    let err = m.cancel(&eth(), &["x".to_string()]).unwrap_err();
    assert!(err.is_fatal());
}
