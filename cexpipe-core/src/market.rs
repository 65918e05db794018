//! `Market`: one exchange behind one executor.
//!
//! Every operation goes adapter → executor → adapter: build the request,
//! run it durably, parse what came back. An empty success becomes the
//! operation's default value (an empty book, zero balances) except for
//! `price`, where there is no sensible default and `NoData` is returned.

use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;

use crate::adapter::{self, Adapter};
use crate::config::{CexConfig, Credentials};
use crate::domain::{
    Balances, Book, CancelReport, CandleSeries, Exchange, NormalizedRecord, Operation, OrderRequest,
    Orders, Pair,
};
use crate::error::CexError;
use crate::executor::{Executor, Transport};
use crate::pipeline::CandlePipeline;

pub struct Market {
    adapter: Box<dyn Adapter>,
    executor: Executor,
    config: CexConfig,
}

impl Market {
    pub fn new(adapter: Box<dyn Adapter>, executor: Executor, config: CexConfig) -> Self {
        Self {
            adapter,
            executor,
            config,
        }
    }

    /// Market for `exchange` with the built-in adapter and an executor wired
    /// from `config`.
    pub fn from_config(
        exchange: Exchange,
        config: CexConfig,
        transport: Arc<dyn Transport>,
        credentials: Option<Credentials>,
    ) -> Result<Self, CexError> {
        config.validate()?;
        let adapter = adapter::for_exchange(exchange, config.sandbox);
        let executor = Executor::from_config(&config, transport)?.with_credentials(credentials);
        Ok(Self::new(adapter, executor, config))
    }

    pub fn exchange(&self) -> Exchange {
        self.adapter.exchange()
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn config(&self) -> &CexConfig {
        &self.config
    }

    /// Last traded price.
    pub fn price(&self, pair: &Pair) -> Result<f64, CexError> {
        match self.request(Operation::Price, pair)? {
            Some(NormalizedRecord::Price(price)) => Ok(price),
            Some(other) => Err(self.unexpected("price", &other)),
            None => Err(CexError::NoData(format!("{} {pair} price", self.exchange()))),
        }
    }

    /// Order book, best level first. `depth` is capped at `max_depth`.
    pub fn book(&self, pair: &Pair, depth: usize) -> Result<Book, CexError> {
        let depth = depth.min(self.config.max_depth);
        match self.request(Operation::Book { depth }, pair)? {
            Some(NormalizedRecord::Book(book)) => Ok(book),
            Some(other) => Err(self.unexpected("book", &other)),
            None => Ok(Book::default()),
        }
    }

    /// Gap-free candles on `(start, end]`. See [`CandlePipeline::run`].
    pub fn candles(
        &self,
        pair: &Pair,
        interval: i64,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<CandleSeries, CexError> {
        CandlePipeline::new(self.adapter.as_ref(), &self.executor, &self.config.pipeline)
            .run(pair, interval, start, end)
    }

    pub fn balances(&self, pair: &Pair) -> Result<Balances, CexError> {
        match self.request(Operation::Balances, pair)? {
            Some(NormalizedRecord::Balances(balances)) => Ok(balances),
            Some(other) => Err(self.unexpected("balances", &other)),
            None => Ok(Balances::default()),
        }
    }

    pub fn open_orders(&self, pair: &Pair) -> Result<Orders, CexError> {
        match self.request(Operation::OpenOrders, pair)? {
            Some(NormalizedRecord::Orders(orders)) => Ok(orders),
            Some(other) => Err(self.unexpected("open orders", &other)),
            None => Ok(Orders::default()),
        }
    }

    /// Round `order` to the asset's precision and post it. Returns the venue's
    /// acknowledgement.
    pub fn place_order(&self, pair: &Pair, order: OrderRequest) -> Result<Value, CexError> {
        let rounded = order.rounded_for(pair.asset());
        info!(
            "{} {pair}: {} {} @ {}",
            self.exchange(),
            rounded.side.as_str(),
            rounded.amount,
            rounded.price
        );
        self.ack(Operation::PlaceOrder(rounded), pair)
    }

    /// Post each order with a positive amount, in order.
    pub fn place_orders(&self, pair: &Pair, orders: &[OrderRequest]) -> Result<Vec<Value>, CexError> {
        orders
            .iter()
            .filter(|order| order.amount > 0.0)
            .map(|order| self.place_order(pair, *order))
            .collect()
    }

    /// Cancel each id in turn. An order that cannot be cancelled is recorded
    /// in the report and the rest still go out.
    pub fn cancel(&self, pair: &Pair, order_ids: &[String]) -> Result<CancelReport, CexError> {
        let mut report = CancelReport::default();
        for order_id in order_ids {
            let operation = Operation::Cancel {
                order_id: order_id.clone(),
            };
            match self.ack(operation, pair) {
                Ok(_) => report.cancelled.push(order_id.clone()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{} {pair}: cannot cancel {order_id}: {e}", self.exchange());
                    report.failed.push((order_id.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Cancel every open order in the market.
    ///
    /// Venues with a bulk cancel get one call, and the report lists the
    /// orders open just before it. Elsewhere the open orders are fetched and
    /// cancelled one by one as in [`Market::cancel`].
    pub fn cancel_all(&self, pair: &Pair) -> Result<CancelReport, CexError> {
        let open: Vec<String> = self
            .open_orders(pair)?
            .all()
            .map(|order| order.order_id.clone())
            .collect();

        if !self.adapter.supports_bulk_cancel() {
            return self.cancel(pair, &open);
        }
        self.ack(Operation::CancelAll, pair)?;
        Ok(CancelReport {
            cancelled: open,
            failed: Vec::new(),
        })
    }

    /// Whether the configured credentials can read balances.
    pub fn authenticate(&self, pair: &Pair) -> bool {
        match self.balances(pair) {
            Ok(_) => true,
            Err(e) => {
                warn!("{} authentication failed: {e}", self.exchange());
                false
            }
        }
    }

    fn request(&self, operation: Operation, pair: &Pair) -> Result<Option<NormalizedRecord>, CexError> {
        let descriptor = self.adapter.build_request(&operation, pair)?;
        let Some(raw) = self.executor.call(self.adapter.as_ref(), &descriptor)?.into_payload()? else {
            return Ok(None);
        };
        Ok(Some(self.adapter.parse_response(&operation, pair, &raw)?))
    }

    fn ack(&self, operation: Operation, pair: &Pair) -> Result<Value, CexError> {
        let what = operation.name();
        match self.request(operation, pair)? {
            Some(NormalizedRecord::Ack(value)) => Ok(value),
            Some(other) => Err(self.unexpected(what, &other)),
            None => Ok(Value::Null),
        }
    }

    fn unexpected(&self, wanted: &str, got: &NormalizedRecord) -> CexError {
        adapter::malformed(self.exchange(), format!("expected {wanted}, got {}", got.kind())).into()
    }
}
