//! Normalized records produced by adapters.
//!
//! Every backend's raw response is reduced to one of these shapes before it
//! reaches the caller. Sign conventions are resolved here: quantities are
//! always non-negative and the side is carried explicitly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Order book snapshot, best level first on each side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub bid_price: Vec<f64>,
    pub bid_volume: Vec<f64>,
    pub ask_price: Vec<f64>,
    pub ask_volume: Vec<f64>,
}

impl Book {
    /// Build a book from unsorted `(price, volume)` levels.
    ///
    /// Bids are sorted descending, asks ascending, and each side is cut to
    /// `depth` levels.
    pub fn from_levels(mut bids: Vec<(f64, f64)>, mut asks: Vec<(f64, f64)>, depth: usize) -> Self {
        bids.sort_by(|a, b| b.0.total_cmp(&a.0));
        asks.sort_by(|a, b| a.0.total_cmp(&b.0));
        bids.truncate(depth);
        asks.truncate(depth);
        Self {
            bid_price: bids.iter().map(|l| l.0).collect(),
            bid_volume: bids.iter().map(|l| l.1).collect(),
            ask_price: asks.iter().map(|l| l.0).collect(),
            ask_volume: asks.iter().map(|l| l.1).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bid_price.is_empty() && self.ask_price.is_empty()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bid_price.first().copied()
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.ask_price.first().copied()
    }
}

/// One resting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOrder {
    pub order_id: String,
    pub side: Side,
    pub price: f64,
    pub start_qty: f64,
    pub current_qty: f64,
    pub executed_qty: f64,
}

impl NormalizedOrder {
    /// From a venue that reports original and executed quantity.
    pub fn from_executed(order_id: String, side: Side, price: f64, start: f64, executed: f64) -> Self {
        Self {
            order_id,
            side,
            price,
            start_qty: start,
            current_qty: start - executed,
            executed_qty: executed,
        }
    }

    /// From a venue that reports original and remaining quantity, where a
    /// negative original quantity marks a sell.
    pub fn from_signed_remaining(order_id: String, price: f64, start: f64, current: f64) -> Self {
        let side = if start < 0.0 { Side::Sell } else { Side::Buy };
        Self {
            order_id,
            side,
            price,
            start_qty: start.abs(),
            current_qty: current.abs(),
            executed_qty: (start - current).abs(),
        }
    }
}

/// Open orders in one market, split by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orders {
    pub bids: Vec<NormalizedOrder>,
    pub asks: Vec<NormalizedOrder>,
    pub bid_sum: f64,
    pub ask_sum: f64,
}

impl Orders {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &NormalizedOrder> {
        self.bids.iter().chain(self.asks.iter())
    }
}

impl FromIterator<NormalizedOrder> for Orders {
    fn from_iter<I: IntoIterator<Item = NormalizedOrder>>(iter: I) -> Self {
        let mut orders = Orders::default();
        for order in iter {
            match order.side {
                Side::Buy => {
                    orders.bid_sum += order.current_qty;
                    orders.bids.push(order);
                }
                Side::Sell => {
                    orders.ask_sum += order.current_qty;
                    orders.asks.push(order);
                }
            }
        }
        orders
    }
}

/// Account balances for both legs of a pair. Missing accounts read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    pub asset_total: f64,
    pub asset_free: f64,
    pub asset_tied: f64,
    pub currency_total: f64,
    pub currency_free: f64,
    pub currency_tied: f64,
}

/// A limit order as requested by the caller, before venue precision rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub amount: f64,
    pub price: f64,
}

/// Assets quoted to one decimal place of quantity.
const ONE_DECIMAL_ASSETS: [&str; 8] = ["MKR", "BCH", "ETH", "BSV", "DASH", "XMR", "LTC", "ZEC"];

fn round_down(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).trunc() / scale
}

impl OrderRequest {
    /// Round amount and price down to the precision the venues accept for
    /// `asset`. Fractional amounts are first shaved by one part per million so
    /// that float error cannot round them above the requested size.
    pub fn rounded_for(&self, asset: &str) -> Self {
        let mut price = round_down(self.price, 8);
        let mut amount = self.amount;
        if amount.fract() != 0.0 {
            amount *= 0.999_999;
        }
        if asset == "BTC" {
            amount = round_down(amount, 3);
            price = round_down(price, 2);
        } else if ONE_DECIMAL_ASSETS.contains(&asset) {
            amount = round_down(amount, 1);
        } else {
            amount = amount.trunc();
        }
        Self {
            side: self.side,
            amount,
            price,
        }
    }
}

/// Outcome of cancelling every open order in a market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelReport {
    pub cancelled: Vec<String>,
    /// `(order_id, reason)` for each order that could not be cancelled,
    /// typically because it filled after the open-order snapshot.
    pub failed: Vec<(String, String)>,
}

impl CancelReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What an adapter hands back after parsing one raw response.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRecord {
    Price(f64),
    Book(Book),
    Orders(Orders),
    Balances(Balances),
    /// A raw page of OHLCV records, one JSON object per candle with the keys
    /// `unix`, `open`, `high`, `low`, `close` and `volume`.
    Candles(Vec<Value>),
    /// Acknowledgement of a write operation (place or cancel).
    Ack(Value),
}

impl NormalizedRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedRecord::Price(_) => "price",
            NormalizedRecord::Book(_) => "book",
            NormalizedRecord::Orders(_) => "orders",
            NormalizedRecord::Balances(_) => "balances",
            NormalizedRecord::Candles(_) => "candles",
            NormalizedRecord::Ack(_) => "ack",
        }
    }
}
