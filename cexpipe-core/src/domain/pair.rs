//! Exchange identifiers, trading pairs, and per-attempt nonces.
//!
//! A `Pair` is written `ASSET:CURRENCY` (e.g. `BTC:USD`) and translated to each
//! venue's ticker syntax at the adapter boundary. A `Nonce` is the microsecond
//! timestamp of one attempt; it keys the attempt's Channel slot and doubles as
//! the replay nonce of signed requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CexError;

/// Built-in exchange backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Bitfinex,
    Coinbase,
    Kraken,
    Kucoin,
}

impl Exchange {
    pub const ALL: [Exchange; 5] = [
        Exchange::Binance,
        Exchange::Bitfinex,
        Exchange::Coinbase,
        Exchange::Kraken,
        Exchange::Kucoin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Bitfinex => "bitfinex",
            Exchange::Coinbase => "coinbase",
            Exchange::Kraken => "kraken",
            Exchange::Kucoin => "kucoin",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = CexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str() == lower)
            .ok_or_else(|| CexError::UnknownExchange(s.to_string()))
    }
}

/// A trading pair: the asset being bought or sold, priced in the currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    asset: String,
    currency: String,
}

impl Pair {
    pub fn new(asset: &str, currency: &str) -> Self {
        Self {
            asset: asset.trim().to_ascii_uppercase(),
            currency: currency.trim().to_ascii_uppercase(),
        }
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Filesystem-safe form used in Channel slot names, e.g. `BTC-USD`.
    pub fn token(&self) -> String {
        format!("{}-{}", self.asset, self.currency)
    }

    /// The pair in the venue's own ticker syntax.
    ///
    /// Colloquial codes are translated: Kraken quotes bitcoin as `XBT`, and
    /// Binance and KuCoin settle dollar pairs in `USDT`.
    pub fn symbol_for(&self, exchange: Exchange) -> String {
        let tether = |code: &str| {
            if code == "USD" {
                "USDT".to_string()
            } else {
                code.to_string()
            }
        };
        match exchange {
            Exchange::Binance => format!("{}{}", tether(&self.asset), tether(&self.currency)),
            Exchange::Bitfinex => format!("t{}{}", self.asset, self.currency),
            Exchange::Coinbase => format!("{}-{}", self.asset, self.currency),
            Exchange::Kraken => {
                let xbt = |code: &str| {
                    if code == "BTC" {
                        "XBT".to_string()
                    } else {
                        code.to_string()
                    }
                };
                format!("{}{}", xbt(&self.asset), xbt(&self.currency))
            }
            Exchange::Kucoin => format!("{}-{}", tether(&self.asset), tether(&self.currency)),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset, self.currency)
    }
}

impl FromStr for Pair {
    type Err = CexError;

    /// Accepts `BTC:USD`, `BTC-USD` or `BTC/USD` in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split([':', '-', '/']);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(asset), Some(currency), None)
                if is_code(asset.trim()) && is_code(currency.trim()) =>
            {
                Ok(Pair::new(asset, currency))
            }
            _ => Err(CexError::InvalidPair(s.to_string())),
        }
    }
}

fn is_code(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// Microsecond unix timestamp assigned to exactly one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Next nonce for this process: the current time in microseconds, bumped
    /// past the previous nonce when the clock has not advanced.
    pub fn next() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let mut prev = LAST_NONCE.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match LAST_NONCE.compare_exchange_weak(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Nonce(candidate),
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Nonce {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pair_parses_common_separators() {
        for raw in ["BTC:USD", "btc-usd", "Btc/Usd"] {
            let pair: Pair = raw.parse().unwrap();
            assert_eq!(pair.asset(), "BTC");
            assert_eq!(pair.currency(), "USD");
        }
        assert!("BTCUSD".parse::<Pair>().is_err());
        assert!("BTC:".parse::<Pair>().is_err());
        assert!("BTC:USD:EUR".parse::<Pair>().is_err());
    }

    #[test]
    fn symbol_syntax_per_exchange() {
        let pair = Pair::new("BTC", "USD");
        assert_eq!(pair.symbol_for(Exchange::Binance), "BTCUSDT");
        assert_eq!(pair.symbol_for(Exchange::Bitfinex), "tBTCUSD");
        assert_eq!(pair.symbol_for(Exchange::Coinbase), "BTC-USD");
        assert_eq!(pair.symbol_for(Exchange::Kraken), "XBTUSD");
        assert_eq!(pair.symbol_for(Exchange::Kucoin), "BTC-USDT");

        let eth = Pair::new("eth", "btc");
        assert_eq!(eth.symbol_for(Exchange::Kraken), "ETHXBT");
        assert_eq!(eth.symbol_for(Exchange::Binance), "ETHBTC");
    }

    #[test]
    fn exchange_round_trips_through_strings() {
        for exchange in Exchange::ALL {
            assert_eq!(exchange.to_string().parse::<Exchange>().unwrap(), exchange);
        }
        assert!("mtgox".parse::<Exchange>().is_err());
    }

    #[test]
    fn nonces_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..500).map(|_| Nonce::next()).collect::<Vec<_>>()))
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for n in h.join().unwrap() {
                assert!(seen.insert(n), "duplicate nonce {n}");
            }
        }
    }

    #[test]
    fn nonce_is_strictly_increasing() {
        let a = Nonce::next();
        let b = Nonce::next();
        assert!(b > a);
        assert_eq!(b.as_millis(), b.as_micros() / 1000);
    }
}
