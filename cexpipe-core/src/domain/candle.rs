//! OHLCV candle types.
//!
//! A `Candle` is one time bucket of trading activity keyed by its unix
//! timestamp (seconds). `CandleColumns` is the column-major form the pipeline
//! uses for its grid stages, and `CandleSeries` is the finished product: a
//! gap-free run of candles on a fixed interval grid.

use serde::{Deserialize, Serialize};

/// One OHLCV bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub unix: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A zero-volume candle with all four prices at `price`.
    pub fn flat(unix: i64, price: f64) -> Self {
        Self {
            unix,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// Sanity-normalize one candle.
    ///
    /// High and low are first widened to cover open and close. Wicks are then
    /// clamped to at most twice the open/close/low average above and at least
    /// half the open/close/high average below. Finally open and close are
    /// clamped into `[low, high]`.
    pub fn normalized(self) -> Self {
        let Candle {
            unix,
            open,
            mut high,
            mut low,
            close,
            volume,
        } = self;

        high = high.max(low).max(open).max(close);
        low = high.min(low).min(open).min(close);

        let avg_low = (open + close + low) / 3.0;
        let avg_high = (open + close + high) / 3.0;
        high = high.min(2.0 * avg_low);
        low = low.max(avg_high / 2.0);

        // Extreme wicks can push the two clamps past each other.
        if low > high {
            let mid = (low + high) / 2.0;
            low = mid;
            high = mid;
        }

        Self {
            unix,
            open: open.min(high).max(low),
            high,
            low,
            close: close.min(high).max(low),
            volume,
        }
    }

    /// `low <= open, close <= high` and `volume >= 0`.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.volume >= 0.0
    }
}

/// Column-major candles: parallel arrays indexed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandleColumns {
    pub unix: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl CandleColumns {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            unix: Vec::with_capacity(n),
            open: Vec::with_capacity(n),
            high: Vec::with_capacity(n),
            low: Vec::with_capacity(n),
            close: Vec::with_capacity(n),
            volume: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.unix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unix.is_empty()
    }

    pub fn push(&mut self, candle: Candle) {
        self.unix.push(candle.unix);
        self.open.push(candle.open);
        self.high.push(candle.high);
        self.low.push(candle.low);
        self.close.push(candle.close);
        self.volume.push(candle.volume);
    }

    pub fn get(&self, i: usize) -> Option<Candle> {
        Some(Candle {
            unix: *self.unix.get(i)?,
            open: *self.open.get(i)?,
            high: *self.high.get(i)?,
            low: *self.low.get(i)?,
            close: *self.close.get(i)?,
            volume: *self.volume.get(i)?,
        })
    }

    /// Keep the rows whose candle satisfies `keep`, preserving order.
    pub fn retain(self, mut keep: impl FnMut(&Candle) -> bool) -> Self {
        let mut out = CandleColumns::with_capacity(self.len());
        for candle in self.iter() {
            if keep(&candle) {
                out.push(candle);
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = Candle> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn into_candles(self) -> Vec<Candle> {
        self.iter().collect()
    }
}

impl FromIterator<Candle> for CandleColumns {
    fn from_iter<I: IntoIterator<Item = Candle>>(iter: I) -> Self {
        let mut out = CandleColumns::default();
        for candle in iter {
            out.push(candle);
        }
        out
    }
}

/// The finished, gap-free output of the candle pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    /// Grid spacing in seconds.
    pub interval: i64,
    /// Exclusive lower bound of the requested window.
    pub start: i64,
    /// Inclusive upper bound of the requested window.
    pub end: i64,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn empty(interval: i64, start: i64, end: i64) -> Self {
        Self {
            interval,
            start,
            end,
            candles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Consecutive timestamps differ by exactly `interval`.
    pub fn is_gap_free(&self) -> bool {
        self.candles
            .windows(2)
            .all(|w| w[1].unix - w[0].unix == self.interval)
    }

    /// Every timestamp lies in `(start, end]`.
    pub fn is_within_window(&self) -> bool {
        self.candles
            .iter()
            .all(|c| c.unix > self.start && c.unix <= self.end)
    }

    /// Column view of the series, e.g. for downstream vector math.
    pub fn columns(&self) -> CandleColumns {
        self.candles.iter().copied().collect()
    }
}
