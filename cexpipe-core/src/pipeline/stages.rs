//! The candle cleaning stages, in the order the pipeline runs them.
//!
//! Each stage takes the previous stage's whole output. Stages before
//! `reshape` work on row lists; the grid stages work on `CandleColumns`.

use std::collections::HashSet;

use serde_json::Value;

use crate::domain::{Candle, CandleColumns};

/// Parse loose page records into candles, dropping anything that is not an
/// object with an integer `unix` and finite prices and a non-negative volume.
pub fn filter_invalid(records: Vec<Value>) -> Vec<Candle> {
    records.iter().filter_map(parse_record).collect()
}

fn parse_record(record: &Value) -> Option<Candle> {
    let fields = record.as_object()?;
    let unix = fields.get("unix")?.as_i64()?;
    let price = |key: &str| fields.get(key)?.as_f64().filter(|v| v.is_finite());
    let candle = Candle {
        unix,
        open: price("open")?,
        high: price("high")?,
        low: price("low")?,
        close: price("close")?,
        volume: price("volume").filter(|v| *v >= 0.0)?,
    };
    Some(candle)
}

/// Keep the first candle seen for each timestamp, in arrival order.
pub fn dedupe_first(candles: Vec<Candle>) -> Vec<Candle> {
    let mut seen = HashSet::with_capacity(candles.len());
    candles.into_iter().filter(|c| seen.insert(c.unix)).collect()
}

pub fn sort_by_time(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.unix);
    candles
}

pub fn reshape(candles: Vec<Candle>) -> CandleColumns {
    candles.into_iter().collect()
}

/// Fill every `interval` grid point from the first to the last timestamp.
///
/// A grid point takes the first sample in `(point - interval, point]` and
/// is stamped with the grid time, so no sample moves to an earlier point. A point with no sample becomes a flat
/// zero-volume candle at the previous close; before any sample that is the
/// first observed close. Input must be sorted ascending.
pub fn gap_fill(columns: &CandleColumns, interval: i64) -> CandleColumns {
    let (Some(&first), Some(&last)) = (columns.unix.first(), columns.unix.last()) else {
        return CandleColumns::default();
    };
    let interval = interval.max(1);
    let points = ((last - first) / interval + 1) as usize;
    let mut out = CandleColumns::with_capacity(points);
    let mut previous_close = columns.close[0];
    let mut next = 0;

    let mut point = first;
    while point <= last {
        while next < columns.len() && point - columns.unix[next] >= interval {
            next += 1;
        }
        let candle = match columns.get(next).filter(|c| c.unix <= point) {
            Some(sample) => {
                next += 1;
                Candle {
                    unix: point,
                    ..sample
                }
            }
            None => Candle::flat(point, previous_close),
        };
        previous_close = candle.close;
        out.push(candle);
        point += interval;
    }
    out
}

/// Keep candles with `start < unix <= end`.
pub fn window(columns: CandleColumns, start: i64, end: i64) -> CandleColumns {
    columns.retain(|c| c.unix > start && c.unix <= end)
}

/// Drop leading zero-volume candles. Everything from the first traded
/// candle on is kept.
pub fn left_strip(columns: CandleColumns) -> CandleColumns {
    let mut trading = false;
    columns.retain(|c| {
        trading |= c.volume > 0.0;
        trading
    })
}

pub fn normalize(columns: CandleColumns) -> Vec<Candle> {
    columns.iter().map(Candle::normalized).collect()
}

/// Run every stage after fetching over raw `records`.
pub fn clean(records: Vec<Value>, interval: i64, start: i64, end: i64) -> Vec<Candle> {
    let candles = sort_by_time(dedupe_first(filter_invalid(records)));
    let filled = gap_fill(&reshape(candles), interval);
    normalize(left_strip(window(filled, start, end)))
}
