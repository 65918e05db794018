//! Window deepening and page planning.
//!
//! A candle request is widened before it is fetched: `lead_intervals` extra
//! intervals in front so the first requested bucket has a previous close to
//! gap-fill from, and `interval + skew_secs` behind so the last bucket is
//! not lost to exchange clock skew. The widened window is then cut into
//! pages no larger than the venue's page size, each page overlapping its
//! neighbours by `overlap` intervals on both sides.

use crate::config::PipelineConfig;

/// The widened fetch window `(begin, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepWindow {
    pub begin: i64,
    pub stop: i64,
}

/// Widen `(start, end]` for fetching.
pub fn deepen(start: i64, end: i64, interval: i64, config: &PipelineConfig) -> DeepWindow {
    DeepWindow {
        begin: start - config.lead_intervals * interval,
        stop: end + interval + config.skew_secs,
    }
}

/// One page request. `call` counts down to 1, which is the newest page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub call: u32,
    pub start: i64,
    pub end: i64,
}

/// Cut `window` into page requests of at most `max_candles` candles.
///
/// The usable page size is `max_candles - (2 * overlap + 1)`, which leaves
/// room for the overlap on both sides plus the boundary bucket. A window
/// that fits one page yields exactly one page covering it unchanged.
pub fn plan_pages(window: DeepWindow, interval: i64, max_candles: usize, overlap: i64) -> Vec<PageWindow> {
    let interval = interval.max(1);
    let usable = (max_candles as i64 - (2 * overlap + 1)).max(1);
    let span = usable * interval;
    let depth = ceil_div(window.stop - window.begin, interval).max(0);
    let calls = ceil_div(depth, usable).max(1);

    if calls == 1 {
        return vec![PageWindow {
            call: 1,
            start: window.begin,
            end: window.stop,
        }];
    }

    (1..=calls)
        .rev()
        .map(|call| PageWindow {
            call: call as u32,
            start: window.stop - call * span - overlap * interval,
            end: window.stop - (call - 1) * span + overlap * interval,
        })
        .collect()
}

fn ceil_div(a: i64, b: i64) -> i64 {
    if a <= 0 {
        0
    } else {
        (a + b - 1) / b
    }
}
