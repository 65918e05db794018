//! Candle pipeline.
//!
//! Fetches OHLCV pages for a widened window through the executor, then
//! cleans them into a gap-free `CandleSeries` on `(start, end]`:
//!
//! 1. deepen the window ([`paginate::deepen`])
//! 2. fetch overlapping pages ([`paginate::plan_pages`])
//! 3. filter invalid records
//! 4. dedupe, keeping the first arrival
//! 5. sort by time
//! 6. reshape into columns
//! 7. gap-fill as previous close
//! 8. window to `(start, end]`
//! 9. strip leading zero-volume candles
//! 10. sanity-normalize each candle
//!
//! A run that fails for any reason other than a fatal one starts over from
//! step 1. Restarts are unbounded unless `max_restarts` is set, and an open
//! circuit breaker stops them.

pub mod paginate;
pub mod stages;

pub use paginate::{deepen, plan_pages, DeepWindow, PageWindow};

use chrono::Utc;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde_json::Value;

use crate::adapter::{malformed, Adapter, AdapterError};
use crate::config::PipelineConfig;
use crate::domain::{CandleSeries, NormalizedRecord, Operation, Pair};
use crate::error::CexError;
use crate::executor::Executor;

pub struct CandlePipeline<'a> {
    adapter: &'a dyn Adapter,
    executor: &'a Executor,
    config: &'a PipelineConfig,
}

impl<'a> CandlePipeline<'a> {
    pub fn new(adapter: &'a dyn Adapter, executor: &'a Executor, config: &'a PipelineConfig) -> Self {
        Self {
            adapter,
            executor,
            config,
        }
    }

    /// Default window: `default_candles` intervals up to now.
    pub fn resolve_window(&self, interval: i64, start: Option<i64>, end: Option<i64>) -> (i64, i64) {
        let end = end.unwrap_or_else(|| Utc::now().timestamp());
        let start = start.unwrap_or(end - self.config.default_candles * interval);
        (start, end)
    }

    /// Candles for `pair` on `interval` seconds covering `(start, end]`.
    pub fn run(
        &self,
        pair: &Pair,
        interval: i64,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<CandleSeries, CexError> {
        let exchange = self.adapter.exchange();
        if !self.adapter.supports_interval(interval) {
            warn!("{exchange} {pair}: {interval}s candles not supported");
            return Err(AdapterError::Unsupported {
                exchange,
                what: format!("{interval}s candles"),
            }
            .into());
        }

        let (start, end) = self.resolve_window(interval, start, end);
        if start >= end {
            return Ok(CandleSeries::empty(interval, start, end));
        }

        let mut restarts = 0u32;
        loop {
            let err = match self.run_once(pair, interval, start, end) {
                Ok(series) => return Ok(series),
                Err(e) if is_final(&e) => return Err(e),
                Err(e) => e,
            };
            error!("{exchange} {pair} candles failed (restart {restarts}): {err}");

            if self.config.max_restarts.is_some_and(|max| restarts >= max) {
                return Err(CexError::PipelineAborted {
                    restarts,
                    last_error: err.to_string(),
                });
            }
            if let Some(breaker) = self.executor.breaker() {
                if !breaker.is_allowed() {
                    return Err(CexError::CircuitOpen {
                        remaining_secs: breaker.remaining_cooldown().as_secs(),
                    });
                }
            }
            restarts += 1;
        }
    }

    fn run_once(&self, pair: &Pair, interval: i64, start: i64, end: i64) -> Result<CandleSeries, CexError> {
        let window = deepen(start, end, interval, self.config);
        let pages = plan_pages(window, interval, self.adapter.max_candles(), self.config.overlap);
        debug!(
            "{} {pair}: fetching {interval}s candles in {} page(s)",
            self.adapter.exchange(),
            pages.len()
        );

        let fetched: Vec<Vec<Value>> = if self.config.parallel_pages && pages.len() > 1 {
            pages
                .par_iter()
                .map(|page| self.fetch_page(pair, interval, page))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            pages
                .iter()
                .map(|page| self.fetch_page(pair, interval, page))
                .collect::<Result<Vec<_>, _>>()?
        };
        let records: Vec<Value> = fetched.into_iter().flatten().collect();
        debug!("{pair}: {} raw record(s)", records.len());

        let candles = stages::clean(records, interval, start, end);
        info!(
            "{} {pair}: {} {interval}s candle(s) on ({start}, {end}]",
            self.adapter.exchange(),
            candles.len()
        );
        Ok(CandleSeries {
            interval,
            start,
            end,
            candles,
        })
    }

    fn fetch_page(&self, pair: &Pair, interval: i64, page: &PageWindow) -> Result<Vec<Value>, CexError> {
        let operation = Operation::Candles {
            interval,
            start: page.start,
            end: page.end,
        };
        let descriptor = self.adapter.build_request(&operation, pair)?;
        let Some(raw) = self.executor.call(self.adapter, &descriptor)?.into_payload()? else {
            debug!("{pair}: page {} came back empty", page.call);
            return Ok(Vec::new());
        };
        match self.adapter.parse_response(&operation, pair, &raw)? {
            NormalizedRecord::Candles(records) => Ok(records),
            other => Err(malformed(
                self.adapter.exchange(),
                format!("expected a candle page, got {}", other.kind()),
            )
            .into()),
        }
    }
}

/// Errors a fresh run cannot fix. A rejected request would be rejected again.
fn is_final(err: &CexError) -> bool {
    err.is_fatal() || matches!(err, CexError::Rejected { .. })
}
