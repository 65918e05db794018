//! Criterion benchmarks for the candle cleaning stages.
//!
//! Benchmarks:
//! 1. Full post-fetch cleaning over overlapping, gappy pages
//! 2. Gap-fill alone over a sparse series
//! 3. Normalization alone

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use cexpipe_core::domain::{Candle, CandleColumns};
use cexpipe_core::pipeline::stages;

const INTERVAL: i64 = 60;
const BASE: i64 = 28_000_000 * INTERVAL;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_candle(i: i64) -> Candle {
    let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
    Candle {
        unix: BASE + i * INTERVAL,
        open: close - 0.3,
        high: close + 1.5,
        low: close - 1.5,
        close,
        volume: 10.0 + (i % 7) as f64,
    }
}

/// `n` candles split into pages of 500 that overlap by 4, with every
/// thirteenth candle missing.
fn make_pages(n: i64) -> Vec<Value> {
    let page = 500;
    let mut out = Vec::new();
    let mut start = 0;
    while start < n {
        for i in (start - 4).max(0)..(start + page).min(n) {
            if i % 13 != 5 {
                let c = make_candle(i);
                out.push(json!({
                    "unix": c.unix,
                    "open": c.open,
                    "high": c.high,
                    "low": c.low,
                    "close": c.close,
                    "volume": c.volume,
                }));
            }
        }
        start += page;
    }
    out
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_clean(c: &mut Criterion) {
    let mut group = c.benchmark_group("clean");
    for n in [1_000_i64, 10_000] {
        let pages = make_pages(n);
        group.bench_with_input(BenchmarkId::new("pages", n), &pages, |b, pages| {
            b.iter(|| {
                stages::clean(
                    black_box(pages.clone()),
                    INTERVAL,
                    BASE,
                    BASE + n * INTERVAL,
                )
            })
        });
    }
    group.finish();
}

fn bench_gap_fill(c: &mut Criterion) {
    let sparse: CandleColumns = (0..10_000).filter(|i| i % 3 == 0).map(make_candle).collect();
    c.bench_function("gap_fill_sparse_10k", |b| {
        b.iter(|| stages::gap_fill(black_box(&sparse), INTERVAL))
    });
}

fn bench_normalize(c: &mut Criterion) {
    let columns: CandleColumns = (0..10_000).map(make_candle).collect();
    c.bench_function("normalize_10k", |b| {
        b.iter(|| stages::normalize(black_box(columns.clone())))
    });
}

criterion_group!(benches, bench_clean, bench_gap_fill, bench_normalize);
criterion_main!(benches);
