//! Domain types: pairs, nonces, requests, candles, and normalized records.

pub mod candle;
pub mod pair;
pub mod records;
pub mod request;

pub use candle::{Candle, CandleColumns, CandleSeries};
pub use pair::{Exchange, Nonce, Pair};
pub use records::{
    Balances, Book, CancelReport, NormalizedOrder, NormalizedRecord, OrderRequest, Orders, Side,
};
pub use request::{encode_query, Method, Operation, RequestDescriptor, WireRequest};
