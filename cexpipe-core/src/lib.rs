//! cexpipe core: durable exchange requests and clean candle series.
//!
//! This crate contains:
//! - Domain types (pairs, nonces, requests, candles, books, orders)
//! - The file Channel workers hand their results back through
//! - The request executor with isolated, deadline-bound attempts
//! - Exchange adapters behind one `Adapter` trait
//! - The candle pipeline (paginate, clean, gap-fill, window, normalize)
//! - `Market`, the facade tying an adapter to an executor

pub mod adapter;
pub mod channel;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod market;
pub mod pipeline;
pub mod worker;

pub use adapter::{Adapter, AdapterError};
pub use channel::{Channel, ChannelError, ChannelKey};
pub use config::{CexConfig, Credentials};
pub use domain::{Candle, CandleSeries, Exchange, Nonce, Operation, Pair};
pub use error::CexError;
pub use executor::{CallOutcome, Executor, HttpTransport, Transport};
pub use market::Market;
pub use pipeline::CandlePipeline;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across attempt threads or page
    /// fetches is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::WireRequest>();
        require_sync::<domain::WireRequest>();
        require_send::<domain::RequestDescriptor>();
        require_sync::<domain::RequestDescriptor>();
        require_send::<CandleSeries>();
        require_sync::<CandleSeries>();

        require_send::<Channel>();
        require_sync::<Channel>();
        require_send::<Executor>();
        require_sync::<Executor>();
        require_send::<executor::CircuitBreaker>();
        require_sync::<executor::CircuitBreaker>();
        require_send::<Market>();
        require_sync::<Market>();

        require_send::<CexError>();
        require_send::<Box<dyn Adapter>>();
        require_sync::<Box<dyn Adapter>>();
    }
}
